//! Prometheus metrics for the chain core.
//!
//! [`ChainMetrics`] owns a dedicated [`Registry`]; [`ChainMetrics::encode`]
//! renders it in the Prometheus text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

pub struct ChainMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// New heads persisted.
    pub blocks_observed: IntCounter,
    /// New heads whose height already held a different block.
    pub reorgs_detected: IntCounter,
    /// Lookups resolved into a stored transaction.
    pub transactions_retrieved: IntCounter,
    /// Failed lookups put back on the queue.
    pub lookups_requeued: IntCounter,
    /// Lookups dropped after their lifetime elapsed.
    pub lookups_expired: IntCounter,
    /// Historic scans that gave up after every window size failed.
    pub historic_scans_failed: IntCounter,
    pub nonces_allocated: IntCounter,
    pub annotations_produced: IntCounter,
    /// Broadcasts refused outright by the network.
    pub broadcasts_rejected: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Hashes waiting in lifecycle queues across all networks.
    pub queue_depth: IntGauge,
    /// Hashes awaiting a confirmation on a new head.
    pub watched_transactions: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    pub drain_duration_ms: Histogram,
}

impl ChainMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let blocks_observed = register_int_counter_with_registry!(
            Opts::new("coffer_blocks_observed_total", "New heads persisted"),
            registry
        )
        .expect("failed to register blocks_observed counter");

        let reorgs_detected = register_int_counter_with_registry!(
            Opts::new(
                "coffer_reorgs_detected_total",
                "New heads at a height already holding a different block"
            ),
            registry
        )
        .expect("failed to register reorgs_detected counter");

        let transactions_retrieved = register_int_counter_with_registry!(
            Opts::new(
                "coffer_transactions_retrieved_total",
                "Transaction lookups resolved and stored"
            ),
            registry
        )
        .expect("failed to register transactions_retrieved counter");

        let lookups_requeued = register_int_counter_with_registry!(
            Opts::new(
                "coffer_lookups_requeued_total",
                "Failed transaction lookups re-enqueued"
            ),
            registry
        )
        .expect("failed to register lookups_requeued counter");

        let lookups_expired = register_int_counter_with_registry!(
            Opts::new(
                "coffer_lookups_expired_total",
                "Transaction lookups dropped after their lifetime"
            ),
            registry
        )
        .expect("failed to register lookups_expired counter");

        let historic_scans_failed = register_int_counter_with_registry!(
            Opts::new(
                "coffer_historic_scans_failed_total",
                "Historic transfer scans abandoned after backoff"
            ),
            registry
        )
        .expect("failed to register historic_scans_failed counter");

        let nonces_allocated = register_int_counter_with_registry!(
            Opts::new("coffer_nonces_allocated_total", "Nonces handed out"),
            registry
        )
        .expect("failed to register nonces_allocated counter");

        let annotations_produced = register_int_counter_with_registry!(
            Opts::new(
                "coffer_annotations_produced_total",
                "Transactions and requests annotated"
            ),
            registry
        )
        .expect("failed to register annotations_produced counter");

        let broadcasts_rejected = register_int_counter_with_registry!(
            Opts::new(
                "coffer_broadcasts_rejected_total",
                "Broadcasts permanently rejected by the network"
            ),
            registry
        )
        .expect("failed to register broadcasts_rejected counter");

        let queue_depth = register_int_gauge_with_registry!(
            Opts::new("coffer_lookup_queue_depth", "Hashes waiting for retrieval"),
            registry
        )
        .expect("failed to register queue_depth gauge");

        let watched_transactions = register_int_gauge_with_registry!(
            Opts::new(
                "coffer_watched_transactions",
                "Unmined transactions awaiting confirmation"
            ),
            registry
        )
        .expect("failed to register watched_transactions gauge");

        // 1 ms to ~16 s
        let drain_duration_ms = register_histogram_with_registry!(
            HistogramOpts::new("coffer_drain_duration_ms", "Queue drain time in milliseconds")
                .buckets(prometheus::exponential_buckets(1.0, 2.0, 15).unwrap_or_default()),
            registry
        )
        .expect("failed to register drain_duration_ms histogram");

        Self {
            registry,
            blocks_observed,
            reorgs_detected,
            transactions_retrieved,
            lookups_requeued,
            lookups_expired,
            historic_scans_failed,
            nonces_allocated,
            annotations_produced,
            broadcasts_rejected,
            queue_depth,
            watched_transactions,
            drain_duration_ms,
        }
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for ChainMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_metrics() {
        let metrics = ChainMetrics::new();
        metrics.reorgs_detected.inc();
        metrics.queue_depth.set(3);
        let text = metrics.encode();
        assert!(text.contains("coffer_reorgs_detected_total 1"));
        assert!(text.contains("coffer_lookup_queue_depth 3"));
    }
}
