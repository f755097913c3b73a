//! Transaction lifecycle tracker.
//!
//! Resolves bare transaction hashes into stored transaction records. Each
//! network has a FIFO queue of `(hash, first seen)` lookups, deduplicated by
//! hash. [`TransactionTracker::drain`] takes a bounded batch per call. A
//! lookup that fails goes back on the queue with its original `first_seen`,
//! so retries never extend its lifetime; once the lifetime has elapsed it is
//! dropped and an unresolved stored record is marked failed.
//!
//! Transactions found unmined move to a per-network watch list, which
//! [`TransactionTracker::check_confirmations`] polls for receipts on every
//! new head.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use coffer_gateway::{BlockId, ProviderGateway, ProviderRegistry, RpcReceipt};
use coffer_store::ChainStore;
use coffer_types::{BlockHash, Clock, EvmBlock, Network, Timestamp, Transaction, TxHash};
use tracing::{debug, info, warn, Instrument};

use crate::context::require_provider;
use crate::events::{ChainEvent, EventBus};
use crate::metrics::ChainMetrics;
use crate::tracing_spans::drain_span;
use crate::ChainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Lookups taken per drain.
    pub batch_size: usize,
    /// How long after first sight a failing lookup keeps being retried.
    pub lifetime: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            lifetime: Duration::from_secs(10 * 60 * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lookup {
    pub hash: TxHash,
    pub first_seen: Timestamp,
}

#[derive(Default)]
struct NetworkQueue {
    order: VecDeque<Lookup>,
    // Hashes queued or being processed.
    pending: HashSet<TxHash>,
    watching: HashMap<TxHash, Timestamp>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub retrieved: usize,
    pub requeued: usize,
    pub expired: usize,
}

pub struct TransactionTracker {
    config: TrackerConfig,
    store: Arc<ChainStore>,
    providers: ProviderRegistry,
    clock: Arc<dyn Clock>,
    events: EventBus,
    metrics: Arc<ChainMetrics>,
    queues: Mutex<HashMap<u64, NetworkQueue>>,
}

impl TransactionTracker {
    pub fn new(
        config: TrackerConfig,
        store: Arc<ChainStore>,
        providers: ProviderRegistry,
        clock: Arc<dyn Clock>,
        events: EventBus,
        metrics: Arc<ChainMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            providers,
            clock,
            events,
            metrics,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    // ── Queue ───────────────────────────────────────────────────────────

    /// Queue `hash` for retrieval. Returns `false` if it is already queued.
    pub fn enqueue(&self, network: &Network, hash: TxHash, first_seen: Timestamp) -> bool {
        let added = {
            let mut queues = self.lock_queues();
            let queue = queues.entry(network.chain_id).or_default();
            if queue.pending.insert(hash) {
                queue.order.push_back(Lookup { hash, first_seen });
                true
            } else {
                false
            }
        };
        if added {
            debug!(chain_id = network.chain_id, %hash, "transaction lookup queued");
            self.update_gauges();
        }
        added
    }

    /// Queued hashes in drain order.
    pub fn queued(&self, network: &Network) -> Vec<TxHash> {
        self.lock_queues()
            .get(&network.chain_id)
            .map(|q| q.order.iter().map(|l| l.hash).collect())
            .unwrap_or_default()
    }

    /// Watch an unmined transaction for its confirmation.
    pub fn watch(&self, network: &Network, hash: TxHash, first_seen: Timestamp) {
        self.lock_queues()
            .entry(network.chain_id)
            .or_default()
            .watching
            .entry(hash)
            .or_insert(first_seen);
        self.update_gauges();
    }

    pub fn watching(&self, network: &Network) -> Vec<TxHash> {
        let mut hashes: Vec<TxHash> = self
            .lock_queues()
            .get(&network.chain_id)
            .map(|q| q.watching.keys().copied().collect())
            .unwrap_or_default();
        hashes.sort();
        hashes
    }

    fn unwatch(&self, network: &Network, hash: &TxHash) {
        if let Some(queue) = self.lock_queues().get_mut(&network.chain_id) {
            queue.watching.remove(hash);
        }
        self.update_gauges();
    }

    fn take_batch(&self, chain_id: u64) -> Vec<Lookup> {
        let mut queues = self.lock_queues();
        let Some(queue) = queues.get_mut(&chain_id) else {
            return Vec::new();
        };
        let count = self.config.batch_size.min(queue.order.len());
        queue.order.drain(..count).collect()
    }

    fn requeue(&self, chain_id: u64, lookup: Lookup) {
        self.lock_queues()
            .entry(chain_id)
            .or_default()
            .order
            .push_back(lookup);
    }

    fn finish(&self, chain_id: u64, hash: &TxHash) {
        if let Some(queue) = self.lock_queues().get_mut(&chain_id) {
            queue.pending.remove(hash);
        }
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, HashMap<u64, NetworkQueue>> {
        self.queues.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn update_gauges(&self) {
        let (queued, watched) = {
            let queues = self.lock_queues();
            queues.values().fold((0, 0), |(q, w), queue| {
                (q + queue.order.len(), w + queue.watching.len())
            })
        };
        self.metrics.queue_depth.set(queued as i64);
        self.metrics.watched_transactions.set(watched as i64);
    }

    fn provider(&self, network: &Network) -> Result<Arc<dyn ProviderGateway>, ChainError> {
        require_provider(&self.providers, network)
    }

    // ── Drain ───────────────────────────────────────────────────────────

    /// Retrieve up to one batch of queued lookups for `network`.
    pub async fn drain(&self, network: &Network) -> Result<DrainReport, ChainError> {
        let provider = self.provider(network)?;
        let batch = self.take_batch(network.chain_id);
        if batch.is_empty() {
            return Ok(DrainReport::default());
        }

        let started = Instant::now();
        let span = drain_span(network.chain_id, batch.len());
        let report = async {
            let mut report = DrainReport::default();
            for lookup in batch {
                let failure = match self
                    .fetch(provider.as_ref(), network, lookup.hash, lookup.first_seen)
                    .await
                {
                    Ok(Some(_)) => None,
                    Ok(None) => Some("not found".to_string()),
                    Err(e) => Some(e.to_string()),
                };
                match failure {
                    None => {
                        report.retrieved += 1;
                        self.finish(network.chain_id, &lookup.hash);
                    }
                    Some(reason) => self.retry_or_expire(network, lookup, &reason, &mut report),
                }
            }
            report
        }
        .instrument(span)
        .await;

        self.metrics
            .drain_duration_ms
            .observe(started.elapsed().as_secs_f64() * 1_000.0);
        self.update_gauges();
        debug!(chain_id = network.chain_id, ?report, "lookup queue drained");
        Ok(report)
    }

    fn retry_or_expire(
        &self,
        network: &Network,
        lookup: Lookup,
        reason: &str,
        report: &mut DrainReport,
    ) {
        let now = self.clock.now();
        if !lookup.first_seen.has_expired(self.config.lifetime, now) {
            debug!(hash = %lookup.hash, reason, "transaction lookup failed, requeueing");
            self.metrics.lookups_requeued.inc();
            report.requeued += 1;
            self.requeue(network.chain_id, lookup);
            return;
        }

        info!(
            hash = %lookup.hash,
            reason,
            first_seen = %lookup.first_seen,
            "transaction lookup expired"
        );
        self.metrics.lookups_expired.inc();
        report.expired += 1;
        self.finish(network.chain_id, &lookup.hash);
        self.mark_dropped(network, &lookup.hash);
    }

    /// Mark a stored record that never reached an outcome as failed. A
    /// receipt stored concurrently by another path wins the merge.
    fn mark_dropped(&self, network: &Network, hash: &TxHash) {
        let existing = match self.store.get_transaction(network, hash) {
            Ok(Some(existing)) if !existing.has_outcome() => existing,
            Ok(_) => return,
            Err(e) => {
                warn!(%hash, error = %e, "could not read transaction to mark it dropped");
                return;
            }
        };
        let failed = existing.into_failed("transaction dropped: not retrievable within its lifetime");
        match self.store.add_or_update_transaction(failed) {
            Ok(stored) => self.publish(stored),
            Err(e) => warn!(%hash, error = %e, "could not mark transaction dropped"),
        }
    }

    // ── Retrieval ───────────────────────────────────────────────────────

    /// Fetch `hash` now, outside the queue.
    pub async fn retrieve(
        &self,
        network: &Network,
        hash: TxHash,
    ) -> Result<Option<Transaction>, ChainError> {
        let provider = self.provider(network)?;
        self.fetch(provider.as_ref(), network, hash, self.clock.now())
            .await
    }

    /// Fetch a transaction and, when mined, its block and receipt, then
    /// merge the result into the store. `Ok(None)` when the provider does
    /// not know the hash.
    async fn fetch(
        &self,
        provider: &dyn ProviderGateway,
        network: &Network,
        hash: TxHash,
        first_seen: Timestamp,
    ) -> Result<Option<Transaction>, ChainError> {
        let Some(observed) = provider.get_transaction(hash).await? else {
            return Ok(None);
        };
        if observed.hash != hash {
            warn!(%hash, returned = %observed.hash, "provider returned another transaction");
            return Ok(None);
        }
        let inclusion = observed.inclusion();
        let mut record = observed.into_transaction(network, first_seen);

        match inclusion {
            Some(inclusion) => {
                self.block(provider, network, inclusion.block_hash).await;
                let receipt = provider.get_transaction_receipt(hash).await?;
                match verified(receipt, &hash) {
                    Some(receipt) => record = receipt.apply_to(record),
                    None => self.watch(network, hash, first_seen),
                }
            }
            None => self.watch(network, hash, first_seen),
        }

        let stored = self.store.add_or_update_transaction(record)?;
        if stored.has_outcome() {
            self.unwatch(network, &hash);
        }
        self.metrics.transactions_retrieved.inc();
        self.publish(stored.clone());
        Ok(Some(stored))
    }

    /// Poll receipts for every watched transaction on `network`. Returns how
    /// many were confirmed (or found reverted).
    pub async fn check_confirmations(&self, network: &Network) -> Result<usize, ChainError> {
        let provider = self.provider(network)?;
        let watched: Vec<(TxHash, Timestamp)> = self
            .lock_queues()
            .get(&network.chain_id)
            .map(|q| q.watching.iter().map(|(h, t)| (*h, *t)).collect())
            .unwrap_or_default();

        let now = self.clock.now();
        let mut resolved = 0;
        for (hash, first_seen) in watched {
            let receipt = match provider.get_transaction_receipt(hash).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    debug!(%hash, error = %e, "receipt lookup failed, still watching");
                    continue;
                }
            };
            let Some(receipt) = verified(receipt, &hash) else {
                if first_seen.has_expired(self.config.lifetime, now) {
                    info!(%hash, "watched transaction never confirmed");
                    self.metrics.lookups_expired.inc();
                    self.unwatch(network, &hash);
                    self.mark_dropped(network, &hash);
                }
                continue;
            };

            self.block(provider.as_ref(), network, receipt.block_hash).await;
            let base = match self.store.get_transaction(network, &hash)? {
                Some(stored) => stored,
                None => match provider.get_transaction(hash).await {
                    Ok(Some(observed)) => observed.into_transaction(network, first_seen),
                    _ => continue,
                },
            };
            let stored = self.store.add_or_update_transaction(receipt.apply_to(base))?;
            self.unwatch(network, &hash);
            self.metrics.transactions_retrieved.inc();
            self.publish(stored);
            resolved += 1;
        }
        Ok(resolved)
    }

    /// Cache-or-fetch a block. Failures are logged; the caller carries on
    /// without it.
    async fn block(
        &self,
        provider: &dyn ProviderGateway,
        network: &Network,
        hash: BlockHash,
    ) -> Option<EvmBlock> {
        match self.store.get_block(network, &hash) {
            Ok(Some(block)) => return Some(block),
            Ok(None) => {}
            Err(e) => warn!(%hash, error = %e, "block cache read failed"),
        }
        let block = match provider.get_block(BlockId::Hash(hash)).await {
            Ok(Some(raw)) => match raw.into_block(network) {
                Ok(block) => block,
                Err(e) => {
                    warn!(%hash, error = %e, "discarding malformed block");
                    return None;
                }
            },
            Ok(None) => return None,
            Err(e) => {
                debug!(%hash, error = %e, "block fetch failed");
                return None;
            }
        };
        if let Err(e) = self.store.add_block(&block) {
            warn!(%hash, error = %e, "failed to store block");
        }
        Some(block)
    }

    fn publish(&self, transaction: Transaction) {
        let for_accounts = match self.store.tracked_accounts_on(transaction.network()) {
            Ok(accounts) => accounts
                .into_iter()
                .filter(|a| transaction.body().involves(&a.address))
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not read tracked accounts");
                Vec::new()
            }
        };
        self.events.publish(ChainEvent::Transaction {
            transaction,
            for_accounts,
        });
    }
}

/// Drop a receipt that belongs to a different transaction.
fn verified(receipt: Option<RpcReceipt>, hash: &TxHash) -> Option<RpcReceipt> {
    let receipt = receipt?;
    match receipt.ensure_for(hash) {
        Ok(()) => Some(receipt),
        Err(e) => {
            warn!(%hash, error = %e, "discarding mismatched receipt");
            None
        }
    }
}
