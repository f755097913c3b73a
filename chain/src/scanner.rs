//! Historic activity scanner.
//!
//! Backfills an account's token transfer history from `Transfer` logs in
//! block windows. A failing window is retried at half and then a quarter of
//! its size before the scan gives up. Scanned ranges are bookmarked so later
//! sweeps cover every block since the newest bookmark
//! ([`HistoricScanner::scan_recent`]) or extend one window further into the
//! past ([`HistoricScanner::scan_older`]), until the scanned blocks add up to
//! a fixed number of windows.

use std::collections::HashSet;
use std::sync::Arc;

use coffer_annotation::abi::{decode_transfer_log, transfer_topic};
use coffer_gateway::{LogFilter, ProviderError, ProviderGateway, ProviderRegistry, RpcLog};
use coffer_store::ChainStore;
use coffer_types::{AddressOnNetwork, AssetTransfer, AssetTransferLookup, Clock, TransactionLog};
use tracing::{debug, info, warn, Instrument};

use crate::context::require_provider;
use crate::events::{ChainEvent, EventBus};
use crate::metrics::ChainMetrics;
use crate::tracing_spans::scan_span;
use crate::tracker::TransactionTracker;
use crate::ChainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Blocks covered by one scan.
    pub window: u64,
    /// Blocks kept clear of the reported head, for providers lagging behind.
    pub head_margin: u64,
    /// Backfill stops once the scanned blocks add up to this many windows.
    pub max_windows: u64,
    /// Window sizes tried per scan: full, half, quarter.
    pub attempts: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            window: 128_000,
            head_margin: 20,
            max_windows: 10,
            attempts: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    Scanned {
        start: u64,
        end: u64,
        transfers: usize,
        enqueued: usize,
    },
    /// Nothing new to scan.
    UpToDate,
    /// Backfill already covers the maximum range, or genesis.
    LimitReached,
    /// Every window size failed.
    GaveUp,
}

/// The end of a range kept when a failing scan is retried smaller: the one
/// adjacent to blocks already scanned.
#[derive(Clone, Copy, Debug)]
enum Anchor {
    Start,
    End,
}

pub struct HistoricScanner {
    config: ScannerConfig,
    store: Arc<ChainStore>,
    providers: ProviderRegistry,
    tracker: Arc<TransactionTracker>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    metrics: Arc<ChainMetrics>,
}

impl HistoricScanner {
    pub fn new(
        config: ScannerConfig,
        store: Arc<ChainStore>,
        providers: ProviderRegistry,
        tracker: Arc<TransactionTracker>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        metrics: Arc<ChainMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            providers,
            tracker,
            clock,
            events,
            metrics,
        }
    }

    pub fn config(&self) -> ScannerConfig {
        self.config
    }

    fn provider(&self, account: &AddressOnNetwork) -> Result<Arc<dyn ProviderGateway>, ChainError> {
        require_provider(&self.providers, &account.network)
    }

    /// Scan everything between the last scanned block and the head. The
    /// first scan of an account covers one window below the head; later
    /// scans walk forward from the newest bookmark in window-sized steps, so
    /// blocks produced while the service was down are not skipped.
    pub async fn scan_recent(&self, account: &AddressOnNetwork) -> Result<ScanOutcome, ChainError> {
        let provider = self.provider(account)?;
        async {
            let head = provider.block_number().await?;
            let end = head.saturating_sub(self.config.head_margin);
            match self.store.newest_scanned_block(account)? {
                None => {
                    let start = end.saturating_sub(self.config.window);
                    self.scan_range(provider.as_ref(), account, start, end, Anchor::End)
                        .await
                }
                Some(newest) if newest >= end => Ok(ScanOutcome::UpToDate),
                Some(newest) => self.catch_up(provider.as_ref(), account, newest + 1, end).await,
            }
        }
        .instrument(scan_span(account, "recent"))
        .await
    }

    async fn catch_up(
        &self,
        provider: &dyn ProviderGateway,
        account: &AddressOnNetwork,
        start: u64,
        end: u64,
    ) -> Result<ScanOutcome, ChainError> {
        let mut progress: Option<(u64, u64, usize, usize)> = None;
        let mut from = start;
        while from <= end {
            let to = end.min(from.saturating_add(self.config.window));
            match self.scan_range(provider, account, from, to, Anchor::Start).await? {
                ScanOutcome::Scanned {
                    end: scanned_to,
                    transfers,
                    enqueued,
                    ..
                } => {
                    let (first, _, t, e) = progress.unwrap_or((from, from, 0, 0));
                    progress = Some((first, scanned_to, t + transfers, e + enqueued));
                    from = scanned_to + 1;
                }
                ScanOutcome::UpToDate => from = to + 1,
                // The next sweep resumes after the last recorded window.
                ScanOutcome::GaveUp | ScanOutcome::LimitReached => break,
            }
        }
        Ok(match progress {
            Some((start, end, transfers, enqueued)) => ScanOutcome::Scanned {
                start,
                end,
                transfers,
                enqueued,
            },
            None if from > end => ScanOutcome::UpToDate,
            None => ScanOutcome::GaveUp,
        })
    }

    /// Extend coverage one window below the oldest scanned block, until the
    /// scanned blocks add up to `max_windows` windows.
    pub async fn scan_older(&self, account: &AddressOnNetwork) -> Result<ScanOutcome, ChainError> {
        let provider = self.provider(account)?;
        let Some(oldest) = self.store.oldest_scanned_block(account)? else {
            return self.scan_recent(account).await;
        };

        let limit = self.config.window.saturating_mul(self.config.max_windows);
        let covered = self.store.scanned_block_count(account)?;
        if oldest == 0 || covered >= limit {
            debug!(account = %account, oldest, covered, "historic backfill limit reached");
            return Ok(ScanOutcome::LimitReached);
        }

        let end = oldest - 1;
        let start = end.saturating_sub(self.config.window);
        self.scan_range(provider.as_ref(), account, start, end, Anchor::End)
            .instrument(scan_span(account, "older"))
            .await
    }

    /// Scan `[start, end]`, shrinking the range towards `anchor` on failure.
    async fn scan_range(
        &self,
        provider: &dyn ProviderGateway,
        account: &AddressOnNetwork,
        start: u64,
        end: u64,
        anchor: Anchor,
    ) -> Result<ScanOutcome, ChainError> {
        if self.store.is_range_scanned(account, start, end)? {
            return Ok(ScanOutcome::UpToDate);
        }

        let span = end - start;
        let mut last_error = None;
        for attempt in 0..self.config.attempts {
            let (from, to) = match anchor {
                Anchor::End => (end - (span >> attempt), end),
                Anchor::Start => (start, start + (span >> attempt)),
            };
            match self.transfers(provider, account, from, to).await {
                Ok(transfers) => return self.record(account, from, to, transfers),
                Err(e) => {
                    debug!(account = %account, from, to, attempt, error = %e, "transfer scan failed");
                    last_error = Some(e);
                }
            }
        }

        self.metrics.historic_scans_failed.inc();
        warn!(
            account = %account,
            start,
            end,
            error = ?last_error.map(|e| e.to_string()),
            "giving up on historic transfer scan"
        );
        Ok(ScanOutcome::GaveUp)
    }

    /// Token transfers from or to the account in `[from, to]`.
    async fn transfers(
        &self,
        provider: &dyn ProviderGateway,
        account: &AddressOnNetwork,
        from: u64,
        to: u64,
    ) -> Result<Vec<AssetTransfer>, ProviderError> {
        let topic = Some(transfer_topic());
        let address = Some(account.address.into_word());
        let sent = LogFilter {
            from_block: from,
            to_block: to,
            addresses: Vec::new(),
            topics: vec![topic, address, None],
        };
        let received = LogFilter {
            topics: vec![topic, None, address],
            ..sent.clone()
        };

        let mut logs = provider.get_logs(&sent).await?;
        logs.extend(provider.get_logs(&received).await?);
        Ok(logs
            .into_iter()
            .filter_map(|log| to_transfer(account, log))
            .collect())
    }

    fn record(
        &self,
        account: &AddressOnNetwork,
        start: u64,
        end: u64,
        transfers: Vec<AssetTransfer>,
    ) -> Result<ScanOutcome, ChainError> {
        let now = self.clock.now();
        let saved = self.store.saved_transaction_hashes(&account.network)?;

        let mut seen = HashSet::new();
        let mut enqueued = 0;
        for transfer in &transfers {
            if seen.insert(transfer.tx_hash)
                && !saved.contains(&transfer.tx_hash)
                && self.tracker.enqueue(&account.network, transfer.tx_hash, now)
            {
                enqueued += 1;
            }
        }

        self.store.record_asset_transfer_lookup(&AssetTransferLookup {
            address_on_network: account.clone(),
            start_block: start,
            end_block: end,
            retrieved_at: now,
        })?;

        let count = transfers.len();
        if !transfers.is_empty() {
            self.events.publish(ChainEvent::AssetTransfers {
                account: account.clone(),
                transfers,
            });
        }
        info!(account = %account, start, end, transfers = count, enqueued, "historic transfers scanned");
        Ok(ScanOutcome::Scanned {
            start,
            end,
            transfers: count,
            enqueued,
        })
    }
}

fn to_transfer(account: &AddressOnNetwork, log: RpcLog) -> Option<AssetTransfer> {
    let tx_hash = log.transaction_hash?;
    let block_height = log.block_number.map(|n| n.to::<u64>());
    let decoded = decode_transfer_log(&TransactionLog::from(log))?;
    Some(AssetTransfer {
        network: account.network.clone(),
        tx_hash,
        block_height,
        from: decoded.from,
        to: decoded.to,
        contract_address: Some(decoded.contract),
        amount: decoded.amount,
    })
}
