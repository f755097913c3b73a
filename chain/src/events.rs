//! Events the chain core publishes to its collaborators.
//!
//! Delivery is fire-and-forget over a `tokio::sync::broadcast` channel: a
//! subscriber that falls behind observes `Lagged` and skips ahead.

use coffer_annotation::{EnrichedSignatureRequest, EnrichedTransaction};
use coffer_types::{AccountBalance, AddressOnNetwork, AssetTransfer, EvmBlock, Transaction};
use tokio::sync::broadcast;

#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// A new block was observed and persisted.
    Block(EvmBlock),
    /// A stored transaction record changed.
    Transaction {
        transaction: Transaction,
        /// Tracked accounts the transaction concerns; may be empty.
        for_accounts: Vec<AddressOnNetwork>,
    },
    /// A fresh balance measurement was recorded.
    AccountBalance(AccountBalance),
    /// Historic transfers discovered for an account.
    AssetTransfers {
        account: AddressOnNetwork,
        transfers: Vec<AssetTransfer>,
    },
    EnrichedTransaction(EnrichedTransaction),
    EnrichedTransactionSignatureRequest(EnrichedSignatureRequest),
}

impl ChainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Block(_) => "block",
            Self::Transaction { .. } => "transaction",
            Self::AccountBalance(_) => "accountBalance",
            Self::AssetTransfers { .. } => "assetTransfers",
            Self::EnrichedTransaction(_) => "enrichedTransaction",
            Self::EnrichedTransactionSignatureRequest(_) => "enrichedTransactionSignatureRequest",
        }
    }
}

const DEFAULT_CAPACITY: usize = 1024;

/// Typed publish/subscribe channel owned by the chain service.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ChainEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            tracing::trace!(event = name, "no event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_types::{Network, Timestamp, B256, U256};

    fn block() -> EvmBlock {
        EvmBlock {
            hash: B256::repeat_byte(1),
            parent_hash: B256::ZERO,
            height: 1,
            timestamp: Timestamp::from_secs(1),
            difficulty: U256::ZERO,
            base_fee_per_gas: None,
            network: Network::ethereum(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_published_events() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(ChainEvent::Block(block()));

        assert_eq!(a.recv().await.map(|e| e.name()).ok(), Some("block"));
        assert_eq!(b.recv().await.map(|e| e.name()).ok(), Some("block"));
    }

    #[test]
    fn publishing_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(ChainEvent::Block(block()));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
