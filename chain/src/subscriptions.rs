//! Live subscriptions to new heads and to pending transactions of tracked
//! addresses, one [`SubscriptionManager`] per network.
//!
//! The connection moves `Disconnected → Connecting → Subscribed`. Entering
//! `Subscribed` always subscribes the full tracked set from scratch: after a
//! disconnect every earlier subscription is void, and accounts may have been
//! added or removed during the outage.

use std::collections::HashMap;
use std::sync::Arc;

use coffer_gateway::{
    ProviderError, ProviderGateway, RpcBlock, RpcTransaction, SubscriptionHandle,
    SubscriptionMessage, SubscriptionTopic,
};
use coffer_store::BlockInsert;
use coffer_types::{normalize_address, Address, Network, TxHash};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn, Instrument};

use crate::context::ChainContext;
use crate::events::ChainEvent;
use crate::tracing_spans::new_head_span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

struct ManagerState {
    connection: ConnectionState,
    active: HashMap<SubscriptionTopic, SubscriptionHandle>,
}

pub struct SubscriptionManager {
    provider: Arc<dyn ProviderGateway>,
    sink: mpsc::UnboundedSender<SubscriptionMessage>,
    state: Mutex<ManagerState>,
}

impl SubscriptionManager {
    /// A disconnected manager, plus the receiver every subscription of this
    /// manager delivers into.
    pub fn new(
        provider: Arc<dyn ProviderGateway>,
    ) -> (Self, mpsc::UnboundedReceiver<SubscriptionMessage>) {
        let (sink, inbound) = mpsc::unbounded_channel();
        let manager = Self {
            provider,
            sink,
            state: Mutex::new(ManagerState {
                connection: ConnectionState::Disconnected,
                active: HashMap::new(),
            }),
        };
        (manager, inbound)
    }

    pub fn network(&self) -> &Network {
        self.provider.network()
    }

    pub fn provider(&self) -> &Arc<dyn ProviderGateway> {
        &self.provider
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.connection
    }

    pub async fn active_topics(&self) -> Vec<SubscriptionTopic> {
        self.state.lock().await.active.keys().cloned().collect()
    }

    /// Subscribe to new heads and to pending transactions of every address
    /// in `tracked`, replacing whatever was subscribed before.
    pub async fn connect(&self, tracked: &[Address]) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        let previous: Vec<SubscriptionHandle> = state.active.drain().map(|(_, h)| h).collect();
        if state.connection == ConnectionState::Subscribed {
            for handle in previous {
                if let Err(e) = self.provider.unsubscribe(handle).await {
                    debug!(error = %e, "stale subscription not removed");
                }
            }
        }
        state.connection = ConnectionState::Connecting;

        if let Err(e) = self.subscribe_all(&mut state, tracked).await {
            let partial: Vec<SubscriptionHandle> = state.active.drain().map(|(_, h)| h).collect();
            for handle in partial {
                let _ = self.provider.unsubscribe(handle).await;
            }
            state.connection = ConnectionState::Disconnected;
            warn!(network = %self.network(), error = %e, "subscribing failed");
            return Err(e);
        }

        state.connection = ConnectionState::Subscribed;
        info!(
            network = %self.network(),
            subscriptions = state.active.len(),
            "subscriptions established"
        );
        Ok(())
    }

    async fn subscribe_all(
        &self,
        state: &mut ManagerState,
        tracked: &[Address],
    ) -> Result<(), ProviderError> {
        self.subscribe_topic(state, SubscriptionTopic::NewHeads).await?;
        for address in tracked {
            self.subscribe_topic(state, SubscriptionTopic::PendingTransactions { address: *address })
                .await?;
        }
        Ok(())
    }

    /// `Unsupported` (e.g. no pending-transaction feed on this provider) is
    /// logged and skipped. Pending-transaction feeds are best effort: any
    /// failure other than a lost connection leaves new heads subscribed.
    async fn subscribe_topic(
        &self,
        state: &mut ManagerState,
        topic: SubscriptionTopic,
    ) -> Result<(), ProviderError> {
        if state.active.contains_key(&topic) {
            return Ok(());
        }
        match self.provider.subscribe(topic.clone(), self.sink.clone()).await {
            Ok(handle) => {
                state.active.insert(topic, handle);
                Ok(())
            }
            Err(ProviderError::Unsupported(reason)) => {
                debug!(?topic, %reason, "subscription topic unsupported");
                Ok(())
            }
            Err(ProviderError::NotConnected) => Err(ProviderError::NotConnected),
            Err(e) if matches!(topic, SubscriptionTopic::PendingTransactions { .. }) => {
                warn!(network = %self.network(), ?topic, error = %e, "pending transaction feed unavailable");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Every subscription is void once the connection drops.
    pub async fn mark_disconnected(&self) {
        let mut state = self.state.lock().await;
        if state.connection != ConnectionState::Disconnected {
            info!(network = %self.network(), "subscription connection lost");
        }
        state.active.clear();
        state.connection = ConnectionState::Disconnected;
    }

    /// Drop the connection and subscribe again from scratch.
    pub async fn reconnect(&self, tracked: &[Address]) -> Result<(), ProviderError> {
        self.mark_disconnected().await;
        self.provider.reconnect().await?;
        self.connect(tracked).await
    }

    /// Start watching a newly tracked address. While disconnected this is a
    /// no-op; the next connect covers it.
    pub async fn add_account(&self, address: Address) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        if state.connection != ConnectionState::Subscribed {
            return Ok(());
        }
        self.subscribe_topic(&mut state, SubscriptionTopic::PendingTransactions { address })
            .await
    }

    pub async fn remove_account(&self, address: Address) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        match state
            .active
            .remove(&SubscriptionTopic::PendingTransactions { address })
        {
            Some(handle) => self.provider.unsubscribe(handle).await,
            None => Ok(()),
        }
    }
}

// ── Inbound messages ────────────────────────────────────────────────────

pub async fn handle_message(ctx: &ChainContext, network: &Network, message: SubscriptionMessage) {
    match message {
        SubscriptionMessage::NewHead(block) => on_new_head(ctx, network, block).await,
        SubscriptionMessage::PendingTransaction(transaction) => {
            on_pending_transaction(ctx, network, transaction).await
        }
        SubscriptionMessage::PendingHash(hash) => on_pending_hash(ctx, network, hash),
    }
}

/// Persist the block, publish it, refresh the gas price in the background
/// and check watched transactions for confirmations.
///
/// A new block at a height that already holds a different one is a reorg.
/// It is logged and counted; the superseded block and its transactions stay
/// in the store.
pub async fn on_new_head(ctx: &ChainContext, network: &Network, raw: RpcBlock) {
    let block = match raw.into_block(network) {
        Ok(block) => block,
        Err(e) => {
            warn!(network = %network, error = %e, "discarding malformed new head");
            return;
        }
    };
    let span = new_head_span(network.chain_id, block.height);

    async {
        match ctx.store.add_block(&block) {
            Ok(BlockInsert::Inserted) => {}
            Ok(BlockInsert::AlreadyKnown) => return,
            Ok(BlockInsert::Reorg { superseded }) => {
                ctx.metrics.reorgs_detected.inc();
                warn!(
                    height = block.height,
                    hash = %block.hash,
                    superseded = ?superseded,
                    "chain reorganisation detected, superseded blocks are kept"
                );
            }
            Err(e) => {
                warn!(height = block.height, error = %e, "failed to store new head");
                return;
            }
        }
        ctx.metrics.blocks_observed.inc();
        ctx.events.publish(ChainEvent::Block(block.clone()));

        if let Some(provider) = ctx.providers.get(network) {
            let gas = Arc::clone(&ctx.gas);
            let now = ctx.clock.now();
            tokio::spawn(async move {
                if let Err(e) = gas.refresh(provider.as_ref(), now).await {
                    debug!(error = %e, "gas price refresh failed");
                }
            });
        }

        if let Err(e) = ctx.tracker.check_confirmations(network).await {
            warn!(error = %e, "confirmation check failed");
        }
    }
    .instrument(span)
    .await
}

/// Reconcile the sender's nonce and queue the transaction for retrieval.
pub async fn on_pending_transaction(ctx: &ChainContext, network: &Network, transaction: RpcTransaction) {
    let sender = transaction.from;
    match ctx.store.tracked_accounts_on(network) {
        Ok(accounts) if accounts.iter().any(|a| a.address == sender) => {
            let nonce = transaction.nonce.to::<u64>();
            ctx.nonces
                .observe_pending(network.chain_id, sender, nonce)
                .await;
            debug!(sender = %normalize_address(&sender), nonce, "pending nonce observed");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "could not read tracked accounts"),
    }
    on_pending_hash(ctx, network, transaction.hash);
}

fn on_pending_hash(ctx: &ChainContext, network: &Network, hash: TxHash) {
    ctx.tracker.enqueue(network, hash, ctx.clock.now());
}
