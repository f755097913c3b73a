//! Nullable provider: a scriptable in-memory JSON-RPC node.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use coffer_gateway::{
    BatchCall, BatchResult, BlockId, ConnectionEvent, LogFilter, ProviderError, ProviderGateway,
    RpcBlock, RpcLog, RpcReceipt, RpcTransaction, SubscriptionHandle, SubscriptionMessage,
    SubscriptionTopic,
};
use coffer_types::{Address, Bytes, Network, TransactionRequest, TxHash, B256, U256};
use tokio::sync::{broadcast, mpsc};

type CallHandler = Box<dyn Fn(Address, &Bytes) -> Option<Bytes> + Send + Sync>;

struct Subscription {
    topic: SubscriptionTopic,
    sink: mpsc::UnboundedSender<SubscriptionMessage>,
}

struct State {
    block_number: u64,
    blocks: HashMap<u64, RpcBlock>,
    balances: HashMap<Address, U256>,
    transactions: HashMap<TxHash, RpcTransaction>,
    receipts: HashMap<TxHash, RpcReceipt>,
    transaction_counts: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    gas_estimate: u64,
    gas_price: U256,
    calls: HashMap<(Address, Bytes), Bytes>,
    call_handler: Option<CallHandler>,
    logs: Vec<RpcLog>,
    max_log_range: Option<u64>,
    queued_failures: HashMap<&'static str, VecDeque<ProviderError>>,
    persistent_failures: HashMap<&'static str, ProviderError>,
    call_counts: HashMap<&'static str, usize>,
    log_queries: Vec<LogFilter>,
    broadcasts: Vec<Bytes>,
    subscriptions: HashMap<SubscriptionHandle, Subscription>,
    pending_feed_error: Option<ProviderError>,
    connected: bool,
    latency: Option<Duration>,
}

/// A test provider that serves scripted chain data.
///
/// Every method counts its calls and can be made to fail, either once per
/// queued error or persistently.
pub struct NullProvider {
    network: Network,
    state: Mutex<State>,
    events: broadcast::Sender<ConnectionEvent>,
    next_handle: AtomicU64,
}

impl NullProvider {
    pub fn new(network: Network) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            network,
            state: Mutex::new(State {
                block_number: 0,
                blocks: HashMap::new(),
                balances: HashMap::new(),
                transactions: HashMap::new(),
                receipts: HashMap::new(),
                transaction_counts: HashMap::new(),
                code: HashMap::new(),
                gas_estimate: 21_000,
                gas_price: U256::from(1_000_000_000u64),
                calls: HashMap::new(),
                call_handler: None,
                logs: Vec::new(),
                max_log_range: None,
                queued_failures: HashMap::new(),
                persistent_failures: HashMap::new(),
                call_counts: HashMap::new(),
                log_queries: Vec::new(),
                broadcasts: Vec::new(),
                subscriptions: HashMap::new(),
                pending_feed_error: None,
                connected: true,
                latency: None,
            }),
            events,
            next_handle: AtomicU64::new(1),
        }
    }

    // ── Scripting ───────────────────────────────────────────────────────

    pub fn set_block_number(&self, height: u64) {
        self.state.lock().unwrap().block_number = height;
    }

    /// Serve `block`; also advances the head if it is higher.
    pub fn add_block(&self, block: RpcBlock) {
        let mut state = self.state.lock().unwrap();
        if let Some(number) = block.number {
            let height = number.to::<u64>();
            state.block_number = state.block_number.max(height);
            state.blocks.insert(height, block);
        }
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert(address, balance);
    }

    pub fn add_transaction(&self, transaction: RpcTransaction) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(transaction.hash, transaction);
    }

    pub fn add_receipt(&self, receipt: RpcReceipt) {
        self.state
            .lock()
            .unwrap()
            .receipts
            .insert(receipt.transaction_hash, receipt);
    }

    /// Answer receipt lookups for `hash` with `receipt`, whichever
    /// transaction it names.
    pub fn serve_receipt(&self, hash: TxHash, receipt: RpcReceipt) {
        self.state.lock().unwrap().receipts.insert(hash, receipt);
    }

    pub fn set_transaction_count(&self, address: Address, count: u64) {
        self.state
            .lock()
            .unwrap()
            .transaction_counts
            .insert(address, count);
    }

    /// Give `address` contract code.
    pub fn set_code(&self, address: Address, code: impl Into<Bytes>) {
        self.state.lock().unwrap().code.insert(address, code.into());
    }

    pub fn set_gas_estimate(&self, gas: u64) {
        self.state.lock().unwrap().gas_estimate = gas;
    }

    pub fn set_gas_price(&self, price: U256) {
        self.state.lock().unwrap().gas_price = price;
    }

    /// Fixed response for an exact `eth_call`.
    pub fn set_call_response(&self, to: Address, data: impl Into<Bytes>, response: impl Into<Bytes>) {
        self.state
            .lock()
            .unwrap()
            .calls
            .insert((to, data.into()), response.into());
    }

    /// Fallback for calls without a fixed response. `None` reverts the call.
    pub fn set_call_handler(&self, handler: impl Fn(Address, &Bytes) -> Option<Bytes> + Send + Sync + 'static) {
        self.state.lock().unwrap().call_handler = Some(Box::new(handler));
    }

    pub fn add_log(&self, log: RpcLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Reject `get_logs` queries spanning more than `blocks` blocks.
    pub fn set_max_log_range(&self, blocks: Option<u64>) {
        self.state.lock().unwrap().max_log_range = blocks;
    }

    /// Fail the next call to `method` with `error`. Queued failures for the
    /// same method are consumed in order.
    pub fn fail_next(&self, method: &'static str, error: ProviderError) {
        self.state
            .lock()
            .unwrap()
            .queued_failures
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Fail every call to `method` until cleared with `None`.
    pub fn fail_always(&self, method: &'static str, error: Option<ProviderError>) {
        let mut state = self.state.lock().unwrap();
        match error {
            Some(error) => state.persistent_failures.insert(method, error),
            None => state.persistent_failures.remove(method),
        };
    }

    /// Delay every call, so concurrent callers interleave.
    /// Reject every `PendingTransactions` subscription with `error`, the way
    /// nodes without a filtered pending feed do.
    pub fn reject_pending_feed(&self, error: Option<ProviderError>) {
        self.state.lock().unwrap().pending_feed_error = error;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().unwrap().latency = latency;
    }

    // ── Inspection ──────────────────────────────────────────────────────

    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .call_counts
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    pub fn log_queries(&self) -> Vec<LogFilter> {
        self.state.lock().unwrap().log_queries.clone()
    }

    pub fn broadcasts(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    pub fn subscription_topics(&self) -> Vec<SubscriptionTopic> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .map(|s| s.topic.clone())
            .collect()
    }

    // ── Subscription driving ────────────────────────────────────────────

    /// Deliver a new head to every `NewHeads` subscriber.
    pub fn emit_new_head(&self, block: RpcBlock) {
        self.add_block(block.clone());
        let state = self.state.lock().unwrap();
        for sub in state.subscriptions.values() {
            if sub.topic == SubscriptionTopic::NewHeads {
                let _ = sub.sink.send(SubscriptionMessage::NewHead(block.clone()));
            }
        }
    }

    /// Deliver a pending transaction to subscribers watching its sender or
    /// recipient.
    pub fn emit_pending(&self, transaction: RpcTransaction) {
        self.add_transaction(transaction.clone());
        let state = self.state.lock().unwrap();
        for sub in state.subscriptions.values() {
            if let SubscriptionTopic::PendingTransactions { address } = sub.topic {
                if transaction.from == address || transaction.to == Some(address) {
                    let _ = sub
                        .sink
                        .send(SubscriptionMessage::PendingTransaction(transaction.clone()));
                }
            }
        }
    }

    /// Drop the connection: all subscriptions are void.
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.connected = false;
            state.subscriptions.clear();
        }
        let _ = self.events.send(ConnectionEvent::Disconnected);
    }

    pub fn connect(&self) {
        self.state.lock().unwrap().connected = true;
        let _ = self.events.send(ConnectionEvent::Connected);
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Count the call, then apply latency and any injected failure.
    async fn enter(&self, method: &'static str) -> Result<(), ProviderError> {
        let (latency, failure) = {
            let mut state = self.state.lock().unwrap();
            *state.call_counts.entry(method).or_default() += 1;
            let queued = state
                .queued_failures
                .get_mut(method)
                .and_then(VecDeque::pop_front);
            let failure = queued.or_else(|| state.persistent_failures.get(method).cloned());
            (state.latency, failure)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn answer_call(state: &State, to: Address, data: &Bytes) -> Option<Bytes> {
        state
            .calls
            .get(&(to, data.clone()))
            .cloned()
            .or_else(|| state.call_handler.as_ref().and_then(|h| h(to, data)))
    }
}

fn topics_match(filter: &[Option<B256>], topics: &[B256]) -> bool {
    filter.iter().enumerate().all(|(i, wanted)| match wanted {
        None => true,
        Some(wanted) => topics.get(i) == Some(wanted),
    })
}

#[async_trait]
impl ProviderGateway for NullProvider {
    fn network(&self) -> &Network {
        &self.network
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        self.enter("block_number").await?;
        Ok(self.state.lock().unwrap().block_number)
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ProviderError> {
        self.enter("get_balance").await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn get_block(&self, id: BlockId) -> Result<Option<RpcBlock>, ProviderError> {
        self.enter("get_block").await?;
        let state = self.state.lock().unwrap();
        Ok(match id {
            BlockId::Latest => state.blocks.get(&state.block_number).cloned(),
            BlockId::Number(n) => state.blocks.get(&n).cloned(),
            BlockId::Hash(hash) => state
                .blocks
                .values()
                .find(|b| b.hash == Some(hash))
                .cloned(),
        })
    }

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<RpcTransaction>, ProviderError> {
        self.enter("get_transaction").await?;
        Ok(self.state.lock().unwrap().transactions.get(&hash).cloned())
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<RpcReceipt>, ProviderError> {
        self.enter("get_transaction_receipt").await?;
        Ok(self.state.lock().unwrap().receipts.get(&hash).cloned())
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64, ProviderError> {
        self.enter("get_transaction_count").await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .transaction_counts
            .get(&address)
            .copied()
            .unwrap_or(0))
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError> {
        self.enter("get_code").await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .code
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn estimate_gas(&self, _request: &TransactionRequest) -> Result<u64, ProviderError> {
        self.enter("estimate_gas").await?;
        Ok(self.state.lock().unwrap().gas_estimate)
    }

    async fn gas_price(&self) -> Result<U256, ProviderError> {
        self.enter("gas_price").await?;
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<TxHash, ProviderError> {
        self.enter("send_raw_transaction").await?;
        self.state.lock().unwrap().broadcasts.push(raw.clone());
        Ok(alloy_primitives::keccak256(raw))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError> {
        self.enter("call").await?;
        let state = self.state.lock().unwrap();
        Self::answer_call(&state, to, &data).ok_or_else(|| ProviderError::Rpc {
            code: 3,
            message: "execution reverted".into(),
        })
    }

    async fn call_batch(&self, calls: &[BatchCall]) -> Result<Vec<BatchResult>, ProviderError> {
        self.enter("call_batch").await?;
        let state = self.state.lock().unwrap();
        Ok(calls
            .iter()
            .map(|c| match Self::answer_call(&state, c.target, &c.data) {
                Some(return_data) => BatchResult {
                    success: true,
                    return_data,
                },
                None => BatchResult {
                    success: false,
                    return_data: Bytes::new(),
                },
            })
            .collect())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, ProviderError> {
        {
            self.state.lock().unwrap().log_queries.push(filter.clone());
        }
        self.enter("get_logs").await?;
        let state = self.state.lock().unwrap();
        if let Some(max) = state.max_log_range {
            if filter.to_block.saturating_sub(filter.from_block) > max {
                return Err(ProviderError::Rpc {
                    code: -32005,
                    message: "query returned more than 10000 results".into(),
                });
            }
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                let height = log.block_number.map(|n| n.to::<u64>()).unwrap_or(0);
                height >= filter.from_block
                    && height <= filter.to_block
                    && (filter.addresses.is_empty() || filter.addresses.contains(&log.address))
                    && topics_match(&filter.topics, &log.topics)
            })
            .cloned()
            .collect())
    }

    async fn subscribe(
        &self,
        topic: SubscriptionTopic,
        sink: mpsc::UnboundedSender<SubscriptionMessage>,
    ) -> Result<SubscriptionHandle, ProviderError> {
        self.enter("subscribe").await?;
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ProviderError::NotConnected);
        }
        if let (SubscriptionTopic::PendingTransactions { .. }, Some(error)) =
            (&topic, &state.pending_feed_error)
        {
            return Err(error.clone());
        }
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        state.subscriptions.insert(handle, Subscription { topic, sink });
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ProviderError> {
        self.enter("unsubscribe").await?;
        self.state.lock().unwrap().subscriptions.remove(&handle);
        Ok(())
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    async fn reconnect(&self) -> Result<(), ProviderError> {
        self.disconnect();
        self.connect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn queued_failures_are_consumed_in_order() {
        let provider = NullProvider::new(Network::ethereum());
        provider.set_block_number(10);
        provider.fail_next("block_number", ProviderError::Timeout);

        assert_eq!(provider.block_number().await, Err(ProviderError::Timeout));
        assert_eq!(provider.block_number().await, Ok(10));
        assert_eq!(provider.call_count("block_number"), 2);
    }

    #[tokio::test]
    async fn pending_transactions_reach_matching_subscribers_only() {
        let provider = NullProvider::new(Network::ethereum());
        let watched = Address::repeat_byte(1);
        let (sink, mut rx) = mpsc::unbounded_channel();
        provider
            .subscribe(SubscriptionTopic::PendingTransactions { address: watched }, sink)
            .await
            .unwrap();

        provider.emit_pending(fixtures::rpc_transaction(
            B256::repeat_byte(1),
            Address::repeat_byte(5),
            Some(Address::repeat_byte(6)),
            0,
        ));
        provider.emit_pending(fixtures::rpc_transaction(
            B256::repeat_byte(2),
            Address::repeat_byte(5),
            Some(watched),
            0,
        ));

        match rx.recv().await {
            Some(SubscriptionMessage::PendingTransaction(tx)) => {
                assert_eq!(tx.hash, B256::repeat_byte(2))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_voids_subscriptions() {
        let provider = NullProvider::new(Network::ethereum());
        let mut events = provider.connection_events();
        let (sink, _rx) = mpsc::unbounded_channel();
        provider
            .subscribe(SubscriptionTopic::NewHeads, sink.clone())
            .await
            .unwrap();

        provider.disconnect();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert!(provider.subscription_topics().is_empty());
        assert_eq!(
            provider.subscribe(SubscriptionTopic::NewHeads, sink).await,
            Err(ProviderError::NotConnected)
        );
    }

    #[tokio::test]
    async fn oversized_log_queries_fail() {
        let provider = NullProvider::new(Network::ethereum());
        provider.set_max_log_range(Some(100));
        let filter = LogFilter {
            from_block: 0,
            to_block: 1_000,
            addresses: vec![],
            topics: vec![],
        };
        assert!(provider.get_logs(&filter).await.is_err());
        assert_eq!(provider.log_queries().len(), 1);
    }
}
