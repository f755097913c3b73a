use async_trait::async_trait;
use coffer_types::{Address, Bytes, Network, TransactionRequest, TxHash, U256};
use tokio::sync::{broadcast, mpsc};

use crate::multicall::{decode_aggregate3, encode_aggregate3, BatchCall, BatchResult, MULTICALL3_ADDRESS};
use crate::rpc_types::{BlockId, LogFilter, RpcBlock, RpcLog, RpcReceipt, RpcTransaction};
use crate::ProviderError;

/// What a subscription listens for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionTopic {
    NewHeads,
    /// Pending transactions sent from or to `address`.
    PendingTransactions { address: Address },
}

/// A message delivered on a subscription sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionMessage {
    NewHead(RpcBlock),
    PendingTransaction(RpcTransaction),
    /// Some providers only deliver the hash of a pending transaction.
    PendingHash(TxHash),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// State changes of the subscription connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// Uniform access to one network's ledger node.
///
/// All calls are fallible; see [`ProviderError::is_transient`] for the
/// retry classification.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    fn network(&self) -> &Network;

    async fn block_number(&self) -> Result<u64, ProviderError>;

    async fn get_balance(&self, address: Address) -> Result<U256, ProviderError>;

    async fn get_block(&self, id: BlockId) -> Result<Option<RpcBlock>, ProviderError>;

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<RpcTransaction>, ProviderError>;

    async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<RpcReceipt>, ProviderError>;

    /// Number of transactions sent from `address`, including pending ones.
    async fn get_transaction_count(&self, address: Address) -> Result<u64, ProviderError>;

    async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError>;

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, ProviderError>;

    async fn gas_price(&self) -> Result<U256, ProviderError>;

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<TxHash, ProviderError>;

    /// Read-only contract call against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError>;

    /// Address of the Multicall3 aggregator on this network.
    fn multicall_address(&self) -> Address {
        MULTICALL3_ADDRESS
    }

    /// Several read-only calls in one round trip. Individual calls may fail
    /// without failing the batch.
    async fn call_batch(&self, calls: &[BatchCall]) -> Result<Vec<BatchResult>, ProviderError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let data = encode_aggregate3(calls);
        let returned = self.call(self.multicall_address(), data).await?;
        decode_aggregate3(&returned, calls.len())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, ProviderError>;

    /// Start delivering messages for `topic` into `sink` until unsubscribed
    /// or the connection drops.
    async fn subscribe(
        &self,
        topic: SubscriptionTopic,
        sink: mpsc::UnboundedSender<SubscriptionMessage>,
    ) -> Result<SubscriptionHandle, ProviderError>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ProviderError>;

    /// Connection state changes. After `Disconnected` every subscription is
    /// void; after `Connected` callers re-subscribe.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Drop the subscription connection and establish a new one.
    async fn reconnect(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
