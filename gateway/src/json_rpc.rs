//! JSON-RPC 2.0 provider over HTTP, with optional WebSocket subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::U64;
use async_trait::async_trait;
use coffer_types::{Address, Bytes, Network, TransactionRequest, TxHash, U256};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::multicall::MULTICALL3_ADDRESS;
use crate::provider::{
    ConnectionEvent, ProviderGateway, SubscriptionHandle, SubscriptionMessage, SubscriptionTopic,
};
use crate::rpc_types::{BlockId, LogFilter, RpcBlock, RpcLog, RpcReceipt, RpcTransaction};
use crate::ws::WsSubscriber;
use crate::ProviderError;

/// Default timeout for JSON-RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct JsonRpcProviderConfig {
    pub network: Network,
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub multicall: Option<Address>,
    pub request_timeout: Duration,
    /// Head polling interval when no WebSocket URL is configured.
    pub poll_interval: Duration,
}

impl JsonRpcProviderConfig {
    pub fn new(network: Network, rpc_url: impl Into<String>) -> Self {
        Self {
            network,
            rpc_url: rpc_url.into(),
            ws_url: None,
            multicall: None,
            request_timeout: DEFAULT_TIMEOUT,
            poll_interval: Duration::from_secs(12),
        }
    }
}

#[derive(Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// HTTP request/response half, shared with head-polling tasks.
#[derive(Clone)]
struct HttpTransport {
    http: reqwest::Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl HttpTransport {
    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.http.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::Transport(format!("{method}: HTTP {status}")));
        }

        let envelope: RpcEnvelope = response.json().await?;
        if let Some(error) = envelope.error {
            return Err(ProviderError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = envelope.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| ProviderError::InvalidResponse(format!("{method}: {e}")))
    }

    /// Like [`request`](Self::request) but a null result is an error.
    async fn request_required<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ProviderError> {
        self.request::<Option<T>>(method, params)
            .await?
            .ok_or_else(|| ProviderError::MissingResult(method.to_string()))
    }
}

pub struct JsonRpcProvider {
    network: Network,
    transport: HttpTransport,
    multicall: Address,
    poll_interval: Duration,
    ws: Option<WsSubscriber>,
    events: broadcast::Sender<ConnectionEvent>,
    next_handle: AtomicU64,
    pollers: Mutex<HashMap<SubscriptionHandle, JoinHandle<()>>>,
}

impl JsonRpcProvider {
    /// Build the provider. With a WebSocket URL this spawns the subscription
    /// supervisor, so it must be called inside a tokio runtime.
    pub fn new(config: JsonRpcProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to create HTTP client: {e}")))?;
        let (events, _) = broadcast::channel(16);
        let ws = config
            .ws_url
            .map(|url| WsSubscriber::spawn(url, events.clone()));

        Ok(Self {
            network: config.network,
            transport: HttpTransport {
                http,
                url: config.rpc_url,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            multicall: config.multicall.unwrap_or(MULTICALL3_ADDRESS),
            poll_interval: config.poll_interval,
            ws,
            events,
            next_handle: AtomicU64::new(1),
            pollers: Mutex::new(HashMap::new()),
        })
    }

    fn spawn_head_poller(&self, sink: mpsc::UnboundedSender<SubscriptionMessage>) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last_seen: Option<u64> = None;
            loop {
                ticker.tick().await;
                let block = match transport
                    .request::<Option<RpcBlock>>("eth_getBlockByNumber", json!(["latest", false]))
                    .await
                {
                    Ok(Some(block)) => block,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!("head poll failed: {e}");
                        continue;
                    }
                };
                let height = block.number.map(|n| n.to::<u64>());
                if height.is_none() || height == last_seen {
                    continue;
                }
                last_seen = height;
                if sink.send(SubscriptionMessage::NewHead(block)).is_err() {
                    return;
                }
            }
        })
    }
}

/// The transaction-object shape used by `eth_estimateGas` and `eth_call`.
pub fn request_object(request: &TransactionRequest) -> Value {
    let mut object = json!({
        "from": request.from,
        "value": request.value,
        "data": request.input,
    });
    if let Some(to) = request.to {
        object["to"] = json!(to);
    }
    if let Some(nonce) = request.nonce {
        object["nonce"] = json!(format!("{nonce:#x}"));
    }
    if let Some(gas) = request.gas_limit {
        object["gas"] = json!(format!("{gas:#x}"));
    }
    if let Some(price) = request.gas_price {
        object["gasPrice"] = json!(price);
    }
    if let Some(max_fee) = request.max_fee_per_gas {
        object["maxFeePerGas"] = json!(max_fee);
    }
    if let Some(tip) = request.max_priority_fee_per_gas {
        object["maxPriorityFeePerGas"] = json!(tip);
    }
    object
}

#[async_trait]
impl ProviderGateway for JsonRpcProvider {
    fn network(&self) -> &Network {
        &self.network
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        let number: U64 = self.transport.request_required("eth_blockNumber", json!([])).await?;
        Ok(number.to::<u64>())
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ProviderError> {
        self.transport
            .request_required("eth_getBalance", json!([address, "latest"]))
            .await
    }

    async fn get_block(&self, id: BlockId) -> Result<Option<RpcBlock>, ProviderError> {
        match id {
            BlockId::Latest => {
                self.transport
                    .request("eth_getBlockByNumber", json!(["latest", false]))
                    .await
            }
            BlockId::Number(n) => {
                self.transport
                    .request("eth_getBlockByNumber", json!([format!("{n:#x}"), false]))
                    .await
            }
            BlockId::Hash(hash) => {
                self.transport
                    .request("eth_getBlockByHash", json!([hash, false]))
                    .await
            }
        }
    }

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<RpcTransaction>, ProviderError> {
        self.transport
            .request("eth_getTransactionByHash", json!([hash]))
            .await
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<RpcReceipt>, ProviderError> {
        self.transport
            .request("eth_getTransactionReceipt", json!([hash]))
            .await
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64, ProviderError> {
        let count: U64 = self
            .transport
            .request_required("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(count.to::<u64>())
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError> {
        self.transport
            .request_required("eth_getCode", json!([address, "latest"]))
            .await
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, ProviderError> {
        let gas: U64 = self
            .transport
            .request_required("eth_estimateGas", json!([request_object(request)]))
            .await?;
        Ok(gas.to::<u64>())
    }

    async fn gas_price(&self) -> Result<U256, ProviderError> {
        self.transport.request_required("eth_gasPrice", json!([])).await
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<TxHash, ProviderError> {
        self.transport
            .request_required("eth_sendRawTransaction", json!([raw]))
            .await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError> {
        self.transport
            .request_required("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }

    fn multicall_address(&self) -> Address {
        self.multicall
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, ProviderError> {
        self.transport
            .request_required("eth_getLogs", json!([filter.to_json()]))
            .await
    }

    async fn subscribe(
        &self,
        topic: SubscriptionTopic,
        sink: mpsc::UnboundedSender<SubscriptionMessage>,
    ) -> Result<SubscriptionHandle, ProviderError> {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        if let Some(ws) = &self.ws {
            ws.subscribe(handle, topic, sink).await?;
            return Ok(handle);
        }
        match topic {
            SubscriptionTopic::NewHeads => {
                let poller = self.spawn_head_poller(sink);
                self.pollers
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(handle, poller);
            }
            SubscriptionTopic::PendingTransactions { .. } => {
                return Err(ProviderError::Unsupported(
                    "pending-transaction subscriptions need a WebSocket endpoint".into(),
                ));
            }
        }
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ProviderError> {
        let poller = self
            .pollers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&handle);
        match (poller, &self.ws) {
            (Some(poller), _) => poller.abort(),
            (None, Some(ws)) => ws.unsubscribe(handle),
            (None, None) => warn!(?handle, "unsubscribe for unknown handle"),
        }
        Ok(())
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    async fn reconnect(&self) -> Result<(), ProviderError> {
        match &self.ws {
            Some(ws) => {
                ws.reconnect();
                Ok(())
            }
            None => Err(ProviderError::Unsupported("no subscription connection".into())),
        }
    }
}

impl Drop for JsonRpcProvider {
    fn drop(&mut self) {
        let pollers = self
            .pollers
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, poller) in pollers.drain() {
            poller.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_object_includes_only_present_fields() {
        let mut request = TransactionRequest::transfer(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            U256::from(10u64),
            Network::ethereum(),
        );
        request.gas_limit = Some(21_000);

        let object = request_object(&request);
        assert_eq!(object["gas"], "0x5208");
        assert_eq!(object["value"], "0xa");
        assert!(object.get("nonce").is_none());
        assert!(object.get("maxFeePerGas").is_none());
    }

    #[tokio::test]
    async fn http_only_provider_rejects_pending_subscriptions() {
        let provider =
            JsonRpcProvider::new(JsonRpcProviderConfig::new(Network::ethereum(), "http://127.0.0.1:1"))
                .unwrap();
        let (sink, _rx) = mpsc::unbounded_channel();
        let err = provider
            .subscribe(
                SubscriptionTopic::PendingTransactions {
                    address: Address::repeat_byte(1),
                },
                sink,
            )
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_node_is_a_transient_failure() {
        let mut config = JsonRpcProviderConfig::new(Network::ethereum(), "http://127.0.0.1:1");
        config.request_timeout = Duration::from_secs(2);
        let provider = JsonRpcProvider::new(config).unwrap();
        let err = provider.block_number().await.unwrap_err();
        assert!(err.is_transient());
    }
}
