//! Provider gateway for coffer.
//!
//! [`ProviderGateway`] is the one boundary through which the chain-state core
//! talks to a ledger node. Every operation is an explicit method; there is no
//! dynamic method dispatch. [`JsonRpcProvider`] implements it over HTTP
//! JSON-RPC with an optional WebSocket connection for subscriptions.

pub mod error;
pub mod json_rpc;
pub mod multicall;
pub mod provider;
pub mod registry;
pub mod rpc_types;
pub mod signer;
mod ws;

pub use error::ProviderError;
pub use json_rpc::{JsonRpcProvider, JsonRpcProviderConfig};
pub use multicall::{BatchCall, BatchResult, MULTICALL3_ADDRESS};
pub use provider::{
    ConnectionEvent, ProviderGateway, SubscriptionHandle, SubscriptionMessage, SubscriptionTopic,
};
pub use registry::ProviderRegistry;
pub use rpc_types::{BlockId, LogFilter, RpcBlock, RpcLog, RpcReceipt, RpcTransaction};
pub use signer::{SignedTransaction, SignerError, TransactionSigner};
