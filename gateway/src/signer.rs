//! The signing-service boundary. Key material never crosses it.

use async_trait::async_trait;
use coffer_types::{Address, Bytes, Transaction, TransactionRequest};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("no key for account {0}")]
    UnknownAccount(Address),

    #[error("signing rejected: {0}")]
    Rejected(String),

    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// A signed transaction ready for broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTransaction {
    /// The `SignedUnconfirmed` record, including its hash and signature.
    pub transaction: Transaction,
    /// Raw encoded bytes for `eth_sendRawTransaction`.
    pub raw: Bytes,
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Sign a fully populated request (nonce, gas limit and fees set).
    async fn sign(&self, request: &TransactionRequest) -> Result<SignedTransaction, SignerError>;
}
