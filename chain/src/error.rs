use coffer_gateway::{ProviderError, SignerError};
use coffer_store::StoreError;
use coffer_types::Network;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("signer error: {0}")]
    Signer(#[from] SignerError),

    /// Operating on a network with no registered provider. Nothing is written.
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(Network),

    #[error("no transaction signer configured")]
    NoSigner,

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown timeout")]
    ShutdownTimeout,
}

impl ChainError {
    /// Whether the underlying provider failure may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_transient())
    }
}
