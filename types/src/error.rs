//! Top-level error type shared across crates.

use thiserror::Error;

/// Common error type for malformed domain values.
#[derive(Debug, Error)]
pub enum CofferError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("unknown network with chain id {0}")]
    UnknownNetwork(u64),

    #[error("{0}")]
    Other(String),
}
