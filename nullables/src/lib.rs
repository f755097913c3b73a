//! Nullable infrastructure for deterministic testing.
//!
//! All external dependencies (clock, record store, ledger provider, signer)
//! are abstracted behind traits. This crate provides test-friendly
//! implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically, including failure injection
//! - Never touch the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod clock;
pub mod fixtures;
pub mod provider;
pub mod signer;
pub mod store;

pub use clock::NullClock;
pub use provider::NullProvider;
pub use signer::NullSigner;
pub use store::NullStore;
