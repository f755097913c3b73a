//! Storage for the coffer chain-state core.
//!
//! Every storage backend (LMDB, in-memory for testing) implements
//! [`RecordStore`], a plain key/record store over a fixed set of collections.
//! [`ChainStore`] layers the typed chain queries on top of it; the rest of the
//! codebase depends only on `ChainStore`.

pub mod chain_store;
pub mod error;
pub mod keys;
pub mod merge;
pub mod record;

pub use chain_store::{BlockInsert, ChainStore, StoreWindows};
pub use error::StoreError;
pub use merge::merge_transaction;
pub use record::{Collection, RecordStore};
