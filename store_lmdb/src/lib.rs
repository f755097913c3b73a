//! LMDB storage backend for coffer.
//!
//! Implements [`coffer_store::RecordStore`] using the `heed` LMDB bindings.
//! Each collection maps to one named database within a single environment.

pub mod environment;
pub mod error;
mod record;

pub use environment::LmdbEnvironment;
pub use error::LmdbError;
