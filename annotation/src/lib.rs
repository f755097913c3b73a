//! Annotation engine for coffer.
//!
//! Classifies a transaction or an unsigned transaction request into a typed
//! [`TransactionAnnotation`], decodes token transfers from its logs into
//! subannotations, and decorates addresses with display names through an
//! ordered list of [`NameResolver`] strategies. Annotation never fails: a
//! transaction that cannot be classified precisely is a contract interaction.

pub mod abi;
pub mod assets;
pub mod batcher;
pub mod engine;
pub mod error;
pub mod names;
pub mod types;

pub use assets::AssetRegistry;
pub use batcher::NameBatcher;
pub use engine::AnnotationEngine;
pub use error::AnnotationError;
pub use names::{LocalNames, NameRecord, NameResolver, ResolverChain};
pub use types::{
    AddressIdentity, AnnotationKind, AnnotationWarning, EnrichedSignatureRequest,
    EnrichedTransaction, TransactionAnnotation,
};
