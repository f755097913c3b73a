use coffer_gateway::ProviderError;
use coffer_store::StoreError;
use thiserror::Error;

/// Failures inside the enrichment pipeline. They degrade the annotation and
/// are never returned to callers of the engine.
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no provider for chain {0}")]
    NoProvider(u64),

    #[error("undecodable contract data: {0}")]
    Decode(String),
}
