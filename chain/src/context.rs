use std::sync::Arc;

use coffer_gateway::{ProviderGateway, ProviderRegistry};
use coffer_store::ChainStore;
use coffer_types::{Clock, Network};

use crate::events::EventBus;
use crate::gas::GasOracle;
use crate::metrics::ChainMetrics;
use crate::nonce::NonceAllocator;
use crate::tracker::TransactionTracker;
use crate::ChainError;

/// Shared state every chain task works against.
pub struct ChainContext {
    pub store: Arc<ChainStore>,
    pub providers: ProviderRegistry,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub metrics: Arc<ChainMetrics>,
    pub nonces: Arc<NonceAllocator>,
    pub gas: Arc<GasOracle>,
    pub tracker: Arc<TransactionTracker>,
}

impl ChainContext {
    /// The provider for `network`. A missing provider is a programming
    /// error on the caller's side and is logged loudly.
    pub fn provider(&self, network: &Network) -> Result<Arc<dyn ProviderGateway>, ChainError> {
        require_provider(&self.providers, network)
    }
}

pub(crate) fn require_provider(
    providers: &ProviderRegistry,
    network: &Network,
) -> Result<Arc<dyn ProviderGateway>, ChainError> {
    providers.get(network).ok_or_else(|| {
        tracing::error!(network = %network, "no provider registered for network");
        ChainError::UnsupportedNetwork(network.clone())
    })
}
