use std::collections::HashMap;
use std::sync::Arc;

use coffer_types::Network;

use crate::ProviderGateway;

/// Providers keyed by chain id. A network without a provider is unsupported.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<u64, Arc<dyn ProviderGateway>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: Arc<dyn ProviderGateway>) {
        self.providers
            .insert(provider.network().chain_id, provider);
    }

    pub fn with(mut self, provider: Arc<dyn ProviderGateway>) -> Self {
        self.insert(provider);
        self
    }

    pub fn get(&self, network: &Network) -> Option<Arc<dyn ProviderGateway>> {
        self.providers.get(&network.chain_id).cloned()
    }

    pub fn supports(&self, network: &Network) -> bool {
        self.providers.contains_key(&network.chain_id)
    }

    /// Supported networks, ordered by chain id.
    pub fn networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = self
            .providers
            .values()
            .map(|p| p.network().clone())
            .collect();
        networks.sort_by_key(|n| n.chain_id);
        networks
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
