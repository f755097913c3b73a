use std::sync::Arc;

use coffer_gateway::{JsonRpcProvider, JsonRpcProviderConfig, ProviderGateway, ProviderRegistry};
use coffer_types::Network;

fn provider(network: Network) -> Arc<dyn ProviderGateway> {
    Arc::new(JsonRpcProvider::new(JsonRpcProviderConfig::new(network, "http://127.0.0.1:8545")).unwrap())
}

#[tokio::test]
async fn registry_resolves_by_chain_id() {
    let registry = ProviderRegistry::new()
        .with(provider(Network::polygon()))
        .with(provider(Network::ethereum()));

    assert_eq!(registry.len(), 2);
    assert!(registry.supports(&Network::ethereum()));
    assert!(!registry.supports(&Network::arbitrum()));
    assert!(registry.get(&Network::arbitrum()).is_none());

    let ids: Vec<u64> = registry.networks().iter().map(|n| n.chain_id).collect();
    assert_eq!(ids, vec![1, 137]);
}
