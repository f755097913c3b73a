//! Known fungible assets, keyed by chain and contract address.

use std::collections::HashMap;

use coffer_types::{Address, FungibleAsset, Network};
use tokio::sync::RwLock;

/// Asset metadata supplied by token lists. Only contracts registered here
/// are treated as tokens by the engine.
#[derive(Default)]
pub struct AssetRegistry {
    assets: RwLock<HashMap<(u64, Address), FungibleAsset>>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, asset: FungibleAsset) {
        self.assets
            .write()
            .await
            .insert((asset.chain_id, asset.contract_address), asset);
    }

    pub async fn extend(&self, assets: impl IntoIterator<Item = FungibleAsset>) {
        let mut map = self.assets.write().await;
        for asset in assets {
            map.insert((asset.chain_id, asset.contract_address), asset);
        }
    }

    pub async fn get(&self, chain_id: u64, contract: &Address) -> Option<FungibleAsset> {
        self.assets.read().await.get(&(chain_id, *contract)).cloned()
    }

    /// Assets on `network`, ordered by symbol.
    pub async fn on_network(&self, network: &Network) -> Vec<FungibleAsset> {
        let mut assets: Vec<FungibleAsset> = self
            .assets
            .read()
            .await
            .values()
            .filter(|a| a.chain_id == network.chain_id)
            .cloned()
            .collect();
        assets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(chain_id: u64, byte: u8, symbol: &str) -> FungibleAsset {
        FungibleAsset {
            name: symbol.to_string(),
            symbol: symbol.to_string(),
            decimals: 18,
            contract_address: Address::repeat_byte(byte),
            chain_id,
            logo_url: None,
        }
    }

    #[tokio::test]
    async fn lookups_are_per_chain() {
        let registry = AssetRegistry::new();
        registry
            .extend([token(1, 1, "USDC"), token(137, 1, "USDC.e"), token(1, 2, "DAI")])
            .await;

        assert_eq!(
            registry.get(1, &Address::repeat_byte(1)).await.unwrap().symbol,
            "USDC"
        );
        assert!(registry.get(10, &Address::repeat_byte(1)).await.is_none());

        let symbols: Vec<String> = registry
            .on_network(&Network::ethereum())
            .await
            .into_iter()
            .map(|a| a.symbol)
            .collect();
        assert_eq!(symbols, vec!["DAI".to_string(), "USDC".to_string()]);
    }
}
