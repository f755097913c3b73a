//! Best-effort gas-price cache, refreshed on new heads and on a schedule.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use coffer_gateway::{ProviderError, ProviderGateway};
use coffer_types::{Timestamp, U256};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasPrice {
    pub price: U256,
    pub retrieved_at: Timestamp,
}

pub struct GasOracle {
    max_age: Duration,
    prices: Mutex<HashMap<u64, GasPrice>>,
}

impl GasOracle {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            prices: Mutex::new(HashMap::new()),
        }
    }

    pub async fn refresh(
        &self,
        provider: &dyn ProviderGateway,
        now: Timestamp,
    ) -> Result<U256, ProviderError> {
        let chain_id = provider.network().chain_id;
        let price = provider.gas_price().await?;
        self.prices
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(chain_id, GasPrice { price, retrieved_at: now });
        debug!(chain_id, %price, "gas price refreshed");
        Ok(price)
    }

    /// Cached price for `chain_id` if it is younger than the max age.
    pub fn latest(&self, chain_id: u64, now: Timestamp) -> Option<U256> {
        let prices = self.prices.lock().unwrap_or_else(|p| p.into_inner());
        prices
            .get(&chain_id)
            .filter(|p| !p.retrieved_at.has_expired(self.max_age, now))
            .map(|p| p.price)
    }

    /// Cached price, or a fresh one from the provider.
    pub async fn current(
        &self,
        provider: &dyn ProviderGateway,
        now: Timestamp,
    ) -> Result<U256, ProviderError> {
        match self.latest(provider.network().chain_id, now) {
            Some(price) => Ok(price),
            None => self.refresh(provider, now).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_nullables::NullProvider;
    use coffer_types::Network;

    #[tokio::test]
    async fn serves_cached_price_until_stale() {
        let provider = NullProvider::new(Network::ethereum());
        provider.set_gas_price(U256::from(7u64));
        let oracle = GasOracle::new(Duration::from_secs(60));
        let t0 = Timestamp::from_secs(1_000);

        assert_eq!(oracle.current(&provider, t0).await, Ok(U256::from(7u64)));
        provider.set_gas_price(U256::from(9u64));
        assert_eq!(oracle.current(&provider, t0).await, Ok(U256::from(7u64)));
        assert_eq!(provider.call_count("gas_price"), 1);

        let later = t0.saturating_add(Duration::from_secs(61));
        assert_eq!(oracle.latest(1, later), None);
        assert_eq!(oracle.current(&provider, later).await, Ok(U256::from(9u64)));
    }
}
