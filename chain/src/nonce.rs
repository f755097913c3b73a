//! Per-address nonce allocation for outgoing transactions.
//!
//! State is the last nonce handed out for each `(chain id, address)`, kept
//! in memory only. Every allocation re-reads the provider's transaction
//! count and issues `max(last allocated + 1, transaction count)`, so
//! transactions sent by other instances of the wallet are respected.
//!
//! Allocation for one address is a critical section: the slot's lock is held
//! across the provider round trip, so concurrent callers are strictly
//! serialized and never receive the same nonce.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use coffer_gateway::{ProviderError, ProviderGateway};
use coffer_types::{normalize_address, Address};
use tracing::{debug, warn};

type Slot = Arc<tokio::sync::Mutex<Option<u64>>>;

#[derive(Default)]
pub struct NonceAllocator {
    slots: Mutex<HashMap<(u64, Address), Slot>>,
}

impl NonceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, chain_id: u64, address: Address) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(slots.entry((chain_id, address)).or_default())
    }

    /// Next nonce for `address` on the provider's network.
    ///
    /// A provider failure is returned unchanged and leaves the remembered
    /// nonce untouched.
    pub async fn allocate(
        &self,
        provider: &dyn ProviderGateway,
        address: Address,
    ) -> Result<u64, ProviderError> {
        let chain_id = provider.network().chain_id;
        let slot = self.slot(chain_id, address);
        let mut last = slot.lock().await;

        let observed = provider.get_transaction_count(address).await?;
        let next = match *last {
            Some(last) => observed.max(last + 1),
            None => observed,
        };
        *last = Some(next);
        debug!(chain_id, address = %normalize_address(&address), nonce = next, "nonce allocated");
        Ok(next)
    }

    /// Give back `nonce` after its transaction was abandoned before broadcast.
    ///
    /// Releasing the latest nonce makes it reusable. Releasing an older one
    /// rewinds past it, which also releases every later nonce even if one of
    /// them is still in flight elsewhere.
    pub async fn release(&self, chain_id: u64, address: Address, nonce: u64) {
        let slot = self.slot(chain_id, address);
        let mut last = slot.lock().await;
        match *last {
            Some(current) if nonce <= current => {
                *last = nonce.checked_sub(1);
                debug!(chain_id, address = %normalize_address(&address), nonce, "nonce released");
            }
            current => {
                warn!(
                    chain_id,
                    address = %normalize_address(&address),
                    nonce,
                    last = ?current,
                    "release of a nonce that was never allocated"
                );
            }
        }
    }

    /// Reconcile with a pending transaction seen for `address`: adopt its
    /// nonce when it is at least the remembered one.
    pub async fn observe_pending(&self, chain_id: u64, address: Address, nonce: u64) {
        let slot = self.slot(chain_id, address);
        let mut last = slot.lock().await;
        if last.map_or(true, |current| current <= nonce) {
            *last = Some(nonce);
        }
    }

    /// Last nonce handed out (or adopted) for `address`.
    pub async fn remembered(&self, chain_id: u64, address: Address) -> Option<u64> {
        *self.slot(chain_id, address).lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_nullables::NullProvider;
    use coffer_types::Network;
    use std::time::Duration;

    fn sender() -> Address {
        Address::repeat_byte(0xab)
    }

    #[tokio::test]
    async fn first_allocation_starts_at_transaction_count() {
        let provider = NullProvider::new(Network::ethereum());
        provider.set_transaction_count(sender(), 5);
        let nonces = NonceAllocator::new();

        assert_eq!(nonces.allocate(&provider, sender()).await, Ok(5));
        assert_eq!(nonces.allocate(&provider, sender()).await, Ok(6));
        assert_eq!(nonces.remembered(1, sender()).await, Some(6));
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        let provider = NullProvider::new(Network::ethereum());
        provider.set_transaction_count(sender(), 5);
        provider.set_latency(Some(Duration::from_millis(5)));
        let nonces = NonceAllocator::new();

        let (a, b) = tokio::join!(
            nonces.allocate(&provider, sender()),
            nonces.allocate(&provider, sender())
        );
        let mut got = vec![a.unwrap(), b.unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![5, 6]);
    }

    #[tokio::test]
    async fn chain_count_ahead_of_memory_wins() {
        let provider = NullProvider::new(Network::ethereum());
        let nonces = NonceAllocator::new();
        assert_eq!(nonces.allocate(&provider, sender()).await, Ok(0));

        // Another wallet instance sent three transactions meanwhile.
        provider.set_transaction_count(sender(), 3);
        assert_eq!(nonces.allocate(&provider, sender()).await, Ok(3));
    }

    #[tokio::test]
    async fn provider_failure_leaves_state_untouched() {
        let provider = NullProvider::new(Network::ethereum());
        provider.set_transaction_count(sender(), 2);
        let nonces = NonceAllocator::new();
        nonces.allocate(&provider, sender()).await.unwrap();

        provider.fail_next("get_transaction_count", ProviderError::Timeout);
        assert_eq!(
            nonces.allocate(&provider, sender()).await,
            Err(ProviderError::Timeout)
        );
        assert_eq!(nonces.remembered(1, sender()).await, Some(2));
    }

    #[tokio::test]
    async fn releasing_latest_nonce_makes_it_reusable() {
        let provider = NullProvider::new(Network::ethereum());
        provider.set_transaction_count(sender(), 7);
        let nonces = NonceAllocator::new();
        let nonce = nonces.allocate(&provider, sender()).await.unwrap();

        nonces.release(1, sender(), nonce).await;
        assert_eq!(nonces.allocate(&provider, sender()).await, Ok(7));
    }

    #[tokio::test]
    async fn releasing_older_nonce_rewinds_everything_after_it() {
        let provider = NullProvider::new(Network::ethereum());
        let nonces = NonceAllocator::new();
        for expected in 0..4 {
            assert_eq!(nonces.allocate(&provider, sender()).await, Ok(expected));
        }

        // Nonce 3 may still be in flight; it is released all the same.
        nonces.release(1, sender(), 1).await;
        assert_eq!(nonces.remembered(1, sender()).await, Some(0));
        assert_eq!(nonces.allocate(&provider, sender()).await, Ok(1));
    }

    #[tokio::test]
    async fn releasing_unknown_nonce_is_ignored() {
        let nonces = NonceAllocator::new();
        nonces.release(1, sender(), 4).await;
        assert_eq!(nonces.remembered(1, sender()).await, None);
    }

    #[tokio::test]
    async fn pending_observation_only_moves_forward() {
        let nonces = NonceAllocator::new();
        nonces.observe_pending(1, sender(), 9).await;
        assert_eq!(nonces.remembered(1, sender()).await, Some(9));
        nonces.observe_pending(1, sender(), 4).await;
        assert_eq!(nonces.remembered(1, sender()).await, Some(9));

        let provider = NullProvider::new(Network::ethereum());
        assert_eq!(nonces.allocate(&provider, sender()).await, Ok(10));
    }

    #[tokio::test]
    async fn addresses_and_chains_are_independent() {
        let mainnet = NullProvider::new(Network::ethereum());
        let optimism = NullProvider::new(Network::optimism());
        let nonces = NonceAllocator::new();

        assert_eq!(nonces.allocate(&mainnet, sender()).await, Ok(0));
        assert_eq!(nonces.allocate(&optimism, sender()).await, Ok(0));
        assert_eq!(nonces.allocate(&mainnet, Address::repeat_byte(1)).await, Ok(0));
    }
}
