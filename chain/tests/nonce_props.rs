use coffer_chain::NonceAllocator;
use coffer_nullables::NullProvider;
use coffer_types::{Address, Network};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Whatever the chain reports between allocations, nonces handed out
    /// without releases strictly increase and never fall below the count.
    #[test]
    fn allocations_strictly_increase(counts in prop::collection::vec(0u64..40, 1..30)) {
        let sender = Address::repeat_byte(0x11);
        let provider = NullProvider::new(Network::ethereum());
        let allocator = NonceAllocator::new();

        let issued = runtime().block_on(async {
            let mut issued = Vec::new();
            for count in &counts {
                provider.set_transaction_count(sender, *count);
                issued.push(allocator.allocate(&provider, sender).await.unwrap());
            }
            issued
        });

        for (nonce, count) in issued.iter().zip(&counts) {
            prop_assert!(nonce >= count);
        }
        for pair in issued.windows(2) {
            prop_assert!(pair[1] > pair[0]);
        }
    }

    /// Releasing the latest nonce hands it out again, unless the chain has
    /// moved past it.
    #[test]
    fn released_latest_nonce_is_reused(count in 0u64..1_000, extra in 0usize..5) {
        let sender = Address::repeat_byte(0x22);
        let provider = NullProvider::new(Network::ethereum());
        provider.set_transaction_count(sender, count);
        let allocator = NonceAllocator::new();
        let chain_id = Network::ethereum().chain_id;

        let (latest, again) = runtime().block_on(async {
            let mut latest = allocator.allocate(&provider, sender).await.unwrap();
            for _ in 0..extra {
                latest = allocator.allocate(&provider, sender).await.unwrap();
            }
            allocator.release(chain_id, sender, latest).await;
            (latest, allocator.allocate(&provider, sender).await.unwrap())
        });

        prop_assert_eq!(latest, count + extra as u64);
        prop_assert_eq!(again, latest);
    }
}
