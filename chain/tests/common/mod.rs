#![allow(dead_code)]

use std::sync::Arc;

use coffer_annotation::{AnnotationEngine, AssetRegistry, ResolverChain};
use coffer_chain::{ChainEvent, ChainService, ServiceSettings};
use coffer_gateway::{ProviderRegistry, RpcLog};
use coffer_nullables::{NullClock, NullProvider, NullSigner, NullStore};
use coffer_store::{ChainStore, StoreWindows};
use coffer_types::{Address, AddressOnNetwork, Bytes, Network, TxHash, B256, U256};
use tokio::sync::broadcast;

pub const START_SECS: u64 = 1_700_000_000;

pub fn addr(short: u16) -> Address {
    Address::left_padding_from(&short.to_be_bytes())
}

pub fn hash(n: u8) -> TxHash {
    B256::repeat_byte(n)
}

pub struct Harness {
    pub network: Network,
    pub provider: Arc<NullProvider>,
    pub signer: Arc<NullSigner>,
    pub clock: Arc<NullClock>,
    pub records: Arc<NullStore>,
    pub store: Arc<ChainStore>,
    pub assets: Arc<AssetRegistry>,
    pub service: Arc<ChainService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ServiceSettings::default())
    }

    pub fn with_settings(settings: ServiceSettings) -> Self {
        let network = Network::ethereum();
        let provider = Arc::new(NullProvider::new(network.clone()));
        let signer = Arc::new(NullSigner::new());
        let clock = Arc::new(NullClock::from_secs(START_SECS));
        let records = Arc::new(NullStore::new());
        let store = Arc::new(ChainStore::new(records.clone(), StoreWindows::default()));
        let providers = ProviderRegistry::new().with(provider.clone());
        let assets = Arc::new(AssetRegistry::new());
        let annotation = Arc::new(AnnotationEngine::new(
            providers.clone(),
            assets.clone(),
            ResolverChain::default(),
            store.clone(),
            clock.clone(),
        ));
        let service = ChainService::new(store.clone(), providers, annotation, clock.clone(), settings)
            .with_signer(signer.clone());
        Self {
            network,
            provider,
            signer,
            clock,
            records,
            store,
            assets,
            service: Arc::new(service),
        }
    }

    pub fn account(&self, short: u16) -> AddressOnNetwork {
        AddressOnNetwork::new(addr(short), self.network.clone())
    }

    /// Track `account` in the store only, without the side effects of
    /// `ChainService::track_account`.
    pub fn track(&self, account: &AddressOnNetwork) {
        self.store.add_tracked_account(account).unwrap();
    }
}

/// Everything published so far.
pub fn drain_events(rx: &mut broadcast::Receiver<ChainEvent>) -> Vec<ChainEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// An ERC-20 `Transfer` log as a provider returns it.
pub fn transfer_log(
    token: Address,
    from: Address,
    to: Address,
    amount: u64,
    tx_hash: TxHash,
    height: u64,
) -> RpcLog {
    RpcLog {
        address: token,
        topics: vec![
            coffer_annotation::abi::transfer_topic(),
            from.into_word(),
            to.into_word(),
        ],
        data: Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
        transaction_hash: Some(tx_hash),
        block_number: Some(alloy_primitives::U64::from(height)),
    }
}
