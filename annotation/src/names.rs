//! Address display names through an ordered list of resolver strategies.

use std::collections::HashMap;
use std::sync::Arc;

use coffer_types::{normalize_address, Address, AddressOnNetwork};
use futures_util::future::join_all;
use tokio::sync::RwLock;

use crate::assets::AssetRegistry;
use crate::batcher::NameBatcher;
use crate::types::AddressIdentity;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameRecord {
    pub name: String,
    pub avatar: Option<String>,
}

/// User-assigned labels, valid on every network.
#[derive(Default)]
pub struct LocalNames {
    labels: RwLock<HashMap<String, NameRecord>>,
}

impl LocalNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, address: &Address, name: impl Into<String>, avatar: Option<String>) {
        self.labels.write().await.insert(
            normalize_address(address),
            NameRecord {
                name: name.into(),
                avatar,
            },
        );
    }

    pub async fn remove(&self, address: &Address) {
        self.labels.write().await.remove(&normalize_address(address));
    }

    async fn get(&self, address: &Address) -> Option<NameRecord> {
        self.labels.read().await.get(&normalize_address(address)).cloned()
    }
}

/// One name-resolution strategy.
pub enum NameResolver {
    Local(Arc<LocalNames>),
    /// Names of known token contracts.
    Asset(Arc<AssetRegistry>),
    /// On-chain reverse records, one batcher per chain id.
    ReverseRecords(HashMap<u64, NameBatcher>),
}

impl NameResolver {
    pub fn can_resolve(&self, target: &AddressOnNetwork) -> bool {
        match self {
            Self::Local(_) | Self::Asset(_) => true,
            Self::ReverseRecords(batchers) => batchers.contains_key(&target.network.chain_id),
        }
    }

    pub async fn resolve(&self, target: &AddressOnNetwork) -> Option<NameRecord> {
        match self {
            Self::Local(names) => names.get(&target.address).await,
            Self::Asset(assets) => assets
                .get(target.network.chain_id, &target.address)
                .await
                .map(|asset| NameRecord {
                    name: asset.name,
                    avatar: asset.logo_url,
                }),
            Self::ReverseRecords(batchers) => {
                let batcher = batchers.get(&target.network.chain_id)?;
                batcher.lookup(target.address).await.map(|name| NameRecord { name, avatar: None })
            }
        }
    }
}

/// Resolvers in priority order; the first that can resolve an address and
/// returns a name wins.
#[derive(Default)]
pub struct ResolverChain {
    resolvers: Vec<NameResolver>,
}

impl ResolverChain {
    pub fn new(resolvers: Vec<NameResolver>) -> Self {
        Self { resolvers }
    }

    pub async fn resolve(&self, target: &AddressOnNetwork) -> Option<NameRecord> {
        for resolver in self.resolvers.iter().filter(|r| r.can_resolve(target)) {
            if let Some(record) = resolver.resolve(target).await {
                return Some(record);
            }
        }
        None
    }

    pub async fn identity(&self, target: &AddressOnNetwork) -> AddressIdentity {
        match self.resolve(target).await {
            Some(record) => AddressIdentity {
                address: target.address,
                name: Some(record.name),
                avatar: record.avatar,
            },
            None => AddressIdentity::bare(target.address),
        }
    }

    /// Resolve many addresses concurrently, so lookups that go on-chain land
    /// in the same batch.
    pub async fn identities(&self, targets: &[AddressOnNetwork]) -> HashMap<Address, AddressIdentity> {
        let resolved = join_all(targets.iter().map(|t| self.identity(t))).await;
        resolved.into_iter().map(|id| (id.address, id)).collect()
    }
}
