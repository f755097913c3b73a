//! The key/record store abstraction every backend implements.

use crate::StoreError;

/// Logical collections held by a record store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Blocks,
    /// Block hash to block record key.
    BlockHashes,
    Transactions,
    Balances,
    TrackedAccounts,
    AssetTransferLookups,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Blocks,
        Collection::BlockHashes,
        Collection::Transactions,
        Collection::Balances,
        Collection::TrackedAccounts,
        Collection::AssetTransferLookups,
    ];

    /// Stable name, used as the backend database name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::BlockHashes => "block_hashes",
            Self::Transactions => "transactions",
            Self::Balances => "balances",
            Self::TrackedAccounts => "tracked_accounts",
            Self::AssetTransferLookups => "asset_transfer_lookups",
        }
    }
}

/// Trait for key/record storage.
///
/// Writes are atomic per record; no multi-key transactional guarantees are
/// offered.
pub trait RecordStore: Send + Sync {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, collection: Collection, key: &str, value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError>;

    /// All records whose key and value satisfy `predicate`, in key order.
    fn query(
        &self,
        collection: Collection,
        predicate: &dyn Fn(&str, &[u8]) -> bool,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// All records whose key starts with `prefix`, in key order.
    fn scan_prefix(
        &self,
        collection: Collection,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        self.query(collection, &|key, _| key.starts_with(prefix))
    }

    /// The record with the greatest key under `prefix` that satisfies
    /// `predicate`. Backends walk backwards from the end of the prefix and
    /// stop at the first match.
    fn last_matching(
        &self,
        collection: Collection,
        prefix: &str,
        predicate: &dyn Fn(&str, &[u8]) -> bool,
    ) -> Result<Option<(String, Vec<u8>)>, StoreError> {
        Ok(self
            .scan_prefix(collection, prefix)?
            .into_iter()
            .rev()
            .find(|(key, value)| predicate(key, value)))
    }

    /// Every key in `collection`, in key order.
    fn keys(&self, collection: Collection) -> Result<Vec<String>, StoreError> {
        self.keys_with_prefix(collection, "")
    }

    /// Keys starting with `prefix`, in key order.
    fn keys_with_prefix(&self, collection: Collection, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .scan_prefix(collection, prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }
}
