//! Typed chain-state queries over a [`RecordStore`].

use std::cell::Cell;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coffer_types::{
    AccountBalance, AddressOnNetwork, Asset, AssetTransferLookup, BlockHash, EvmBlock,
    Network, Timestamp, Transaction, TxHash, B256,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::keys;
use crate::merge::merge_transaction;
use crate::record::{Collection, RecordStore};
use crate::StoreError;

/// Stored blocks examined by [`ChainStore::latest_block`], newest first.
pub const LATEST_BLOCK_LOOKBACK: usize = 64;

/// Recency bounds applied to "latest" reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreWindows {
    pub latest_block_max_age: Duration,
    pub balance_max_age: Duration,
}

impl Default for StoreWindows {
    fn default() -> Self {
        Self {
            latest_block_max_age: Duration::from_secs(600),
            balance_max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Result of [`ChainStore::add_block`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockInsert {
    /// First block stored at this height.
    Inserted,
    /// The same block was already stored.
    AlreadyKnown,
    /// Other blocks were already stored at this height. They are kept.
    Reorg { superseded: Vec<BlockHash> },
}

pub struct ChainStore {
    records: Arc<dyn RecordStore>,
    windows: StoreWindows,
    // Serializes read-merge-write of transaction records.
    transaction_writes: Mutex<()>,
}

impl ChainStore {
    pub fn new(records: Arc<dyn RecordStore>, windows: StoreWindows) -> Self {
        Self {
            records,
            windows,
            transaction_writes: Mutex::new(()),
        }
    }

    pub fn windows(&self) -> StoreWindows {
        self.windows
    }

    // --- blocks ---

    pub fn add_block(&self, block: &EvmBlock) -> Result<BlockInsert, StoreError> {
        let prefix = keys::block_height_prefix(&block.network, block.height);
        let existing = self.records.keys_with_prefix(Collection::Blocks, &prefix)?;
        let key = keys::block_key(&block.network, block.height, &block.hash);

        if existing.iter().any(|k| *k == key) {
            return Ok(BlockInsert::AlreadyKnown);
        }
        self.put_json(Collection::Blocks, &key, block)?;
        self.records.put(
            Collection::BlockHashes,
            &keys::block_hash_key(&block.network, &block.hash),
            key.as_bytes(),
        )?;

        if existing.is_empty() {
            return Ok(BlockInsert::Inserted);
        }
        let superseded = existing
            .iter()
            .filter_map(|k| parse_hash_suffix(k))
            .collect::<Vec<_>>();
        Ok(BlockInsert::Reorg { superseded })
    }

    pub fn get_block(&self, network: &Network, hash: &BlockHash) -> Result<Option<EvmBlock>, StoreError> {
        let index_key = keys::block_hash_key(network, hash);
        let Some(target) = self.records.get(Collection::BlockHashes, &index_key)? else {
            return Ok(None);
        };
        match String::from_utf8(target) {
            Ok(block_key) => self.get_json(Collection::Blocks, &block_key),
            Err(_) => {
                warn!(key = %index_key, "skipping undecodable block index entry");
                Ok(None)
            }
        }
    }

    pub fn blocks_at_height(&self, network: &Network, height: u64) -> Result<Vec<EvmBlock>, StoreError> {
        let prefix = keys::block_height_prefix(network, height);
        self.decode_all(Collection::Blocks, self.records.scan_prefix(Collection::Blocks, &prefix)?)
    }

    /// The highest stored block whose timestamp is within the recency
    /// window. Older blocks are never reported as current. At most
    /// [`LATEST_BLOCK_LOOKBACK`] blocks below the highest are examined.
    pub fn latest_block(&self, network: &Network, now: Timestamp) -> Result<Option<EvmBlock>, StoreError> {
        let cutoff = now.saturating_sub(self.windows.latest_block_max_age);
        let examined = Cell::new(0usize);
        let found = self.records.last_matching(
            Collection::Blocks,
            &keys::network_prefix(network),
            &|_, bytes| {
                examined.set(examined.get() + 1);
                examined.get() >= LATEST_BLOCK_LOOKBACK
                    || serde_json::from_slice::<EvmBlock>(bytes).is_ok_and(|b| b.timestamp >= cutoff)
            },
        )?;
        let Some((key, bytes)) = found else {
            return Ok(None);
        };
        match decode::<EvmBlock>(&bytes) {
            Ok(block) if block.timestamp >= cutoff => Ok(Some(block)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(%key, "skipping undecodable block: {e}");
                Ok(None)
            }
        }
    }

    // --- transactions ---

    /// Merge `transaction` into the stored record for its hash and return
    /// the merged record.
    pub fn add_or_update_transaction(&self, transaction: Transaction) -> Result<Transaction, StoreError> {
        let _guard = self
            .transaction_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let key = keys::transaction_key(transaction.network(), &transaction.hash());
        let existing: Option<Transaction> = self.get_json(Collection::Transactions, &key)?;
        let merged = merge_transaction(existing.as_ref(), transaction);
        if existing.as_ref() != Some(&merged) {
            self.put_json(Collection::Transactions, &key, &merged)?;
        } else {
            debug!(hash = %merged.hash(), "transaction record unchanged");
        }
        Ok(merged)
    }

    pub fn get_transaction(&self, network: &Network, hash: &TxHash) -> Result<Option<Transaction>, StoreError> {
        self.get_json(Collection::Transactions, &keys::transaction_key(network, hash))
    }

    pub fn saved_transaction_hashes(&self, network: &Network) -> Result<HashSet<TxHash>, StoreError> {
        let keys = self
            .records
            .keys_with_prefix(Collection::Transactions, &keys::network_prefix(network))?;
        Ok(keys.iter().filter_map(|k| parse_hash_suffix(k)).collect())
    }

    /// Transactions sent from or to `account`, matched case-insensitively.
    pub fn transactions_for_account(&self, account: &AddressOnNetwork) -> Result<Vec<Transaction>, StoreError> {
        let rows = self
            .records
            .scan_prefix(Collection::Transactions, &keys::network_prefix(&account.network))?;
        let transactions: Vec<Transaction> = self.decode_all(Collection::Transactions, rows)?;
        Ok(transactions
            .into_iter()
            .filter(|t| t.body().involves(&account.address))
            .collect())
    }

    // --- balances ---

    pub fn add_balance(&self, balance: &AccountBalance) -> Result<(), StoreError> {
        let key = keys::balance_key(
            &balance.address_on_network,
            &balance.asset_amount.asset,
            balance.retrieved_at,
        );
        self.put_json(Collection::Balances, &key, balance)
    }

    /// Most recently retrieved balance within the recency window. Keys end
    /// in the retrieval time, so only the newest decodable record is read.
    pub fn latest_balance(
        &self,
        account: &AddressOnNetwork,
        asset: &Asset,
        now: Timestamp,
    ) -> Result<Option<AccountBalance>, StoreError> {
        let cutoff = now.saturating_sub(self.windows.balance_max_age);
        let newest = self.records.last_matching(
            Collection::Balances,
            &keys::balance_prefix(account, asset),
            &|_, bytes| serde_json::from_slice::<AccountBalance>(bytes).is_ok(),
        )?;
        let Some((_, bytes)) = newest else {
            return Ok(None);
        };
        let balance: AccountBalance = decode(&bytes)?;
        Ok((balance.retrieved_at >= cutoff).then_some(balance))
    }

    // --- tracked accounts ---

    pub fn add_tracked_account(&self, account: &AddressOnNetwork) -> Result<(), StoreError> {
        self.put_json(
            Collection::TrackedAccounts,
            &keys::tracked_account_key(account),
            account,
        )
    }

    pub fn remove_tracked_account(&self, account: &AddressOnNetwork) -> Result<(), StoreError> {
        self.records
            .delete(Collection::TrackedAccounts, &keys::tracked_account_key(account))
    }

    pub fn tracked_accounts(&self) -> Result<Vec<AddressOnNetwork>, StoreError> {
        let rows = self.records.query(Collection::TrackedAccounts, &|_, _| true)?;
        self.decode_all(Collection::TrackedAccounts, rows)
    }

    pub fn tracked_accounts_on(&self, network: &Network) -> Result<Vec<AddressOnNetwork>, StoreError> {
        Ok(self
            .tracked_accounts()?
            .into_iter()
            .filter(|a| a.network.same_chain(network))
            .collect())
    }

    // --- historic scan bookmarks ---

    pub fn record_asset_transfer_lookup(&self, lookup: &AssetTransferLookup) -> Result<(), StoreError> {
        let key = keys::lookup_key(&lookup.address_on_network, lookup.start_block, lookup.end_block);
        self.put_json(Collection::AssetTransferLookups, &key, lookup)
    }

    pub fn asset_transfer_lookups(&self, account: &AddressOnNetwork) -> Result<Vec<AssetTransferLookup>, StoreError> {
        let rows = self
            .records
            .scan_prefix(Collection::AssetTransferLookups, &keys::lookup_prefix(account))?;
        self.decode_all(Collection::AssetTransferLookups, rows)
    }

    pub fn oldest_scanned_block(&self, account: &AddressOnNetwork) -> Result<Option<u64>, StoreError> {
        Ok(self
            .asset_transfer_lookups(account)?
            .iter()
            .map(|l| l.start_block)
            .min())
    }

    pub fn newest_scanned_block(&self, account: &AddressOnNetwork) -> Result<Option<u64>, StoreError> {
        Ok(self
            .asset_transfer_lookups(account)?
            .iter()
            .map(|l| l.end_block)
            .max())
    }

    /// Whether a single recorded lookup already covers `[start, end]`.
    pub fn is_range_scanned(&self, account: &AddressOnNetwork, start: u64, end: u64) -> Result<bool, StoreError> {
        Ok(self
            .asset_transfer_lookups(account)?
            .iter()
            .any(|l| l.covers(start, end)))
    }

    /// Number of distinct blocks covered by the recorded lookups. Gaps
    /// between bookmarks do not count.
    pub fn scanned_block_count(&self, account: &AddressOnNetwork) -> Result<u64, StoreError> {
        let mut ranges: Vec<(u64, u64)> = self
            .asset_transfer_lookups(account)?
            .iter()
            .map(|l| (l.start_block.min(l.end_block), l.start_block.max(l.end_block)))
            .collect();
        ranges.sort_unstable();

        let mut count = 0u64;
        let mut covered_to: Option<u64> = None;
        for (start, end) in ranges {
            let from = match covered_to {
                Some(to) if end <= to => continue,
                Some(to) => start.max(to + 1),
                None => start,
            };
            count += end - from + 1;
            covered_to = Some(end);
        }
        Ok(count)
    }

    // --- encoding helpers ---

    fn put_json<T: Serialize>(&self, collection: Collection, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.records.put(collection, key, &bytes)
    }

    fn get_json<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Result<Option<T>, StoreError> {
        match self.records.get(collection, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decode every row, skipping records that fail to decode.
    fn decode_all<T: DeserializeOwned>(
        &self,
        collection: Collection,
        rows: Vec<(String, Vec<u8>)>,
    ) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::with_capacity(rows.len());
        for (key, bytes) in rows {
            match decode(&bytes) {
                Ok(value) => out.push(value),
                Err(e) => warn!(collection = collection.name(), %key, "skipping undecodable record: {e}"),
            }
        }
        Ok(out)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// The trailing `0x…` hash component of a key.
fn parse_hash_suffix(key: &str) -> Option<B256> {
    let (_, hash) = key.rsplit_once(':')?;
    B256::from_str(hash).ok()
}
