//! Nullable store: thread-safe in-memory record storage for testing.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use coffer_store::{Collection, RecordStore, StoreError};

/// An in-memory [`RecordStore`]. Keys are kept sorted per collection, like
/// the LMDB backend.
pub struct NullStore {
    collections: Mutex<HashMap<Collection, BTreeMap<String, Vec<u8>>>>,
    fail_writes: AtomicBool,
}

impl NullStore {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `put`/`delete` fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of records in a collection.
    pub fn len(&self, collection: Collection) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".into()));
        }
        Ok(())
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for NullStore {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(&collection)
            .and_then(|records| records.get(key).cloned()))
    }

    fn put(&self, collection: Collection, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.collections
            .lock()
            .unwrap()
            .entry(collection)
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        if let Some(records) = self.collections.lock().unwrap().get_mut(&collection) {
            records.remove(key);
        }
        Ok(())
    }

    fn query(
        &self,
        collection: Collection,
        predicate: &dyn Fn(&str, &[u8]) -> bool,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(&collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|(k, v)| predicate(k, v))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn last_matching(
        &self,
        collection: Collection,
        prefix: &str,
        predicate: &dyn Fn(&str, &[u8]) -> bool,
    ) -> Result<Option<(String, Vec<u8>)>, StoreError> {
        let collections = self.collections.lock().unwrap();
        let Some(records) = collections.get(&collection) else {
            return Ok(None);
        };
        Ok(records
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .rev()
            .skip_while(|(k, _)| !k.starts_with(prefix))
            .take_while(|(k, _)| k.starts_with(prefix))
            .find(|(k, v)| predicate(k, v))
            .map(|(k, v)| (k.clone(), v.clone())))
    }
}
