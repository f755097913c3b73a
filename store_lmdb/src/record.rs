//! LMDB implementation of RecordStore.

use coffer_store::{Collection, RecordStore, StoreError};

use crate::environment::LmdbEnvironment;
use crate::LmdbError;

impl RecordStore for LmdbEnvironment {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env().read_txn().map_err(LmdbError::from)?;
        let value = self
            .database(collection)
            .get(&rtxn, key)
            .map_err(LmdbError::from)?;
        Ok(value.map(<[u8]>::to_vec))
    }

    fn put(&self, collection: Collection, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut wtxn = self.env().write_txn().map_err(LmdbError::from)?;
        self.database(collection)
            .put(&mut wtxn, key, value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        let mut wtxn = self.env().write_txn().map_err(LmdbError::from)?;
        self.database(collection)
            .delete(&mut wtxn, key)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn query(
        &self,
        collection: Collection,
        predicate: &dyn Fn(&str, &[u8]) -> bool,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let rtxn = self.env().read_txn().map_err(LmdbError::from)?;
        let mut out = Vec::new();
        for entry in self
            .database(collection)
            .iter(&rtxn)
            .map_err(LmdbError::from)?
        {
            let (key, value) = entry.map_err(LmdbError::from)?;
            if predicate(key, value) {
                out.push((key.to_string(), value.to_vec()));
            }
        }
        Ok(out)
    }

    fn scan_prefix(
        &self,
        collection: Collection,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let rtxn = self.env().read_txn().map_err(LmdbError::from)?;
        let mut out = Vec::new();
        for entry in self
            .database(collection)
            .prefix_iter(&rtxn, prefix)
            .map_err(LmdbError::from)?
        {
            let (key, value) = entry.map_err(LmdbError::from)?;
            out.push((key.to_string(), value.to_vec()));
        }
        Ok(out)
    }

    fn last_matching(
        &self,
        collection: Collection,
        prefix: &str,
        predicate: &dyn Fn(&str, &[u8]) -> bool,
    ) -> Result<Option<(String, Vec<u8>)>, StoreError> {
        let rtxn = self.env().read_txn().map_err(LmdbError::from)?;
        for entry in self
            .database(collection)
            .rev_prefix_iter(&rtxn, prefix)
            .map_err(LmdbError::from)?
        {
            let (key, value) = entry.map_err(LmdbError::from)?;
            if predicate(key, value) {
                return Ok(Some((key.to_string(), value.to_vec())));
            }
        }
        Ok(None)
    }
}
