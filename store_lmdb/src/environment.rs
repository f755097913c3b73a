//! LMDB environment setup.

use std::collections::HashMap;
use std::path::Path;

use coffer_store::Collection;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use tracing::info;

use crate::LmdbError;

pub(crate) type RecordDb = Database<Str, Bytes>;

/// Default map size: 1 GiB.
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Wraps the LMDB environment and one database handle per collection.
pub struct LmdbEnvironment {
    env: Env,
    databases: HashMap<Collection, RecordDb>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given directory.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per process for this path;
        // callers must not open the same directory twice concurrently.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(Collection::ALL.len() as u32)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let mut databases = HashMap::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let db: RecordDb = env.create_database(&mut wtxn, Some(collection.name()))?;
            databases.insert(collection, db);
        }
        wtxn.commit()?;

        info!(path = %path.display(), map_size, "opened LMDB environment");
        Ok(Self { env, databases })
    }

    pub(crate) fn env(&self) -> &Env {
        &self.env
    }

    pub(crate) fn database(&self, collection: Collection) -> RecordDb {
        // Every collection is created in `open`.
        self.databases[&collection]
    }
}
