//! Storage backends for the engine
//!
//! `OptimizedStorage` is the RocksDB-backed store used in production;
//! `MemoryStorage` keeps everything in a `BTreeMap` for tests and
//! ephemeral runs. Both apply a `WriteSet` atomically after checking its
//! compare-and-swap expectations.

use crate::{
    common::traits::{KeyValueStore, WriteSet},
    config::StorageConfig,
    errors::{BingoResult, StorageError},
};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Arc, Mutex, RwLock},
};

#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<DB>,
    // Expectation checks and the batch write happen under this lock
    commit_lock: Arc<Mutex<()>>,
}

impl OptimizedStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> BingoResult<Self> {
        Self::with_config(path, &StorageConfig::default())
    }

    pub fn with_config<P: AsRef<Path>>(path: P, config: &StorageConfig) -> BingoResult<Self> {
        if config.clear_on_start && path.as_ref().exists() {
            tracing::warn!(path = %path.as_ref().display(), "Clearing database on start");
            std::fs::remove_dir_all(path.as_ref())
                .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_target_file_size_base(config.target_file_size_mb * 1024 * 1024);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    fn read(&self, key: &[u8]) -> BingoResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::PersistenceFailure(e.to_string()).into())
    }
}

impl KeyValueStore for OptimizedStorage {
    fn get(&self, key: &[u8]) -> BingoResult<Option<Vec<u8>>> {
        self.read(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> BingoResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::PersistenceFailure(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    fn commit(&self, writes: WriteSet) -> BingoResult<()> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| StorageError::PersistenceFailure("commit lock poisoned".to_string()))?;

        for (key, expected) in &writes.expectations {
            if self.read(key)? != *expected {
                return Err(StorageError::ConcurrentUpdateConflict(String::from_utf8_lossy(key).into_owned()).into());
            }
        }

        let mut batch = WriteBatch::default();
        for (key, value) in &writes.puts {
            batch.put(key, value);
        }
        for key in &writes.deletes {
            batch.delete(key);
        }
        self.db
            .write(batch)
            .map_err(|e| StorageError::PersistenceFailure(e.to_string()))?;
        Ok(())
    }
}

/// In-process store with the same atomicity contract as `OptimizedStorage`
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StorageError {
    StorageError::PersistenceFailure("memory store lock poisoned".to_string())
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &[u8]) -> BingoResult<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> BingoResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(&self, writes: WriteSet) -> BingoResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;

        for (key, expected) in &writes.expectations {
            if entries.get(key) != expected.as_ref() {
                return Err(StorageError::ConcurrentUpdateConflict(String::from_utf8_lossy(key).into_owned()).into());
            }
        }

        for (key, value) in writes.puts {
            entries.insert(key, value);
        }
        for key in writes.deletes {
            entries.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise_store(store: &dyn KeyValueStore) {
        let mut writes = WriteSet::new();
        writes.expect("jackpot", None);
        writes.put("jackpot", b"1".to_vec());
        writes.put("game:a", b"A".to_vec());
        writes.put("game:b", b"B".to_vec());
        writes.put("gamez", b"Z".to_vec());
        store.commit(writes).unwrap();

        assert_eq!(store.get(b"jackpot").unwrap(), Some(b"1".to_vec()));

        let games = store.scan_prefix(b"game:").unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].0, b"game:a".to_vec());
        assert_eq!(games[1].1, b"B".to_vec());

        // Stale expectation: nothing in the set is applied
        let mut stale = WriteSet::new();
        stale.expect("jackpot", None);
        stale.put("jackpot", b"2".to_vec());
        stale.put("game:c", b"C".to_vec());
        let err = store.commit(stale).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get(b"jackpot").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"game:c").unwrap(), None);

        let mut fresh = WriteSet::new();
        fresh.expect("jackpot", Some(b"1".to_vec()));
        fresh.put("jackpot", b"2".to_vec());
        fresh.delete("gamez");
        store.commit(fresh).unwrap();
        assert_eq!(store.get(b"jackpot").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"gamez").unwrap(), None);
    }

    #[test]
    fn test_memory_storage_cas() {
        let store = MemoryStorage::new();
        exercise_store(&store);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_rocksdb_storage_cas() {
        let dir = TempDir::new().unwrap();
        let store = OptimizedStorage::new(dir.path()).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_rocksdb_clear_on_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let store = OptimizedStorage::new(&path).unwrap();
            let mut writes = WriteSet::new();
            writes.put("wallet", b"9".to_vec());
            store.commit(writes).unwrap();
        }

        let config = StorageConfig {
            clear_on_start: true,
            ..Default::default()
        };
        let store = OptimizedStorage::with_config(&path, &config).unwrap();
        assert_eq!(store.get(b"wallet").unwrap(), None);
    }
}
