//! Durable [`KvStore`] backed by an embedded redb database.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use redb::{Database, ReadableTable, TableDefinition};

use crate::kv::KvStore;

const TABLE: TableDefinition<'static, &'static str, &'static str> =
    TableDefinition::new("switchyard_kv");

/// Single-file durable store.
#[derive(Debug, Clone)]
pub struct RedbKvStore {
    db: Arc<Database>,
}

impl RedbKvStore {
    /// Open (or create) the database file and ensure the table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(TABLE)?;
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RedbKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        Ok(table.get(key)?.map(|value| value.value().to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(TABLE)?;
            let removed = table.remove(key)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        let mut keys = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            let key_str = key.value();
            if key_str.starts_with(prefix) {
                keys.push(key_str.to_string());
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_round_trip_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.redb");

        {
            let store = RedbKvStore::open(&path).unwrap();
            store.set("conversations", "[]").unwrap();
            store.set("profiles.active", "backend").unwrap();
        }

        let store = RedbKvStore::open(&path).unwrap();
        assert_eq!(store.get("conversations").unwrap().as_deref(), Some("[]"));
        assert_eq!(
            store.get("profiles.active").unwrap().as_deref(),
            Some("backend")
        );
    }

    #[test]
    fn test_prefix_listing_and_removal() {
        let dir = tempdir().unwrap();
        let store = RedbKvStore::open(dir.path().join("state.redb")).unwrap();

        store.set("memory.code", "[]").unwrap();
        store.set("memory.docs", "[]").unwrap();
        store.set("telemetry.daily", "[]").unwrap();

        assert_eq!(
            store.keys("memory.").unwrap(),
            vec!["memory.code", "memory.docs"]
        );
        assert!(store.remove("memory.code").unwrap());
        assert_eq!(store.keys("memory.").unwrap(), vec!["memory.docs"]);
    }
}
