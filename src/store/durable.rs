//! ACID-durable key-value store backed by redb.
//!
//! One database file holds every [`Table`]. All tables are created when the
//! store is opened so read transactions never see a missing table.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use super::{StoreResult, Table};
use crate::error::StoreError;

/// File name of the database inside the data directory.
pub const DB_FILE: &str = "geoquery.redb";

fn definition(table: Table) -> TableDefinition<'static, &'static str, &'static [u8]> {
    TableDefinition::new(table.name())
}

fn redb_err<E: std::fmt::Display>(op: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{op} failed: {e}"),
    }
}

/// ACID-durable store using redb.
///
/// All writes go through transactions. Reads use MVCC snapshots.
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create a durable store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(DB_FILE);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        let txn = db.begin_write().map_err(redb_err("begin_write"))?;
        for table in Table::ALL {
            txn.open_table(definition(table))
                .map_err(redb_err("open_table"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Store a key-value pair with full ACID guarantees.
    pub fn put(&self, table: Table, key: &str, value: &[u8]) -> StoreResult<()> {
        self.put_multi(&[(table, key, value)])
    }

    /// Store several key-value pairs in one transaction.
    pub fn put_multi(&self, entries: &[(Table, &str, &[u8])]) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(redb_err("begin_write"))?;
        for (table, key, value) in entries {
            let mut t = txn
                .open_table(definition(*table))
                .map_err(redb_err("open_table"))?;
            t.insert(*key, *value)
                .map_err(redb_err("insert"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }

    /// Read a value by key. Returns `Ok(None)` if the key doesn't exist.
    pub fn get(&self, table: Table, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let txn = self
            .db
            .begin_read()
            .map_err(redb_err("begin_read"))?;
        let t = txn
            .open_table(definition(table))
            .map_err(redb_err("open_table"))?;
        let result = t.get(key).map_err(redb_err("get"))?;
        Ok(result.map(|guard| guard.value().to_vec()))
    }

    /// Delete a key. Returns whether the key existed.
    pub fn remove(&self, table: Table, key: &str) -> StoreResult<bool> {
        let txn = self
            .db
            .begin_write()
            .map_err(redb_err("begin_write"))?;
        let existed = {
            let mut t = txn
                .open_table(definition(table))
                .map_err(redb_err("open_table"))?;
            let removed = t.remove(key).map_err(redb_err("remove"))?;
            removed.is_some()
        };
        txn.commit().map_err(redb_err("commit"))?;
        Ok(existed)
    }

    /// Remove `keys` from each of `tables` in one transaction.
    pub fn remove_batch(&self, tables: &[Table], keys: &[String]) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(redb_err("begin_write"))?;
        for table in tables {
            let mut t = txn
                .open_table(definition(*table))
                .map_err(redb_err("open_table"))?;
            for key in keys {
                t.remove(key.as_str())
                    .map_err(redb_err("remove"))?;
            }
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }

    /// All `(key, value)` pairs of a table, in key order.
    pub fn scan(&self, table: Table) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let txn = self
            .db
            .begin_read()
            .map_err(redb_err("begin_read"))?;
        let t = txn
            .open_table(definition(table))
            .map_err(redb_err("open_table"))?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(redb_err("iter"))? {
            let (key, value) = entry.map_err(redb_err("iter"))?;
            out.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(out)
    }

    /// Drop and recreate a table.
    pub fn clear(&self, table: Table) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(redb_err("begin_write"))?;
        txn.delete_table(definition(table))
            .map_err(redb_err("delete_table"))?;
        txn.open_table(definition(table))
            .map_err(redb_err("open_table"))?;
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();

        store.put(Table::Results, "hello", &b"world"[..]).unwrap();
        assert_eq!(
            store.get(Table::Results, "hello").unwrap(),
            Some(b"world".to_vec())
        );

        assert!(store.remove(Table::Results, "hello").unwrap());
        assert_eq!(store.get(Table::Results, "hello").unwrap(), None);
        assert!(!store.remove(Table::Results, "hello").unwrap());
    }

    #[test]
    fn persistence_across_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let store = DurableStore::open(dir.path()).unwrap();
            store.put(Table::Registry, "county", &b"snapshot"[..]).unwrap();
        }
        let store = DurableStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get(Table::Registry, "county").unwrap(),
            Some(b"snapshot".to_vec())
        );
    }

    #[test]
    fn scan_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        store
            .put_multi(&[
                (Table::Results, "b", &b"2"[..]),
                (Table::Results, "a", &b"1"[..]),
                (Table::ResultMeta, "a", &b"m"[..]),
            ])
            .unwrap();

        let rows = store.scan(Table::Results).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "a");

        store.clear(Table::Results).unwrap();
        assert!(store.scan(Table::Results).unwrap().is_empty());
        assert_eq!(store.scan(Table::ResultMeta).unwrap().len(), 1);
    }

    #[test]
    fn remove_batch_commits_once() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        store
            .put_multi(&[(Table::Results, "a", &b"1"[..]), (Table::ResultMeta, "a", &b"1"[..])])
            .unwrap();
        store
            .remove_batch(&[Table::Results, Table::ResultMeta], &["a".to_string()])
            .unwrap();
        assert!(store.get(Table::Results, "a").unwrap().is_none());
        assert!(store.get(Table::ResultMeta, "a").unwrap().is_none());
    }
}
