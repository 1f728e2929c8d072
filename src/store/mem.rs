//! In-memory storage backed by DashMap.
//!
//! Used when no data directory is configured. All data is lost on process
//! exit.

use dashmap::DashMap;

use super::Table;

/// Concurrent in-memory store using a sharded hashmap.
#[derive(Debug)]
pub struct MemStore {
    data: DashMap<(Table, String), Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Insert or replace a value.
    pub fn put(&self, table: Table, key: &str, value: Vec<u8>) {
        self.data.insert((table, key.to_string()), value);
    }

    /// Get a clone of the stored value.
    pub fn get(&self, table: Table, key: &str) -> Option<Vec<u8>> {
        self.data
            .get(&(table, key.to_string()))
            .map(|v| v.value().clone())
    }

    /// Remove a key and return its value.
    pub fn remove(&self, table: Table, key: &str) -> Option<Vec<u8>> {
        self.data.remove(&(table, key.to_string())).map(|(_, v)| v)
    }

    /// Snapshot of one table (not a consistent view under concurrent writes).
    pub fn scan(&self, table: Table) -> Vec<(String, Vec<u8>)> {
        self.data
            .iter()
            .filter(|entry| entry.key().0 == table)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect()
    }

    pub fn clear(&self, table: Table) {
        self.data.retain(|(t, _), _| *t != table);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_overwrite() {
        let store = MemStore::new();
        store.put(Table::Catalogs, "acs/acs5@2022", vec![1]);
        store.put(Table::Catalogs, "acs/acs5@2022", vec![2]);
        assert_eq!(store.get(Table::Catalogs, "acs/acs5@2022"), Some(vec![2]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clear_only_touches_one_table() {
        let store = MemStore::new();
        store.put(Table::Results, "a", vec![1]);
        store.put(Table::Registry, "a", vec![1]);
        store.clear(Table::Results);
        assert!(store.get(Table::Results, "a").is_none());
        assert!(store.get(Table::Registry, "a").is_some());
    }

    #[test]
    fn concurrent_access() {
        use std::sync::Arc;
        let store = Arc::new(MemStore::new());
        let handles: Vec<_> = (0..100)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.put(Table::Results, &format!("sig-{i}"), vec![i as u8]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.scan(Table::Results).len(), 100);
    }
}
