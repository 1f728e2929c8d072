//! Key-value storage for cached results and metadata.
//!
//! Two backends serve the same byte-level interface:
//!
//! - [`MemStore`](mem::MemStore): memory-only, lost on process exit (DashMap)
//! - [`DurableStore`](durable::DurableStore): ACID transactions on disk (redb)
//!
//! [`Store`] holds exactly one of them, picked at construction. Every key lives in one of the
//! fixed [`Table`]s.

pub mod durable;
pub mod mem;

use std::path::Path;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Named key spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Signature → raw result payload.
    Results,
    /// Signature → bincode `EntryMeta`.
    ResultMeta,
    /// Level name → bincode level snapshot.
    Registry,
    /// `dataset@year` → bincode `VariableCatalog`.
    Catalogs,
    /// `dataset@year` → bincode `GeographySupport`.
    GeoSupport,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Results,
        Table::ResultMeta,
        Table::Registry,
        Table::Catalogs,
        Table::GeoSupport,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Results => "results",
            Table::ResultMeta => "result_meta",
            Table::Registry => "registry",
            Table::Catalogs => "catalogs",
            Table::GeoSupport => "geo_support",
        }
    }
}

/// A store backed either by memory or by a redb file.
#[derive(Debug)]
pub struct Store {
    backend: Backend,
}

#[derive(Debug)]
enum Backend {
    Memory(mem::MemStore),
    Durable(durable::DurableStore),
}

impl Store {
    /// Create a memory-only store (no persistence).
    pub fn memory_only() -> Self {
        Self {
            backend: Backend::Memory(mem::MemStore::new()),
        }
    }

    /// Open or create a durable store in `data_dir`.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        Ok(Self {
            backend: Backend::Durable(durable::DurableStore::open(data_dir)?),
        })
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.backend, Backend::Durable(_))
    }

    pub fn put(&self, table: Table, key: &str, value: &[u8]) -> StoreResult<()> {
        match &self.backend {
            Backend::Durable(d) => d.put(table, key, value),
            Backend::Memory(m) => {
                m.put(table, key, value.to_vec());
                Ok(())
            }
        }
    }

    pub fn get(&self, table: Table, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Durable(d) => d.get(table, key),
            Backend::Memory(m) => Ok(m.get(table, key)),
        }
    }

    /// Delete a key. Returns whether the key existed.
    pub fn remove(&self, table: Table, key: &str) -> StoreResult<bool> {
        match &self.backend {
            Backend::Durable(d) => d.remove(table, key),
            Backend::Memory(m) => Ok(m.remove(table, key).is_some()),
        }
    }

    /// Write several entries, possibly across tables, atomically.
    pub fn put_multi(&self, entries: &[(Table, &str, &[u8])]) -> StoreResult<()> {
        match &self.backend {
            Backend::Durable(d) => d.put_multi(entries),
            Backend::Memory(m) => {
                for (table, key, value) in entries {
                    m.put(*table, key, value.to_vec());
                }
                Ok(())
            }
        }
    }

    /// Remove every `key` from every table in `tables` in one transaction.
    pub fn remove_batch(&self, tables: &[Table], keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        match &self.backend {
            Backend::Durable(d) => d.remove_batch(tables, keys),
            Backend::Memory(m) => {
                for table in tables {
                    for key in keys {
                        m.remove(*table, key);
                    }
                }
                Ok(())
            }
        }
    }

    /// All `(key, value)` pairs of a table.
    pub fn scan(&self, table: Table) -> StoreResult<Vec<(String, Vec<u8>)>> {
        match &self.backend {
            Backend::Durable(d) => d.scan(table),
            Backend::Memory(m) => Ok(m.scan(table)),
        }
    }

    /// Remove every entry of a table.
    pub fn clear(&self, table: Table) -> StoreResult<()> {
        match &self.backend {
            Backend::Durable(d) => d.clear(table),
            Backend::Memory(m) => {
                m.clear(table);
                Ok(())
            }
        }
    }
}

/// Encode a value with bincode for storage.
pub fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization {
        message: format!("encode failed: {e}"),
    })
}

/// Decode a bincode value read from storage.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: format!("decode failed: {e}"),
    })
}
