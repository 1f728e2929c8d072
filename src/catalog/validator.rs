//! Variable/table validator.
//!
//! Catalogs are cached per dataset and year in memory and, when a store is
//! attached, on disk. A miss fetches the whole catalog once; individual
//! variables are never probed remotely.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CatalogError, CatalogSource, GeographySupport, VariableCatalog, VariableMetadata};
use crate::query::Dataset;
use crate::store::{self, Store, Table};

/// Requested variables split by catalog membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: BTreeSet<String>,
    pub invalid: BTreeSet<String>,
}

impl ValidationResult {
    pub fn all_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn catalog_key(dataset: &Dataset, year: u16) -> String {
    format!("{dataset}@{year}")
}

#[derive(Serialize, Deserialize)]
struct Stamped<T> {
    fetched_at: u64,
    value: T,
}

/// Memory + durable cache for one kind of catalog.
struct CatalogCache<T> {
    table: Table,
    entries: RwLock<HashMap<String, (u64, Arc<T>)>>,
    load_lock: Mutex<()>,
}

impl<T: Serialize + DeserializeOwned> CatalogCache<T> {
    fn new(table: Table) -> Self {
        Self {
            table,
            entries: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    fn fresh(&self, key: &str, ttl_secs: u64, now: u64) -> Option<Arc<T>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|(at, _)| now.saturating_sub(*at) < ttl_secs)
            .map(|(_, v)| Arc::clone(v))
    }

    fn get_or_load(
        &self,
        key: &str,
        ttl_secs: u64,
        store: Option<&Store>,
        load: impl FnOnce() -> Result<T, CatalogError>,
    ) -> Result<Arc<T>, CatalogError> {
        let now = unix_now();
        if let Some(v) = self.fresh(key, ttl_secs, now) {
            return Ok(v);
        }

        let _guard = self.load_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(v) = self.fresh(key, ttl_secs, now) {
            return Ok(v);
        }

        if let Some(store) = store {
            match store.get(self.table, key) {
                Ok(Some(raw)) => match store::decode::<Stamped<T>>(&raw) {
                    Ok(stamped) if now.saturating_sub(stamped.fetched_at) < ttl_secs => {
                        tracing::debug!(key, table = self.table.name(), "catalog restored from store");
                        return Ok(self.insert(key, stamped.fetched_at, stamped.value));
                    }
                    Ok(_) => tracing::debug!(key, "stored catalog expired"),
                    Err(e) => tracing::warn!(key, error = %e, "stored catalog unreadable"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(key, error = %e, "catalog store read failed"),
            }
        }

        let value = load()?;
        let stamped = Stamped {
            fetched_at: now,
            value,
        };
        if let Some(store) = store {
            match store::encode(&stamped) {
                Ok(bytes) => {
                    if let Err(e) = store.put(self.table, key, &bytes) {
                        tracing::warn!(key, error = %e, "failed to persist catalog");
                    }
                }
                Err(e) => tracing::warn!(key, error = %e, "failed to encode catalog"),
            }
        }
        Ok(self.insert(key, now, stamped.value))
    }

    fn insert(&self, key: &str, fetched_at: u64, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (fetched_at, Arc::clone(&value)));
        value
    }

    fn invalidate(&self, key: &str, store: Option<&Store>) -> Result<(), CatalogError> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        if let Some(store) = store {
            store.remove(self.table, key)?;
        }
        Ok(())
    }

    fn invalidate_all(&self, store: Option<&Store>) -> Result<(), CatalogError> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(store) = store {
            store.clear(self.table)?;
        }
        Ok(())
    }
}

/// Validates variables against cached per-dataset/year catalogs.
pub struct VariableValidator {
    source: Arc<dyn CatalogSource>,
    store: Option<Arc<Store>>,
    ttl_secs: u64,
    variables: CatalogCache<VariableCatalog>,
    geography: CatalogCache<GeographySupport>,
}

impl VariableValidator {
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self {
            source,
            store: None,
            ttl_secs: 30 * 86_400,
            variables: CatalogCache::new(Table::Catalogs),
            geography: CatalogCache::new(Table::GeoSupport),
        }
    }

    /// Persist catalogs to `store` so later processes skip the fetch.
    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_ttl_days(mut self, days: u64) -> Self {
        self.ttl_secs = days.saturating_mul(86_400);
        self
    }

    /// The variable catalog for `dataset` at `year`.
    pub fn catalog(&self, dataset: &Dataset, year: u16) -> Result<Arc<VariableCatalog>, CatalogError> {
        self.variables.get_or_load(
            &catalog_key(dataset, year),
            self.ttl_secs,
            self.store.as_deref(),
            || self.source.variables(dataset, year),
        )
    }

    /// Published geography hierarchies for `dataset` at `year`.
    pub fn geography_support(
        &self,
        dataset: &Dataset,
        year: u16,
    ) -> Result<Arc<GeographySupport>, CatalogError> {
        self.geography.get_or_load(
            &catalog_key(dataset, year),
            self.ttl_secs,
            self.store.as_deref(),
            || self.source.geography(dataset, year),
        )
    }

    /// Split `variables` into those the catalog publishes and those it does
    /// not. Never fails on an unknown variable; only an unavailable catalog
    /// is an error.
    pub fn validate<'a>(
        &self,
        variables: impl IntoIterator<Item = &'a String>,
        dataset: &Dataset,
        year: u16,
    ) -> Result<ValidationResult, CatalogError> {
        let catalog = self.catalog(dataset, year)?;
        let mut result = ValidationResult::default();
        for code in variables {
            if catalog.contains(code) {
                result.valid.insert(code.clone());
            } else {
                result.invalid.insert(code.clone());
            }
        }
        if !result.invalid.is_empty() {
            tracing::debug!(
                dataset = %dataset,
                year,
                invalid = ?result.invalid,
                "variables missing from catalog"
            );
        }
        Ok(result)
    }

    pub fn metadata(&self, code: &str, dataset: &Dataset, year: u16) -> Result<VariableMetadata, CatalogError> {
        Ok(self.catalog(dataset, year)?.metadata(code))
    }

    /// Drop cached catalogs for one dataset and year.
    pub fn invalidate(&self, dataset: &Dataset, year: u16) -> Result<(), CatalogError> {
        let key = catalog_key(dataset, year);
        self.variables.invalidate(&key, self.store.as_deref())?;
        self.geography.invalidate(&key, self.store.as_deref())
    }

    pub fn invalidate_all(&self) -> Result<(), CatalogError> {
        self.variables.invalidate_all(self.store.as_deref())?;
        self.geography.invalidate_all(self.store.as_deref())
    }
}
