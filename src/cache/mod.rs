//! Content-addressed result cache with retention and size-based eviction.
//!
//! Payloads live in [`Table::Results`] and per-entry metadata in
//! [`Table::ResultMeta`]; an in-memory index of the metadata answers
//! lookups and drives eviction. Eviction runs on write, never on a timer:
//! expired entries go first, then least-recently-accessed entries until the
//! entry count and byte total are within the policy.
//!
//! Last access is a logical tick rather than wall time, so ordering is
//! exact even for entries touched within the same second.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::store::{self, Store, StoreResult, Table};

const SECS_PER_DAY: u64 = 86_400;

/// Puts between full sweeps when the cache is within its limits.
const SWEEP_INTERVAL: u64 = 64;

fn default_retention_days() -> u64 {
    90
}

fn default_max_entries() -> usize {
    10_000
}

fn default_max_bytes() -> u64 {
    512 * 1024 * 1024
}

/// Retention and size limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Entries older than this are expired. Zero disables caching reads.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl CachePolicy {
    fn retention_secs(&self) -> u64 {
        self.retention_days.saturating_mul(SECS_PER_DAY)
    }
}

/// Stored alongside each payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Unix seconds at write time.
    pub created_at: u64,
    /// Logical access tick; larger is more recent.
    pub last_access: u64,
    pub size_bytes: u64,
    /// Tick of the write that produced this entry.
    pub generation: u64,
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub expired: usize,
    pub over_capacity: usize,
    pub bytes_freed: u64,
}

impl EvictionReport {
    pub fn total(&self) -> usize {
        self.expired + self.over_capacity
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub durable: bool,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The result cache.
pub struct ResultCache {
    store: Arc<Store>,
    policy: CachePolicy,
    index: DashMap<String, EntryMeta>,
    tick: AtomicU64,
    total_bytes: AtomicU64,
    puts_since_sweep: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    evict_lock: Mutex<()>,
    clock: fn() -> u64,
}

impl ResultCache {
    /// A cache whose entries live only in memory.
    pub fn memory_only(policy: CachePolicy) -> Self {
        Self::with_store(Arc::new(Store::memory_only()), policy)
    }

    /// Open a cache over `store`, loading the metadata of existing entries.
    pub fn open(store: Arc<Store>, policy: CachePolicy) -> StoreResult<Self> {
        let cache = Self::with_store(store, policy);
        let mut max_tick = 0;
        let mut bytes = 0;
        for (signature, raw) in cache.store.scan(Table::ResultMeta)? {
            match store::decode::<EntryMeta>(&raw) {
                Ok(meta) => {
                    max_tick = max_tick.max(meta.last_access).max(meta.generation);
                    bytes += meta.size_bytes;
                    cache.index.insert(signature, meta);
                }
                Err(e) => {
                    tracing::warn!(signature = %signature, error = %e, "dropping unreadable cache entry");
                    cache
                        .store
                        .remove_batch(&[Table::Results, Table::ResultMeta], &[signature])?;
                }
            }
        }
        cache.tick.store(max_tick + 1, Ordering::SeqCst);
        cache.total_bytes.store(bytes, Ordering::SeqCst);
        tracing::info!(
            entries = cache.index.len(),
            bytes,
            durable = cache.store.is_durable(),
            "result cache opened"
        );
        Ok(cache)
    }

    fn with_store(store: Arc<Store>, policy: CachePolicy) -> Self {
        Self {
            store,
            policy,
            index: DashMap::new(),
            tick: AtomicU64::new(1),
            total_bytes: AtomicU64::new(0),
            puts_since_sweep: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            evict_lock: Mutex::new(()),
            clock: unix_now,
        }
    }

    /// Replace the wall clock (Unix seconds) used for retention.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::SeqCst)
    }

    fn is_expired(&self, meta: &EntryMeta, now: u64) -> bool {
        now.saturating_sub(meta.created_at) >= self.policy.retention_secs()
    }

    /// Payload stored under `signature`, or `None` on a miss.
    ///
    /// Only an exact signature match is ever served. An expired entry is a
    /// miss and is removed.
    pub fn get(&self, signature: &str) -> Option<Vec<u8>> {
        let Some(meta) = self.index.get(signature).map(|m| *m) else {
            self.record_miss(signature);
            return None;
        };

        if self.is_expired(&meta, (self.clock)()) {
            self.drop_entry(signature, meta.generation);
            self.record_miss(signature);
            return None;
        }

        match self.store.get(Table::Results, signature) {
            Ok(Some(payload)) => {
                let tick = self.next_tick();
                if let Some(mut m) = self.index.get_mut(signature) {
                    m.last_access = m.last_access.max(tick);
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(signature, bytes = payload.len(), "cache hit");
                Some(payload)
            }
            Ok(None) => {
                self.drop_entry(signature, meta.generation);
                self.record_miss(signature);
                None
            }
            Err(e) => {
                tracing::warn!(signature, error = %e, "cache read failed");
                self.record_miss(signature);
                None
            }
        }
    }

    fn record_miss(&self, signature: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(signature, "cache miss");
    }

    /// Remove `signature` if it still holds the entry written at `generation`.
    fn drop_entry(&self, signature: &str, generation: u64) {
        if let Some((_, meta)) = self.index.remove_if(signature, |_, m| m.generation == generation) {
            self.total_bytes.fetch_sub(meta.size_bytes, Ordering::SeqCst);
            if let Err(e) = self
                .store
                .remove_batch(&[Table::Results, Table::ResultMeta], &[signature.to_string()])
            {
                tracing::warn!(signature, error = %e, "failed to remove cache entry");
            }
        }
    }

    /// Store `payload` under `signature`. Last writer wins.
    pub fn put(&self, signature: &str, payload: &[u8]) -> StoreResult<()> {
        let tick = self.next_tick();
        let meta = EntryMeta {
            created_at: (self.clock)(),
            last_access: tick,
            size_bytes: payload.len() as u64,
            generation: tick,
        };
        let encoded = store::encode(&meta)?;
        self.store.put_multi(&[
            (Table::Results, signature, payload),
            (Table::ResultMeta, signature, encoded.as_slice()),
        ])?;

        if let Some(old) = self.index.insert(signature.to_string(), meta) {
            self.total_bytes.fetch_sub(old.size_bytes, Ordering::SeqCst);
        }
        self.total_bytes.fetch_add(meta.size_bytes, Ordering::SeqCst);

        let puts = self.puts_since_sweep.fetch_add(1, Ordering::Relaxed) + 1;
        if self.over_limits() || puts >= SWEEP_INTERVAL {
            self.evict()?;
        }
        Ok(())
    }

    fn over_limits(&self) -> bool {
        self.index.len() > self.policy.max_entries
            || self.total_bytes.load(Ordering::SeqCst) > self.policy.max_bytes
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.index.contains_key(signature)
    }

    /// Run one eviction pass.
    pub fn evict(&self) -> StoreResult<EvictionReport> {
        let _guard = self.evict_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.puts_since_sweep.store(0, Ordering::Relaxed);

        let now = (self.clock)();
        let mut report = EvictionReport::default();
        let mut victims: Vec<(String, EntryMeta)> = Vec::new();
        let mut live: Vec<(String, EntryMeta)> = Vec::with_capacity(self.index.len());

        for entry in self.index.iter() {
            let pair = (entry.key().clone(), *entry.value());
            if self.is_expired(&pair.1, now) {
                victims.push(pair);
            } else {
                live.push(pair);
            }
        }
        report.expired = victims.len();

        let mut count = live.len();
        let mut bytes: u64 = live.iter().map(|(_, m)| m.size_bytes).sum();
        if count > self.policy.max_entries || bytes > self.policy.max_bytes {
            live.sort_by_key(|(_, m)| m.last_access);
            for (signature, meta) in live {
                if count <= self.policy.max_entries && bytes <= self.policy.max_bytes {
                    break;
                }
                count -= 1;
                bytes = bytes.saturating_sub(meta.size_bytes);
                report.over_capacity += 1;
                victims.push((signature, meta));
            }
        }

        if victims.is_empty() {
            return Ok(report);
        }

        let mut removed = Vec::with_capacity(victims.len());
        for (signature, meta) in victims {
            if let Some((key, old)) = self
                .index
                .remove_if(&signature, |_, m| m.generation == meta.generation)
            {
                self.total_bytes.fetch_sub(old.size_bytes, Ordering::SeqCst);
                report.bytes_freed += old.size_bytes;
                removed.push(key);
            }
        }
        self.store
            .remove_batch(&[Table::Results, Table::ResultMeta], &removed)?;
        self.evictions
            .fetch_add(removed.len() as u64, Ordering::Relaxed);

        tracing::info!(
            expired = report.expired,
            over_capacity = report.over_capacity,
            bytes_freed = report.bytes_freed,
            remaining = self.index.len(),
            "cache eviction"
        );
        Ok(report)
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> StoreResult<usize> {
        let _guard = self.evict_lock.lock().unwrap_or_else(|e| e.into_inner());
        let count = self.index.len();
        self.store.clear(Table::Results)?;
        self.store.clear(Table::ResultMeta)?;
        self.index.clear();
        self.total_bytes.store(0, Ordering::SeqCst);
        tracing::info!(removed = count, "cache cleared");
        Ok(count)
    }

    /// Persist access ticks so LRU order survives a reopen.
    pub fn flush(&self) -> StoreResult<()> {
        if !self.store.is_durable() {
            return Ok(());
        }
        let encoded: Vec<(String, Vec<u8>)> = self
            .index
            .iter()
            .map(|e| -> StoreResult<(String, Vec<u8>)> {
                Ok((e.key().clone(), store::encode(e.value())?))
            })
            .collect::<StoreResult<_>>()?;
        let entries: Vec<(Table, &str, &[u8])> = encoded
            .iter()
            .map(|(k, v)| (Table::ResultMeta, k.as_str(), v.as_slice()))
            .collect();
        self.store.put_multi(&entries)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.index.len(),
            bytes: self.total_bytes.load(Ordering::SeqCst),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            durable: self.store.is_durable(),
        }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("policy", &self.policy)
            .field("entries", &self.index.len())
            .finish()
    }
}
