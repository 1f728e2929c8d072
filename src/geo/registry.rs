//! Geography registry: canonical codes per level, searchable by name.
//!
//! Each level is loaded once from the [`GeographySource`] (or from the
//! durable store, when a previous process persisted it), indexed, and
//! shared by `Arc`. Nation and states are seeded from a static table and
//! never fetched. Loading a level happens under a dedicated mutex; the
//! read-write lock over the level map is only held to swap an index in or
//! out, never across a fetch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::matching::{MatchScore, NameKey, normalize, score};
use super::source::GeographySource;
use super::{GeographyCode, GeographyLevel, states};
use crate::error::RegistryError;
use crate::store::{self, Store, Table};

const SECS_PER_DAY: u64 = 86_400;

/// One scored search hit.
#[derive(Debug, Clone)]
pub struct GeoMatch {
    pub geography: Arc<GeographyCode>,
    pub score: MatchScore,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Persisted form of one level.
#[derive(Serialize, Deserialize)]
struct LevelSnapshot {
    loaded_at: u64,
    entries: Vec<GeographyCode>,
    /// `(alias, geoid)` pairs.
    aliases: Vec<(String, String)>,
}

struct LevelIndex {
    entries: Vec<Arc<GeographyCode>>,
    keys: Vec<NameKey>,
    by_geoid: HashMap<String, usize>,
    by_code: HashMap<String, Vec<usize>>,
    aliases: HashMap<String, Vec<usize>>,
    loaded_at: u64,
    /// Seeded from static tables; never expires or refetches.
    builtin: bool,
}

impl LevelIndex {
    fn build(entries: Vec<GeographyCode>, aliases: &[(String, String)], loaded_at: u64, builtin: bool) -> Self {
        let entries: Vec<Arc<GeographyCode>> = entries.into_iter().map(Arc::new).collect();
        let keys = entries.iter().map(|g| NameKey::new(g.display_name())).collect();
        let mut by_geoid = HashMap::with_capacity(entries.len());
        let mut by_code: HashMap<String, Vec<usize>> = HashMap::with_capacity(entries.len());
        for (i, g) in entries.iter().enumerate() {
            by_geoid.insert(g.geoid(), i);
            by_code.entry(g.code().to_string()).or_default().push(i);
        }
        let mut alias_map: HashMap<String, Vec<usize>> = HashMap::new();
        for (alias, geoid) in aliases {
            if let Some(&i) = by_geoid.get(geoid) {
                alias_map.entry(normalize(alias)).or_default().push(i);
            }
        }
        Self {
            entries,
            keys,
            by_geoid,
            by_code,
            aliases: alias_map,
            loaded_at,
            builtin,
        }
    }

    fn alias_pairs(&self) -> Vec<(String, String)> {
        self.aliases
            .iter()
            .flat_map(|(alias, idx)| idx.iter().map(move |i| (alias.clone(), self.entries[*i].geoid())))
            .collect()
    }

    fn snapshot(&self) -> LevelSnapshot {
        LevelSnapshot {
            loaded_at: self.loaded_at,
            entries: self.entries.iter().map(|g| (**g).clone()).collect(),
            aliases: self.alias_pairs(),
        }
    }
}

fn builtin_index(level: GeographyLevel) -> Option<LevelIndex> {
    match level {
        GeographyLevel::Nation => {
            let nation = GeographyCode::nation();
            let aliases: Vec<(String, String)> = states::NATION_ALIASES
                .iter()
                .map(|a| (a.to_string(), nation.geoid()))
                .collect();
            Some(LevelIndex::build(vec![nation], &aliases, unix_now(), true))
        }
        GeographyLevel::State => {
            let aliases: Vec<(String, String)> = states::STATES
                .iter()
                .flat_map(|s| {
                    [
                        (s.postal.to_string(), s.fips.to_string()),
                        (s.fips.to_string(), s.fips.to_string()),
                    ]
                })
                .collect();
            Some(LevelIndex::build(states::state_codes(), &aliases, unix_now(), true))
        }
        _ => None,
    }
}

pub struct GeographyRegistry {
    source: Option<Arc<dyn GeographySource>>,
    levels: RwLock<HashMap<GeographyLevel, Arc<LevelIndex>>>,
    load_lock: Mutex<()>,
    store: Option<Arc<Store>>,
    ttl_secs: u64,
}

impl GeographyRegistry {
    /// A registry that loads missing levels from `source`.
    pub fn new(source: Arc<dyn GeographySource>) -> Self {
        let mut registry = Self::offline();
        registry.source = Some(source);
        registry
    }

    /// A registry with only the seeded levels and whatever is inserted.
    pub fn offline() -> Self {
        let registry = Self {
            source: None,
            levels: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
            store: None,
            ttl_secs: 30 * SECS_PER_DAY,
        };
        registry.seed_builtin();
        registry
    }

    pub fn with_ttl_days(mut self, days: u64) -> Self {
        self.ttl_secs = days.saturating_mul(SECS_PER_DAY);
        self
    }

    /// Persist loaded levels to `store` and restore them on first use.
    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    fn seed_builtin(&self) {
        let mut levels = self.levels.write().unwrap_or_else(|e| e.into_inner());
        for level in [GeographyLevel::Nation, GeographyLevel::State] {
            if let Some(index) = builtin_index(level) {
                levels.insert(level, Arc::new(index));
            }
        }
    }

    /// Replace the entries of `level`.
    pub fn insert(&self, level: GeographyLevel, codes: Vec<GeographyCode>) -> Result<usize, RegistryError> {
        self.insert_with_aliases(level, codes, &[])
    }

    /// Replace the entries of `level`, adding `(alias, geoid)` exact-match
    /// aliases.
    pub fn insert_with_aliases(
        &self,
        level: GeographyLevel,
        codes: Vec<GeographyCode>,
        aliases: &[(String, String)],
    ) -> Result<usize, RegistryError> {
        if let Some(wrong) = codes.iter().find(|g| g.level() != level) {
            return Err(RegistryError::SourceFailed {
                level,
                message: format!("entry {wrong} is not a {level}"),
            });
        }
        let index = Arc::new(LevelIndex::build(codes, aliases, unix_now(), false));
        let count = index.entries.len();
        self.persist(level, &index);
        self.levels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(level, index);
        Ok(count)
    }

    fn cached(&self, level: GeographyLevel) -> Option<Arc<LevelIndex>> {
        self.levels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&level)
            .cloned()
    }

    fn is_fresh(&self, index: &LevelIndex, now: u64) -> bool {
        index.builtin || now.saturating_sub(index.loaded_at) < self.ttl_secs
    }

    fn index(&self, level: GeographyLevel) -> Result<Arc<LevelIndex>, RegistryError> {
        let now = unix_now();
        let current = self.cached(level);
        if let Some(index) = &current {
            if self.is_fresh(index, now) || self.source.is_none() {
                return Ok(Arc::clone(index));
            }
        }

        let _guard = self.load_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.cached(level).or(current);
        if let Some(index) = &current {
            if self.is_fresh(index, now) {
                return Ok(Arc::clone(index));
            }
        }

        if current.is_none() {
            if let Some(index) = self.restore(level, now) {
                let index = Arc::new(index);
                self.levels
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(level, Arc::clone(&index));
                return Ok(index);
            }
        }

        let Some(source) = &self.source else {
            return Ok(Arc::new(LevelIndex::build(Vec::new(), &[], now, false)));
        };
        match source.fetch_level(level) {
            Ok(codes) => {
                let index = Arc::new(LevelIndex::build(codes, &[], now, false));
                self.persist(level, &index);
                self.levels
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(level, Arc::clone(&index));
                Ok(index)
            }
            Err(e) => match current {
                Some(stale) => {
                    tracing::warn!(level = %level, error = %e, "refresh failed, serving stale geography names");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    fn restore(&self, level: GeographyLevel, now: u64) -> Option<LevelIndex> {
        let store = self.store.as_ref()?;
        let raw = match store.get(Table::Registry, level.name()) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(level = %level, error = %e, "registry store read failed");
                return None;
            }
        };
        let snapshot: LevelSnapshot = match store::decode(&raw) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(level = %level, error = %e, "stored geography level unreadable");
                return None;
            }
        };
        if now.saturating_sub(snapshot.loaded_at) >= self.ttl_secs {
            tracing::debug!(level = %level, "stored geography level expired");
            return None;
        }
        tracing::debug!(level = %level, entries = snapshot.entries.len(), "geography level restored");
        Some(LevelIndex::build(
            snapshot.entries,
            &snapshot.aliases,
            snapshot.loaded_at,
            false,
        ))
    }

    fn persist(&self, level: GeographyLevel, index: &LevelIndex) {
        let Some(store) = &self.store else {
            return;
        };
        if index.builtin {
            return;
        }
        let result = store::encode(&index.snapshot())
            .and_then(|bytes| store.put(Table::Registry, level.name(), &bytes));
        if let Err(e) = result {
            tracing::warn!(level = %level, error = %e, "failed to persist geography level");
        }
    }

    /// The entry at `level` identified by `code`.
    ///
    /// `code` is matched against the fully qualified GEOID first, then
    /// against the bare code when exactly one entry carries it.
    pub fn lookup(&self, level: GeographyLevel, code: &str) -> Result<Arc<GeographyCode>, RegistryError> {
        let index = self.index(level)?;
        let code = code.trim();
        if let Some(&i) = index.by_geoid.get(code) {
            return Ok(Arc::clone(&index.entries[i]));
        }
        match index.by_code.get(code).map(Vec::as_slice) {
            Some([i]) => Ok(Arc::clone(&index.entries[*i])),
            Some(many) if many.len() > 1 => Err(RegistryError::AmbiguousCode {
                level,
                code: code.to_string(),
                count: many.len(),
            }),
            _ => Err(RegistryError::NotFound {
                level,
                code: code.to_string(),
            }),
        }
    }

    /// The entry at `level` with bare `code` contained in `parent`.
    pub fn lookup_within(
        &self,
        level: GeographyLevel,
        code: &str,
        parent: &GeographyCode,
    ) -> Result<Arc<GeographyCode>, RegistryError> {
        let index = self.index(level)?;
        let code = code.trim();
        let hits: Vec<&Arc<GeographyCode>> = index
            .by_code
            .get(code)
            .into_iter()
            .flatten()
            .map(|i| &index.entries[*i])
            .filter(|g| g.is_within(parent))
            .collect();
        match hits.as_slice() {
            [one] => Ok(Arc::clone(one)),
            [] => Err(RegistryError::NotFound {
                level,
                code: format!("{code} in {}", parent.display_name()),
            }),
            many => Err(RegistryError::AmbiguousCode {
                level,
                code: code.to_string(),
                count: many.len(),
            }),
        }
    }

    /// Entries at `level` matching `text`, best first.
    ///
    /// Order is score descending, then display name, then GEOID, so equal
    /// scores never depend on load order. With `parent`, only entries it
    /// contains are considered. Zero candidates is [`RegistryError::NoMatch`].
    pub fn search(
        &self,
        level: GeographyLevel,
        text: &str,
        parent: Option<&GeographyCode>,
    ) -> Result<Vec<GeoMatch>, RegistryError> {
        let index = self.index(level)?;
        let query = NameKey::new(text);
        let aliased: &[usize] = index
            .aliases
            .get(&query.full)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut matches: Vec<GeoMatch> = Vec::new();
        for (i, (geography, key)) in index.entries.iter().zip(&index.keys).enumerate() {
            if parent.is_some_and(|p| !geography.is_within(p)) {
                continue;
            }
            let hit = if aliased.contains(&i) {
                Some(MatchScore::exact())
            } else {
                score(&query, key)
            };
            if let Some(score) = hit {
                matches.push(GeoMatch {
                    geography: Arc::clone(geography),
                    score,
                });
            }
        }

        if matches.is_empty() {
            return Err(RegistryError::NoMatch {
                level,
                query: text.to_string(),
            });
        }
        matches.sort_by(|a, b| {
            b.score
                .score
                .total_cmp(&a.score.score)
                .then_with(|| a.geography.display_name().cmp(b.geography.display_name()))
                .then_with(|| a.geography.geoid().cmp(&b.geography.geoid()))
        });
        Ok(matches)
    }

    /// Reload `level` from the source, ignoring any cached copy.
    pub fn refresh(&self, level: GeographyLevel) -> Result<usize, RegistryError> {
        if builtin_index(level).is_some() {
            self.seed_builtin();
            return Ok(self.cached(level).map_or(0, |i| i.entries.len()));
        }
        let source = self
            .source
            .as_ref()
            .ok_or(RegistryError::UnsupportedLevel { level })?;
        let _guard = self.load_lock.lock().unwrap_or_else(|e| e.into_inner());
        let codes = source.fetch_level(level)?;
        let index = Arc::new(LevelIndex::build(codes, &[], unix_now(), false));
        let count = index.entries.len();
        self.persist(level, &index);
        self.levels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(level, index);
        Ok(count)
    }

    /// Forget `level` in memory and in the store. Seeded levels are reset
    /// to their static contents.
    pub fn invalidate(&self, level: GeographyLevel) {
        self.levels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&level);
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(Table::Registry, level.name()) {
                tracing::warn!(level = %level, error = %e, "failed to drop stored geography level");
            }
        }
        if builtin_index(level).is_some() {
            self.seed_builtin();
        }
    }

    pub fn invalidate_all(&self) {
        self.levels.write().unwrap_or_else(|e| e.into_inner()).clear();
        if let Some(store) = &self.store {
            if let Err(e) = store.clear(Table::Registry) {
                tracing::warn!(error = %e, "failed to clear stored geography levels");
            }
        }
        self.seed_builtin();
    }

    /// Levels currently in memory and their entry counts.
    pub fn loaded_levels(&self) -> Vec<(GeographyLevel, usize)> {
        let mut out: Vec<(GeographyLevel, usize)> = self
            .levels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(l, i)| (*l, i.entries.len()))
            .collect();
        out.sort();
        out
    }
}

impl std::fmt::Debug for GeographyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeographyRegistry")
            .field("levels", &self.loaded_levels())
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}
