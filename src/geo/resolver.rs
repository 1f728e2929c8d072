//! Free-text geography resolution.
//!
//! The resolver turns a [`GeographyReference`] into a scored outcome. All
//! disambiguation policy lives in [`decide`]; everything else only gathers
//! candidates from the registry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::matching::STEM_SCORE;
use super::registry::{GeoMatch, GeographyRegistry};
use super::{GeographyCode, GeographyLevel, GeographyReference};
use crate::error::{GeoError, GeoResult, RegistryError};

/// Levels tried, in order, when a reference carries no level hint.
pub const LEVEL_PREFERENCE: [GeographyLevel; 4] = [
    GeographyLevel::Place,
    GeographyLevel::County,
    GeographyLevel::State,
    GeographyLevel::Nation,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Candidates scoring below this are discarded.
    pub min_score: f64,
    /// Top candidates within this distance of each other are ambiguous.
    pub ambiguity_epsilon: f64,
    /// Upper bound on candidates reported for an ambiguous reference.
    pub max_candidates: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_score: 0.4,
            ambiguity_epsilon: 0.05,
            max_candidates: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub geography: Arc<GeographyCode>,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub enum ResolutionResult {
    Resolved {
        geography: Arc<GeographyCode>,
        confidence: f64,
    },
    /// Best first.
    Ambiguous(Vec<Candidate>),
    Unresolved,
}

impl ResolutionResult {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn geography(&self) -> Option<&Arc<GeographyCode>> {
        match self {
            Self::Resolved { geography, .. } => Some(geography),
            _ => None,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match self {
            Self::Resolved { confidence, .. } => Some(*confidence),
            _ => None,
        }
    }
}

/// Reduce a best-first candidate list to an outcome.
///
/// Candidates under `min_score` are dropped. If the runner-up is within
/// `ambiguity_epsilon` of the leader, every candidate within that distance
/// of the leader is reported as ambiguous.
pub fn decide(matches: &[GeoMatch], config: &ResolverConfig) -> ResolutionResult {
    let mut eligible = matches
        .iter()
        .filter(|m| m.score.score >= config.min_score);
    let Some(top) = eligible.next() else {
        return ResolutionResult::Unresolved;
    };
    let best = top.score.score;
    let contenders: Vec<Candidate> = std::iter::once(top)
        .chain(eligible.take_while(|m| best - m.score.score <= config.ambiguity_epsilon))
        .take(config.max_candidates.max(2))
        .map(|m| Candidate {
            geography: Arc::clone(&m.geography),
            confidence: m.score.score,
        })
        .collect();

    if contenders.len() > 1 {
        ResolutionResult::Ambiguous(contenders)
    } else {
        ResolutionResult::Resolved {
            geography: Arc::clone(&top.geography),
            confidence: best,
        }
    }
}

fn is_code_form(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

pub struct GeographyResolver {
    registry: Arc<GeographyRegistry>,
    config: ResolverConfig,
}

impl GeographyResolver {
    pub fn new(registry: Arc<GeographyRegistry>, config: ResolverConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<GeographyRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `reference`, resolving its parent first when present.
    ///
    /// An unresolved parent leaves the child unresolved. An ambiguous parent
    /// scopes the child search to every parent candidate, which is often
    /// enough to single the child out.
    pub fn resolve(&self, reference: &GeographyReference) -> GeoResult<ResolutionResult> {
        let parents: Vec<Arc<GeographyCode>> = match &reference.parent {
            None => Vec::new(),
            Some(parent) => match self.resolve(parent)? {
                ResolutionResult::Resolved { geography, .. } => vec![geography],
                ResolutionResult::Ambiguous(candidates) => {
                    candidates.into_iter().map(|c| c.geography).collect()
                }
                ResolutionResult::Unresolved => {
                    tracing::debug!(reference = %reference, "parent unresolved");
                    return Ok(ResolutionResult::Unresolved);
                }
            },
        };

        let outcome = match reference.level {
            Some(level) => self.resolve_at(level, &reference.text, &parents, true)?,
            None => self.resolve_unhinted(&reference.text, &parents)?,
        };
        match &outcome {
            ResolutionResult::Resolved { geography, confidence } => tracing::debug!(
                reference = %reference,
                geoid = %geography.geoid(),
                level = %geography.level(),
                confidence,
                "reference resolved"
            ),
            ResolutionResult::Ambiguous(candidates) => tracing::debug!(
                reference = %reference,
                candidates = candidates.len(),
                "reference ambiguous"
            ),
            ResolutionResult::Unresolved => {
                tracing::debug!(reference = %reference, "reference unresolved")
            }
        }
        Ok(outcome)
    }

    /// Walk [`LEVEL_PREFERENCE`]. The first level with a stem-quality match
    /// wins; failing that, the first level with any eligible match.
    ///
    /// A level whose names cannot be loaded counts as having no candidates.
    /// Its error is returned only when no other level yields a result.
    fn resolve_unhinted(
        &self,
        text: &str,
        parents: &[Arc<GeographyCode>],
    ) -> GeoResult<ResolutionResult> {
        let mut fallback = None;
        let mut load_failure = None;
        for level in LEVEL_PREFERENCE {
            let outcome = match self.resolve_at(level, text, parents, false) {
                Ok(outcome) => outcome,
                Err(GeoError::Registry(e @ RegistryError::SourceFailed { .. })) => {
                    tracing::warn!(%level, error = %e, "skipping level whose names failed to load");
                    load_failure.get_or_insert(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let strong = match &outcome {
                ResolutionResult::Resolved { confidence, .. } => *confidence >= STEM_SCORE,
                ResolutionResult::Ambiguous(c) => c.first().is_some_and(|c| c.confidence >= STEM_SCORE),
                ResolutionResult::Unresolved => continue,
            };
            if strong {
                return Ok(outcome);
            }
            fallback.get_or_insert(outcome);
        }
        match (fallback, load_failure) {
            (Some(outcome), _) => Ok(outcome),
            (None, Some(e)) => Err(e.into()),
            (None, None) => Ok(ResolutionResult::Unresolved),
        }
    }

    fn resolve_at(
        &self,
        level: GeographyLevel,
        text: &str,
        parents: &[Arc<GeographyCode>],
        hinted: bool,
    ) -> GeoResult<ResolutionResult> {
        if hinted && is_code_form(text) {
            if let Some(geography) = self.lookup_code(level, text, parents)? {
                return Ok(ResolutionResult::Resolved {
                    geography,
                    confidence: 1.0,
                });
            }
        }

        let matches = match self.search(level, text, parents) {
            Ok(matches) => matches,
            Err(RegistryError::NoMatch { .. }) => return Ok(ResolutionResult::Unresolved),
            Err(RegistryError::UnsupportedLevel { .. }) if !hinted => {
                return Ok(ResolutionResult::Unresolved);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(decide(&matches, &self.config))
    }

    fn lookup_code(
        &self,
        level: GeographyLevel,
        code: &str,
        parents: &[Arc<GeographyCode>],
    ) -> GeoResult<Option<Arc<GeographyCode>>> {
        let found = if parents.is_empty() {
            self.registry.lookup(level, code).map(|g| vec![g])
        } else {
            let mut hits = Vec::new();
            for parent in parents {
                match self.registry.lookup_within(level, code, parent) {
                    Ok(g) => hits.push(g),
                    Err(RegistryError::NotFound { .. } | RegistryError::AmbiguousCode { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(hits)
        };
        match found {
            Ok(hits) if hits.len() == 1 => Ok(hits.into_iter().next()),
            Ok(_) | Err(RegistryError::NotFound { .. } | RegistryError::AmbiguousCode { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn search(
        &self,
        level: GeographyLevel,
        text: &str,
        parents: &[Arc<GeographyCode>],
    ) -> Result<Vec<GeoMatch>, RegistryError> {
        if parents.len() <= 1 {
            return self
                .registry
                .search(level, text, parents.first().map(|p| p.as_ref()));
        }

        let mut merged: Vec<GeoMatch> = Vec::new();
        for parent in parents {
            match self.registry.search(level, text, Some(parent)) {
                Ok(matches) => merged.extend(matches),
                Err(RegistryError::NoMatch { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if merged.is_empty() {
            return Err(RegistryError::NoMatch {
                level,
                query: text.to_string(),
            });
        }
        merged.sort_by(|a, b| {
            b.score
                .score
                .total_cmp(&a.score.score)
                .then_with(|| a.geography.display_name().cmp(b.geography.display_name()))
                .then_with(|| a.geography.geoid().cmp(&b.geography.geoid()))
        });
        merged.dedup_by(|a, b| a.geography == b.geography);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::geo::matching::{MatchKind, MatchScore};
    use crate::geo::source::GeographySource;

    fn code(level: GeographyLevel, code: &str, name: &str, state: &str) -> GeographyCode {
        GeographyCode::new(level, code, name, vec![(GeographyLevel::State, state.into())]).unwrap()
    }

    /// Serves fixed counties and places and records which levels were fetched.
    struct Fixture {
        fetched: Mutex<Vec<GeographyLevel>>,
    }

    impl GeographySource for Fixture {
        fn fetch_level(&self, level: GeographyLevel) -> Result<Vec<GeographyCode>, RegistryError> {
            self.fetched.lock().unwrap().push(level);
            match level {
                GeographyLevel::County => Ok(vec![
                    code(level, "031", "Cook County, Illinois", "17"),
                    code(level, "075", "Cook County, Georgia", "13"),
                    code(level, "061", "New York County, New York", "36"),
                    code(level, "071", "Orange County, New York", "36"),
                    code(level, "059", "Orange County, California", "06"),
                    code(level, "001", "Adams County, Illinois", "17"),
                ]),
                GeographyLevel::Place => Ok(vec![
                    code(level, "51000", "New York city, New York", "36"),
                    code(level, "14000", "Chicago city, Illinois", "17"),
                    code(level, "04000", "Adams town, Massachusetts", "25"),
                ]),
                _ => Err(RegistryError::UnsupportedLevel { level }),
            }
        }
    }

    fn resolver() -> (Arc<Fixture>, GeographyResolver) {
        let fixture = Arc::new(Fixture {
            fetched: Mutex::new(Vec::new()),
        });
        let registry = Arc::new(GeographyRegistry::new(
            Arc::clone(&fixture) as Arc<dyn GeographySource>
        ));
        (fixture, GeographyResolver::new(registry, ResolverConfig::default()))
    }

    fn hit(geoid: &str, score: f64) -> GeoMatch {
        GeoMatch {
            geography: Arc::new(code(GeographyLevel::County, &geoid[2..], geoid, &geoid[..2])),
            score: MatchScore {
                kind: MatchKind::Token,
                score,
            },
        }
    }

    #[test]
    fn decide_is_unresolved_below_min_score() {
        let config = ResolverConfig::default();
        assert!(matches!(decide(&[], &config), ResolutionResult::Unresolved));
        assert!(matches!(
            decide(&[hit("17031", 0.35)], &config),
            ResolutionResult::Unresolved
        ));
    }

    #[test]
    fn decide_flags_close_runner_up() {
        let config = ResolverConfig::default();
        let outcome = decide(&[hit("17031", 0.9), hit("13075", 0.87), hit("36061", 0.5)], &config);
        let ResolutionResult::Ambiguous(candidates) = outcome else {
            panic!("expected ambiguity");
        };
        assert_eq!(candidates.len(), 2);

        let outcome = decide(&[hit("17031", 0.9), hit("13075", 0.7)], &config);
        assert_eq!(outcome.geography().unwrap().geoid(), "17031");
        assert_eq!(outcome.confidence(), Some(0.9));
    }

    #[test]
    fn parent_disambiguates_shared_county_name() {
        let (_, resolver) = resolver();
        let reference = GeographyReference::new("Cook")
            .with_level(GeographyLevel::County)
            .with_parent(GeographyReference::new("Illinois").with_level(GeographyLevel::State));
        let outcome = resolver.resolve(&reference).unwrap();
        assert_eq!(outcome.geography().unwrap().geoid(), "17031");

        let bare = GeographyReference::new("Cook").with_level(GeographyLevel::County);
        assert!(matches!(
            resolver.resolve(&bare).unwrap(),
            ResolutionResult::Ambiguous(_)
        ));
    }

    #[test]
    fn level_hint_limits_search_to_that_level() {
        let (fixture, resolver) = resolver();
        let reference = GeographyReference::new("Adams").with_level(GeographyLevel::Place);
        let outcome = resolver.resolve(&reference).unwrap();
        let geography = outcome.geography().unwrap();
        assert_eq!(geography.level(), GeographyLevel::Place);
        assert_eq!(*fixture.fetched.lock().unwrap(), vec![GeographyLevel::Place]);
    }

    #[test]
    fn parsed_reference_with_postal_parent() {
        let (_, resolver) = resolver();
        let outcome = resolver
            .resolve(&GeographyReference::parse("New York County, NY"))
            .unwrap();
        assert_eq!(outcome.geography().unwrap().geoid(), "36061");
        assert_eq!(outcome.confidence(), Some(STEM_SCORE));
    }

    #[test]
    fn state_abbreviation_resolves_exactly() {
        let (fixture, resolver) = resolver();
        let reference = GeographyReference::new("IL").with_level(GeographyLevel::State);
        let outcome = resolver.resolve(&reference).unwrap();
        assert_eq!(outcome.geography().unwrap().code(), "17");
        assert_eq!(outcome.confidence(), Some(1.0));
        assert!(fixture.fetched.lock().unwrap().is_empty());
    }

    #[test]
    fn code_form_uses_lookup_within_parent() {
        let (_, resolver) = resolver();
        let reference = GeographyReference::new("031")
            .with_level(GeographyLevel::County)
            .with_parent(GeographyReference::new("17").with_level(GeographyLevel::State));
        let outcome = resolver.resolve(&reference).unwrap();
        assert_eq!(outcome.geography().unwrap().geoid(), "17031");
        assert_eq!(outcome.confidence(), Some(1.0));
    }

    #[test]
    fn unhinted_search_prefers_strong_match_over_earlier_level() {
        let (_, resolver) = resolver();
        let outcome = resolver
            .resolve(&GeographyReference::new("Illinois"))
            .unwrap();
        let geography = outcome.geography().unwrap();
        assert_eq!(geography.level(), GeographyLevel::State);
        assert_eq!(geography.code(), "17");
    }

    /// Every remote level fails to load.
    struct Offline;

    impl GeographySource for Offline {
        fn fetch_level(&self, level: GeographyLevel) -> Result<Vec<GeographyCode>, RegistryError> {
            Err(RegistryError::SourceFailed {
                level,
                message: "HTTP 500".into(),
            })
        }
    }

    fn offline_resolver() -> GeographyResolver {
        let registry = Arc::new(GeographyRegistry::new(Arc::new(Offline)));
        GeographyResolver::new(registry, ResolverConfig::default())
    }

    #[test]
    fn unhinted_state_survives_failed_place_load() {
        let resolver = offline_resolver();
        let outcome = resolver
            .resolve(&GeographyReference::new("Illinois"))
            .unwrap();
        let geography = outcome.geography().unwrap();
        assert_eq!(geography.level(), GeographyLevel::State);
        assert_eq!(geography.code(), "17");
    }

    #[test]
    fn load_failure_surfaces_when_nothing_else_matches() {
        let resolver = offline_resolver();
        let err = resolver
            .resolve(&GeographyReference::new("Zzyzx"))
            .unwrap_err();
        assert!(matches!(
            err,
            GeoError::Registry(RegistryError::SourceFailed {
                level: GeographyLevel::Place,
                ..
            })
        ));
    }

    #[test]
    fn unresolved_parent_leaves_child_unresolved() {
        let (_, resolver) = resolver();
        let reference = GeographyReference::new("Cook")
            .with_level(GeographyLevel::County)
            .with_parent(GeographyReference::new("Atlantis").with_level(GeographyLevel::State));
        assert!(matches!(
            resolver.resolve(&reference).unwrap(),
            ResolutionResult::Unresolved
        ));
    }
}
