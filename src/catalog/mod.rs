//! Dataset metadata: variable catalogs and geography support.
//!
//! Both are published per dataset and year (`variables.json`,
//! `geography.json`), change rarely, and are cached across process
//! lifetimes by the [`validator::VariableValidator`].

pub mod source;
pub mod validator;

use std::collections::{BTreeSet, HashMap};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StoreError;
use crate::geo::{GeographyCode, GeographyLevel, hierarchy};
use crate::query::Dataset;

pub use source::{CatalogSource, RemoteCatalogSource};
pub use validator::{ValidationResult, VariableValidator};

/// Predicate names that appear in the variable catalog but are never
/// valid `get` variables.
pub const RESERVED_PREDICATES: &[&str] = &["for", "in", "ucgid"];

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("no {what} catalog for {dataset} {year}")]
    #[diagnostic(
        code(geoquery::catalog::not_found),
        help("The dataset is not published for this year. Check the vintage list for the dataset.")
    )]
    NotFound {
        what: &'static str,
        dataset: Dataset,
        year: u16,
    },

    #[error("{what} catalog for {dataset} {year} unavailable: {message}")]
    #[diagnostic(
        code(geoquery::catalog::unavailable),
        help("The metadata endpoint could not be reached. Cached catalogs are used when present.")
    )]
    Unavailable {
        what: &'static str,
        dataset: Dataset,
        year: u16,
        message: String,
    },

    #[error("malformed {what} catalog: {message}")]
    #[diagnostic(
        code(geoquery::catalog::parse),
        help("The metadata document did not have the expected JSON shape.")
    )]
    Parse { what: &'static str, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Catalog view of one variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableMetadata {
    pub code: String,
    pub dataset: Dataset,
    pub year: u16,
    pub label: Option<String>,
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub label: String,
    pub concept: Option<String>,
    pub group: Option<String>,
    pub predicate_type: Option<String>,
}

#[derive(Deserialize)]
struct RawVariables {
    variables: HashMap<String, RawVariable>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVariable {
    #[serde(default)]
    label: String,
    #[serde(default)]
    concept: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    predicate_type: Option<String>,
}

/// Variables published for one dataset and year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableCatalog {
    dataset: Dataset,
    year: u16,
    variables: HashMap<String, VariableInfo>,
    groups: BTreeSet<String>,
}

fn group_name(code: &str) -> Option<&str> {
    code.strip_prefix("group(")?.strip_suffix(')').map(str::trim)
}

impl VariableCatalog {
    pub fn new(dataset: Dataset, year: u16, variables: HashMap<String, VariableInfo>) -> Self {
        let groups = variables
            .values()
            .filter_map(|v| v.group.as_deref())
            .filter(|g| !g.is_empty() && *g != "N/A")
            .map(str::to_string)
            .collect();
        Self {
            dataset,
            year,
            variables,
            groups,
        }
    }

    /// Parse a `variables.json` document.
    pub fn parse(dataset: Dataset, year: u16, json: &str) -> Result<Self, CatalogError> {
        let raw: RawVariables = serde_json::from_str(json).map_err(|e| CatalogError::Parse {
            what: "variable",
            message: e.to_string(),
        })?;
        let variables = raw
            .variables
            .into_iter()
            .map(|(code, v)| {
                (
                    code,
                    VariableInfo {
                        label: v.label,
                        concept: v.concept,
                        group: v.group,
                        predicate_type: v.predicate_type,
                    },
                )
            })
            .collect();
        Ok(Self::new(dataset, year, variables))
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Whether `code` may be requested: a published variable, or
    /// `group(X)` for a published group. Reserved predicates never are.
    pub fn contains(&self, code: &str) -> bool {
        if RESERVED_PREDICATES.contains(&code.to_ascii_lowercase().as_str()) {
            return false;
        }
        match group_name(code) {
            Some(group) => self.groups.contains(group),
            None => self.variables.contains_key(code),
        }
    }

    pub fn info(&self, code: &str) -> Option<&VariableInfo> {
        self.variables.get(code)
    }

    pub fn metadata(&self, code: &str) -> VariableMetadata {
        let label = match group_name(code) {
            Some(group) => self
                .groups
                .contains(group)
                .then(|| format!("all variables in group {group}")),
            None => self.variables.get(code).map(|v| v.label.clone()),
        };
        VariableMetadata {
            code: code.to_string(),
            dataset: self.dataset.clone(),
            year: self.year,
            label,
            exists: self.contains(code),
        }
    }
}

// ---------------------------------------------------------------------------
// Geography support
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawGeography {
    #[serde(default)]
    fips: Vec<RawGeoLevel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGeoLevel {
    name: String,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    optional_with_wc_for: Option<String>,
}

/// One accepted hierarchy for a level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedHierarchy {
    pub level: GeographyLevel,
    /// Ancestor levels that must be given in `in`.
    pub requires: Vec<GeographyLevel>,
    /// Required level that may be omitted when the selector is a wildcard.
    pub optional_with_wildcard: Option<GeographyLevel>,
}

/// Why a geography cannot be requested from a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportIssue {
    UnsupportedLevel { level: GeographyLevel },
    MissingAncestors {
        level: GeographyLevel,
        missing: Vec<GeographyLevel>,
    },
    UnexpectedAncestors {
        level: GeographyLevel,
        unexpected: Vec<GeographyLevel>,
    },
}

impl std::fmt::Display for SupportIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |levels: &[GeographyLevel]| {
            levels.iter().map(|l| l.name()).collect::<Vec<_>>().join(", ")
        };
        match self {
            SupportIssue::UnsupportedLevel { level } => {
                write!(f, "{level} is not published for this dataset")
            }
            SupportIssue::MissingAncestors { level, missing } => {
                write!(f, "{level} requires {}", join(missing))
            }
            SupportIssue::UnexpectedAncestors { level, unexpected } => {
                write!(f, "{level} cannot be constrained by {}", join(unexpected))
            }
        }
    }
}

/// Geography levels and hierarchies published for one dataset and year.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographySupport {
    hierarchies: Vec<SupportedHierarchy>,
}

impl GeographySupport {
    pub fn new(hierarchies: Vec<SupportedHierarchy>) -> Self {
        Self { hierarchies }
    }

    /// Parse a `geography.json` document. Levels this engine does not model
    /// are skipped.
    pub fn parse(json: &str) -> Result<Self, CatalogError> {
        let raw: RawGeography = serde_json::from_str(json).map_err(|e| CatalogError::Parse {
            what: "geography",
            message: e.to_string(),
        })?;
        let mut hierarchies = Vec::new();
        for entry in raw.fips {
            let Some(level) = hierarchy::level_from_api_token(&entry.name) else {
                tracing::trace!(name = %entry.name, "skipping unmodelled geography level");
                continue;
            };
            let requires: Option<Vec<GeographyLevel>> = entry
                .requires
                .iter()
                .map(|r| hierarchy::level_from_api_token(r))
                .collect();
            let Some(requires) = requires else {
                continue;
            };
            let optional_with_wildcard = entry
                .optional_with_wc_for
                .as_deref()
                .and_then(hierarchy::level_from_api_token);
            let candidate = SupportedHierarchy {
                level,
                requires,
                optional_with_wildcard,
            };
            if !hierarchies.contains(&candidate) {
                hierarchies.push(candidate);
            }
        }
        Ok(Self { hierarchies })
    }

    pub fn hierarchies(&self) -> &[SupportedHierarchy] {
        &self.hierarchies
    }

    pub fn supports_level(&self, level: GeographyLevel) -> bool {
        self.hierarchies.iter().any(|h| h.level == level)
    }

    /// Check that `geography` matches one of the published hierarchies.
    pub fn check(&self, geography: &GeographyCode) -> Result<(), SupportIssue> {
        let level = geography.level();
        let ancestors: Vec<GeographyLevel> = geography
            .parent_codes()
            .iter()
            .map(|(l, _)| *l)
            .filter(|l| *l != GeographyLevel::Nation)
            .collect();

        let mut best: Option<SupportIssue> = None;
        let mut best_cost = usize::MAX;
        for h in self.hierarchies.iter().filter(|h| h.level == level) {
            let missing: Vec<GeographyLevel> = h
                .requires
                .iter()
                .copied()
                .filter(|r| !ancestors.contains(r))
                .filter(|r| !(geography.is_wildcard() && h.optional_with_wildcard == Some(*r)))
                .collect();
            let unexpected: Vec<GeographyLevel> = ancestors
                .iter()
                .copied()
                .filter(|a| !h.requires.contains(a))
                .collect();
            if missing.is_empty() && unexpected.is_empty() {
                return Ok(());
            }
            let cost = missing.len() + unexpected.len();
            if cost < best_cost {
                best_cost = cost;
                best = Some(if missing.is_empty() {
                    SupportIssue::UnexpectedAncestors { level, unexpected }
                } else {
                    SupportIssue::MissingAncestors { level, missing }
                });
            }
        }
        Err(best.unwrap_or(SupportIssue::UnsupportedLevel { level }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARIABLES: &str = r#"{"variables": {
        "for": {"label": "Census API FIPS 'for' clause", "concept": "Census API Geography Specification", "predicateType": "fips-for", "group": "N/A"},
        "in": {"label": "Census API FIPS 'in' clause", "predicateType": "fips-in", "group": "N/A"},
        "NAME": {"label": "Geographic Area Name", "predicateType": "string", "group": "N/A"},
        "B01003_001E": {"label": "Estimate!!Total", "concept": "TOTAL POPULATION", "predicateType": "int", "group": "B01003"}
    }}"#;

    const GEOGRAPHY: &str = r#"{"fips": [
        {"name": "us", "geoLevelDisplay": "010"},
        {"name": "state", "geoLevelDisplay": "040"},
        {"name": "county", "geoLevelDisplay": "050", "requires": ["state"], "wildcard": ["state"], "optionalWithWCFor": "state"},
        {"name": "tract", "geoLevelDisplay": "140", "requires": ["state", "county"], "wildcard": ["county"], "optionalWithWCFor": "county"},
        {"name": "state legislative district (upper chamber)", "requires": ["state"]}
    ]}"#;

    fn catalog() -> VariableCatalog {
        VariableCatalog::parse(Dataset::new("acs/acs5").unwrap(), 2022, VARIABLES).unwrap()
    }

    fn state(code: &str) -> GeographyCode {
        GeographyCode::new(GeographyLevel::State, code, "S", vec![]).unwrap()
    }

    #[test]
    fn catalog_membership() {
        let c = catalog();
        assert!(c.contains("B01003_001E"));
        assert!(c.contains("NAME"));
        assert!(!c.contains("B99999_001E"));
        assert!(!c.contains("for"));
        assert!(!c.contains("in"));
    }

    #[test]
    fn groups_are_valid_variables() {
        let c = catalog();
        assert!(c.contains("group(B01003)"));
        assert!(!c.contains("group(B99999)"));
        assert!(!c.groups().contains("N/A"));
        assert!(c.metadata("group(B01003)").label.is_some());
    }

    #[test]
    fn metadata_reports_existence() {
        let c = catalog();
        let meta = c.metadata("B01003_001E");
        assert!(meta.exists);
        assert_eq!(meta.label.as_deref(), Some("Estimate!!Total"));
        assert!(!c.metadata("B99999_001E").exists);
    }

    #[test]
    fn geography_support_parses_known_levels() {
        let support = GeographySupport::parse(GEOGRAPHY).unwrap();
        assert_eq!(support.hierarchies().len(), 4);
        assert!(support.supports_level(GeographyLevel::Tract));
        assert!(!support.supports_level(GeographyLevel::Place));
    }

    #[test]
    fn check_requires_ancestors() {
        let support = GeographySupport::parse(GEOGRAPHY).unwrap();
        let cook = GeographyCode::new(
            GeographyLevel::County,
            "031",
            "Cook County, Illinois",
            vec![(GeographyLevel::State, "17".into())],
        )
        .unwrap();
        assert!(support.check(&cook).is_ok());
        assert!(support.check(&state("17")).is_ok());

        let bare_county = GeographyCode::new(GeographyLevel::County, "031", "Cook", vec![]).unwrap();
        assert_eq!(
            support.check(&bare_county),
            Err(SupportIssue::MissingAncestors {
                level: GeographyLevel::County,
                missing: vec![GeographyLevel::State],
            })
        );

        let all_counties = GeographyCode::wildcard(GeographyLevel::County, None).unwrap();
        assert!(support.check(&all_counties).is_ok());

        let place = GeographyCode::wildcard(GeographyLevel::Place, Some(&state("17"))).unwrap();
        assert_eq!(
            support.check(&place),
            Err(SupportIssue::UnsupportedLevel {
                level: GeographyLevel::Place
            })
        );
    }
}
