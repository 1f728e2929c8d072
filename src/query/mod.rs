//! Query specifications: one [`QuerySpec`] per network request.
//!
//! Specs are built by [`builder::build`] and never mutated; a different year
//! or variable set produces a new spec with a new [`QuerySpec::signature`].

pub mod builder;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::QueryError;
use crate::geo::GeographyCode;

/// Version tag mixed into every signature. Bump when the key layout changes.
const SIGNATURE_VERSION: &str = "geoquery-sig-v1";

/// Dataset identifier such as `acs/acs5` or `dec/pl`.
///
/// One or more lowercase path segments of ASCII letters, digits, `_` or `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dataset(String);

impl Dataset {
    pub fn new(id: &str) -> Result<Self, QueryError> {
        let id = id.trim().trim_matches('/').to_ascii_lowercase();
        let valid = !id.is_empty()
            && id.split('/').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            });
        if valid {
            Ok(Self(id))
        } else {
            Err(QueryError::InvalidDataset { dataset: id })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Dataset {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Dataset {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Dataset> for String {
    fn from(value: Dataset) -> Self {
        value.0
    }
}

/// Base URL of a dataset vintage: `<base>/<year>/<dataset>`.
pub fn dataset_url(base_url: &str, dataset: &Dataset, year: u16) -> String {
    format!("{}/{year}/{dataset}", base_url.trim_end_matches('/'))
}

/// A fully built request for one dataset, year and geography.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    variables: BTreeSet<String>,
    geography: Arc<GeographyCode>,
    dataset: Dataset,
    year: u16,
    for_clause: String,
    in_clause: Option<String>,
    signature: String,
}

impl QuerySpec {
    pub fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    pub fn geography(&self) -> &Arc<GeographyCode> {
        &self.geography
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    /// Primary selector, e.g. `county:031`.
    pub fn for_clause(&self) -> &str {
        &self.for_clause
    }

    /// Ancestor constraint, e.g. `state:17`, least granular first.
    pub fn in_clause(&self) -> Option<&str> {
        self.in_clause.as_deref()
    }

    /// Deterministic cache key: hex SHA-256 over dataset, year, sorted
    /// variables, level and canonical geography key.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Request URL without query string.
    pub fn endpoint(&self, base_url: &str) -> String {
        dataset_url(base_url, &self.dataset, self.year)
    }

    /// Query parameters in request order. The API key is appended last and
    /// never contributes to the signature.
    pub fn params(&self, api_key: Option<&str>) -> Vec<(String, String)> {
        let mut params = vec![
            ("get".to_string(), self.variables.iter().cloned().collect::<Vec<_>>().join(",")),
            ("for".to_string(), self.for_clause.clone()),
        ];
        if let Some(in_clause) = &self.in_clause {
            params.push(("in".to_string(), in_clause.clone()));
        }
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            params.push(("key".to_string(), key.to_string()));
        }
        params
    }

    /// The same request for a different year.
    pub fn for_year(&self, year: u16) -> Result<QuerySpec, QueryError> {
        builder::build(
            Arc::clone(&self.geography),
            self.variables.iter().cloned(),
            &self.dataset,
            year,
        )
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} for={}", self.year, self.dataset, self.for_clause)?;
        if let Some(in_clause) = &self.in_clause {
            write!(f, " in={in_clause}")?;
        }
        Ok(())
    }
}

pub(crate) fn compute_signature(
    dataset: &Dataset,
    year: u16,
    variables: &BTreeSet<String>,
    geography: &GeographyCode,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(SIGNATURE_VERSION.as_bytes());
    hasher.update([0u8]);
    hasher.update(dataset.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(year.to_be_bytes());
    for variable in variables {
        hasher.update([0u8]);
        hasher.update(variable.as_bytes());
    }
    hasher.update([1u8]);
    hasher.update(geography.level().name().as_bytes());
    hasher.update([0u8]);
    hasher.update(geography.canonical_key().as_bytes());
    format!("{:x}", hasher.finalize())
}
