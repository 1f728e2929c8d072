//! Where geography names come from.
//!
//! The remote service has no dedicated gazetteer; every level's names are
//! enumerated with a `get=NAME&for=<level>:*` request against a reference
//! dataset, and each row becomes one [`GeographyCode`].

use std::sync::Arc;

use super::{GeographyCode, GeographyLevel, hierarchy};
use crate::error::RegistryError;
use crate::fetch::Table;
use crate::fetch::retry::{RetryPolicy, fetch_with_retry};
use crate::http::Transport;
use crate::query::{Dataset, dataset_url};

/// Supplies every entity at a level.
pub trait GeographySource: Send + Sync {
    fn fetch_level(&self, level: GeographyLevel) -> Result<Vec<GeographyCode>, RegistryError>;
}

/// `for`/`in` clauses that enumerate a whole level, or `None` for levels
/// too fine-grained to enumerate nationally.
pub fn enumeration_scope(level: GeographyLevel) -> Option<(String, Option<String>)> {
    let token = hierarchy::api_token(level).ok()?;
    let scope = match level {
        GeographyLevel::Tract | GeographyLevel::BlockGroup | GeographyLevel::CountySubdivision => {
            return None;
        }
        GeographyLevel::Place | GeographyLevel::CongressionalDistrict => Some("state:*".to_string()),
        GeographyLevel::MetropolitanDivision => Some(format!(
            "{}:*",
            hierarchy::api_token(GeographyLevel::MetropolitanStatisticalArea).ok()?
        )),
        _ => None,
    };
    Some((format!("{token}:*"), scope))
}

/// Turn a `NAME` + code columns table into registry entries for `level`.
pub fn codes_from_table(level: GeographyLevel, table: &Table) -> Result<Vec<GeographyCode>, RegistryError> {
    let failed = |message: String| RegistryError::SourceFailed { level, message };

    let name_col = table
        .column_index("NAME")
        .ok_or_else(|| failed("response has no NAME column".into()))?;
    let mut own_col = None;
    let mut parent_cols = Vec::new();
    for (i, header) in table.columns().iter().enumerate() {
        match hierarchy::level_from_api_token(header) {
            Some(l) if l == level => own_col = Some(i),
            Some(l) if l != GeographyLevel::Nation => parent_cols.push((i, l)),
            _ => {}
        }
    }
    let own_col = own_col.ok_or_else(|| failed(format!("response has no {level} column")))?;

    let mut codes = Vec::with_capacity(table.len());
    for row in table.rows() {
        let (Some(name), Some(code)) = (row[name_col].as_deref(), row[own_col].as_deref()) else {
            continue;
        };
        let parents = parent_cols
            .iter()
            .filter_map(|(i, l)| row[*i].as_ref().map(|c| (*l, c.clone())))
            .collect();
        match GeographyCode::new(level, code, name, parents) {
            Ok(g) => codes.push(g),
            Err(e) => tracing::warn!(level = %level, code, error = %e, "skipping malformed geography row"),
        }
    }
    Ok(codes)
}

/// Enumerates levels from the remote API.
pub struct RemoteGeographySource {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: Option<String>,
    dataset: Dataset,
    year: u16,
    retry: RetryPolicy,
}

impl RemoteGeographySource {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        dataset: Dataset,
        year: u16,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            api_key,
            dataset,
            year,
            retry,
        }
    }
}

impl GeographySource for RemoteGeographySource {
    fn fetch_level(&self, level: GeographyLevel) -> Result<Vec<GeographyCode>, RegistryError> {
        let (for_clause, in_clause) =
            enumeration_scope(level).ok_or(RegistryError::UnsupportedLevel { level })?;

        let mut params = vec![
            ("get".to_string(), "NAME".to_string()),
            ("for".to_string(), for_clause),
        ];
        if let Some(in_clause) = in_clause {
            params.push(("in".to_string(), in_clause));
        }
        if let Some(key) = &self.api_key {
            params.push(("key".to_string(), key.clone()));
        }

        let url = dataset_url(&self.base_url, &self.dataset, self.year);
        let outcome = fetch_with_retry(self.transport.as_ref(), &url, &params, &self.retry, None);
        let response = outcome.result.map_err(|e| RegistryError::SourceFailed {
            level,
            message: e.to_string(),
        })?;
        let table = Table::parse(&response.body).map_err(|e| RegistryError::SourceFailed {
            level,
            message: e.to_string(),
        })?;
        let codes = codes_from_table(level, &table)?;
        tracing::info!(
            level = %level,
            dataset = %self.dataset,
            year = self.year,
            entries = codes.len(),
            "geography level loaded"
        );
        Ok(codes)
    }
}
