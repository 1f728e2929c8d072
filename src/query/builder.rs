//! Query parameter builder.
//!
//! The remote grammar takes exactly one primary selector (`for=level:code`)
//! and at most one ancestor constraint (`in=`), a single space-joined list
//! ordered from least to most granular. Ordering comes from
//! [`hierarchy::HIERARCHY_ORDER`] and tokens from [`hierarchy::api_token`];
//! a level missing from either table is a hard error.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{Dataset, QuerySpec, compute_signature};
use crate::error::QueryError;
use crate::geo::{GeographyCode, GeographyLevel, hierarchy};

pub const MIN_YEAR: u16 = 1900;
pub const MAX_YEAR: u16 = 2100;

/// Build the request for `geography` at `year`.
pub fn build<I, S>(
    geography: Arc<GeographyCode>,
    variables: I,
    dataset: &Dataset,
    year: u16,
) -> Result<QuerySpec, QueryError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let variables: BTreeSet<String> = variables
        .into_iter()
        .map(|v| {
            let v: String = v.into();
            v.trim().to_string()
        })
        .filter(|v| !v.is_empty())
        .collect();
    if variables.is_empty() {
        return Err(QueryError::EmptyVariables);
    }
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(QueryError::InvalidYear { year });
    }

    let for_clause = render_for_clause(&geography)?;
    let in_clause = render_in_clause(geography.parent_codes()).inspect_err(|e| {
        tracing::error!(geography = %geography, error = %e, "registry produced a malformed ancestor chain");
    })?;
    let signature = compute_signature(dataset, year, &variables, &geography);

    Ok(QuerySpec {
        variables,
        geography,
        dataset: dataset.clone(),
        year,
        for_clause,
        in_clause,
        signature,
    })
}

/// `token:code` for the geography itself.
pub fn render_for_clause(geography: &GeographyCode) -> Result<String, QueryError> {
    Ok(format!(
        "{}:{}",
        hierarchy::api_token(geography.level())?,
        geography.code()
    ))
}

/// Space-joined ancestor constraint, or `None` when there are no ancestors.
///
/// The nation contains everything and is never emitted as a constraint.
pub fn render_in_clause(
    ancestors: &[(GeographyLevel, String)],
) -> Result<Option<String>, QueryError> {
    let mut ordered: Vec<(usize, &'static str, &str)> = Vec::with_capacity(ancestors.len());
    for (level, code) in ancestors {
        if *level == GeographyLevel::Nation {
            continue;
        }
        let position = hierarchy::require_position(*level)?;
        ordered.push((position, hierarchy::api_token(*level)?, code.as_str()));
    }
    if ordered.is_empty() {
        return Ok(None);
    }
    ordered.sort_by_key(|(position, _, _)| *position);
    let pairs: Vec<String> = ordered
        .iter()
        .map(|(_, token, code)| format!("{token}:{code}"))
        .collect();
    Ok(Some(pairs.join(" ")))
}
