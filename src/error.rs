//! Rich diagnostic error types for the geoquery engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains. Recoverable outcomes
//! (no geography match, ambiguous names, unknown variables) are returned as
//! structured values by their components; the types here cover the rest.

use miette::Diagnostic;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::geo::GeographyLevel;
use crate::paths::PathError;

/// Top-level error type for the geoquery engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum GeoError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Paths(#[from] PathError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("no {level} with code \"{code}\"")]
    #[diagnostic(
        code(geoquery::registry::not_found),
        help(
            "Codes are matched against the fully qualified GEOID (e.g. \"17031\" for \
             Cook County, Illinois) or, when unique, the bare code at that level."
        )
    )]
    NotFound { level: GeographyLevel, code: String },

    #[error("no {level} matches \"{query}\"")]
    #[diagnostic(
        code(geoquery::registry::no_match),
        help("Check the spelling, or qualify the name with its state (e.g. \"Cook County, IL\").")
    )]
    NoMatch { level: GeographyLevel, query: String },

    #[error("code \"{code}\" is shared by {count} {level} entries")]
    #[diagnostic(
        code(geoquery::registry::ambiguous_code),
        help(
            "Bare codes are only unique within their parent. Use the fully qualified \
             GEOID or look the code up within a parent geography."
        )
    )]
    AmbiguousCode {
        level: GeographyLevel,
        code: String,
        count: usize,
    },

    #[error("geography level {level} cannot be enumerated from the catalog")]
    #[diagnostic(
        code(geoquery::registry::unsupported_level),
        help(
            "Sub-county levels (tract, block group, county subdivision) are passed \
             through by code only. Build them with GeographyCode::new or a wildcard."
        )
    )]
    UnsupportedLevel { level: GeographyLevel },

    #[error("failed to load {level} names: {message}")]
    #[diagnostic(
        code(geoquery::registry::source_failed),
        help("The geography catalog could not be fetched. Check network access and the API base URL.")
    )]
    SourceFailed { level: GeographyLevel, message: String },
}

// ---------------------------------------------------------------------------
// Query construction errors
// ---------------------------------------------------------------------------

/// A request could not be expressed in the remote grammar.
///
/// These indicate an internal inconsistency (a level missing from the
/// ordering or token tables, a malformed ancestor chain) rather than bad
/// user input, and are never produced for registry-built geographies.
#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("geography level {level} has no position in the hierarchy ordering")]
    #[diagnostic(
        code(geoquery::query::unordered_level),
        help(
            "Only levels listed in HIERARCHY_ORDER may appear as ancestor constraints. \
             Add the level to the ordering table or drop it from the parent chain."
        )
    )]
    UnorderedLevel { level: GeographyLevel },

    #[error("unknown geography level name \"{name}\"")]
    #[diagnostic(
        code(geoquery::query::unknown_level),
        help("Known levels: nation, region, division, state, county, county subdivision, place, tract, block group, csa, msa, metropolitan division, congressional district, zcta.")
    )]
    UnknownLevelToken { name: String },

    #[error("{ancestor} cannot contain {level}")]
    #[diagnostic(
        code(geoquery::query::non_ancestor),
        help("Parent codes must be strictly less granular than the geography they contain.")
    )]
    NonAncestor {
        ancestor: GeographyLevel,
        level: GeographyLevel,
    },

    #[error("conflicting {level} ancestors: \"{first}\" and \"{second}\"")]
    #[diagnostic(
        code(geoquery::query::conflicting_ancestor),
        help("A geography has at most one containing entity per level.")
    )]
    ConflictingAncestor {
        level: GeographyLevel,
        first: String,
        second: String,
    },

    #[error("query has no variables")]
    #[diagnostic(
        code(geoquery::query::empty_variables),
        help("Request at least one variable code (e.g. \"B01003_001E\" or \"NAME\").")
    )]
    EmptyVariables,

    #[error("year {year} is out of range")]
    #[diagnostic(
        code(geoquery::query::invalid_year),
        help("Years are four-digit vintages between 1900 and 2100.")
    )]
    InvalidYear { year: u16 },

    #[error("invalid dataset identifier \"{dataset}\"")]
    #[diagnostic(
        code(geoquery::query::invalid_dataset),
        help("Datasets are slash-separated path segments such as \"acs/acs5\" or \"dec/pl\".")
    )]
    InvalidDataset { dataset: String },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(geoquery::store::io),
        help(
            "A filesystem operation failed. Check that the cache directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(geoquery::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             Deleting the cache directory is always safe; entries will be refetched."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(geoquery::store::serde),
        help(
            "Failed to serialize or deserialize stored data. \
             This usually means the on-disk format changed between versions; clear the cache."
        )
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("data directory error: {path}")]
    #[diagnostic(
        code(geoquery::engine::data_dir),
        help(
            "The data directory could not be accessed. \
             Ensure the path exists and has read/write permissions."
        )
    )]
    DataDir { path: String },

    #[error("failed to start worker pool: {message}")]
    #[diagnostic(
        code(geoquery::engine::worker_pool),
        help("The request worker pool could not be created; lower fetch.max_concurrency.")
    )]
    WorkerPool { message: String },
}

/// Convenience alias for functions returning geoquery results.
pub type GeoResult<T> = std::result::Result<T, GeoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_converts_to_geo_error() {
        let err = RegistryError::NotFound {
            level: GeographyLevel::County,
            code: "99999".into(),
        };
        let geo: GeoError = err.into();
        assert!(matches!(geo, GeoError::Registry(RegistryError::NotFound { .. })));
    }

    #[test]
    fn query_error_converts_to_geo_error() {
        let err = QueryError::UnorderedLevel {
            level: GeographyLevel::ZipCodeTabulationArea,
        };
        let geo: GeoError = err.into();
        assert!(matches!(geo, GeoError::Query(QueryError::UnorderedLevel { .. })));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = QueryError::NonAncestor {
            ancestor: GeographyLevel::County,
            level: GeographyLevel::State,
        };
        let msg = format!("{err}");
        assert!(msg.contains("county"));
        assert!(msg.contains("state"));
    }
}
