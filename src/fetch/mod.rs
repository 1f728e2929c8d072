//! Request execution: response parsing, retry, and the orchestrator.

pub mod orchestrator;
pub mod retry;
pub mod table;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use orchestrator::{ExecutedQuery, Orchestrator, ResultOrigin};
pub use retry::RetryPolicy;
pub use table::Table;

/// Why a single request failed.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum FetchError {
    #[error("remote service rejected the request (HTTP {status}): {message}")]
    #[diagnostic(
        code(geoquery::fetch::client),
        help(
            "The request was well formed but the service refused it. This usually means \
             the geography or a variable is not available for this dataset and year."
        )
    )]
    Client { status: u16, message: String },

    #[error("transient failure: {message}")]
    #[diagnostic(
        code(geoquery::fetch::transient),
        help("Server errors and network failures are retried with exponential backoff.")
    )]
    Transient { message: String },

    #[error("gave up after {attempts} attempt(s): {detail}")]
    #[diagnostic(
        code(geoquery::fetch::timeout),
        help(
            "The retry budget or the execution deadline ran out. Raise fetch.max_attempts \
             or the deadline, or try again later."
        )
    )]
    Timeout { attempts: u32, detail: String },

    #[error("request could not be sent: {message}")]
    #[diagnostic(
        code(geoquery::fetch::invalid_request),
        help("The request URL is malformed. Check the configured base_url.")
    )]
    InvalidRequest { message: String },

    #[error("invalid response body: {message}")]
    #[diagnostic(
        code(geoquery::fetch::invalid_response),
        help("The service answered 200 but the body is not a JSON array of rows.")
    )]
    InvalidResponse { message: String },
}

/// Copyable failure tag reported per query and per year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    InvalidVariable,
    MalformedQuery,
    ClientError,
    TransientError,
    Timeout,
    InvalidResponse,
    UnsupportedGeography,
    CatalogUnavailable,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::InvalidVariable => "invalid_variable",
            FailureKind::MalformedQuery => "malformed_query",
            FailureKind::ClientError => "client_error",
            FailureKind::TransientError => "transient_error",
            FailureKind::Timeout => "timeout",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::UnsupportedGeography => "unsupported_geography",
            FailureKind::CatalogUnavailable => "catalog_unavailable",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Client { .. } => FailureKind::ClientError,
            FetchError::Transient { .. } => FailureKind::TransientError,
            FetchError::Timeout { .. } => FailureKind::Timeout,
            FetchError::InvalidRequest { .. } => FailureKind::MalformedQuery,
            FetchError::InvalidResponse { .. } => FailureKind::InvalidResponse,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_one_to_one() {
        let client = FetchError::Client {
            status: 404,
            message: "unknown variable".into(),
        };
        assert_eq!(client.kind(), FailureKind::ClientError);
        assert!(!client.is_retryable());

        let transient = FetchError::Transient {
            message: "HTTP 503".into(),
        };
        assert_eq!(transient.kind(), FailureKind::TransientError);
        assert!(transient.is_retryable());

        let timeout = FetchError::Timeout {
            attempts: 4,
            detail: "retry budget exhausted".into(),
        };
        assert_eq!(timeout.kind(), FailureKind::Timeout);
        assert_eq!(timeout.kind().to_string(), "timeout");
    }
}
