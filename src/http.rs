//! HTTP transport for the remote statistical API.
//!
//! Uses `ureq` for synchronous requests. The [`Transport`] trait is the
//! seam every remote call goes through (data, variable catalogs, geography
//! names), so tests substitute a scripted transport and never touch the
//! network.

use std::io::Read;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Maximum response body size (64 MiB).
const MAX_RESPONSE_SIZE: u64 = 64 * 1024 * 1024;

/// Characters shown from an error body.
const ERROR_PREVIEW_CHARS: usize = 300;

/// A completed HTTP exchange. Any status, including 4xx/5xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Client errors are never retried.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_retryable(&self) -> bool {
        self.status >= 500 || self.status == 429 || self.status == 408
    }
}

/// The request never produced a response.
#[derive(Debug, Error, Diagnostic)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    #[diagnostic(
        code(geoquery::http::timeout),
        help("The remote service did not answer in time; the request is retried with backoff.")
    )]
    Timeout { url: String },

    #[error("connection to {url} failed: {message}")]
    #[diagnostic(
        code(geoquery::http::connection),
        help("Check network access and the configured base URL.")
    )]
    Connection { url: String, message: String },

    #[error("invalid request URL {url}: {message}")]
    #[diagnostic(code(geoquery::http::invalid_url), help("The base URL must be an absolute http(s) URL."))]
    InvalidUrl { url: String, message: String },

    #[error("failed to read response body from {url}: {message}")]
    #[diagnostic(code(geoquery::http::body), help("The connection was interrupted mid-response."))]
    Body { url: String, message: String },
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidUrl { .. })
    }
}

/// Issues GET requests. Implementations must be shareable across workers.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] over a shared `ureq::Agent`.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("geoquery/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }
}

fn read_body(url: &str, response: ureq::Response) -> Result<String, TransportError> {
    let mut body = String::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_SIZE)
        .read_to_string(&mut body)
        .map_err(|e| TransportError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })?;
    Ok(body)
}

impl Transport for UreqTransport {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        let mut request = self.agent.get(url);
        for (name, value) in params {
            request = request.query(name, value);
        }

        match request.call() {
            Ok(response) => {
                let status = response.status();
                let body = read_body(url, response)?;
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = read_body(url, response).unwrap_or_default();
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Transport(transport)) => {
                let message = describe_transport(&transport, params);
                Err(match transport.kind() {
                    ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
                        TransportError::InvalidUrl {
                            url: url.to_string(),
                            message,
                        }
                    }
                    ureq::ErrorKind::Io if is_timeout(&transport) => TransportError::Timeout {
                        url: url.to_string(),
                    },
                    _ => TransportError::Connection {
                        url: url.to_string(),
                        message,
                    },
                })
            }
        }
    }
}

/// Kind, detail and cause of a transport failure, without the request URL
/// that ureq's `Display` prepends.
fn describe_transport(transport: &ureq::Transport, params: &[(String, String)]) -> String {
    let mut message = transport.kind().to_string();
    if let Some(detail) = transport.message() {
        message.push_str(": ");
        message.push_str(detail);
    }
    if let Some(source) = std::error::Error::source(transport) {
        message.push_str(&format!(": {source}"));
    }
    redact_key(&message, params)
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let io_timeout = std::error::Error::source(transport)
        .and_then(|e| e.downcast_ref::<std::io::Error>())
        .is_some_and(|e| matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock));
    io_timeout || transport.message().is_some_and(|m| m.contains("timed out"))
}

/// Replace any occurrence of the `key` parameter's value in `text`.
pub fn redact_key(text: &str, params: &[(String, String)]) -> String {
    params
        .iter()
        .filter(|(name, value)| name == "key" && !value.is_empty())
        .fold(text.to_string(), |acc, (_, value)| acc.replace(value.as_str(), "<redacted>"))
}

/// Human-readable message from an error response body.
///
/// The service answers errors with either a JSON object carrying
/// `error`/`message`, a JSON array of strings, or plain text/HTML.
pub fn error_message(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let found = match &value {
            serde_json::Value::Object(map) => map
                .get("error")
                .or_else(|| map.get("message"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            serde_json::Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
            serde_json::Value::String(s) => Some(s.clone()),
            _ => None,
        };
        if let Some(message) = found {
            return message;
        }
    }
    let text: String = trimmed.chars().take(ERROR_PREVIEW_CHARS).collect();
    if text.is_empty() {
        "empty response body".to_string()
    } else {
        text
    }
}

/// Render a URL with its query string, for logs. Omits the `key` parameter.
pub fn display_url(url: &str, params: &[(String, String)]) -> String {
    let query: Vec<String> = params
        .iter()
        .filter(|(name, _)| name != "key")
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    if query.is_empty() {
        url.to_string()
    } else {
        format!("{url}?{}", query.join("&"))
    }
}
