//! Engine configuration, persisted as TOML.
//!
//! Every field has a serde default so a partial file (or none at all) yields
//! a working configuration. The API key may also come from the
//! `CENSUS_API_KEY` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CachePolicy;
use crate::fetch::RetryPolicy;
use crate::geo::ResolverConfig;
use crate::query::Dataset;

/// Environment variable consulted when no key is configured.
pub const API_KEY_ENV: &str = "CENSUS_API_KEY";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(geoquery::config::read),
        help("Ensure the config file exists, or run `geoquery config init` to create one.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(geoquery::config::parse),
        help("Check the TOML syntax and field names in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(geoquery::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config value: {message}")]
    #[diagnostic(
        code(geoquery::config::invalid),
        help("Fix the named field; `geoquery config show` prints the effective values.")
    )]
    Invalid { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn default_base_url() -> String {
    "https://api.census.gov/data".into()
}
fn default_reference_dataset() -> String {
    "acs/acs5".into()
}
fn default_reference_year() -> u16 {
    2022
}
fn default_ttl_days() -> u64 {
    30
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    4
}
fn default_base_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    8_000
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// Network and worker-pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Configuration for the geoquery engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Directory for the durable store; `None` keeps everything in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Dataset used to enumerate geography names.
    #[serde(default = "default_reference_dataset")]
    pub reference_dataset: String,
    #[serde(default = "default_reference_year")]
    pub reference_year: u16,
    #[serde(default = "default_ttl_days")]
    pub catalog_ttl_days: u64,
    #[serde(default = "default_ttl_days")]
    pub registry_ttl_days: u64,
    #[serde(default)]
    pub cache: CachePolicy,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            data_dir: None,
            reference_dataset: default_reference_dataset(),
            reference_year: default_reference_year(),
            catalog_ttl_days: default_ttl_days(),
            registry_ttl_days: default_ttl_days(),
            cache: CachePolicy::default(),
            fetch: FetchConfig::default(),
            resolver: ResolverConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load from `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Fill `api_key` from the environment when unset.
    pub fn with_env(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty());
        }
        self
    }

    pub fn reference_dataset(&self) -> ConfigResult<Dataset> {
        Dataset::new(&self.reference_dataset).map_err(|e| ConfigError::Invalid {
            message: format!("reference_dataset: {e}"),
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };
        if self.base_url.trim().is_empty() {
            return invalid("base_url must not be empty");
        }
        if self.fetch.max_concurrency == 0 {
            return invalid("fetch.max_concurrency must be at least 1");
        }
        if self.fetch.max_attempts == 0 {
            return invalid("fetch.max_attempts must be at least 1");
        }
        if self.fetch.request_timeout_secs == 0 {
            return invalid("fetch.request_timeout_secs must be at least 1");
        }
        if self.fetch.base_backoff_ms > self.fetch.max_backoff_ms {
            return invalid("fetch.base_backoff_ms exceeds fetch.max_backoff_ms");
        }
        if !(self.resolver.min_score > 0.0 && self.resolver.min_score <= 1.0) {
            return invalid("resolver.min_score must be in (0, 1]");
        }
        if !(0.0..1.0).contains(&self.resolver.ambiguity_epsilon) {
            return invalid("resolver.ambiguity_epsilon must be in [0, 1)");
        }
        if self.cache.max_entries == 0 || self.cache.max_bytes == 0 {
            return invalid("cache limits must be non-zero");
        }
        self.reference_dataset()?;
        Ok(())
    }
}
