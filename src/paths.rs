//! XDG-compliant path resolution for geoquery.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(geoquery::paths::no_home),
        help("Set the HOME environment variable or pass an explicit --config path.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(geoquery::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG-compliant directories for geoquery.
#[derive(Debug, Clone)]
pub struct GeoPaths {
    /// `$XDG_CONFIG_HOME/geoquery/`
    pub config_dir: PathBuf,
    /// `$XDG_CACHE_HOME/geoquery/`
    pub cache_dir: PathBuf,
}

impl GeoPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join("geoquery");

        let cache_dir = std::env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".cache"))
            .join("geoquery");

        Ok(Self {
            config_dir,
            cache_dir,
        })
    }

    /// Directories rooted at `root` instead of the XDG locations.
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            cache_dir: root.join("cache"),
        }
    }

    /// Create all base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.config_dir, &self.cache_dir] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Directory holding the durable store.
    pub fn store_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_paths_are_namespaced() {
        // Reads the environment without mutating it (unsafe in edition 2024).
        let paths = GeoPaths::resolve().unwrap();
        assert!(paths.config_dir.ends_with("geoquery"));
        assert!(paths.cache_dir.ends_with("geoquery"));
        assert!(paths.config_file().starts_with(&paths.config_dir));
    }

    #[test]
    fn under_root_creates_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = GeoPaths::under(dir.path());
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.config_dir.is_dir());
        assert!(paths.store_dir().is_dir());
    }
}
