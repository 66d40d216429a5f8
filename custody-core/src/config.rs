//! Configuration module for repository selection and subsystem settings
//!
//! This module provides configuration structures for selecting the snapshot
//! repository backend and for tuning the snapshot pipeline, the component
//! annotator and the discoverer. Configuration is loaded from JSON; every
//! field has a default so a partial file is enough.

use crate::{CustodyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Kind name of the Zalando postgres operator custom resource
pub const POSTGRES_KIND: &str = "postgresqls.acid.zalan.do";

/// Entity type that postgres custom resources are snapshotted as
pub const POSTGRES_ENTITY_TYPE: &str = "psql";

/// Enumeration of supported repository backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryBackend {
    /// Local filesystem repository
    Local,
    /// Process-local in-memory repository
    Memory,
}

/// Configuration structure for repository backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// The repository backend to use
    pub backend: RepositoryBackend,
    /// Base path for the local repository (optional, defaults to `./snapshots`)
    #[serde(default)]
    pub local_base_path: Option<PathBuf>,
}

impl RepositoryConfig {
    /// Create a default configuration for the local filesystem repository
    pub fn default_local() -> Self {
        RepositoryConfig {
            backend: RepositoryBackend::Local,
            local_base_path: None,
        }
    }

    /// Create a local repository configuration rooted at `path`
    pub fn local_at<P: Into<PathBuf>>(path: P) -> Self {
        RepositoryConfig {
            backend: RepositoryBackend::Local,
            local_base_path: Some(path.into()),
        }
    }

    /// Create an in-memory repository configuration
    pub fn memory() -> Self {
        RepositoryConfig {
            backend: RepositoryBackend::Memory,
            local_base_path: None,
        }
    }

    /// Parse a repository URI and create the matching configuration
    ///
    /// Supports formats:
    /// - `memory://` for the in-memory repository
    /// - `file:///abs/path` or `file://relative/path` for local storage
    /// - `/local/path` or `./relative/path` for local storage
    pub fn from_uri(uri: &str) -> Result<RepositoryConfig> {
        if let Some(rest) = uri.strip_prefix("memory://") {
            if !rest.is_empty() {
                return Err(CustodyError::validation(
                    "Invalid memory URI: unexpected path component",
                ));
            }
            return Ok(Self::memory());
        }

        let path = uri.strip_prefix("file://").unwrap_or(uri);
        if path.is_empty() {
            return Err(CustodyError::validation(
                "Invalid repository URI: missing path",
            ));
        }
        Ok(Self::local_at(path))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            RepositoryBackend::Local => {
                if let Some(path) = &self.local_base_path {
                    if path.as_os_str().is_empty() {
                        return Err(CustodyError::validation(
                            "Local repository requires a non-empty base path",
                        ));
                    }
                }
            }
            RepositoryBackend::Memory => {
                if self.local_base_path.is_some() {
                    return Err(CustodyError::validation(
                        "Memory repository does not take a base path",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::default_local()
    }
}

fn default_component_kinds() -> BTreeMap<String, String> {
    BTreeMap::from([(POSTGRES_KIND.to_string(), POSTGRES_ENTITY_TYPE.to_string())])
}

fn default_pipe_capacity() -> usize {
    crate::pipe::DEFAULT_CAPACITY
}

fn default_compression_level() -> u32 {
    6
}

/// Top-level configuration of the protected-entity subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustodyConfig {
    /// Where snapshots are stored
    #[serde(default)]
    pub repository: RepositoryConfig,
    /// Base URL used for transport descriptors returned by `info()`
    #[serde(default)]
    pub s3_url_base: Option<String>,
    /// Kind name to entity type table used by the component annotator
    #[serde(default = "default_component_kinds")]
    pub component_kinds: BTreeMap<String, String>,
    /// Parent directory for discovery workspaces (system temp dir if unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// Bound of the snapshot conduit, in chunks
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,
    /// Gzip level of snapshot archives (0-9)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

impl CustodyConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            CustodyError::validation(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let config: CustodyConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.repository.validate()?;

        if self.pipe_capacity == 0 {
            return Err(CustodyError::validation("pipe_capacity must be at least 1"));
        }
        if self.compression_level > 9 {
            return Err(CustodyError::validation(format!(
                "compression_level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        for (kind, entity_type) in &self.component_kinds {
            if kind.is_empty() || entity_type.is_empty() || entity_type.contains(':') {
                return Err(CustodyError::validation(format!(
                    "Invalid component kind mapping {kind:?} -> {entity_type:?}"
                )));
            }
        }
        if let Some(base) = &self.s3_url_base {
            if base.is_empty() {
                return Err(CustodyError::validation("s3_url_base must not be empty"));
            }
        }
        Ok(())
    }
}

impl Default for CustodyConfig {
    fn default() -> Self {
        CustodyConfig {
            repository: RepositoryConfig::default(),
            s3_url_base: None,
            component_kinds: default_component_kinds(),
            scratch_dir: None,
            pipe_capacity: default_pipe_capacity(),
            compression_level: default_compression_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_local_config() {
        let config = RepositoryConfig::default_local();
        assert_eq!(config.backend, RepositoryBackend::Local);
        assert!(config.local_base_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_uri_memory() {
        let config = RepositoryConfig::from_uri("memory://").unwrap();
        assert_eq!(config.backend, RepositoryBackend::Memory);
        assert!(RepositoryConfig::from_uri("memory://somewhere").is_err());
    }

    #[test]
    fn test_from_uri_local() {
        let config = RepositoryConfig::from_uri("file:///var/lib/custody").unwrap();
        assert_eq!(config.backend, RepositoryBackend::Local);
        assert_eq!(config.local_base_path, Some(PathBuf::from("/var/lib/custody")));

        let config = RepositoryConfig::from_uri("./snaps").unwrap();
        assert_eq!(config.local_base_path, Some(PathBuf::from("./snaps")));
    }

    #[test]
    fn test_from_uri_invalid() {
        let result = RepositoryConfig::from_uri("file://");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("missing path"));
    }

    #[test]
    fn test_default_custody_config() {
        let config = CustodyConfig::default();
        assert_eq!(
            config.component_kinds.get(POSTGRES_KIND).map(String::as_str),
            Some(POSTGRES_ENTITY_TYPE)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CustodyConfig =
            serde_json::from_str(r#"{"repository": {"backend": "memory"}}"#).unwrap();
        assert_eq!(config.repository, RepositoryConfig::memory());
        assert_eq!(config.pipe_capacity, crate::pipe::DEFAULT_CAPACITY);
        assert_eq!(config.compression_level, 6);
        assert_eq!(config.component_kinds.len(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CustodyConfig::default();
        config.pipe_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = CustodyConfig::default();
        config.compression_level = 12;
        assert!(config.validate().is_err());

        let mut config = CustodyConfig::default();
        config
            .component_kinds
            .insert("widgets".to_string(), "bad:type".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.json");
        std::fs::write(
            &path,
            r#"{"repository": {"backend": "local", "local_base_path": "/tmp/snaps"},
                "s3_url_base": "https://s3.example.com/bucket/",
                "pipe_capacity": 4}"#,
        )
        .unwrap();

        let config = CustodyConfig::from_file(&path).unwrap();
        assert_eq!(config.pipe_capacity, 4);
        assert_eq!(
            config.s3_url_base.as_deref(),
            Some("https://s3.example.com/bucket/")
        );
        assert!(CustodyConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
