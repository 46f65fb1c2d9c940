//! Pool configuration.
//!
//! Options resolve in layers, later wins: built-in defaults, an optional
//! TOML file, then flags and environment variables applied by the binary.
//! All values are validated once, up front, through [`Options::validate`].

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Object key of the shared cache archive.
pub const DEFAULT_ARCHIVE_KEY: &str = "fetch-cache.tar";

/// Seconds between cache synchronizations.
pub const DEFAULT_SYNC_INTERVAL_SECONDS: u64 = 900;

/// Errors for configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("sync_interval_seconds must be in (0, 86400], got {value}")]
    SyncIntervalOutOfBounds { value: u64 },

    #[error("store key must not be empty")]
    EmptyKey,

    #[error("store bucket must not be empty")]
    EmptyBucket,
}

/// Archive store coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Bucket holding the cache archive.
    pub bucket: String,
    /// Object key of the cache archive.
    pub key: String,
    /// Store endpoint. The bundled local mode treats this as a directory
    /// root; remote transports interpret it as a URL.
    pub endpoint: String,
    /// Store region, where the transport needs one.
    pub region: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            bucket: "fetch-cache".to_string(),
            key: DEFAULT_ARCHIVE_KEY.to_string(),
            endpoint: std::env::temp_dir()
                .join("hivecache-store")
                .display()
                .to_string(),
            region: "local".to_string(),
        }
    }
}

/// Resolved pool options.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Maximum number of workers; 0 means "use every CPU".
    pub max_workers: usize,
    /// Seconds between cache synchronizations.
    pub sync_interval_seconds: u64,
    /// Root directory for replicas and the local archive. Defaults to a
    /// per-process directory under the system temp directory.
    pub work_root: Option<PathBuf>,
    /// Pre-seeded backup archive, used only when the store holds no archive.
    pub backup_archive: Option<PathBuf>,
    /// Archive store coordinates.
    pub store: StoreOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_workers: 0,
            sync_interval_seconds: DEFAULT_SYNC_INTERVAL_SECONDS,
            work_root: None,
            backup_archive: None,
            store: StoreOptions::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    pool: PoolSection,
    #[serde(default)]
    store: StoreSection,
    #[serde(default)]
    cache: CacheSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolSection {
    max_workers: Option<usize>,
    sync_interval_seconds: Option<u64>,
    work_root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreSection {
    bucket: Option<String>,
    key: Option<String>,
    endpoint: Option<String>,
    region: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheSection {
    backup_archive: Option<PathBuf>,
}

impl Options {
    /// Defaults, overlaid with the TOML file at `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut options = Self::default();
        if let Some(path) = path {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let file: FileConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            options.apply_file(file);
        }
        Ok(options)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(value) = file.pool.max_workers {
            self.max_workers = value;
        }
        if let Some(value) = file.pool.sync_interval_seconds {
            self.sync_interval_seconds = value;
        }
        if let Some(value) = file.pool.work_root {
            self.work_root = Some(value);
        }
        if let Some(value) = file.store.bucket {
            self.store.bucket = value;
        }
        if let Some(value) = file.store.key {
            self.store.key = value;
        }
        if let Some(value) = file.store.endpoint {
            self.store.endpoint = value;
        }
        if let Some(value) = file.store.region {
            self.store.region = value;
        }
        if let Some(value) = file.cache.backup_archive {
            self.backup_archive = Some(value);
        }
    }

    /// Validate bounds. Called once by the binary after all layers applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval_seconds == 0 || self.sync_interval_seconds > 86400 {
            return Err(ConfigError::SyncIntervalOutOfBounds {
                value: self.sync_interval_seconds,
            });
        }
        if self.store.key.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        if self.store.bucket.is_empty() {
            return Err(ConfigError::EmptyBucket);
        }
        Ok(())
    }

    /// Work root for replicas and the local archive.
    pub fn resolve_work_root(&self) -> PathBuf {
        self.work_root.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("hivecache-{}", std::process::id()))
        })
    }
}
