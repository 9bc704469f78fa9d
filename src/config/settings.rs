//! User configuration settings
//!
//! Layered configuration: defaults → config file → environment variables

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};
use crate::sync::{ConflictStyle, DEFAULT_FETCH_CONCURRENCY, FetchScheduler, MergeResolver};
use crate::workspace::TrackingPolicy;

/// Prefix of environment overrides, e.g. `FLOWSYNC_FETCH_CONCURRENCY=8`
pub const ENV_PREFIX: &str = "FLOWSYNC_";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum blob requests outstanding at once
    pub fetch_concurrency: usize,

    /// Per-request timeout for blob retrieval in milliseconds
    pub fetch_timeout_ms: u64,

    /// Path of the JSON object store (defaults to the data directory)
    pub store_path: Option<PathBuf>,

    /// Directory served by the filesystem remote
    pub remote_root: Option<PathBuf>,

    /// Conflict marker layout for unresolved merges
    pub conflict_style: ConflictStyle,

    /// Delete and reclone a workspace when a pull cannot list the remote tree
    pub reclone_on_tree_failure: bool,

    /// Enable debug logging
    pub debug: bool,

    /// Log file path (if set, logs to file instead of stderr)
    pub log_file: Option<PathBuf>,

    /// Which remote paths are tracked
    pub tracking: TrackingPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            fetch_timeout_ms: 30_000,
            store_path: None,
            remote_root: None,
            conflict_style: ConflictStyle::default(),
            reclone_on_tree_failure: true,
            debug: false,
            log_file: None,
            tracking: TrackingPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Load configuration layering `path` over the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            // FLOWSYNC_FETCH_CONCURRENCY, FLOWSYNC_STORE_PATH, ...
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the sync engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.fetch_concurrency == 0 {
            return Err(invalid("fetch_concurrency", "must be at least 1"));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(invalid("fetch_timeout_ms", "must be greater than 0"));
        }
        if self.tracking.is_empty() {
            return Err(invalid("tracking", "at least one tracking rule is required"));
        }
        if let Some(rule) = self.tracking.rules.iter().find(|r| r.extensions.is_empty()) {
            return Err(invalid(
                "tracking",
                &format!("rule for {} lists no extensions", rule.kind),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Fetch scheduler sized from this configuration
    pub fn fetch_scheduler(&self) -> FetchScheduler {
        FetchScheduler::with_max_concurrent(self.fetch_concurrency).with_timeout(self.fetch_timeout())
    }

    pub fn resolver(&self) -> MergeResolver {
        MergeResolver::new(self.conflict_style)
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Get the object store path
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.store_path {
            Ok(path.clone())
        } else {
            Ok(Self::data_dir()?.join("store.json"))
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        let dirs = Self::project_dirs()?;

        std::fs::create_dir_all(dirs.config_dir()).map_err(|_e| {
            Error::Config(ConfigError::DirectoryCreationFailed(
                dirs.config_dir().to_path_buf(),
            ))
        })?;

        let store_path = self.store_path()?;
        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent).map_err(|_| {
                Error::Config(ConfigError::DirectoryCreationFailed(parent.to_path_buf()))
            })?;
        }

        Ok(())
    }

    /// Save current configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Save current configuration as TOML to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_e| {
                Error::Config(ConfigError::DirectoryCreationFailed(parent.to_path_buf()))
            })?;
        }

        let toml =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "flow-sync", "flow-sync").ok_or_else(|| {
            Error::Config(ConfigError::LoadFailed(
                "Could not determine home directory".to_string(),
            ))
        })
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::Config(ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    })
}
