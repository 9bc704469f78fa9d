//! Error types for flow-sync
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.
//! Merge conflicts are deliberately absent: they are reported through
//! [`PullResult`](crate::workspace::PullResult), never raised.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::workspace::{FileKey, WorkspaceKey};

/// Top-level error type for flow-sync
#[derive(Error, Debug)]
pub enum Error {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote repository retrieval failures (tree or blob)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Failed to fetch tree for branch '{branch}': {message}")]
    TreeFetch { branch: String, message: String },

    #[error("Failed to fetch blob {hash}: {message}")]
    BlobFetch { hash: String, message: String },

    #[error("Remote request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Credentials rejected for repository '{0}'")]
    Unauthorized(String),

    #[error("Repository or branch not found: {0}")]
    NotFound(String),
}

/// Blob content that does not match the format expected for its kind
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("Content of {0} is not valid UTF-8")]
    Utf8(String),

    #[error("Failed to serialize {path}: {message}")]
    Serialize { path: String, message: String },

    #[error("Path is not covered by any tracking rule: {0}")]
    UnsupportedPath(String),
}

/// Local persistence failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize store: {0}")]
    Serialize(String),

    #[error("Store file is corrupt: {0}")]
    Corrupt(String),
}

/// Synchronization protocol errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(WorkspaceKey),

    #[error("Tracked file not found: {0}")]
    FileNotFound(FileKey),

    #[error("A sync is already running for workspace {0}")]
    ConcurrentSync(WorkspaceKey),

    #[error("Workspace {key} is corrupt: {reason}")]
    CorruptWorkspace { key: WorkspaceKey, reason: String },

    #[error("Clone of {key} failed: {message}")]
    CloneFailed { key: WorkspaceKey, message: String },

    #[error("Workspace {key} has {count} file(s) with uncommitted local edits")]
    LocalEditsPresent { key: WorkspaceKey, count: usize },

    #[error("Cannot resolve conflict on {path}: {reason}")]
    InvalidResolution { path: String, reason: String },

    #[error("Fetch scheduler was shut down")]
    SemaphoreClosed,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to create config directory: {0}")]
    DirectoryCreationFailed(PathBuf),
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn store_io(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let key = WorkspaceKey::new("acme/flows", "main");
        let err = SyncError::ConcurrentSync(key.clone());
        assert!(err.to_string().contains("acme/flows@main"));

        let err = RemoteError::TreeFetch {
            branch: "main".to_string(),
            message: "503 Service Unavailable".to_string(),
        };
        assert!(err.to_string().contains("503"));

        let err = StoreError::Corrupt("truncated".to_string());
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_error_conversion() {
        let remote_err = RemoteError::Timeout(Duration::from_secs(1));
        let top: Error = remote_err.into();
        assert!(matches!(top, Error::Remote(_)));

        let sync_err = SyncError::WorkspaceNotFound(WorkspaceKey::new("r", "b"));
        let top: Error = sync_err.into();
        assert!(matches!(top, Error::Sync(_)));
    }
}
