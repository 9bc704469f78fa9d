//! flow-sync - Workspace synchronization and merge engine
//!
//! Keeps a local working copy of a remote repository's tracked objects in
//! step with the remote, preserving local edits through three-way merges.
//!
//! # Architecture
//!
//! A caller asks the [`WorkspaceManager`] for a clone (first use) or a pull
//! (subsequent use). The pull orchestrator diffs content hashes to avoid
//! transferring unchanged objects, fetches what changed through a bounded
//! scheduler, and merges any object edited on both sides.
//!
//! # Modules
//!
//! - [`workspace`] - Workspaces, tracked files and the tracking policy
//! - [`remote`] - Remote tree client interface and implementations
//! - [`store`] - Local object store and working-set cache
//! - [`sync`] - Diff, fetch, merge, clone and pull
//! - [`config`] - Layered configuration
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod remote;
pub mod store;
pub mod sync;
pub mod workspace;

pub use config::Config;
pub use error::{Error, Result};
pub use remote::{Credentials, FsRemote, MemoryRemote, RemoteTreeClient, RepoAccess};
pub use store::{JsonFileStore, LocalObjectStore, MemoryStore, WorkingSetCache};
pub use sync::{ConflictStyle, MergeResolver, SyncContext, WorkspaceManager, merge3};
pub use workspace::{
    FileData, FileId, FileKey, MergeConflict, ObjectKind, PullResult, TrackedFile, Workspace,
    WorkspaceKey,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
