//! Workspace synchronization engine
//!
//! - `diff_trees` - Hash-based diff of tracked set against the remote tree
//! - `FetchScheduler` - Bounded-concurrency blob retrieval
//! - `MergeResolver` - Three-way line merge
//! - `CloneEngine` - Builds a workspace from nothing
//! - `PullOrchestrator` - Incremental update with merge of local edits
//! - `WorkspaceManager` - Workspace lifecycle, the caller-facing API

mod clone;
mod context;
mod diff;
mod fetch;
mod manager;
mod merge;
mod pull;

pub use clone::*;
pub use context::*;
pub use diff::*;
pub use fetch::*;
pub use manager::*;
pub use merge::*;
pub use pull::*;
