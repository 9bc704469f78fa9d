//! Workspace data model
//!
//! Provides the synchronized data model:
//! - `Workspace` - Sync metadata for a `(repository, branch)` pair
//! - `TrackedFile` - Local copy of one remote object
//! - `TrackingPolicy` - Which remote paths are tracked, and how they are decoded

mod tracking;
mod types;

pub use tracking::*;
pub use types::*;
