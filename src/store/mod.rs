//! Local persistence
//!
//! - `LocalObjectStore` - Durable store for workspaces and tracked files
//! - `WorkingSetCache` - In-memory mirror handed to the sync engine

mod cache;
mod object_store;

pub use cache::*;
pub use object_store::*;
