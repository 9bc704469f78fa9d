//! Remote repository access
//!
//! - `RemoteTreeClient` - Read-only tree and blob retrieval
//! - `FsRemote` - Client serving a local directory as a remote
//! - `MemoryRemote` - Mutable in-memory remote

mod client;
mod fs;
mod memory;

pub use client::*;
pub use fs::*;
pub use memory::*;
