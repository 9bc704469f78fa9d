//! In-memory remote
//!
//! A mutable remote tree held in memory, with request counters and failure
//! switches. Used for embedding and for exercising sync flows in tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{content_hash, RemoteTree, RemoteTreeClient, RepoAccess, TreeItem};
use crate::error::RemoteError;

#[derive(Debug, Default)]
struct MemoryRemoteState {
    /// path -> content
    files: BTreeMap<String, Vec<u8>>,
    /// hashes whose retrieval should fail
    failing_blobs: HashSet<String>,
}

/// Remote tree held in memory; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryRemoteState>>,
    fail_tree: Arc<AtomicBool>,
    tree_calls: Arc<AtomicUsize>,
    blob_calls: Arc<AtomicUsize>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryRemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create or replace a file; returns its content hash
    pub fn set_file(&self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> String {
        let content = content.into();
        let hash = content_hash(&content);
        self.state().files.insert(path.into(), content);
        hash
    }

    pub fn remove_file(&self, path: &str) {
        self.state().files.remove(path);
    }

    /// Hash of the file currently at `path`
    pub fn hash_of(&self, path: &str) -> Option<String> {
        self.state().files.get(path).map(|c| content_hash(c))
    }

    /// Make every tree listing fail until reset
    pub fn set_tree_failure(&self, fail: bool) {
        self.fail_tree.store(fail, Ordering::SeqCst);
    }

    /// Make retrieval of one blob fail
    pub fn fail_blob(&self, hash: impl Into<String>) {
        self.state().failing_blobs.insert(hash.into());
    }

    pub fn tree_calls(&self) -> usize {
        self.tree_calls.load(Ordering::SeqCst)
    }

    pub fn blob_calls(&self) -> usize {
        self.blob_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTreeClient for MemoryRemote {
    async fn get_tree(
        &self,
        _access: &RepoAccess,
        branch: &str,
        _recursive: bool,
    ) -> Result<RemoteTree, RemoteError> {
        self.tree_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_tree.load(Ordering::SeqCst) {
            return Err(RemoteError::TreeFetch {
                branch: branch.to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }

        let items: Vec<TreeItem> = self
            .state()
            .files
            .iter()
            .map(|(path, content)| TreeItem::blob(path.clone(), content_hash(content)))
            .collect();
        let listing: String = items
            .iter()
            .map(|i| format!("{} {}\n", i.path, i.content_hash))
            .collect();

        Ok(RemoteTree {
            items,
            commit_id: content_hash(listing.as_bytes()),
        })
    }

    async fn get_blob(&self, _access: &RepoAccess, hash: &str) -> Result<Vec<u8>, RemoteError> {
        self.blob_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.failing_blobs.contains(hash) {
            return Err(RemoteError::BlobFetch {
                hash: hash.to_string(),
                message: "500 Internal Server Error".to_string(),
            });
        }
        state
            .files
            .values()
            .find(|content| content_hash(content) == hash)
            .cloned()
            .ok_or_else(|| RemoteError::BlobFetch {
                hash: hash.to_string(),
                message: "404 Not Found".to_string(),
            })
    }
}
