//! Working-set cache
//!
//! In-memory mirror of tracked files used by the active session. It is passed
//! by handle to the sync engine and is never the source of truth: an entry,
//! if present, must match the persisted file after every successful sync.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::LocalObjectStore;
use crate::error::StoreError;
use crate::workspace::{FileKey, TrackedFile, WorkspaceKey};

/// Best-effort in-memory mirror of persisted tracked files
#[derive(Debug, Clone, Default)]
pub struct WorkingSetCache {
    entries: Arc<RwLock<HashMap<FileKey, TrackedFile>>>,
}

impl WorkingSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, file: &TrackedFile) {
        let mut entries = self.entries.write().await;
        entries.insert(file.key.clone(), file.clone());
    }

    pub async fn delete(&self, key: &FileKey) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }

    pub async fn get(&self, key: &FileKey) -> Option<TrackedFile> {
        let entries = self.entries.read().await;
        entries.get(key).cloned()
    }

    /// Drop every entry belonging to a workspace
    pub async fn clear_workspace(&self, key: &WorkspaceKey) {
        let mut entries = self.entries.write().await;
        entries.retain(|k, _| &k.workspace != key);
    }

    /// Keys currently cached for a workspace
    pub async fn keys_for(&self, key: &WorkspaceKey) -> Vec<FileKey> {
        let entries = self.entries.read().await;
        entries
            .keys()
            .filter(|k| &k.workspace == key)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Check every cached entry of a workspace against persistent storage
    ///
    /// Entries that differ are replaced with the persisted file; entries with
    /// no persisted counterpart are evicted. Returns the number of repairs.
    #[instrument(skip(self, store))]
    pub async fn reconcile(
        &self,
        store: &dyn LocalObjectStore,
        workspace: &WorkspaceKey,
    ) -> Result<usize, StoreError> {
        let mut repaired = 0;

        for key in self.keys_for(workspace).await {
            let persisted = store.get(&key).await?;
            let mut entries = self.entries.write().await;

            let matches = entries
                .get(&key)
                .map(|cached| persisted.as_ref() == Some(cached));

            match (matches, persisted) {
                (Some(true), _) => {}
                (Some(false), Some(persisted)) => {
                    warn!("Cache entry for {} diverged from store, repairing", key);
                    entries.insert(key, persisted);
                    repaired += 1;
                }
                (Some(false), None) => {
                    warn!("Cache entry for {} has no persisted file, evicting", key);
                    entries.remove(&key);
                    repaired += 1;
                }
                // Evicted concurrently
                (None, _) => {}
            }
        }

        debug!("Cache reconciled for {}, {} repair(s)", workspace, repaired);
        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::workspace::{FileData, FileId, ObjectKind};
    use serde_json::json;

    fn file(path: &str, value: i64) -> TrackedFile {
        TrackedFile::from_remote(
            FileKey::new(
                WorkspaceKey::new("acme/flows", "main"),
                FileId::new(ObjectKind::Node, path),
            ),
            FileData::Structured(json!({"value": value})),
            "h1",
        )
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = WorkingSetCache::new();
        let f = file("nodes/a.yaml", 1);
        cache.set(&f).await;
        assert_eq!(cache.get(&f.key).await, Some(f.clone()));

        cache.delete(&f.key).await;
        assert!(cache.get(&f.key).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let cache = WorkingSetCache::new();
        let handle = cache.clone();
        handle.set(&file("nodes/a.yaml", 1)).await;
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_reconcile_repairs_and_evicts() {
        let store = MemoryStore::new();
        let cache = WorkingSetCache::new();

        let in_sync = file("nodes/a.yaml", 1);
        store.put(&in_sync).await.unwrap();
        cache.set(&in_sync).await;

        let persisted = file("nodes/b.yaml", 2);
        store.put(&persisted).await.unwrap();
        let mut stale = persisted.clone();
        stale.apply_local_edit(FileData::Structured(json!({"value": 99})));
        cache.set(&stale).await;

        let orphan = file("nodes/c.yaml", 3);
        cache.set(&orphan).await;

        let repaired = cache
            .reconcile(&store, &WorkspaceKey::new("acme/flows", "main"))
            .await
            .unwrap();

        assert_eq!(repaired, 2);
        assert_eq!(cache.get(&persisted.key).await, Some(persisted));
        assert!(cache.get(&orphan.key).await.is_none());
        assert_eq!(cache.get(&in_sync.key).await, Some(in_sync));
    }
}
