//! Clone engine - builds a workspace from nothing
//!
//! A failed tree listing aborts the clone and records `clone_error` on the
//! workspace, which is kept so the clone can be retried. A blob that cannot
//! be fetched or parsed is logged and left out; the clone carries on.

use std::collections::HashSet;

use tracing::{error, info, instrument, warn};

use super::{FetchOutcome, FetchRequest, SyncContext};
use crate::error::{Result, SyncError};
use crate::remote::RepoAccess;
use crate::workspace::{parse_content, FileId, FileKey, TrackedFile, Workspace, WorkspaceKey};

/// Populates a workspace and all of its tracked files
pub struct CloneEngine<'a> {
    ctx: &'a SyncContext,
}

impl<'a> CloneEngine<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Clone `key.branch` of `access.repository` into the local store
    #[instrument(skip(self, access), fields(workspace = %key))]
    pub async fn run(&self, key: &WorkspaceKey, access: &RepoAccess) -> Result<Workspace> {
        let store = self.ctx.store.as_ref();

        let mut workspace = match store.get_workspace(key).await? {
            Some(mut existing) => {
                existing.cloning = true;
                existing.clone_error = None;
                existing
            }
            None => Workspace::begin_clone(key.clone()),
        };
        store.put_workspace(&workspace).await?;

        let tree = match self
            .ctx
            .remote
            .get_tree(access, &key.branch, true)
            .await
        {
            Ok(tree) => tree,
            Err(e) => {
                error!("Tree fetch failed for {}: {}", key, e);
                workspace.fail_clone(e.to_string());
                store.put_workspace(&workspace).await?;
                return Err(SyncError::CloneFailed {
                    key: key.clone(),
                    message: e.to_string(),
                }
                .into());
            }
        };

        let requests: Vec<FetchRequest> = tree
            .tracked_entries(&self.ctx.policy)
            .into_iter()
            .map(|entry| FetchRequest {
                path: entry.path,
                hash: entry.content_hash,
                kind: entry.kind,
            })
            .collect();
        info!(
            "Cloning {} tracked object(s) at commit {}",
            requests.len(),
            tree.commit_id
        );

        let outcomes = self
            .ctx
            .fetcher
            .fetch_all(self.ctx.remote.as_ref(), access, requests)
            .await?;

        let mut cloned = HashSet::new();
        let mut files = Vec::new();
        for outcome in outcomes {
            let blob = match outcome {
                FetchOutcome::Fetched(blob) => blob,
                FetchOutcome::Failed { request, error } => {
                    warn!("Skipping {}: {}", request.path, error);
                    continue;
                }
            };

            let data = match parse_content(blob.kind, &blob.path, &blob.content) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Skipping {}: {}", blob.path, e);
                    continue;
                }
            };

            let file_id = FileId::new(blob.kind, blob.path);
            cloned.insert(file_id.clone());
            files.push(TrackedFile::from_remote(
                FileKey::new(key.clone(), file_id),
                data,
                blob.hash,
            ));
        }

        store.put_many(&files).await?;
        for file in &files {
            self.ctx.cache.set(file).await;
        }

        // Files left over from an earlier clone that this one did not produce
        let stale: Vec<FileKey> = store
            .all_for_workspace(key)
            .await?
            .into_iter()
            .map(|f| f.key)
            .filter(|k| !cloned.contains(&k.file))
            .collect();
        store.delete_many(&stale).await?;
        for stale_key in &stale {
            self.ctx.cache.delete(stale_key).await;
        }

        let mut ids: Vec<FileId> = cloned.into_iter().collect();
        ids.sort();
        workspace.finish_sync(ids);
        store.put_workspace(&workspace).await?;

        self.ctx.cache.reconcile(store, key).await?;
        info!(
            "Cloned {} with {} file(s)",
            key,
            workspace.tracked_file_ids.len()
        );
        Ok(workspace)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::Error;
    use crate::remote::{Credentials, MemoryRemote};
    use crate::store::{LocalObjectStore, MemoryStore, WorkingSetCache};
    use crate::workspace::{FileData, ObjectKind};
    use serde_json::json;

    fn setup(remote: &MemoryRemote) -> (SyncContext, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ctx = SyncContext::new(
            Arc::new(remote.clone()),
            store.clone(),
            WorkingSetCache::new(),
        );
        (ctx, store)
    }

    fn access() -> RepoAccess {
        RepoAccess::new("acme/flows", Credentials::anonymous())
    }

    fn key() -> WorkspaceKey {
        WorkspaceKey::new("acme/flows", "main")
    }

    #[tokio::test]
    async fn test_clone_populates_store_and_cache() {
        let remote = MemoryRemote::new();
        remote.set_file("graphs/checkout.json", r#"{"nodes": ["a"]}"#);
        remote.set_file("parameters/rate.yaml", "id: rate\nvalue: 0.3\n");
        remote.set_file("README.md", "# not tracked\n");
        let (ctx, store) = setup(&remote);

        let ws = CloneEngine::new(&ctx).run(&key(), &access()).await.unwrap();

        assert!(ws.is_ready());
        assert_eq!(ws.tracked_file_ids.len(), 2);
        assert_eq!(remote.tree_calls(), 1);

        let files = store.all_for_workspace(&key()).await.unwrap();
        assert_eq!(files.len(), 2);
        for file in &files {
            assert!(!file.dirty);
            assert_eq!(file.data, file.original_data);
            assert_eq!(ctx.cache.get(&file.key).await.as_ref(), Some(file));
        }

        let rate = files
            .iter()
            .find(|f| f.kind() == ObjectKind::Parameter)
            .unwrap();
        assert_eq!(
            rate.data,
            FileData::Structured(json!({"id": "rate", "value": 0.3}))
        );
    }

    #[tokio::test]
    async fn test_clone_skips_unparseable_and_unfetchable_blobs() {
        let remote = MemoryRemote::new();
        remote.set_file("graphs/good.json", "{}");
        remote.set_file("graphs/broken.json", "{ nope");
        let failing = remote.set_file("nodes/gone.yaml", "id: gone\n");
        remote.fail_blob(failing);
        let (ctx, _store) = setup(&remote);

        let ws = CloneEngine::new(&ctx).run(&key(), &access()).await.unwrap();
        assert_eq!(
            ws.tracked_file_ids,
            vec![FileId::new(ObjectKind::Graph, "graphs/good.json")]
        );
    }

    #[tokio::test]
    async fn test_tree_failure_records_clone_error() {
        let remote = MemoryRemote::new();
        remote.set_file("graphs/a.json", "{}");
        remote.set_tree_failure(true);
        let (ctx, store) = setup(&remote);

        let err = CloneEngine::new(&ctx).run(&key(), &access()).await.unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::CloneFailed { .. })));

        let ws = store.get_workspace(&key()).await.unwrap().unwrap();
        assert!(!ws.cloning);
        assert!(ws.clone_error.as_deref().unwrap().contains("503"));
        assert_eq!(remote.blob_calls(), 0);

        // Retry reuses the same record
        remote.set_tree_failure(false);
        let ws = CloneEngine::new(&ctx).run(&key(), &access()).await.unwrap();
        assert!(ws.clone_error.is_none());
        assert_eq!(ws.tracked_file_ids.len(), 1);
    }
}
