//! Pull orchestrator - incremental update of an existing workspace
//!
//! One tree listing, a hash diff against the tracked set, bounded blob
//! retrieval for what changed, then per file:
//! - clean (or missing) locally: fast-forward to the remote version
//! - dirty text: three-way merge; a conflict leaves the file untouched
//! - dirty binary: remote wins (last writer wins), reported in `overwritten`
//!
//! A dirty file deleted remotely is kept and reported as a conflict. A failed
//! tree listing mutates nothing; it may trigger a reclone when no local edits
//! are at stake.

use std::collections::HashMap;

use tracing::{debug, error, info, instrument, warn};

use super::{
    CloneEngine, FetchOutcome, FetchRequest, FetchedBlob, SyncContext, contains_conflict_markers,
    diff_trees,
};
use crate::error::{Error, ParseError, Result, SyncError};
use crate::remote::RepoAccess;
use crate::workspace::{
    ConflictReason, FileData, FileId, FileKey, MergeConflict, PullResult, TrackedFile, Workspace,
    WorkspaceKey, parse_content, serialize_content,
};

/// What happened to one fetched object
#[derive(Debug)]
enum Applied {
    Updated(TrackedFile),
    Overwritten(TrackedFile),
    Conflict(MergeConflict),
}

/// Brings an existing workspace up to date
pub struct PullOrchestrator<'a> {
    ctx: &'a SyncContext,
    reclone_on_tree_failure: bool,
}

impl<'a> PullOrchestrator<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self {
            ctx,
            reclone_on_tree_failure: true,
        }
    }

    /// Whether a failed tree listing falls back to delete-then-reclone
    pub fn with_reclone_on_tree_failure(mut self, enabled: bool) -> Self {
        self.reclone_on_tree_failure = enabled;
        self
    }

    /// Pull the latest remote state into `workspace`
    #[instrument(skip(self, workspace, access), fields(workspace = %workspace.key))]
    pub async fn run(&self, mut workspace: Workspace, access: &RepoAccess) -> Result<PullResult> {
        let key = workspace.key.clone();
        let store = self.ctx.store.as_ref();

        let files = store.all_for_workspace(&key).await?;
        if let Err(e) = check_integrity(&workspace, &files) {
            warn!("{}; recloning", e);
            return self.recover_by_reclone(&workspace, &files, access).await;
        }

        let tree = match self.ctx.remote.get_tree(access, &key.branch, true).await {
            Ok(tree) => tree,
            Err(e) => {
                error!("Tree fetch failed for {}: {}", key, e);
                let mut message = e.to_string();
                if self.reclone_on_tree_failure {
                    match self.recover_by_reclone(&workspace, &files, access).await {
                        Ok(result) if result.success => {
                            message.push_str("; workspace was recloned");
                        }
                        Ok(result) => {
                            let reason = result.error.unwrap_or_default();
                            message.push_str(&format!("; reclone did not complete: {reason}"));
                        }
                        Err(reclone_err) => {
                            message.push_str(&format!("; reclone failed: {reclone_err}"));
                        }
                    }
                }
                return Ok(PullResult::failed(message));
            }
        };

        let old_map: HashMap<String, String> = files
            .iter()
            .map(|f| (f.path().to_string(), f.content_hash.clone()))
            .collect();
        let remote_entries = tree.tracked_map(&self.ctx.policy);
        let new_map: HashMap<String, String> = remote_entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.content_hash.clone()))
            .collect();

        let diff = diff_trees(&old_map, &new_map);
        if diff.is_empty() {
            debug!("{} is up to date at {}", key, tree.commit_id);
            workspace.touch();
            store.put_workspace(&workspace).await?;
            return Ok(PullResult::up_to_date());
        }
        info!(
            "{}: {} to fetch, {} to delete",
            key,
            diff.to_fetch.len(),
            diff.to_delete.len()
        );

        let requests = diff
            .to_fetch
            .iter()
            .filter_map(|target| {
                remote_entries.get(&target.path).map(|entry| FetchRequest {
                    path: target.path.clone(),
                    hash: target.hash.clone(),
                    kind: entry.kind,
                })
            })
            .collect();
        let outcomes = self
            .ctx
            .fetcher
            .fetch_all(self.ctx.remote.as_ref(), access, requests)
            .await?;

        let mut by_path: HashMap<String, TrackedFile> = files
            .into_iter()
            .map(|f| (f.path().to_string(), f))
            .collect();
        let mut result = PullResult::up_to_date();
        let mut updated = Vec::new();

        for outcome in outcomes {
            let blob = match outcome {
                FetchOutcome::Fetched(blob) => blob,
                FetchOutcome::Failed { request, error } => {
                    warn!("Skipping {}: {}", request.path, error);
                    result.skipped.push(request.path);
                    continue;
                }
            };

            let path = blob.path.clone();
            match self.apply(&key, by_path.remove(&path), blob) {
                Ok(Applied::Updated(file)) => updated.push(file),
                Ok(Applied::Overwritten(file)) => {
                    updated.push(file);
                    result.overwritten.push(path);
                }
                Ok(Applied::Conflict(conflict)) => result.conflicts.push(conflict),
                Err(Error::Parse(e)) => {
                    warn!("Skipping {}: {}", path, e);
                    result.skipped.push(path);
                }
                Err(e) => return Err(e),
            }
        }

        store.put_many(&updated).await?;
        for file in &updated {
            self.ctx.cache.set(file).await;
        }
        result.files_updated = updated.len();

        let mut removed = Vec::new();
        for path in &diff.to_delete {
            let Some(file) = by_path.get(path) else {
                continue;
            };
            if file.dirty {
                warn!(
                    "{} was deleted remotely but has local edits; keeping it",
                    path
                );
                result.conflicts.push(deleted_remotely(file));
                continue;
            }
            removed.push(file.key.clone());
        }
        store.delete_many(&removed).await?;
        for file_key in &removed {
            self.ctx.cache.delete(file_key).await;
        }
        result.files_deleted = removed.len();

        let mut ids: Vec<FileId> = store
            .all_for_workspace(&key)
            .await?
            .into_iter()
            .map(|f| f.key.file)
            .collect();
        ids.sort();
        workspace.finish_sync(ids);
        store.put_workspace(&workspace).await?;

        self.ctx.cache.reconcile(store, &key).await?;
        info!("Pulled {}: {}", key, result.summary());
        Ok(result)
    }

    /// Apply one fetched blob to its local counterpart, if any
    fn apply(
        &self,
        key: &WorkspaceKey,
        existing: Option<TrackedFile>,
        blob: FetchedBlob,
    ) -> Result<Applied> {
        let remote_data = parse_content(blob.kind, &blob.path, &blob.content)?;

        let mut file = match existing {
            None => {
                return Ok(Applied::Updated(TrackedFile::from_remote(
                    FileKey::new(key.clone(), FileId::new(blob.kind, blob.path)),
                    remote_data,
                    blob.hash,
                )));
            }
            Some(file) => file,
        };

        if !file.dirty {
            file.fast_forward(remote_data, blob.hash);
            return Ok(Applied::Updated(file));
        }

        if file.kind().is_binary() {
            warn!(
                "{} has local edits but binary content cannot be merged; taking remote",
                blob.path
            );
            file.fast_forward(remote_data, blob.hash);
            return Ok(Applied::Overwritten(file));
        }

        let base_text = serialize_content(file.kind(), file.path(), &file.original_data)?;
        let local_text = serialize_content(file.kind(), file.path(), &file.data)?;
        let remote_text = String::from_utf8(blob.content)
            .map_err(|_| ParseError::Utf8(blob.path.clone()))?;

        let outcome = self.ctx.resolver.merge(&base_text, &local_text, &remote_text);
        let reason = if outcome.has_conflicts {
            info!(
                "{}: {} conflict region(s), keeping local edits",
                blob.path, outcome.conflict_count
            );
            ConflictReason::ConcurrentEdit
        } else if contains_conflict_markers(&outcome.merged) {
            warn!("{}: local copy holds unresolved conflict markers", blob.path);
            ConflictReason::InvalidMerge
        } else {
            match parse_content(file.kind(), file.path(), outcome.merged.as_bytes()) {
                Ok(merged) => {
                    debug!("{}: merged local edits cleanly", blob.path);
                    file.fast_forward(merged, blob.hash);
                    return Ok(Applied::Updated(file));
                }
                Err(e) => {
                    warn!("{}: merged text is not valid ({}), keeping local edits", blob.path, e);
                    ConflictReason::InvalidMerge
                }
            }
        };

        Ok(Applied::Conflict(MergeConflict {
            file_id: file.key.file,
            reason,
            local_text,
            remote_text,
            base_text,
            merged_text: outcome.merged,
            has_conflicts: outcome.has_conflicts,
            conflict_count: outcome.conflict_count,
            remote_hash: Some(blob.hash),
        }))
    }

    /// Delete every tracked file and clone again, unless local edits exist
    async fn recover_by_reclone(
        &self,
        workspace: &Workspace,
        files: &[TrackedFile],
        access: &RepoAccess,
    ) -> Result<PullResult> {
        let dirty = files.iter().filter(|f| f.dirty).count();
        if dirty > 0 {
            let err = SyncError::LocalEditsPresent {
                key: workspace.key.clone(),
                count: dirty,
            };
            warn!("Not recloning: {}", err);
            return Ok(PullResult::failed(err.to_string()));
        }

        let keys: Vec<FileKey> = files.iter().map(|f| f.key.clone()).collect();
        self.ctx.store.delete_many(&keys).await?;
        self.ctx.cache.clear_workspace(&workspace.key).await;

        match CloneEngine::new(self.ctx).run(&workspace.key, access).await {
            Ok(cloned) => Ok(PullResult {
                success: true,
                files_updated: cloned.tracked_file_ids.len(),
                ..Default::default()
            }),
            Err(Error::Sync(SyncError::CloneFailed { message, .. })) => {
                Ok(PullResult::failed(message))
            }
            Err(e) => Err(e),
        }
    }
}

/// Detect a workspace record that cannot be reconciled with its files
pub fn check_integrity(workspace: &Workspace, files: &[TrackedFile]) -> std::result::Result<(), SyncError> {
    let reason = if workspace.cloning {
        "an earlier clone was interrupted".to_string()
    } else if files.is_empty() && !workspace.tracked_file_ids.is_empty() {
        format!(
            "{} tracked file(s) recorded but none persisted",
            workspace.tracked_file_ids.len()
        )
    } else {
        return Ok(());
    };

    Err(SyncError::CorruptWorkspace {
        key: workspace.key.clone(),
        reason,
    })
}

/// Pseudo-conflict for a dirty file whose remote counterpart is gone
fn deleted_remotely(file: &TrackedFile) -> MergeConflict {
    let render = |data: &FileData| match data {
        FileData::Binary(bytes) => format!("<{} bytes of binary content>", bytes.len()),
        FileData::Structured(_) => serialize_content(file.kind(), file.path(), data)
            .unwrap_or_else(|e| e.to_string()),
    };
    let local_text = render(&file.data);

    MergeConflict {
        file_id: file.key.file.clone(),
        reason: ConflictReason::DeletedRemotely,
        base_text: render(&file.original_data),
        merged_text: local_text.clone(),
        local_text,
        remote_text: String::new(),
        has_conflicts: true,
        conflict_count: 1,
        remote_hash: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::remote::{Credentials, MemoryRemote};
    use crate::store::{LocalObjectStore, MemoryStore, WorkingSetCache};
    use crate::workspace::ObjectKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        remote: MemoryRemote,
        store: Arc<MemoryStore>,
        ctx: SyncContext,
    }

    impl Fixture {
        fn new() -> Self {
            let remote = MemoryRemote::new();
            let store = Arc::new(MemoryStore::new());
            let ctx = SyncContext::new(
                Arc::new(remote.clone()),
                store.clone(),
                WorkingSetCache::new(),
            );
            Self { remote, store, ctx }
        }

        async fn clone_workspace(&self) -> Workspace {
            CloneEngine::new(&self.ctx).run(&key(), &access()).await.unwrap()
        }

        async fn pull(&self) -> PullResult {
            let ws = self.store.get_workspace(&key()).await.unwrap().unwrap();
            PullOrchestrator::new(&self.ctx)
                .run(ws, &access())
                .await
                .unwrap()
        }

        async fn file(&self, kind: ObjectKind, path: &str) -> Option<TrackedFile> {
            self.store
                .get(&FileKey::new(key(), FileId::new(kind, path)))
                .await
                .unwrap()
        }

        async fn edit(&self, kind: ObjectKind, path: &str, data: FileData) {
            let mut file = self.file(kind, path).await.unwrap();
            file.apply_local_edit(data);
            self.store.put(&file).await.unwrap();
        }
    }

    fn key() -> WorkspaceKey {
        WorkspaceKey::new("acme/flows", "main")
    }

    fn access() -> RepoAccess {
        RepoAccess::new("acme/flows", Credentials::anonymous())
    }

    #[tokio::test]
    async fn test_clean_merge_advances_hash_and_clears_dirty() {
        let fx = Fixture::new();
        fx.remote
            .set_file("parameters/p.yaml", "a: 1\nb: 2\nc: 3\nd: 4\n");
        fx.clone_workspace().await;

        fx.edit(
            ObjectKind::Parameter,
            "parameters/p.yaml",
            FileData::Structured(json!({"a": 10, "b": 2, "c": 3, "d": 4})),
        )
        .await;
        let new_hash = fx
            .remote
            .set_file("parameters/p.yaml", "a: 1\nb: 2\nc: 3\nd: 40\n");

        let result = fx.pull().await;
        assert!(result.success);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.files_updated, 1);

        let file = fx.file(ObjectKind::Parameter, "parameters/p.yaml").await.unwrap();
        assert!(!file.dirty);
        assert_eq!(file.content_hash, new_hash);
        assert_eq!(
            file.data,
            FileData::Structured(json!({"a": 10, "b": 2, "c": 3, "d": 40}))
        );
        assert_eq!(file.data, file.original_data);
    }

    #[tokio::test]
    async fn test_binary_edit_is_overwritten_by_remote() {
        let fx = Fixture::new();
        fx.remote.set_file("nodes/images/logo.png", vec![1u8, 2, 3]);
        fx.clone_workspace().await;

        fx.edit(
            ObjectKind::Image,
            "nodes/images/logo.png",
            FileData::Binary(vec![9, 9, 9]),
        )
        .await;
        fx.remote.set_file("nodes/images/logo.png", vec![4u8, 5, 6]);

        let result = fx.pull().await;
        assert!(result.success);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.overwritten, vec!["nodes/images/logo.png".to_string()]);

        let file = fx.file(ObjectKind::Image, "nodes/images/logo.png").await.unwrap();
        assert_eq!(file.data, FileData::Binary(vec![4, 5, 6]));
        assert!(!file.dirty);
    }

    #[tokio::test]
    async fn test_unparseable_remote_update_is_skipped() {
        let fx = Fixture::new();
        let old_hash = fx.remote.set_file("graphs/g.json", "{}");
        fx.clone_workspace().await;
        fx.remote.set_file("graphs/g.json", "{ broken");

        let result = fx.pull().await;
        assert!(result.success);
        assert_eq!(result.skipped, vec!["graphs/g.json".to_string()]);

        let file = fx.file(ObjectKind::Graph, "graphs/g.json").await.unwrap();
        assert_eq!(file.content_hash, old_hash);
    }

    #[tokio::test]
    async fn test_tree_failure_with_local_edits_does_not_reclone() {
        let fx = Fixture::new();
        fx.remote.set_file("nodes/n.yaml", "id: n\n");
        fx.clone_workspace().await;
        fx.edit(
            ObjectKind::Node,
            "nodes/n.yaml",
            FileData::Structured(json!({"id": "edited"})),
        )
        .await;

        fx.remote.set_tree_failure(true);
        let result = fx.pull().await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("local edits"));

        let file = fx.file(ObjectKind::Node, "nodes/n.yaml").await.unwrap();
        assert!(file.dirty);
        assert_eq!(file.data, FileData::Structured(json!({"id": "edited"})));
    }

    #[tokio::test]
    async fn test_interrupted_clone_is_recovered() {
        let fx = Fixture::new();
        fx.remote.set_file("graphs/g.json", "{}");
        let ws = Workspace::begin_clone(key());
        fx.store.put_workspace(&ws).await.unwrap();

        let result = fx.pull().await;
        assert!(result.success);
        assert_eq!(result.files_updated, 1);
        let ws = fx.store.get_workspace(&key()).await.unwrap().unwrap();
        assert!(ws.is_ready());
    }

    #[test]
    fn test_check_integrity() {
        let mut ws = Workspace::begin_clone(key());
        assert!(check_integrity(&ws, &[]).is_err());

        ws.finish_sync(vec![]);
        assert!(check_integrity(&ws, &[]).is_ok());

        ws.finish_sync(vec![FileId::new(ObjectKind::Graph, "graphs/g.json")]);
        assert!(matches!(
            check_integrity(&ws, &[]),
            Err(SyncError::CorruptWorkspace { .. })
        ));
    }
}
