//! Workspace manager - the caller-facing lifecycle API
//!
//! Owns workspace creation, sync dispatch and deletion. Overlapping syncs on
//! the same workspace key are detected and rejected with
//! [`SyncError::ConcurrentSync`]; syncs on different keys run independently.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{CloneEngine, PullOrchestrator, SyncContext, contains_conflict_markers};
use crate::config::Config;
use crate::error::{Error, Result, SyncError};
use crate::remote::{Credentials, RemoteTreeClient, RepoAccess};
use crate::store::{LocalObjectStore, WorkingSetCache};
use crate::workspace::{
    FileData, FileKey, MergeConflict, PullResult, TrackedFile, Workspace, WorkspaceKey,
    parse_content,
};

type InFlight = Arc<Mutex<HashSet<WorkspaceKey>>>;

/// Marks a workspace as syncing until dropped
struct SyncGuard {
    key: WorkspaceKey,
    in_flight: InFlight,
}

impl SyncGuard {
    fn acquire(in_flight: &InFlight, key: &WorkspaceKey) -> std::result::Result<Self, SyncError> {
        let mut keys = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !keys.insert(key.clone()) {
            return Err(SyncError::ConcurrentSync(key.clone()));
        }
        Ok(Self {
            key: key.clone(),
            in_flight: Arc::clone(in_flight),
        })
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        let mut keys = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        keys.remove(&self.key);
    }
}

/// Manages workspaces and their synchronization
#[derive(Clone)]
pub struct WorkspaceManager {
    ctx: SyncContext,
    reclone_on_tree_failure: bool,
    in_flight: InFlight,
}

impl WorkspaceManager {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            reclone_on_tree_failure: true,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Build a manager whose fetcher, policy and resolver come from `config`
    pub fn from_config(
        config: &Config,
        remote: Arc<dyn RemoteTreeClient>,
        store: Arc<dyn LocalObjectStore>,
        cache: WorkingSetCache,
    ) -> Result<Self> {
        config.validate()?;
        let ctx = SyncContext::new(remote, store, cache)
            .with_fetcher(config.fetch_scheduler())
            .with_policy(config.tracking.clone())
            .with_resolver(config.resolver());
        Ok(Self::new(ctx).with_reclone_on_tree_failure(config.reclone_on_tree_failure))
    }

    pub fn with_reclone_on_tree_failure(mut self, enabled: bool) -> Self {
        self.reclone_on_tree_failure = enabled;
        self
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn store(&self) -> &dyn LocalObjectStore {
        self.ctx.store.as_ref()
    }

    pub fn cache(&self) -> &WorkingSetCache {
        &self.ctx.cache
    }

    /// Whether a clone has ever been attempted for this pair
    pub async fn workspace_exists(&self, repository: &str, branch: &str) -> Result<bool> {
        Ok(self.get_workspace(repository, branch).await?.is_some())
    }

    pub async fn get_workspace(&self, repository: &str, branch: &str) -> Result<Option<Workspace>> {
        let key = WorkspaceKey::new(repository, branch);
        Ok(self.store().get_workspace(&key).await?)
    }

    /// Clone a workspace from scratch
    ///
    /// Refuses to replace a workspace that still holds local edits.
    #[instrument(skip(self, credentials), fields(sync_id = %Uuid::new_v4()))]
    pub async fn clone_workspace(
        &self,
        repository: &str,
        branch: &str,
        credentials: Credentials,
    ) -> Result<Workspace> {
        let key = WorkspaceKey::new(repository, branch);
        let _guard = SyncGuard::acquire(&self.in_flight, &key)?;

        let dirty = self.dirty_count(&key).await?;
        if dirty > 0 {
            return Err(SyncError::LocalEditsPresent { key, count: dirty }.into());
        }

        let access = RepoAccess::new(repository, credentials);
        CloneEngine::new(&self.ctx).run(&key, &access).await
    }

    /// Bring a workspace up to date, cloning it first if it does not exist
    #[instrument(skip(self, credentials), fields(sync_id = %Uuid::new_v4()))]
    pub async fn pull_latest(
        &self,
        repository: &str,
        branch: &str,
        credentials: Credentials,
    ) -> Result<PullResult> {
        let key = WorkspaceKey::new(repository, branch);
        let _guard = SyncGuard::acquire(&self.in_flight, &key)?;
        let access = RepoAccess::new(repository, credentials);

        let Some(workspace) = self.store().get_workspace(&key).await? else {
            info!("No workspace for {}, cloning", key);
            return match CloneEngine::new(&self.ctx).run(&key, &access).await {
                Ok(workspace) => Ok(PullResult {
                    success: true,
                    files_updated: workspace.tracked_file_ids.len(),
                    ..Default::default()
                }),
                Err(Error::Sync(SyncError::CloneFailed { message, .. })) => {
                    Ok(PullResult::failed(message))
                }
                Err(e) => Err(e),
            };
        };

        PullOrchestrator::new(&self.ctx)
            .with_reclone_on_tree_failure(self.reclone_on_tree_failure)
            .run(workspace, &access)
            .await
    }

    /// Delete a workspace and all of its tracked files
    ///
    /// Returns false if there was nothing to delete.
    #[instrument(skip(self))]
    pub async fn delete_workspace(&self, repository: &str, branch: &str) -> Result<bool> {
        let key = WorkspaceKey::new(repository, branch);
        let _guard = SyncGuard::acquire(&self.in_flight, &key)?;
        let store = self.store();

        let files = store.all_for_workspace(&key).await?;
        let existed = store.get_workspace(&key).await?.is_some() || !files.is_empty();

        let keys: Vec<FileKey> = files.iter().map(|f| f.key.clone()).collect();
        store.delete_many(&keys).await?;
        store.delete_workspace(&key).await?;
        self.ctx.cache.clear_workspace(&key).await;

        if existed {
            info!("Deleted workspace {} ({} file(s))", key, files.len());
        }
        Ok(existed)
    }

    /// All tracked files of a workspace, ordered by path
    pub async fn get_workspace_files(
        &self,
        repository: &str,
        branch: &str,
    ) -> Result<Vec<TrackedFile>> {
        let key = WorkspaceKey::new(repository, branch);
        let mut files = self.store().all_for_workspace(&key).await?;
        files.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(files)
    }

    /// Record a local edit made by the editing layer
    ///
    /// The file becomes dirty unless `data` equals its last synced content.
    pub async fn edit_file(&self, key: &FileKey, data: FileData) -> Result<TrackedFile> {
        let mut file = self
            .store()
            .get(key)
            .await?
            .ok_or_else(|| SyncError::FileNotFound(key.clone()))?;

        file.apply_local_edit(data);
        self.store().put(&file).await?;
        self.ctx.cache.set(&file).await;
        if file.dirty {
            debug!("{} now has local edits", key);
        }
        Ok(file)
    }

    /// Accept a resolution of a conflict reported by a pull
    ///
    /// The file's base advances to the remote version the conflict was
    /// computed against and `resolved` becomes its local data, so the file
    /// stays dirty unless the resolution equals the remote content.
    #[instrument(skip(self, conflict, resolved), fields(path = %conflict.path()))]
    pub async fn resolve_conflict(
        &self,
        workspace: &WorkspaceKey,
        conflict: &MergeConflict,
        resolved: &str,
    ) -> Result<TrackedFile> {
        let invalid = |reason: &str| SyncError::InvalidResolution {
            path: conflict.path().to_string(),
            reason: reason.to_string(),
        };
        if contains_conflict_markers(resolved) {
            return Err(invalid("resolution still contains conflict markers").into());
        }
        let Some(remote_hash) = conflict.remote_hash.clone() else {
            return Err(invalid("the remote object was deleted; revert or keep the local edits").into());
        };

        let _guard = SyncGuard::acquire(&self.in_flight, workspace)?;
        let key = FileKey::new(workspace.clone(), conflict.file_id.clone());
        let mut file = self
            .store()
            .get(&key)
            .await?
            .ok_or_else(|| SyncError::FileNotFound(key.clone()))?;

        let remote = parse_content(conflict.kind(), conflict.path(), conflict.remote_text.as_bytes())?;
        let data = parse_content(conflict.kind(), conflict.path(), resolved.as_bytes())?;
        file.fast_forward(remote, remote_hash);
        file.apply_local_edit(data);

        self.store().put(&file).await?;
        self.ctx.cache.set(&file).await;
        info!("Resolved conflict on {}", key);
        Ok(file)
    }

    async fn dirty_count(&self, key: &WorkspaceKey) -> Result<usize> {
        let files = self.store().all_for_workspace(key).await?;
        Ok(files.iter().filter(|f| f.dirty).count())
    }
}
