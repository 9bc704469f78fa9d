//! Local object store
//!
//! Durable persistence for workspace records and tracked files:
//! - `LocalObjectStore` - The storage interface used by the sync engine
//! - `MemoryStore` - Volatile implementation for tests and embedding
//! - `JsonFileStore` - Whole-store JSON document with atomic writes
//!
//! Sync engines write through `put_many`/`delete_many` so one sync costs one
//! document write on `JsonFileStore`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::error::{store_io, StoreError};
use crate::workspace::{FileKey, TrackedFile, Workspace, WorkspaceKey};

/// Durable key-value persistence for tracked objects and workspace metadata
#[async_trait]
pub trait LocalObjectStore: Send + Sync {
    async fn get(&self, key: &FileKey) -> Result<Option<TrackedFile>, StoreError>;

    async fn put(&self, file: &TrackedFile) -> Result<(), StoreError>;

    async fn delete(&self, key: &FileKey) -> Result<(), StoreError>;

    /// Persist several files as one write
    async fn put_many(&self, files: &[TrackedFile]) -> Result<(), StoreError> {
        for file in files {
            self.put(file).await?;
        }
        Ok(())
    }

    /// Remove several files as one write
    async fn delete_many(&self, keys: &[FileKey]) -> Result<(), StoreError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// All tracked files persisted for one workspace
    async fn all_for_workspace(&self, key: &WorkspaceKey) -> Result<Vec<TrackedFile>, StoreError>;

    async fn get_workspace(&self, key: &WorkspaceKey) -> Result<Option<Workspace>, StoreError>;

    async fn put_workspace(&self, workspace: &Workspace) -> Result<(), StoreError>;

    async fn delete_workspace(&self, key: &WorkspaceKey) -> Result<(), StoreError>;
}

/// In-memory tables shared by both store implementations
#[derive(Debug, Default)]
struct StoreState {
    workspaces: BTreeMap<WorkspaceKey, Workspace>,
    files: BTreeMap<FileKey, TrackedFile>,
}

impl StoreState {
    fn files_for(&self, key: &WorkspaceKey) -> Vec<TrackedFile> {
        self.files
            .values()
            .filter(|f| &f.key.workspace == key)
            .cloned()
            .collect()
    }

    /// Undo file mutations, latest first
    fn restore_files(&mut self, previous: Vec<(FileKey, Option<TrackedFile>)>) {
        for (key, old) in previous.into_iter().rev() {
            match old {
                Some(old) => self.files.insert(key, old),
                None => self.files.remove(&key),
            };
        }
    }

    fn to_document(&self) -> StoreDocument {
        StoreDocument {
            version: env!("CARGO_PKG_VERSION").to_string(),
            workspaces: self.workspaces.values().cloned().collect(),
            files: self.files.values().cloned().collect(),
        }
    }

    fn from_document(doc: StoreDocument) -> Self {
        Self {
            workspaces: doc
                .workspaces
                .into_iter()
                .map(|ws| (ws.key.clone(), ws))
                .collect(),
            files: doc
                .files
                .into_iter()
                .map(|file| (file.key.clone(), file))
                .collect(),
        }
    }
}

/// On-disk layout of [`JsonFileStore`]
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    /// Application version that last wrote this store
    #[serde(default)]
    version: String,
    #[serde(default)]
    workspaces: Vec<Workspace>,
    #[serde(default)]
    files: Vec<TrackedFile>,
}

/// Volatile store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalObjectStore for MemoryStore {
    async fn get(&self, key: &FileKey) -> Result<Option<TrackedFile>, StoreError> {
        Ok(self.state.read().await.files.get(key).cloned())
    }

    async fn put(&self, file: &TrackedFile) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .files
            .insert(file.key.clone(), file.clone());
        Ok(())
    }

    async fn delete(&self, key: &FileKey) -> Result<(), StoreError> {
        self.state.write().await.files.remove(key);
        Ok(())
    }

    async fn all_for_workspace(&self, key: &WorkspaceKey) -> Result<Vec<TrackedFile>, StoreError> {
        Ok(self.state.read().await.files_for(key))
    }

    async fn get_workspace(&self, key: &WorkspaceKey) -> Result<Option<Workspace>, StoreError> {
        Ok(self.state.read().await.workspaces.get(key).cloned())
    }

    async fn put_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .workspaces
            .insert(workspace.key.clone(), workspace.clone());
        Ok(())
    }

    async fn delete_workspace(&self, key: &WorkspaceKey) -> Result<(), StoreError> {
        self.state.write().await.workspaces.remove(key);
        Ok(())
    }
}

/// Store persisted as a single JSON document
///
/// Every mutation rewrites the document to `<path>.tmp` and renames it over
/// `<path>`, so a crash never leaves a half-written store behind. A failed
/// write rolls the in-memory tables back, so reads never see unsaved data.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let doc: StoreDocument = serde_json::from_str(&content)
                    .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
                debug!(
                    "Loaded {} workspace(s), {} file(s)",
                    doc.workspaces.len(),
                    doc.files.len()
                );
                StoreState::from_document(doc)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(store_io(&path, e)),
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| store_io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(&state.to_document())
            .map_err(|e| StoreError::Serialize(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| store_io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| store_io(&self.path, e))?;
        Ok(())
    }
}

#[async_trait]
impl LocalObjectStore for JsonFileStore {
    async fn get(&self, key: &FileKey) -> Result<Option<TrackedFile>, StoreError> {
        Ok(self.state.read().await.files.get(key).cloned())
    }

    async fn put(&self, file: &TrackedFile) -> Result<(), StoreError> {
        self.put_many(std::slice::from_ref(file)).await
    }

    async fn delete(&self, key: &FileKey) -> Result<(), StoreError> {
        self.delete_many(std::slice::from_ref(key)).await
    }

    async fn put_many(&self, files: &[TrackedFile]) -> Result<(), StoreError> {
        if files.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        let previous: Vec<(FileKey, Option<TrackedFile>)> = files
            .iter()
            .map(|file| {
                let old = state.files.insert(file.key.clone(), file.clone());
                (file.key.clone(), old)
            })
            .collect();

        if let Err(e) = self.persist(&state).await {
            warn!("Store write failed, discarding {} file(s): {}", files.len(), e);
            state.restore_files(previous);
            return Err(e);
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[FileKey]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let previous: Vec<(FileKey, Option<TrackedFile>)> = keys
            .iter()
            .filter_map(|key| state.files.remove(key).map(|old| (key.clone(), Some(old))))
            .collect();
        if previous.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.persist(&state).await {
            warn!("Store write failed, keeping {} file(s): {}", previous.len(), e);
            state.restore_files(previous);
            return Err(e);
        }
        Ok(())
    }

    async fn all_for_workspace(&self, key: &WorkspaceKey) -> Result<Vec<TrackedFile>, StoreError> {
        Ok(self.state.read().await.files_for(key))
    }

    async fn get_workspace(&self, key: &WorkspaceKey) -> Result<Option<Workspace>, StoreError> {
        Ok(self.state.read().await.workspaces.get(key).cloned())
    }

    async fn put_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let old = state
            .workspaces
            .insert(workspace.key.clone(), workspace.clone());

        if let Err(e) = self.persist(&state).await {
            match old {
                Some(old) => state.workspaces.insert(workspace.key.clone(), old),
                None => state.workspaces.remove(&workspace.key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete_workspace(&self, key: &WorkspaceKey) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let Some(old) = state.workspaces.remove(key) else {
            return Ok(());
        };

        if let Err(e) = self.persist(&state).await {
            state.workspaces.insert(key.clone(), old);
            return Err(e);
        }
        Ok(())
    }
}
