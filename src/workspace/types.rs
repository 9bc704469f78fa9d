//! Core workspace types
//!
//! Defines the synchronization model:
//! - `Workspace` holds sync metadata for one `(repository, branch)` pair
//! - `TrackedFile` is the local, synchronized copy of one remote object
//! - `PullResult` / `MergeConflict` are the outcome records returned to callers

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a workspace: one tracked branch of one remote repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkspaceKey {
    pub repository: String,
    pub branch: String,
}

impl WorkspaceKey {
    pub fn new(repository: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
        }
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.branch)
    }
}

/// Kind of a tracked object, deciding both its location and its format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Graph,
    Parameter,
    Context,
    Case,
    Node,
    Event,
    Index,
    Image,
}

/// On-the-wire format of an object kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Json,
    Yaml,
    Binary,
}

impl ObjectKind {
    /// All kinds, in tracking-rule order
    pub fn all() -> &'static [ObjectKind] {
        &[
            Self::Graph,
            Self::Parameter,
            Self::Context,
            Self::Case,
            Self::Node,
            Self::Event,
            Self::Index,
            Self::Image,
        ]
    }

    pub fn format(&self) -> ContentFormat {
        match self {
            Self::Graph => ContentFormat::Json,
            Self::Image => ContentFormat::Binary,
            Self::Parameter
            | Self::Context
            | Self::Case
            | Self::Node
            | Self::Event
            | Self::Index => ContentFormat::Yaml,
        }
    }

    /// Binary objects never go through the line-based merge
    pub fn is_binary(&self) -> bool {
        self.format() == ContentFormat::Binary
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Graph => "graph",
            Self::Parameter => "parameter",
            Self::Context => "context",
            Self::Case => "case",
            Self::Node => "node",
            Self::Event => "event",
            Self::Index => "index",
            Self::Image => "image",
        };
        f.write_str(name)
    }
}

/// Stable identifier of a tracked object within a workspace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId {
    pub kind: ObjectKind,
    pub path: String,
}

impl FileId {
    pub fn new(kind: ObjectKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.path)
    }
}

/// Composite key of a tracked object across all workspaces in a shared store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    pub workspace: WorkspaceKey,
    pub file: FileId,
}

impl FileKey {
    pub fn new(workspace: WorkspaceKey, file: FileId) -> Self {
        Self { workspace, file }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workspace, self.file)
    }
}

/// Parsed content of a tracked object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum FileData {
    /// JSON or YAML document, decoded into a common value tree
    Structured(serde_json::Value),
    /// Opaque bytes (images)
    Binary(Vec<u8>),
}

/// Local, synchronized representation of one remote object
///
/// `original_data` always equals the parsed content last retrieved at
/// `content_hash`. `dirty` is set by the editing layer when `data` diverges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub key: FileKey,
    pub data: FileData,
    pub original_data: FileData,
    pub dirty: bool,
    pub content_hash: String,
    pub last_synced_at: DateTime<Utc>,
}

impl TrackedFile {
    /// Create a clean tracked file from freshly retrieved remote content
    pub fn from_remote(key: FileKey, data: FileData, content_hash: impl Into<String>) -> Self {
        Self {
            key,
            original_data: data.clone(),
            data,
            dirty: false,
            content_hash: content_hash.into(),
            last_synced_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.key.file.kind
    }

    pub fn path(&self) -> &str {
        &self.key.file.path
    }

    /// Replace local and base content with a newer remote version
    pub fn fast_forward(&mut self, data: FileData, content_hash: impl Into<String>) {
        self.original_data = data.clone();
        self.data = data;
        self.dirty = false;
        self.content_hash = content_hash.into();
        self.last_synced_at = Utc::now();
    }

    /// Record an edit made by the editing layer
    pub fn apply_local_edit(&mut self, data: FileData) {
        self.dirty = data != self.original_data;
        self.data = data;
    }
}

/// Synchronization metadata for one `(repository, branch)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub key: WorkspaceKey,
    /// When the workspace last completed a successful clone or pull
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Exact set of tracked files persisted for this workspace
    #[serde(default)]
    pub tracked_file_ids: Vec<FileId>,
    /// True while a clone is in progress (or was interrupted)
    pub cloning: bool,
    /// Failure message of the last clone attempt
    #[serde(default)]
    pub clone_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Create a workspace record for a clone that is about to start
    pub fn begin_clone(key: WorkspaceKey) -> Self {
        Self {
            key,
            last_synced_at: None,
            tracked_file_ids: Vec::new(),
            cloning: true,
            clone_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &WorkspaceKey {
        &self.key
    }

    /// Mark a successful sync
    pub fn finish_sync(&mut self, tracked_file_ids: Vec<FileId>) {
        self.tracked_file_ids = tracked_file_ids;
        self.cloning = false;
        self.clone_error = None;
        self.touch();
    }

    /// Mark a failed clone, keeping the record so it can be retried
    pub fn fail_clone(&mut self, message: impl Into<String>) {
        self.cloning = false;
        self.clone_error = Some(message.into());
    }

    pub fn touch(&mut self) {
        self.last_synced_at = Some(Utc::now());
    }

    /// Whether the workspace finished at least one clone successfully
    pub fn is_ready(&self) -> bool {
        !self.cloning && self.clone_error.is_none() && self.last_synced_at.is_some()
    }
}

/// Why a pull could not apply a remote change automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Both sides changed the same lines
    ConcurrentEdit,
    /// The remote object was deleted while the local copy has edits
    DeletedRemotely,
    /// The lines merged cleanly but the result does not parse
    InvalidMerge,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConcurrentEdit => write!(f, "concurrent edit"),
            Self::DeletedRemotely => write!(f, "deleted remotely"),
            Self::InvalidMerge => write!(f, "invalid merge"),
        }
    }
}

/// Conflict surfaced by a pull. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeConflict {
    pub file_id: FileId,
    pub reason: ConflictReason,
    pub local_text: String,
    pub remote_text: String,
    pub base_text: String,
    pub merged_text: String,
    pub has_conflicts: bool,
    /// Number of conflict regions in `merged_text`
    pub conflict_count: usize,
    /// Remote content hash the conflict was computed against; `None` when
    /// the remote object is gone
    pub remote_hash: Option<String>,
}

impl MergeConflict {
    pub fn path(&self) -> &str {
        &self.file_id.path
    }

    pub fn kind(&self) -> ObjectKind {
        self.file_id.kind
    }
}

/// Outcome of a pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullResult {
    pub success: bool,
    pub conflicts: Vec<MergeConflict>,
    pub files_updated: usize,
    pub files_deleted: usize,
    /// Paths left untouched because their fetch or parse failed
    pub skipped: Vec<String>,
    /// Binary paths whose local edits were replaced by the remote version
    pub overwritten: Vec<String>,
    /// Failure message when `success` is false
    pub error: Option<String>,
}

impl PullResult {
    pub fn up_to_date() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Get a summary string
    pub fn summary(&self) -> String {
        if !self.success {
            return format!(
                "Pull failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }
        if self.files_updated == 0 && self.files_deleted == 0 && self.conflicts.is_empty() {
            return "Already up to date".to_string();
        }
        format!(
            "{} updated, {} deleted, {} conflict(s)",
            self.files_updated,
            self.files_deleted,
            self.conflicts.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_key() -> FileKey {
        FileKey::new(
            WorkspaceKey::new("acme/flows", "main"),
            FileId::new(ObjectKind::Parameter, "parameters/rate.yaml"),
        )
    }

    #[test]
    fn test_key_display() {
        let key = sample_key();
        assert_eq!(
            key.to_string(),
            "acme/flows@main/parameter:parameters/rate.yaml"
        );
    }

    #[test]
    fn test_object_kind_formats() {
        assert_eq!(ObjectKind::Graph.format(), ContentFormat::Json);
        assert_eq!(ObjectKind::Event.format(), ContentFormat::Yaml);
        assert!(ObjectKind::Image.is_binary());
        assert!(!ObjectKind::Index.is_binary());
    }

    #[test]
    fn test_local_edit_sets_and_clears_dirty() {
        let mut file = TrackedFile::from_remote(
            sample_key(),
            FileData::Structured(json!({"value": 1})),
            "h1",
        );
        assert!(!file.dirty);

        file.apply_local_edit(FileData::Structured(json!({"value": 2})));
        assert!(file.dirty);

        // Reverting to the base content is not an edit
        file.apply_local_edit(FileData::Structured(json!({"value": 1})));
        assert!(!file.dirty);
    }

    #[test]
    fn test_fast_forward_resets_base() {
        let mut file = TrackedFile::from_remote(
            sample_key(),
            FileData::Structured(json!({"value": 1})),
            "h1",
        );
        file.apply_local_edit(FileData::Structured(json!({"value": 2})));

        file.fast_forward(FileData::Structured(json!({"value": 3})), "h2");
        assert!(!file.dirty);
        assert_eq!(file.data, file.original_data);
        assert_eq!(file.content_hash, "h2");
    }

    #[test]
    fn test_workspace_lifecycle() {
        let mut ws = Workspace::begin_clone(WorkspaceKey::new("acme/flows", "main"));
        assert!(ws.cloning);
        assert!(!ws.is_ready());

        ws.fail_clone("network down");
        assert!(!ws.cloning);
        assert_eq!(ws.clone_error.as_deref(), Some("network down"));
        assert!(!ws.is_ready());

        ws.finish_sync(vec![FileId::new(ObjectKind::Graph, "graphs/a.json")]);
        assert!(ws.is_ready());
        assert!(ws.clone_error.is_none());
        assert_eq!(ws.tracked_file_ids.len(), 1);
    }

    #[test]
    fn test_pull_result_summary() {
        assert_eq!(PullResult::up_to_date().summary(), "Already up to date");
        assert!(PullResult::failed("boom").summary().contains("boom"));

        let result = PullResult {
            success: true,
            files_updated: 2,
            files_deleted: 1,
            ..Default::default()
        };
        assert_eq!(result.summary(), "2 updated, 1 deleted, 0 conflict(s)");
    }
}
