//! Remote tree client interface
//!
//! Read-only access to the hosted repository: one recursive tree listing per
//! sync, then blob retrieval by content hash.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::workspace::{ObjectKind, TrackingPolicy};

/// Credentials used to authenticate against the remote repository
#[derive(Clone, Default)]
pub struct Credentials {
    pub token: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }
}

// Never print the token itself
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Repository handle passed to every remote call
#[derive(Debug, Clone)]
pub struct RepoAccess {
    pub repository: String,
    pub credentials: Credentials,
}

impl RepoAccess {
    pub fn new(repository: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            repository: repository.into(),
            credentials,
        }
    }
}

/// Kind of an entry in the raw tree listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeItemKind {
    Blob,
    Tree,
}

/// One line of the raw remote tree listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    pub path: String,
    pub content_hash: String,
    pub kind: TreeItemKind,
}

impl TreeItem {
    pub fn blob(path: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
            kind: TreeItemKind::Blob,
        }
    }
}

/// Snapshot of the remote tree at one commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTree {
    pub items: Vec<TreeItem>,
    pub commit_id: String,
}

/// A remote blob filtered into the tracked set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectEntry {
    pub path: String,
    pub content_hash: String,
    pub kind: ObjectKind,
}

impl RemoteTree {
    /// Keep only blobs covered by the tracking policy
    pub fn tracked_entries(&self, policy: &TrackingPolicy) -> Vec<RemoteObjectEntry> {
        self.items
            .iter()
            .filter(|item| item.kind == TreeItemKind::Blob)
            .filter_map(|item| {
                policy.classify(&item.path).map(|kind| RemoteObjectEntry {
                    path: item.path.clone(),
                    content_hash: item.content_hash.clone(),
                    kind,
                })
            })
            .collect()
    }

    /// Build the path -> hash map of the tracked set
    pub fn tracked_map(&self, policy: &TrackingPolicy) -> HashMap<String, RemoteObjectEntry> {
        self.tracked_entries(policy)
            .into_iter()
            .map(|entry| (entry.path.clone(), entry))
            .collect()
    }
}

/// Read-only client for the hosted repository
///
/// Both calls are idempotent. Any non-success response is reported as a
/// single [`RemoteError`] carrying a human-readable message.
#[async_trait]
pub trait RemoteTreeClient: Send + Sync {
    /// List the tree of `branch`
    async fn get_tree(
        &self,
        access: &RepoAccess,
        branch: &str,
        recursive: bool,
    ) -> Result<RemoteTree, RemoteError>;

    /// Retrieve a blob by content hash
    async fn get_blob(&self, access: &RepoAccess, content_hash: &str) -> Result<Vec<u8>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_entries_filters_policy_and_trees() {
        let tree = RemoteTree {
            items: vec![
                TreeItem::blob("graphs/a.json", "h1"),
                TreeItem::blob("README.md", "h2"),
                TreeItem {
                    path: "graphs".to_string(),
                    content_hash: "t1".to_string(),
                    kind: TreeItemKind::Tree,
                },
                TreeItem::blob("parameters/p.yaml", "h3"),
            ],
            commit_id: "c1".to_string(),
        };

        let entries = tree.tracked_entries(&TrackingPolicy::default());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, ObjectKind::Graph);
        assert_eq!(entries[1].path, "parameters/p.yaml");

        let map = tree.tracked_map(&TrackingPolicy::default());
        assert_eq!(map["graphs/a.json"].content_hash, "h1");
    }

    #[test]
    fn test_credentials_debug_hides_token() {
        let creds = Credentials::token("ghp_secret");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("ghp_secret"));
        assert!(debug.contains("***"));
    }
}
