//! Directory-backed remote
//!
//! Serves `<root>/<repository>/<branch>/...` as a remote tree. Content hashes
//! are the hex xxh3 digest of each file, so unchanged files keep their hash
//! across listings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_64;

use super::{RemoteTree, RemoteTreeClient, RepoAccess, TreeItem, TreeItemKind};
use crate::error::RemoteError;

/// Hex content hash used by the directory remote
pub fn content_hash(content: &[u8]) -> String {
    format!("{:016x}", xxh3_64(content))
}

/// Hash -> file index built by one tree listing
type BlobIndex = HashMap<String, PathBuf>;

/// Remote tree client reading from a local directory
#[derive(Clone)]
pub struct FsRemote {
    root: PathBuf,
    /// Per branch directory, the blob index of its latest listing
    blobs: Arc<RwLock<HashMap<PathBuf, BlobIndex>>>,
}

impl FsRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            blobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn branch_dir(&self, access: &RepoAccess, branch: &str) -> PathBuf {
        self.root.join(&access.repository).join(branch)
    }
}

/// Walk `base`, hashing every file
fn list_dir(base: &Path, recursive: bool) -> Result<(Vec<TreeItem>, BlobIndex), String> {
    let mut items = Vec::new();
    let mut index = HashMap::new();
    let max_depth = if recursive { usize::MAX } else { 1 };

    for entry in WalkDir::new(base).min_depth(1).max_depth(max_depth) {
        let entry = entry.map_err(|e| e.to_string())?;
        let Some(relative) = entry
            .path()
            .strip_prefix(base)
            .ok()
            .and_then(|p| p.to_str())
            .map(|p| p.replace('\\', "/"))
        else {
            continue;
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            items.push(TreeItem {
                path: relative,
                content_hash: String::new(),
                kind: TreeItemKind::Tree,
            });
        } else if file_type.is_file() {
            let content = std::fs::read(entry.path())
                .map_err(|e| format!("{}: {}", entry.path().display(), e))?;
            let hash = content_hash(&content);
            index.insert(hash.clone(), entry.into_path());
            items.push(TreeItem::blob(relative, hash));
        }
    }

    items.sort_by(|a, b| a.path.cmp(&b.path));
    Ok((items, index))
}

#[async_trait]
impl RemoteTreeClient for FsRemote {
    #[instrument(skip(self, access), fields(repository = %access.repository))]
    async fn get_tree(
        &self,
        access: &RepoAccess,
        branch: &str,
        recursive: bool,
    ) -> Result<RemoteTree, RemoteError> {
        let base = self.branch_dir(access, branch);
        let tree_err = |message: String| RemoteError::TreeFetch {
            branch: branch.to_string(),
            message,
        };

        if !tokio::fs::try_exists(&base).await.unwrap_or(false) {
            return Err(RemoteError::NotFound(format!(
                "{}@{}",
                access.repository, branch
            )));
        }

        let walk_base = base.clone();
        let (items, index) = tokio::task::spawn_blocking(move || list_dir(&walk_base, recursive))
            .await
            .map_err(|e| tree_err(e.to_string()))?
            .map_err(tree_err)?;

        let commit_id = content_hash(
            items
                .iter()
                .map(|item| format!("{} {}\n", item.path, item.content_hash))
                .collect::<String>()
                .as_bytes(),
        );
        debug!("Listed {} entries at {}", items.len(), commit_id);

        self.blobs.write().await.insert(base, index);

        Ok(RemoteTree { items, commit_id })
    }

    async fn get_blob(&self, access: &RepoAccess, hash: &str) -> Result<Vec<u8>, RemoteError> {
        let repo_dir = self.root.join(&access.repository);
        let path = {
            let blobs = self.blobs.read().await;
            blobs
                .iter()
                .filter(|(branch_dir, _)| branch_dir.starts_with(&repo_dir))
                .find_map(|(_, index)| index.get(hash).cloned())
        };
        let Some(path) = path else {
            return Err(RemoteError::BlobFetch {
                hash: hash.to_string(),
                message: "unknown content hash".to_string(),
            });
        };

        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| RemoteError::BlobFetch {
                hash: hash.to_string(),
                message: e.to_string(),
            })?;

        // The file may have changed since it was listed
        if content_hash(&content) != hash {
            return Err(RemoteError::BlobFetch {
                hash: hash.to_string(),
                message: format!("{} changed since listing", path.display()),
            });
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Credentials;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_tree_and_blob_roundtrip() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "acme/main/graphs/a.json", "{}");
        write(temp.path(), "acme/main/parameters/p.yaml", "id: p\n");

        let remote = FsRemote::new(temp.path());
        let access = RepoAccess::new("acme", Credentials::anonymous());
        let tree = remote.get_tree(&access, "main", true).await.unwrap();

        let blob = tree
            .items
            .iter()
            .find(|i| i.path == "parameters/p.yaml")
            .unwrap();
        assert_eq!(blob.kind, TreeItemKind::Blob);
        assert_eq!(blob.content_hash, content_hash(b"id: p\n"));

        let content = remote.get_blob(&access, &blob.content_hash).await.unwrap();
        assert_eq!(content, b"id: p\n");
    }

    #[tokio::test]
    async fn test_missing_branch_is_not_found() {
        let temp = TempDir::new().unwrap();
        let remote = FsRemote::new(temp.path());
        let access = RepoAccess::new("acme", Credentials::anonymous());
        let err = remote.get_tree(&access, "main", true).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_non_recursive_lists_top_level_only() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "acme/main/graphs/a.json", "{}");
        write(temp.path(), "acme/main/index.yaml", "a: 1\n");

        let remote = FsRemote::new(temp.path());
        let access = RepoAccess::new("acme", Credentials::anonymous());
        let tree = remote.get_tree(&access, "main", false).await.unwrap();
        let paths: Vec<_> = tree.items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["graphs", "index.yaml"]);
    }

    #[tokio::test]
    async fn test_unknown_hash_fails() {
        let temp = TempDir::new().unwrap();
        let remote = FsRemote::new(temp.path());
        let access = RepoAccess::new("acme", Credentials::anonymous());
        let err = remote.get_blob(&access, "deadbeef").await.unwrap_err();
        assert!(matches!(err, RemoteError::BlobFetch { .. }));
    }

    #[tokio::test]
    async fn test_relisting_forgets_removed_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "acme/main/nodes/a.yaml", "id: a\n");
        write(temp.path(), "acme/main/nodes/b.yaml", "id: b\n");

        let remote = FsRemote::new(temp.path());
        let access = RepoAccess::new("acme", Credentials::anonymous());
        remote.get_tree(&access, "main", true).await.unwrap();
        let old_hash = content_hash(b"id: a\n");
        assert!(remote.get_blob(&access, &old_hash).await.is_ok());

        std::fs::remove_file(temp.path().join("acme/main/nodes/a.yaml")).unwrap();
        let tree = remote.get_tree(&access, "main", true).await.unwrap();
        assert!(tree.items.iter().all(|i| i.path != "nodes/a.yaml"));

        let err = remote.get_blob(&access, &old_hash).await.unwrap_err();
        assert!(matches!(err, RemoteError::BlobFetch { .. }));
        assert!(remote.get_blob(&access, &content_hash(b"id: b\n")).await.is_ok());
    }

    #[tokio::test]
    async fn test_branch_listings_are_indexed_separately() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "acme/main/nodes/a.yaml", "id: main\n");
        write(temp.path(), "acme/dev/nodes/a.yaml", "id: dev\n");

        let remote = FsRemote::new(temp.path());
        let access = RepoAccess::new("acme", Credentials::anonymous());
        remote.get_tree(&access, "main", true).await.unwrap();
        remote.get_tree(&access, "dev", true).await.unwrap();

        let main = remote.get_blob(&access, &content_hash(b"id: main\n")).await.unwrap();
        assert_eq!(main, b"id: main\n");

        let other = RepoAccess::new("other", Credentials::anonymous());
        assert!(remote.get_blob(&other, &content_hash(b"id: dev\n")).await.is_err());
    }
}
