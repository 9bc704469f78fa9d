//! Tree diff between the tracked set and the remote tree
//!
//! Content hash equality is the only change signal: a path whose hash is the
//! same on both sides is never fetched or deleted.

use std::collections::HashMap;

/// A path whose remote content must be retrieved
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTarget {
    pub path: String,
    pub hash: String,
}

/// Work needed to bring the tracked set in line with the remote tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// New or changed paths, sorted by path
    pub to_fetch: Vec<FetchTarget>,
    /// Paths gone from the remote, sorted
    pub to_delete: Vec<String>,
    /// Paths with identical hashes on both sides, sorted
    pub unchanged: Vec<String>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.to_fetch.is_empty() && self.to_delete.is_empty()
    }
}

/// Compare `old` (tracked path -> hash) against `new` (remote path -> hash)
pub fn diff_trees(old: &HashMap<String, String>, new: &HashMap<String, String>) -> TreeDiff {
    let mut remaining: HashMap<&str, &str> = old
        .iter()
        .map(|(path, hash)| (path.as_str(), hash.as_str()))
        .collect();
    let mut diff = TreeDiff::default();

    for (path, hash) in new {
        match remaining.remove(path.as_str()) {
            Some(old_hash) if old_hash == hash.as_str() => diff.unchanged.push(path.clone()),
            // Either new or changed
            _ => diff.to_fetch.push(FetchTarget {
                path: path.clone(),
                hash: hash.clone(),
            }),
        }
    }

    diff.to_delete = remaining.into_keys().map(str::to_string).collect();

    diff.to_fetch.sort();
    diff.to_delete.sort();
    diff.unchanged.sort();
    diff
}
