//! Three-way line merge
//!
//! diff3-style merge of `local` and `remote` against their common ancestor
//! `base`. Both sides are aligned to `base` with a Myers line diff, then the
//! aligned regions are walked in lockstep. The result depends only on the three inputs.
//!
//! Merging is purely textual; the output is not guaranteed to be a valid
//! document of the object's format.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffOp, capture_diff_slices};

/// A line opening, separating or closing a conflict region
static MARKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:<{7}|\|{7}|={7}|>{7})(?: .*)?\r?$").expect("valid regex")
});

/// Marker layout used for conflicting regions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStyle {
    /// `<<<<<<<` local `=======` remote `>>>>>>>`
    #[default]
    Merge,
    /// Like `Merge`, plus a `|||||||` section holding the base lines
    Diff3,
}

/// Result of a three-way merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub merged: String,
    pub has_conflicts: bool,
    /// Number of conflict regions in `merged`
    pub conflict_count: usize,
}

/// Line-based three-way merge resolver
#[derive(Debug, Clone)]
pub struct MergeResolver {
    style: ConflictStyle,
    local_label: String,
    base_label: String,
    remote_label: String,
}

impl Default for MergeResolver {
    fn default() -> Self {
        Self::new(ConflictStyle::default())
    }
}

impl MergeResolver {
    pub fn new(style: ConflictStyle) -> Self {
        Self {
            style,
            local_label: "local".to_string(),
            base_label: "base".to_string(),
            remote_label: "remote".to_string(),
        }
    }

    /// Name the sides in conflict markers
    pub fn with_labels(
        mut self,
        local: impl Into<String>,
        base: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        self.local_label = local.into();
        self.base_label = base.into();
        self.remote_label = remote.into();
        self
    }

    pub fn style(&self) -> ConflictStyle {
        self.style
    }

    /// Merge `local` and `remote`, both derived from `base`
    pub fn merge(&self, base: &str, local: &str, remote: &str) -> MergeOutcome {
        let base_lines = split_lines(base);
        let local_lines = split_lines(local);
        let remote_lines = split_lines(remote);

        let local_match = align(&base_lines, &local_lines);
        let remote_match = align(&base_lines, &remote_lines);

        let mut merged = String::with_capacity(local.len().max(remote.len()));
        let mut conflict_count = 0;

        for chunk in chunks(
            &local_match,
            &remote_match,
            local_lines.len(),
            remote_lines.len(),
        ) {
            match chunk {
                Chunk::Stable(range) => push_lines(&mut merged, &base_lines[range], false),
                Chunk::Unstable {
                    base,
                    local,
                    remote,
                } => {
                    let base = &base_lines[base];
                    let local = &local_lines[local];
                    let remote = &remote_lines[remote];

                    if local == base {
                        push_lines(&mut merged, remote, false);
                    } else if remote == base || local == remote {
                        push_lines(&mut merged, local, false);
                    } else {
                        conflict_count += 1;
                        self.push_conflict(&mut merged, base, local, remote);
                    }
                }
            }
        }

        MergeOutcome {
            merged,
            has_conflicts: conflict_count > 0,
            conflict_count,
        }
    }

    fn push_conflict(&self, out: &mut String, base: &[&str], local: &[&str], remote: &[&str]) {
        ensure_line_break(out);
        out.push_str(&format!("<<<<<<< {}\n", self.local_label));
        push_lines(out, local, true);
        if self.style == ConflictStyle::Diff3 {
            out.push_str(&format!("||||||| {}\n", self.base_label));
            push_lines(out, base, true);
        }
        out.push_str("=======\n");
        push_lines(out, remote, true);
        out.push_str(&format!(">>>>>>> {}\n", self.remote_label));
    }
}

/// Merge with the default resolver
pub fn merge3(base: &str, local: &str, remote: &str) -> MergeOutcome {
    MergeResolver::default().merge(base, local, remote)
}

/// Whether `text` still holds conflict marker lines
pub fn contains_conflict_markers(text: &str) -> bool {
    MARKER_LINE.is_match(text)
}

/// Split into lines, each keeping its terminator so joining is lossless
fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn push_lines(out: &mut String, lines: &[&str], terminate: bool) {
    for line in lines {
        out.push_str(line);
    }
    if terminate && !lines.is_empty() {
        ensure_line_break(out);
    }
}

fn ensure_line_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Chunk {
    /// Base lines matched on both sides
    Stable(Range<usize>),
    /// Region where at least one side differs from base
    Unstable {
        base: Range<usize>,
        local: Range<usize>,
        remote: Range<usize>,
    },
}

/// Walk both alignments in lockstep, cutting at base lines matched by both sides
fn chunks(
    local_match: &[Option<usize>],
    remote_match: &[Option<usize>],
    local_len: usize,
    remote_len: usize,
) -> Vec<Chunk> {
    let base_len = local_match.len();
    let (mut i, mut a, mut b) = (0, 0, 0);
    let mut out = Vec::new();

    loop {
        let start = i;
        while i < base_len && local_match[i] == Some(a) && remote_match[i] == Some(b) {
            i += 1;
            a += 1;
            b += 1;
        }
        if i > start {
            out.push(Chunk::Stable(start..i));
        }
        if i >= base_len && a >= local_len && b >= remote_len {
            break;
        }

        let (next_i, next_a, next_b) = (i..base_len)
            .find_map(|j| match (local_match[j], remote_match[j]) {
                (Some(la), Some(rb)) if la >= a && rb >= b => Some((j, la, rb)),
                _ => None,
            })
            .unwrap_or((base_len, local_len, remote_len));

        out.push(Chunk::Unstable {
            base: i..next_i,
            local: a..next_a,
            remote: b..next_b,
        });
        (i, a, b) = (next_i, next_a, next_b);
    }

    out
}

/// For each line of `base`, the index of the matching line in `other`
fn align(base: &[&str], other: &[&str]) -> Vec<Option<usize>> {
    let mut matches = vec![None; base.len()];
    for op in capture_diff_slices(Algorithm::Myers, base, other) {
        if let DiffOp::Equal {
            old_index,
            new_index,
            len,
        } = op
        {
            for offset in 0..len {
                matches[old_index + offset] = Some(new_index + offset);
            }
        }
    }
    matches
}
