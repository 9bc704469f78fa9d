//! Tracking policy and per-kind content codecs
//!
//! Decides which remote paths become tracked objects, and converts blob
//! content to and from [`FileData`] according to the object kind.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ContentFormat, FileData, ObjectKind};
use crate::error::ParseError;

/// A rule mapping a directory and set of extensions to an object kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRule {
    pub kind: ObjectKind,
    /// Parent directory the file must live in directly ("" for the repository root)
    pub directory: String,
    /// Accepted file extensions, without the leading dot
    pub extensions: Vec<String>,
}

impl TrackingRule {
    pub fn new(kind: ObjectKind, directory: &str, extensions: &[&str]) -> Self {
        Self {
            kind,
            directory: directory.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Check whether a repository-relative path falls under this rule
    pub fn matches(&self, path: &str) -> bool {
        let path = Path::new(path);
        let parent = path
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or_default();
        if parent != self.directory.trim_end_matches('/') {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|accepted| accepted.eq_ignore_ascii_case(ext))
            })
    }
}

/// Ordered set of tracking rules; the first matching rule wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingPolicy {
    pub rules: Vec<TrackingRule>,
}

impl Default for TrackingPolicy {
    fn default() -> Self {
        const YAML: &[&str] = &["yaml", "yml"];
        Self {
            rules: vec![
                TrackingRule::new(ObjectKind::Graph, "graphs", &["json"]),
                TrackingRule::new(ObjectKind::Parameter, "parameters", YAML),
                TrackingRule::new(ObjectKind::Context, "contexts", YAML),
                TrackingRule::new(ObjectKind::Case, "cases", YAML),
                TrackingRule::new(ObjectKind::Node, "nodes", YAML),
                TrackingRule::new(ObjectKind::Event, "events", YAML),
                TrackingRule::new(ObjectKind::Index, "", YAML),
                TrackingRule::new(
                    ObjectKind::Image,
                    "nodes/images",
                    &["png", "jpg", "jpeg", "gif", "svg", "webp"],
                ),
            ],
        }
    }
}

impl TrackingPolicy {
    pub fn new(rules: Vec<TrackingRule>) -> Self {
        Self { rules }
    }

    /// Kind of the object at `path`, or `None` if the path is not tracked
    pub fn classify(&self, path: &str) -> Option<ObjectKind> {
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .map(|rule| rule.kind)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Decode blob content for an object of the given kind
pub fn parse_content(kind: ObjectKind, path: &str, content: &[u8]) -> Result<FileData, ParseError> {
    match kind.format() {
        ContentFormat::Binary => Ok(FileData::Binary(content.to_vec())),
        ContentFormat::Json => serde_json::from_slice(content)
            .map(FileData::Structured)
            .map_err(|source| ParseError::Json {
                path: path.to_string(),
                source,
            }),
        ContentFormat::Yaml => {
            let text =
                std::str::from_utf8(content).map_err(|_| ParseError::Utf8(path.to_string()))?;
            serde_yaml_ng::from_str(text)
                .map(FileData::Structured)
                .map_err(|source| ParseError::Yaml {
                    path: path.to_string(),
                    source,
                })
        }
    }
}

/// Render structured content back to text in its kind's format
///
/// This is the text fed to the merge resolver as `base` and `local`.
pub fn serialize_content(kind: ObjectKind, path: &str, data: &FileData) -> Result<String, ParseError> {
    let value = match data {
        FileData::Structured(value) => value,
        FileData::Binary(_) => {
            return Err(ParseError::Serialize {
                path: path.to_string(),
                message: "binary content has no text form".to_string(),
            });
        }
    };

    match kind.format() {
        ContentFormat::Json => serde_json::to_string_pretty(value)
            .map(|mut text| {
                text.push('\n');
                text
            })
            .map_err(|e| ParseError::Serialize {
                path: path.to_string(),
                message: e.to_string(),
            }),
        ContentFormat::Yaml => serde_yaml_ng::to_string(value).map_err(|e| ParseError::Serialize {
            path: path.to_string(),
            message: e.to_string(),
        }),
        ContentFormat::Binary => Err(ParseError::Serialize {
            path: path.to_string(),
            message: format!("{kind} objects are binary"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_policy_classification() {
        let policy = TrackingPolicy::default();
        assert_eq!(policy.classify("graphs/checkout.json"), Some(ObjectKind::Graph));
        assert_eq!(
            policy.classify("parameters/conversion-rate.yaml"),
            Some(ObjectKind::Parameter)
        );
        assert_eq!(policy.classify("events/signup.yml"), Some(ObjectKind::Event));
        assert_eq!(
            policy.classify("parameters-index.yaml"),
            Some(ObjectKind::Index)
        );
        assert_eq!(
            policy.classify("nodes/images/hero.PNG"),
            Some(ObjectKind::Image)
        );
    }

    #[test]
    fn test_untracked_paths() {
        let policy = TrackingPolicy::default();
        assert_eq!(policy.classify("README.md"), None);
        assert_eq!(policy.classify("graphs/nested/deep.json"), None);
        assert_eq!(policy.classify("graphs/checkout.yaml"), None);
        assert_eq!(policy.classify("src/main.rs"), None);
    }

    #[test]
    fn test_parse_json_and_yaml() {
        let graph = parse_content(ObjectKind::Graph, "graphs/a.json", br#"{"nodes": []}"#).unwrap();
        assert_eq!(graph, FileData::Structured(json!({"nodes": []})));

        let param =
            parse_content(ObjectKind::Parameter, "parameters/p.yaml", b"id: p\nvalue: 0.4\n")
                .unwrap();
        assert_eq!(param, FileData::Structured(json!({"id": "p", "value": 0.4})));
    }

    #[test]
    fn test_parse_failures() {
        let err = parse_content(ObjectKind::Graph, "graphs/a.json", b"{not json").unwrap_err();
        assert!(matches!(err, ParseError::Json { .. }));

        let err = parse_content(ObjectKind::Node, "nodes/n.yaml", &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, ParseError::Utf8(_)));
    }

    #[test]
    fn test_binary_passthrough() {
        let bytes = vec![0x89, b'P', b'N', b'G'];
        let data = parse_content(ObjectKind::Image, "nodes/images/a.png", &bytes).unwrap();
        assert_eq!(data, FileData::Binary(bytes));
        assert!(serialize_content(ObjectKind::Image, "nodes/images/a.png", &data).is_err());
    }

    #[test]
    fn test_serialize_is_stable() {
        let data = FileData::Structured(json!({"b": 2, "a": 1}));
        let first = serialize_content(ObjectKind::Case, "cases/c.yaml", &data).unwrap();
        let second = serialize_content(ObjectKind::Case, "cases/c.yaml", &data).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "b: 2\na: 1\n");

        let json_text = serialize_content(ObjectKind::Graph, "graphs/g.json", &data).unwrap();
        assert!(json_text.ends_with("}\n"));
    }

    #[test]
    fn test_serialize_keeps_source_key_order() {
        let yaml = "title: Checkout\nnodes: []\nedges: []\nmeta: draft\n";
        let data = parse_content(ObjectKind::Node, "nodes/n.yaml", yaml.as_bytes()).unwrap();
        assert_eq!(
            serialize_content(ObjectKind::Node, "nodes/n.yaml", &data).unwrap(),
            yaml
        );

        let json = "{\n  \"title\": \"Checkout\",\n  \"nodes\": [],\n  \"meta\": \"draft\"\n}\n";
        let data = parse_content(ObjectKind::Graph, "graphs/g.json", json.as_bytes()).unwrap();
        assert_eq!(
            serialize_content(ObjectKind::Graph, "graphs/g.json", &data).unwrap(),
            json
        );
    }
}
