//! Generic document trees.
//!
//! Every input file (JSON or YAML) is loaded into a `serde_json::Value`, which
//! is the tagged-variant tree the rest of the importer works on:
//! string / number / bool / null / list / map.
//!
//! Upstream shapes vary per source file, so structural discovery is done with
//! an explicit recursive visitor (`find_keyed_containers`) parameterized by a
//! key-name predicate rather than by a fixed schema.

use crate::error::{ImportError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Supported document encodings, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "yml" | "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Parse document text in the given format.
pub fn parse_document(text: &str, format: DocumentFormat) -> std::result::Result<Value, String> {
    match format {
        DocumentFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        DocumentFormat::Yaml => parse_yaml_stream(text),
    }
}

/// A YAML stream with several `---` documents becomes a list of them.
fn parse_yaml_stream(text: &str) -> std::result::Result<Value, String> {
    let mut documents = serde_yaml::Deserializer::from_str(text)
        .map(|doc| Value::deserialize(doc).map_err(|e| e.to_string()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(match documents.len() {
        0 => Value::Null,
        1 => documents.remove(0),
        _ => Value::Array(documents),
    })
}

/// Read and parse a document, picking the format from the extension
/// (unknown extensions are read as JSON).
pub fn load_document(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|e| ImportError::io(path, e))?;
    let format = DocumentFormat::from_path(path).unwrap_or(DocumentFormat::Json);
    parse_document(&text, format).map_err(|msg| ImportError::parse(path, msg))
}

/// A list or map found under a matching key.
#[derive(Debug, Clone)]
pub struct KeyedContainer<'a> {
    /// JSON pointer of the container inside its document.
    pub pointer: String,
    pub key: &'a str,
    pub value: &'a Value,
}

/// Walk `root` and collect every list/map stored under a key accepted by
/// `predicate`. Matched containers are not descended into; everything else
/// is, in document order.
pub fn find_keyed_containers<'a, P>(root: &'a Value, predicate: P) -> Vec<KeyedContainer<'a>>
where
    P: Fn(&str) -> bool,
{
    let mut out = Vec::new();
    visit(root, String::new(), &predicate, &mut out);
    out
}

fn visit<'a, P>(value: &'a Value, pointer: String, predicate: &P, out: &mut Vec<KeyedContainer<'a>>)
where
    P: Fn(&str) -> bool,
{
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_pointer = format!("{pointer}/{}", escape_pointer(key));
                let is_container = matches!(child, Value::Array(_) | Value::Object(_));
                if is_container && predicate(key) {
                    out.push(KeyedContainer {
                        pointer: child_pointer,
                        key: key.as_str(),
                        value: child,
                    });
                } else {
                    visit(child, child_pointer, predicate, out);
                }
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                visit(child, format!("{pointer}/{i}"), predicate, out);
            }
        }
        _ => {}
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Object-shaped members of a container: list elements or map values.
pub fn object_members(container: &Value) -> Vec<&Map<String, Value>> {
    match container {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(map) => map.values().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

/// First alias holding a non-empty string or a number, as text.
pub fn first_text(record: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| match record.get(*alias)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First alias holding a present (non-null, non-empty) value.
pub fn first_present<'a>(record: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| record.get(*alias))
        .find(|v| is_present(v))
}

pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Count non-empty scalar leaves, skipping the top-level `skip_key` subtree.
pub fn count_scalar_leaves(value: &Value, skip_key: Option<&str>) -> usize {
    match value {
        Value::Object(map) => map
            .iter()
            .filter(|(k, _)| Some(k.as_str()) != skip_key)
            .map(|(_, v)| count_scalar_leaves(v, None))
            .sum(),
        Value::Array(items) => items.iter().map(|v| count_scalar_leaves(v, None)).sum(),
        Value::String(s) => usize::from(!s.trim().is_empty()),
        Value::Number(_) | Value::Bool(_) => 1,
        Value::Null => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn relation_key(key: &str) -> bool {
        key.to_ascii_lowercase().contains("assertion")
    }

    #[test]
    fn finds_nested_containers_without_descending_into_matches() {
        let doc = json!({
            "entity": {
                "assertions": [{"id": "a1", "assertions": [{"id": "inner"}]}],
                "meta": [{"more": {"assertions": {"x": {"id": "a2"}}}}]
            },
            "assertions": "not a container"
        });
        let found = find_keyed_containers(&doc, relation_key);
        let pointers: Vec<&str> = found.iter().map(|c| c.pointer.as_str()).collect();
        assert_eq!(pointers, vec!["/entity/assertions", "/entity/meta/0/more/assertions"]);
    }

    #[test]
    fn object_members_accepts_lists_and_maps() {
        let list = json!([{"id": 1}, "skip", {"id": 2}]);
        let map = json!({"a": {"id": 1}, "b": 3});
        assert_eq!(object_members(&list).len(), 2);
        assert_eq!(object_members(&map).len(), 1);
    }

    #[test]
    fn first_text_skips_blank_and_accepts_numbers() {
        let rec = json!({"subject": "  ", "subject_qid": 42});
        let rec = rec.as_object().unwrap();
        assert_eq!(first_text(rec, &["subject", "subject_qid"]).as_deref(), Some("42"));
        assert_eq!(first_text(rec, &["missing"]), None);
    }

    #[test]
    fn scalar_leaf_count_skips_named_subtree() {
        let rec = json!({
            "id": "a1",
            "empty": "",
            "nested": {"flag": true, "none": null, "list": [1, 2]},
            "extensions": {"raw": {"a": 1, "b": 2}}
        });
        assert_eq!(count_scalar_leaves(&rec, Some("extensions")), 4);
        assert_eq!(count_scalar_leaves(&rec, None), 6);
    }

    #[test]
    fn yaml_and_json_load_into_same_tree() {
        let yaml = "rows:\n  - id: n1\n    year: 1001\n";
        let json_text = r#"{"rows":[{"id":"n1","year":1001}]}"#;
        let a = parse_document(yaml, DocumentFormat::Yaml).unwrap();
        let b = parse_document(json_text, DocumentFormat::Json).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn multi_document_yaml_becomes_a_list() {
        let yaml = "---\nassertions:\n  - id: a1\n---\nassertions:\n  - id: a2\n";
        let doc = parse_document(yaml, DocumentFormat::Yaml).unwrap();
        assert_eq!(
            doc,
            json!([{"assertions": [{"id": "a1"}]}, {"assertions": [{"id": "a2"}]}])
        );
        let found = find_keyed_containers(&doc, relation_key);
        let pointers: Vec<&str> = found.iter().map(|c| c.pointer.as_str()).collect();
        assert_eq!(pointers, vec!["/0/assertions", "/1/assertions"]);

        let single = parse_document("---\nid: n1\n", DocumentFormat::Yaml).unwrap();
        assert_eq!(single, json!({"id": "n1"}));
    }
}
