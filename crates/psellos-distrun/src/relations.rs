//! Relationship (assertion) extraction.
//!
//! Two mutually exclusive strategies:
//!
//! - **index**: a non-empty `indexes/assertions_by_id.json` is taken as-is,
//!   one candidate per entry;
//! - **heuristic**: every JSON/YAML document under `entities/` is scanned for
//!   containers stored under relationship-like keys (`assertions`,
//!   `relationships`, ...), and every object inside such a container becomes
//!   a candidate.
//!
//! Both strategies run the same normalization: field aliases, placeholder
//! endpoints, predicate/layer fallbacks, and verbatim preservation of the
//! source row under `extensions.psellos.raw`.

use crate::document::{
    find_keyed_containers, first_present, first_text, load_document, object_members,
    DocumentFormat,
};
use crate::error::Result;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

pub const BASELINE_LAYER: &str = "canon";
pub const DEFAULT_PREDICATE: &str = "related_to";
pub const PLACEHOLDER_PREFIX: &str = "unknown:";

/// Top-level key of the audit block. Scoring ignores its scalar leaves.
pub const EXTENSIONS_KEY: &str = "extensions";
pub const EXTENSIONS_NAMESPACE: &str = "psellos";

pub const ID_ALIASES: &[&str] = &["id", "assertion_id", "relationship_id"];
pub const SUBJECT_ALIASES: &[&str] = &["subject", "subject_qid", "subjectId", "subject_id", "source_qid"];
pub const OBJECT_ALIASES: &[&str] = &["object", "object_qid", "objectId", "object_id", "target_qid", "target"];
pub const PREDICATE_ALIASES: &[&str] = &[
    "predicate",
    "relation_mapped",
    "predicate_pid",
    "relation",
    "rel",
    "relationship",
];
pub const LAYER_ALIASES: &[&str] = &["layer", "layer_id", "narrative_layer"];
pub const SOURCE_ALIASES: &[&str] = &["source", "source_id", "source_ref", "citation"];
pub const DATE_ALIASES: &[&str] = &["date", "date_range", "year", "when", "start_date", "time"];

/// Relationship-like container keys, matched case-insensitively by substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationKeyPredicate {
    fragments: Vec<String>,
}

impl Default for RelationKeyPredicate {
    fn default() -> Self {
        Self::new(["assertion", "relation"])
    }
}

impl RelationKeyPredicate {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fragments: fragments
                .into_iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.fragments.iter().any(|f| key.contains(f.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Index,
    Heuristic,
}

/// Where a candidate came from (relative file + JSON pointer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateOrigin {
    pub file: String,
    pub pointer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipCandidate {
    pub id: String,
    pub record: Map<String, Value>,
    pub origin: CandidateOrigin,
}

impl RelationshipCandidate {
    pub fn layer(&self) -> &str {
        record_str(&self.record, "layer").unwrap_or(BASELINE_LAYER)
    }

    pub fn is_narrative(&self) -> bool {
        is_narrative_record(&self.record)
    }
}

pub fn record_str<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// The `extensions.psellos` block of a normalized record.
pub fn psellos_extension(record: &Map<String, Value>) -> Option<&Map<String, Value>> {
    record
        .get(EXTENSIONS_KEY)?
        .get(EXTENSIONS_NAMESPACE)?
        .as_object()
}

pub fn is_narrative_record(record: &Map<String, Value>) -> bool {
    psellos_extension(record)
        .and_then(|ext| ext.get("assertion_class"))
        .and_then(Value::as_str)
        == Some(crate::narrative::NARRATIVE_CLASS)
}

/// Candidates grouped by id; encounter order is kept within an id.
#[derive(Debug, Clone, Default)]
pub struct CandidateSets {
    sets: BTreeMap<String, Vec<RelationshipCandidate>>,
}

impl CandidateSets {
    pub fn push(&mut self, candidate: RelationshipCandidate) {
        self.sets
            .entry(candidate.id.clone())
            .or_default()
            .push(candidate);
    }

    pub fn get(&self, id: &str) -> Option<&[RelationshipCandidate]> {
        self.sets.get(id).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<RelationshipCandidate>)> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn candidate_count(&self) -> usize {
        self.sets.values().map(Vec::len).sum()
    }
}

/// Best-effort relationship fields pulled from a loosely shaped row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssertionFields {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
    pub layer: Option<String>,
    pub source: Option<String>,
    pub date: Option<Value>,
}

impl AssertionFields {
    pub fn from_row(row: &Map<String, Value>) -> Self {
        Self {
            subject: first_text(row, SUBJECT_ALIASES),
            predicate: first_text(row, PREDICATE_ALIASES),
            object: first_text(row, OBJECT_ALIASES),
            layer: first_text(row, LAYER_ALIASES),
            source: first_text(row, SOURCE_ALIASES),
            date: first_present(row, DATE_ALIASES).cloned(),
        }
    }

    /// Fill absent subject/predicate/object/layer from a normalized record.
    pub fn inherit_from(mut self, base: &Map<String, Value>) -> Self {
        let take = |key: &str| record_str(base, key).map(str::to_string);
        self.subject = self.subject.or_else(|| take("subject"));
        self.predicate = self.predicate.or_else(|| take("predicate"));
        self.object = self.object.or_else(|| take("object"));
        self.layer = self.layer.or_else(|| take("layer"));
        self
    }

    pub fn resolved_layer(&self) -> &str {
        self.layer.as_deref().unwrap_or(BASELINE_LAYER)
    }

    /// Build the normalized record. `extension` receives `raw` and
    /// `provenance`; callers may pre-populate it with extra audit fields.
    pub fn into_record(
        self,
        id: &str,
        raw: &Map<String, Value>,
        mut extension: Map<String, Value>,
        warnings: &mut Vec<String>,
    ) -> (Map<String, Value>, usize) {
        let mut placeholders = 0;
        let mut endpoint = |value: Option<String>, role: &str| match value {
            Some(v) => v,
            None => {
                placeholders += 1;
                let token = format!("{PLACEHOLDER_PREFIX}{role}:{id}");
                warnings.push(format!(
                    "Relationship {id}: missing {role}; substituted {token}"
                ));
                token
            }
        };
        let subject = endpoint(self.subject.clone(), "subject");
        let object = endpoint(self.object.clone(), "object");

        let mut record = Map::new();
        record.insert("id".into(), Value::String(id.to_string()));
        record.insert("subject".into(), Value::String(subject));
        record.insert(
            "predicate".into(),
            Value::String(self.predicate.clone().unwrap_or_else(|| DEFAULT_PREDICATE.to_string())),
        );
        record.insert("object".into(), Value::String(object));
        record.insert("layer".into(), Value::String(self.resolved_layer().to_string()));
        if let Some(source) = self.source {
            record.insert("source".into(), Value::String(source));
        }

        extension.insert("raw".into(), Value::Object(raw.clone()));
        if let Some(date) = self.date {
            extension.insert("provenance".into(), json!({ "date": date }));
        }
        let mut extensions = Map::new();
        extensions.insert(EXTENSIONS_NAMESPACE.into(), Value::Object(extension));
        record.insert(EXTENSIONS_KEY.into(), Value::Object(extensions));
        (record, placeholders)
    }
}

/// Extraction output plus the bookkeeping the run report needs.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub sets: CandidateSets,
    pub strategy: ExtractionStrategy,
    pub source_files: Vec<String>,
    pub skipped_records: usize,
    pub placeholder_endpoints: usize,
    pub warnings: Vec<String>,
}

impl Extraction {
    fn new(strategy: ExtractionStrategy) -> Self {
        Self {
            sets: CandidateSets::default(),
            strategy,
            source_files: Vec::new(),
            skipped_records: 0,
            placeholder_endpoints: 0,
            warnings: Vec::new(),
        }
    }

    /// Normalize one raw row and add it to the candidate sets.
    fn ingest_row(&mut self, id_hint: Option<&str>, row: &Map<String, Value>, origin: CandidateOrigin) {
        let id = first_text(row, ID_ALIASES).or_else(|| {
            id_hint
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        });
        let Some(id) = id else {
            self.skipped_records += 1;
            return;
        };
        let (record, placeholders) =
            AssertionFields::from_row(row).into_record(&id, row, Map::new(), &mut self.warnings);
        self.placeholder_endpoints += placeholders;
        self.sets.push(RelationshipCandidate { id, record, origin });
    }
}

/// Run the index strategy when `index_path` holds a non-empty index, the
/// heuristic scan of `entities_dir` otherwise.
pub fn extract_relationships(
    index_path: &Path,
    entities_dir: &Path,
    predicate: &RelationKeyPredicate,
) -> Result<Extraction> {
    if index_path.is_file() {
        let index = load_document(index_path)?;
        if let Some(extraction) = extract_from_index(&index, &file_label(index_path)) {
            return Ok(extraction);
        }
        debug!(path = %index_path.display(), "relationship index is empty; falling back to heuristic scan");
    }
    Ok(extract_heuristic(entities_dir, predicate))
}

/// One candidate per index entry. `None` when the index holds nothing.
pub fn extract_from_index(index: &Value, file: &str) -> Option<Extraction> {
    let mut extraction = Extraction::new(ExtractionStrategy::Index);
    match index {
        Value::Object(map) if !map.is_empty() => {
            for (key, entry) in map {
                if let Value::Object(row) = entry {
                    let origin = CandidateOrigin {
                        file: file.to_string(),
                        pointer: format!("/{key}"),
                    };
                    extraction.ingest_row(Some(key), row, origin);
                } else {
                    extraction.skipped_records += 1;
                }
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, entry) in items.iter().enumerate() {
                if let Value::Object(row) = entry {
                    let origin = CandidateOrigin {
                        file: file.to_string(),
                        pointer: format!("/{i}"),
                    };
                    extraction.ingest_row(None, row, origin);
                } else {
                    extraction.skipped_records += 1;
                }
            }
        }
        _ => return None,
    }
    extraction.source_files.push(file.to_string());
    Some(extraction)
}

/// Scan every JSON/YAML document below `entities_dir`, in relative-path order.
pub fn extract_heuristic(entities_dir: &Path, predicate: &RelationKeyPredicate) -> Extraction {
    let mut extraction = Extraction::new(ExtractionStrategy::Heuristic);

    let mut files: Vec<(String, std::path::PathBuf)> = WalkDir::new(entities_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| DocumentFormat::from_path(entry.path()).is_some())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(entities_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            (rel, entry.into_path())
        })
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));

    if files.is_empty() {
        extraction
            .warnings
            .push("No .json/.yml/.yaml relationship source files detected under entities/".to_string());
    }

    for (rel, path) in files {
        let document = match load_document(&path) {
            Ok(doc) => doc,
            Err(err) => {
                debug!(file = %rel, "skipping unparseable relationship source");
                extraction
                    .warnings
                    .push(format!("Skipped unparseable relationship source {rel}: {err}"));
                continue;
            }
        };
        let containers = find_keyed_containers(&document, |key| predicate.matches(key));
        debug!(file = %rel, containers = containers.len(), "scanned relationship source");
        for container in &containers {
            let keys: Vec<Option<&str>> = match container.value {
                Value::Object(map) => map
                    .iter()
                    .filter(|(_, v)| v.is_object())
                    .map(|(k, _)| Some(k.as_str()))
                    .collect(),
                _ => vec![None; object_members(container.value).len()],
            };
            for (i, (row, key)) in object_members(container.value)
                .into_iter()
                .zip(keys)
                .enumerate()
            {
                let pointer = match key {
                    Some(k) => format!("{}/{k}", container.pointer),
                    None => format!("{}/{i}", container.pointer),
                };
                let origin = CandidateOrigin {
                    file: rel.clone(),
                    pointer,
                };
                extraction.ingest_row(key, row, origin);
            }
        }
        extraction.source_files.push(rel);
    }

    extraction
}

fn file_label(path: &Path) -> String {
    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string());
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match parent {
        Some(parent) => format!("{parent}/{name}"),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn predicate_and_layer_fall_back() {
        let raw = row(json!({"id": "a9", "subject_qid": "p1", "object_qid": "p2"}));
        let mut warnings = Vec::new();
        let (record, placeholders) =
            AssertionFields::from_row(&raw).into_record("a9", &raw, Map::new(), &mut warnings);
        assert_eq!(record["predicate"], "related_to");
        assert_eq!(record["layer"], "canon");
        assert_eq!(placeholders, 0);
        assert!(warnings.is_empty());
        assert!(record.get("source").is_none());
        assert_eq!(record["extensions"]["psellos"]["raw"], Value::Object(raw));
    }

    #[test]
    fn missing_endpoints_become_placeholders_with_warnings() {
        let raw = row(json!({"id": "a3", "predicate": "knows"}));
        let mut warnings = Vec::new();
        let (record, placeholders) =
            AssertionFields::from_row(&raw).into_record("a3", &raw, Map::new(), &mut warnings);
        assert_eq!(record["subject"], "unknown:subject:a3");
        assert_eq!(record["object"], "unknown:object:a3");
        assert_eq!(placeholders, 2);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn source_and_date_are_captured() {
        let raw = row(json!({"id": "a1", "subject": "p1", "object": "p2", "source": "src", "date": 1001}));
        let mut warnings = Vec::new();
        let (record, _) =
            AssertionFields::from_row(&raw).into_record("a1", &raw, Map::new(), &mut warnings);
        assert_eq!(record["source"], "src");
        assert_eq!(record["extensions"]["psellos"]["provenance"]["date"], 1001);
    }

    #[test]
    fn relation_key_predicate_is_case_insensitive() {
        let p = RelationKeyPredicate::default();
        assert!(p.matches("Assertions"));
        assert!(p.matches("relationships"));
        assert!(!p.matches("persons"));
    }

    #[test]
    fn index_entries_use_key_as_fallback_id() {
        let index = json!({"k1": {"subject": "p1", "object": "p2"}, "k2": "junk"});
        let extraction = extract_from_index(&index, "indexes/assertions_by_id.json").unwrap();
        assert_eq!(extraction.strategy, ExtractionStrategy::Index);
        assert!(extraction.sets.get("k1").is_some());
        assert_eq!(extraction.skipped_records, 1);
    }

    #[test]
    fn empty_index_defers_to_heuristic() {
        assert!(extract_from_index(&json!({}), "x").is_none());
        assert!(extract_from_index(&json!([]), "x").is_none());
    }

    #[test]
    fn duplicate_ids_accumulate_in_encounter_order() {
        let mut extraction = Extraction::new(ExtractionStrategy::Heuristic);
        for (i, pred) in ["first", "second"].iter().enumerate() {
            extraction.ingest_row(
                None,
                &row(json!({"id": "a1", "subject": "p1", "object": "p2", "predicate": pred})),
                CandidateOrigin {
                    file: "f.yml".into(),
                    pointer: format!("/{i}"),
                },
            );
        }
        extraction.ingest_row(
            None,
            &row(json!({"subject": "p1"})),
            CandidateOrigin {
                file: "f.yml".into(),
                pointer: "/2".into(),
            },
        );
        let set = extraction.sets.get("a1").unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].record["predicate"], "first");
        assert_eq!(extraction.skipped_records, 1);
    }
}
