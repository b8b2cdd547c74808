//! Canonical entity consolidation.
//!
//! Per-type files under `machine/` (`persons.canonical.json`,
//! `groups.canonical.json`, ...) are merged into one identity table keyed by
//! `qid` (falling back to `id`). A record may appear in several files; types
//! and source ids are unioned, the first supplied label wins, and the primary
//! type is recomputed after every merge from an injected precedence order.

use crate::document::{first_text, load_document};
use crate::error::{ImportError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

pub const CANONICAL_SUFFIX: &str = ".canonical.json";
const RELATIONSHIP_CANONICAL_FILE: &str = "assertions.canonical.json";

pub const DEFAULT_TYPE_PRECEDENCE: &[&str] = &[
    "persons",
    "groups",
    "polities",
    "institutions",
    "offices",
    "places",
    "artifacts",
    "texts",
    "sources",
    "species",
];

/// Ordered ranking of entity type categories used to pick `entity_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypePrecedence {
    order: Vec<String>,
}

impl Default for TypePrecedence {
    fn default() -> Self {
        Self::new(DEFAULT_TYPE_PRECEDENCE.iter().copied())
    }
}

impl TypePrecedence {
    pub fn new<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            order: order
                .into_iter()
                .map(|s| normalize_type(s.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Rank of a type; unranked types share `usize::MAX`.
    pub fn rank(&self, ty: &str) -> usize {
        self.order
            .iter()
            .position(|t| t == ty)
            .unwrap_or(usize::MAX)
    }

    /// Best-ranked type; ties (including all unranked) break lexicographically.
    pub fn primary<'a, I>(&self, types: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        types
            .into_iter()
            .min_by(|a, b| self.rank(a).cmp(&self.rank(b)).then_with(|| a.cmp(b)))
            .map(String::as_str)
    }
}

pub fn normalize_type(value: &str) -> String {
    value.trim().to_lowercase()
}

/// One merged identity. Fields are declared in lexicographic order so the
/// serialized object has sorted keys like every other artifact map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEntity {
    /// Primary type.
    pub entity_type: String,
    pub entity_types: BTreeSet<String>,
    pub id: String,
    pub label: String,
    pub qid: String,
    pub source_entity_ids: BTreeSet<String>,
    #[serde(skip)]
    label_supplied: bool,
}

pub type EntityTable = BTreeMap<String, CanonicalEntity>;

/// Result of consolidating a `machine/` directory.
#[derive(Debug, Clone, Default)]
pub struct EntityConsolidation {
    pub entities: EntityTable,
    pub files: Vec<String>,
    /// Records dropped for lacking an identity.
    pub skipped_records: usize,
}

/// Builder keyed by identity.
#[derive(Debug, Clone)]
pub struct EntityConsolidator {
    precedence: TypePrecedence,
    entities: EntityTable,
    skipped_records: usize,
}

impl EntityConsolidator {
    pub fn new(precedence: TypePrecedence) -> Self {
        Self {
            precedence,
            entities: BTreeMap::new(),
            skipped_records: 0,
        }
    }

    /// Merge one loosely typed record. Returns `false` when it was skipped.
    pub fn add_record(&mut self, type_from_file: &str, row: &Map<String, Value>) -> bool {
        let Some(qid) = first_text(row, &["qid", "id"]) else {
            self.skipped_records += 1;
            return false;
        };

        let mut types: BTreeSet<String> = BTreeSet::new();
        types.insert(normalize_type(type_from_file));
        for key in ["entity_type", "type"] {
            if let Some(Value::String(s)) = row.get(key) {
                types.insert(normalize_type(s));
            }
        }
        if let Some(Value::Array(list)) = row.get("entity_types") {
            types.extend(list.iter().filter_map(Value::as_str).map(normalize_type));
        }
        types.remove("");

        let source_ids = source_entity_ids(row);
        let label = first_text(row, &["label", "name"]);

        let entry = self
            .entities
            .entry(qid.clone())
            .or_insert_with(|| CanonicalEntity {
                entity_type: String::new(),
                entity_types: BTreeSet::new(),
                id: qid.clone(),
                label: qid.clone(),
                qid: qid.clone(),
                source_entity_ids: BTreeSet::new(),
                label_supplied: false,
            });

        entry.entity_types.extend(types);
        entry.source_entity_ids.extend(source_ids);
        if !entry.label_supplied {
            if let Some(label) = label {
                entry.label = label;
                entry.label_supplied = true;
            }
        }
        entry.entity_type = self
            .precedence
            .primary(&entry.entity_types)
            .unwrap_or("unknown")
            .to_string();
        true
    }

    pub fn finish(self, files: Vec<String>) -> EntityConsolidation {
        EntityConsolidation {
            entities: self.entities,
            files,
            skipped_records: self.skipped_records,
        }
    }
}

fn source_entity_ids(row: &Map<String, Value>) -> Vec<String> {
    if let Some(Value::Array(list)) = row.get("source_entity_ids") {
        return list
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();
    }
    first_text(row, &["source_entity_id", "id"])
        .into_iter()
        .collect()
}

/// Records held by one canonical payload: a list, an `items`/`entities` list,
/// or an object of records and/or record lists.
pub fn collection_records(payload: &Value) -> Vec<&Map<String, Value>> {
    match payload {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(map) => {
            for key in ["items", "entities"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.iter().filter_map(Value::as_object).collect();
                }
            }
            let mut out = Vec::new();
            for value in map.values() {
                match value {
                    Value::Object(record) => out.push(record),
                    Value::Array(items) => out.extend(items.iter().filter_map(Value::as_object)),
                    _ => {}
                }
            }
            out
        }
        _ => Vec::new(),
    }
}

/// Consolidate every `*.canonical.json` file in `machine_dir`, in file-name
/// order. An unparseable file is fatal.
pub fn consolidate_machine_dir(
    machine_dir: &Path,
    precedence: &TypePrecedence,
) -> Result<EntityConsolidation> {
    let mut names: Vec<String> = fs::read_dir(machine_dir)
        .map_err(|e| ImportError::io(machine_dir, e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| name.ends_with(CANONICAL_SUFFIX) && name != RELATIONSHIP_CANONICAL_FILE)
        .collect();
    names.sort();

    let mut consolidator = EntityConsolidator::new(precedence.clone());
    for name in &names {
        let path = machine_dir.join(name);
        let payload = load_document(&path)?;
        let type_from_file = name.trim_end_matches(CANONICAL_SUFFIX);
        let records = collection_records(&payload);
        debug!(file = %name, records = records.len(), "consolidating canonical entities");
        for record in records {
            consolidator.add_record(type_from_file, record);
        }
    }
    Ok(consolidator.finish(names))
}
