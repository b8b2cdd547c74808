//! Narrative-layer merge.
//!
//! `narrative_layer_assertions.yml` carries relationship-shaped rows that are
//! not first-class identity-linking facts. Each row may point at a resolved
//! primary relationship (`linked_assertion_id`) and inherit its layer and
//! endpoints. Rows are tagged `assertion_class = "narrative_layer"` and folded
//! into the same id space: a row whose id collides with a primary record goes
//! through conflict resolution again and may lose.

use crate::document::{first_text, load_document};
use crate::error::Result;
use crate::relations::{AssertionFields, CandidateOrigin, CandidateSets, RelationshipCandidate};
use crate::scoring::{resolve, ConflictEntry, ConflictStage, RelationshipTable, ScoreWeights};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

pub const NARRATIVE_FILE: &str = "narrative_layer_assertions.yml";
pub const NARRATIVE_CLASS: &str = "narrative_layer";

const LINK_ALIASES: &[&str] = &[
    "linked_assertion_id",
    "linked_id",
    "base_assertion_id",
    "assertion_ref",
];
const NARRATIVE_ID_ALIASES: &[&str] = &["id", "narrative_id"];
const ROW_LIST_KEYS: &[&str] = &["rows", "assertions", "items"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NarrativeSummary {
    pub detected: bool,
    pub path: Option<String>,
    pub rows: usize,
    pub linked: usize,
    pub unlinked: usize,
    pub synthesized_ids: usize,
    /// Row-list entries that are not objects.
    pub skipped_rows: usize,
    /// Narrative ids that already had a record and were re-resolved.
    pub collisions: usize,
    /// Narrative records present in the final table.
    pub merged: usize,
}

impl NarrativeSummary {
    pub fn not_detected() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct NarrativeOutcome {
    pub table: RelationshipTable,
    pub conflicts: Vec<ConflictEntry>,
    pub summary: NarrativeSummary,
    pub placeholder_endpoints: usize,
    pub warnings: Vec<String>,
}

/// Row list of a narrative document: a root list, or a `rows` /
/// `assertions` / `items` list.
#[derive(Debug, Clone, Default)]
pub struct NarrativeRows<'a> {
    /// JSON pointer of the row list.
    pub pointer: String,
    /// Object rows with their position in the list.
    pub rows: Vec<(usize, &'a Map<String, Value>)>,
    /// List entries that are not objects.
    pub skipped: usize,
    /// Set when a non-empty document holds no row list at all.
    pub no_row_list: bool,
}

pub fn narrative_rows(document: &Value) -> NarrativeRows<'_> {
    let list = match document {
        Value::Array(items) => Some((String::new(), items)),
        Value::Object(map) => ROW_LIST_KEYS.iter().find_map(|key| match map.get(*key) {
            Some(Value::Array(items)) => Some((format!("/{key}"), items)),
            _ => None,
        }),
        _ => None,
    };
    let Some((pointer, items)) = list else {
        return NarrativeRows {
            no_row_list: !document.is_null(),
            ..NarrativeRows::default()
        };
    };

    let mut rows = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for (i, item) in items.iter().enumerate() {
        match item.as_object() {
            Some(row) => rows.push((i, row)),
            None => skipped += 1,
        }
    }
    NarrativeRows {
        pointer,
        rows,
        skipped,
        no_row_list: false,
    }
}

/// `base`, or `base:<row>` repeated until it is not in `taken`.
fn unique_id(base: String, row: usize, taken: &BTreeSet<String>) -> String {
    if !taken.contains(&base) {
        return base;
    }
    let mut id = format!("{base}:{row}");
    while taken.contains(&id) {
        id.push_str(&format!(":{row}"));
    }
    id
}

/// Turn narrative rows into tagged candidates, inheriting from linked
/// primary records.
pub fn narrative_candidates(
    document: &Value,
    file: &str,
    primary: &RelationshipTable,
    summary: &mut NarrativeSummary,
    warnings: &mut Vec<String>,
) -> (Vec<RelationshipCandidate>, usize) {
    let parsed = narrative_rows(document);
    summary.rows = parsed.rows.len();
    summary.skipped_rows = parsed.skipped;
    if parsed.no_row_list {
        warnings.push(format!(
            "Narrative file {file} has no rows/assertions/items list"
        ));
    }
    if parsed.skipped > 0 {
        warnings.push(format!(
            "Skipped {} narrative rows that are not objects",
            parsed.skipped
        ));
    }

    // Synthesized ids avoid primary ids and every explicit narrative id.
    let mut taken: BTreeSet<String> = primary
        .keys()
        .cloned()
        .chain(
            parsed
                .rows
                .iter()
                .filter_map(|(_, row)| first_text(row, NARRATIVE_ID_ALIASES)),
        )
        .collect();
    let mut placeholders = 0;
    let mut out = Vec::with_capacity(parsed.rows.len());

    for (i, row) in parsed.rows {
        let link = first_text(row, LINK_ALIASES);
        let linked = link.as_deref().and_then(|id| primary.get(id));
        let mut fields = AssertionFields::from_row(row);
        match linked {
            Some(base) => {
                summary.linked += 1;
                fields = fields.inherit_from(&base.candidate.record);
            }
            None => summary.unlinked += 1,
        }
        if let (Some(link), None) = (&link, linked) {
            warnings.push(format!(
                "Narrative row {i}: linked relationship {link} not found"
            ));
        }

        let id = match first_text(row, NARRATIVE_ID_ALIASES) {
            Some(id) => id,
            None => {
                summary.synthesized_ids += 1;
                let anchor = link.clone().unwrap_or_else(|| format!("row-{i}"));
                let base = format!("narrative:{}:{anchor}", fields.resolved_layer());
                let id = unique_id(base, i, &taken);
                taken.insert(id.clone());
                id
            }
        };

        let mut extension = Map::new();
        extension.insert("assertion_class".into(), Value::String(NARRATIVE_CLASS.to_string()));
        extension.insert("narrative".into(), Value::Object(row.clone()));
        if let Some(base) = linked {
            extension.insert("linked_assertion_id".into(), Value::String(base.candidate.id.clone()));
        }
        let (record, p) = fields.into_record(&id, row, extension, warnings);
        placeholders += p;

        out.push(RelationshipCandidate {
            id,
            record,
            origin: CandidateOrigin {
                file: file.to_string(),
                pointer: format!("{}/{i}", parsed.pointer),
            },
        });
    }

    (out, placeholders)
}

/// Fold narrative candidates into the resolved table. Each touched id is
/// re-resolved together with any record it already had.
pub fn merge_narrative(
    mut table: RelationshipTable,
    candidates: Vec<RelationshipCandidate>,
    weights: &ScoreWeights,
) -> (RelationshipTable, Vec<ConflictEntry>, usize) {
    let mut sets = CandidateSets::default();
    let mut seeded: BTreeSet<String> = BTreeSet::new();
    for candidate in candidates {
        if seeded.insert(candidate.id.clone()) {
            if let Some(existing) = table.get(&candidate.id) {
                sets.push(existing.candidate.clone());
            }
        }
        sets.push(candidate);
    }

    let mut conflicts = Vec::new();
    let mut collisions = 0;
    for (id, set) in sets.iter() {
        let Some(resolution) = resolve(set, weights) else {
            continue;
        };
        if !resolution.discarded.is_empty() {
            collisions += 1;
            conflicts.push(ConflictEntry::from_resolution(id, ConflictStage::Narrative, &resolution));
        }
        table.insert(id.clone(), resolution.winner);
    }
    (table, conflicts, collisions)
}

/// Apply `narrative_layer_assertions.yml` when present; a no-op otherwise.
pub fn apply_narrative_layer(
    path: &Path,
    file_label: &str,
    table: RelationshipTable,
    weights: &ScoreWeights,
) -> Result<NarrativeOutcome> {
    if !path.is_file() {
        debug!("no narrative layer input");
        return Ok(NarrativeOutcome {
            table,
            conflicts: Vec::new(),
            summary: NarrativeSummary::not_detected(),
            placeholder_endpoints: 0,
            warnings: Vec::new(),
        });
    }

    let document = load_document(path)?;
    let mut summary = NarrativeSummary {
        detected: true,
        path: Some(file_label.to_string()),
        ..NarrativeSummary::default()
    };
    let mut warnings = Vec::new();
    let (candidates, placeholder_endpoints) =
        narrative_candidates(&document, file_label, &table, &mut summary, &mut warnings);
    let (table, conflicts, collisions) = merge_narrative(table, candidates, weights);
    summary.collisions = collisions;
    summary.merged = table
        .values()
        .filter(|s| s.candidate.is_narrative())
        .count();
    info!(rows = summary.rows, merged = summary.merged, "merged narrative layer");

    Ok(NarrativeOutcome {
        table,
        conflicts,
        summary,
        placeholder_endpoints,
        warnings,
    })
}
