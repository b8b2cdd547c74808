//! Derived indexes and the manifest.
//!
//! Everything here is a pure function of the final relationship table (plus
//! the entity table for the manifest). Id lists are `BTreeSet`s, so they are
//! deduplicated and serialize sorted; all maps are `BTreeMap`s.

use crate::document::{first_text, load_document};
use crate::entities::EntityTable;
use crate::relations::{record_str, BASELINE_LAYER, PLACEHOLDER_PREFIX};
use crate::scoring::RelationshipTable;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const MANIFEST_SPEC_VERSION: &str = "psellos.dist_run.v1";
pub const UNKNOWN_PROVENANCE: &str = "unknown";

pub type IdIndex = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedIndexes {
    pub by_layer: IdIndex,
    pub layers: Vec<String>,
    /// Non-narrative relationships by endpoint identity.
    pub by_person: IdIndex,
    pub by_person_by_layer: BTreeMap<String, IdIndex>,
}

fn is_person_endpoint(id: &str) -> bool {
    !id.is_empty() && !id.starts_with(PLACEHOLDER_PREFIX)
}

pub fn build_indexes(table: &RelationshipTable) -> DerivedIndexes {
    let mut out = DerivedIndexes::default();
    for (id, resolved) in table {
        let record = &resolved.candidate.record;
        let layer = record_str(record, "layer").unwrap_or(BASELINE_LAYER);
        out.by_layer
            .entry(layer.to_string())
            .or_default()
            .insert(id.clone());

        if resolved.candidate.is_narrative() {
            continue;
        }
        for key in ["subject", "object"] {
            let Some(person) = record_str(record, key).filter(|p| is_person_endpoint(p)) else {
                continue;
            };
            out.by_person
                .entry(person.to_string())
                .or_default()
                .insert(id.clone());
            out.by_person_by_layer
                .entry(person.to_string())
                .or_default()
                .entry(layer.to_string())
                .or_default()
                .insert(id.clone());
        }
    }
    out.layers = out.by_layer.keys().cloned().collect();
    out
}

/// Relationship records sorted by id.
pub fn relationship_array(table: &RelationshipTable) -> Vec<&Map<String, Value>> {
    table.values().map(|r| &r.candidate.record).collect()
}

pub fn relationship_map(table: &RelationshipTable) -> BTreeMap<&str, &Map<String, Value>> {
    table
        .iter()
        .map(|(id, r)| (id.as_str(), &r.candidate.record))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuilderProvenance {
    pub builder_version: String,
    pub generated_at: String,
}

impl Default for BuilderProvenance {
    fn default() -> Self {
        Self {
            builder_version: UNKNOWN_PROVENANCE.to_string(),
            generated_at: UNKNOWN_PROVENANCE.to_string(),
        }
    }
}

impl BuilderProvenance {
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        let defaults = Self::default();
        Self {
            builder_version: first_text(map, &["builder_version", "version"])
                .unwrap_or(defaults.builder_version),
            generated_at: first_text(map, &["generated_at", "built_at"])
                .unwrap_or(defaults.generated_at),
        }
    }

    /// Read `reports/run_summary.json`. Absent → defaults; unparseable →
    /// defaults plus a warning.
    pub fn load(path: &Path, warnings: &mut Vec<String>) -> Self {
        if !path.is_file() {
            return Self::default();
        }
        match load_document(path) {
            Ok(value) => Self::from_value(&value),
            Err(err) => {
                warnings.push(format!("Ignoring unreadable run summary: {err}"));
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestCounts {
    pub assertions: usize,
    pub layers: usize,
    pub persons: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub builder: BuilderProvenance,
    pub counts: ManifestCounts,
    /// Identity → label.
    pub person_index: BTreeMap<String, String>,
    pub spec_version: String,
}

pub fn build_manifest(
    entities: &EntityTable,
    table: &RelationshipTable,
    indexes: &DerivedIndexes,
    builder: BuilderProvenance,
) -> Manifest {
    Manifest {
        builder,
        counts: ManifestCounts {
            assertions: table.len(),
            layers: indexes.layers.len(),
            persons: entities.len(),
        },
        person_index: entities
            .iter()
            .map(|(id, e)| (id.clone(), e.label.clone()))
            .collect(),
        spec_version: MANIFEST_SPEC_VERSION.to_string(),
    }
}
