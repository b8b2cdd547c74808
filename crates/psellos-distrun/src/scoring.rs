//! Duplicate-id conflict resolution.
//!
//! Every candidate gets a reproducible score:
//!
//! ```text
//! score = scalar_leaves(record minus `extensions`) * scalar_field
//!       + source    if a top-level `source` is present
//!       + layer     if a `layer` is present
//!       + raw       if `extensions.psellos.raw` is present
//!       + temporal  if the serialized record mentions a date/time marker
//! ```
//!
//! The winner is the first candidate with the strictly highest score. Exact
//! ties therefore keep the earliest candidate; encounter order is made stable
//! upstream (sorted source paths, document order within a file).

use crate::document::{count_scalar_leaves, is_present};
use crate::error::{ImportError, Result};
use crate::relations::{
    psellos_extension, CandidateOrigin, CandidateSets, RelationshipCandidate, EXTENSIONS_KEY,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Case-insensitive substrings that earn the temporal bonus.
pub const TEMPORAL_MARKERS: &[&str] = &["date", "time", "year", "century", "period"];

/// The five named score weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub scalar_field: f64,
    pub source: f64,
    pub layer: f64,
    pub temporal: f64,
    pub raw: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            scalar_field: 1.0,
            source: 2.0,
            layer: 2.0,
            temporal: 3.0,
            raw: 3.0,
        }
    }
}

impl ScoreWeights {
    /// Read weights from a JSON object. Missing, non-numeric, non-finite or
    /// negative values keep that key's default. `None` for non-objects.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let defaults = Self::default();
        let pick = |key: &str, fallback: f64| {
            map.get(key)
                .and_then(Value::as_f64)
                .filter(|w| w.is_finite() && *w >= 0.0)
                .unwrap_or(fallback)
        };
        Some(Self {
            scalar_field: pick("scalar_field", defaults.scalar_field),
            source: pick("source", defaults.source),
            layer: pick("layer", defaults.layer),
            temporal: pick("temporal", defaults.temporal),
            raw: pick("raw", defaults.raw),
        })
    }

    /// Load an external score config. A missing file or a file that is not
    /// a JSON object is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ImportError::ScoreConfigNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|e| ImportError::io(path, e))?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| ImportError::InvalidScoreConfig {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::from_value(&value).ok_or_else(|| ImportError::InvalidScoreConfig {
            path: path.to_path_buf(),
            message: "expected a JSON object of weights".to_string(),
        })
    }
}

pub fn has_temporal_marker(record: &Map<String, Value>) -> bool {
    let text = serde_json::to_string(record)
        .unwrap_or_default()
        .to_lowercase();
    TEMPORAL_MARKERS.iter().any(|m| text.contains(m))
}

pub fn score_record(record: &Map<String, Value>, weights: &ScoreWeights) -> f64 {
    let scalars: usize = record
        .iter()
        .filter(|(k, _)| k.as_str() != EXTENSIONS_KEY)
        .map(|(_, v)| count_scalar_leaves(v, None))
        .sum();

    let mut score = scalars as f64 * weights.scalar_field;
    if record.get("source").is_some_and(is_present) {
        score += weights.source;
    }
    if record.get("layer").is_some_and(is_present) {
        score += weights.layer;
    }
    if psellos_extension(record)
        .and_then(|ext| ext.get("raw"))
        .is_some_and(is_present)
    {
        score += weights.raw;
    }
    if has_temporal_marker(record) {
        score += weights.temporal;
    }
    score
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub score: f64,
    pub candidate: RelationshipCandidate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub winner: ScoredCandidate,
    /// Losers in encounter order.
    pub discarded: Vec<ScoredCandidate>,
}

/// Pick one winner among candidates sharing an id. `None` for an empty slice.
pub fn resolve(candidates: &[RelationshipCandidate], weights: &ScoreWeights) -> Option<Resolution> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|c| ScoredCandidate {
            score: score_record(&c.record, weights),
            candidate: c.clone(),
        })
        .collect();
    if scored.is_empty() {
        return None;
    }
    let mut best = 0;
    for (i, s) in scored.iter().enumerate().skip(1) {
        if s.score > scored[best].score {
            best = i;
        }
    }
    let winner = scored.remove(best);
    let discarded = scored;
    Some(Resolution { winner, discarded })
}

/// Which resolution pass produced a conflict entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStage {
    Primary,
    Narrative,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictRow {
    pub score: f64,
    pub origin: CandidateOrigin,
    pub assertion: Map<String, Value>,
}

impl From<&ScoredCandidate> for ConflictRow {
    fn from(s: &ScoredCandidate) -> Self {
        Self {
            score: s.score,
            origin: s.candidate.origin.clone(),
            assertion: s.candidate.record.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictEntry {
    pub id: String,
    pub stage: ConflictStage,
    pub candidates: usize,
    pub winner: ConflictRow,
    pub discarded: Vec<ConflictRow>,
}

impl ConflictEntry {
    pub fn from_resolution(id: &str, stage: ConflictStage, resolution: &Resolution) -> Self {
        Self {
            id: id.to_string(),
            stage,
            candidates: resolution.discarded.len() + 1,
            winner: ConflictRow::from(&resolution.winner),
            discarded: resolution.discarded.iter().map(ConflictRow::from).collect(),
        }
    }
}

/// Final relationship table: one scored winner per id.
pub type RelationshipTable = BTreeMap<String, ScoredCandidate>;

/// Resolve every candidate set. Ids with a single candidate produce no
/// conflict entry.
pub fn resolve_all(
    sets: &CandidateSets,
    weights: &ScoreWeights,
    stage: ConflictStage,
) -> (RelationshipTable, Vec<ConflictEntry>) {
    let mut table = RelationshipTable::new();
    let mut conflicts = Vec::new();
    for (id, candidates) in sets.iter() {
        let Some(resolution) = resolve(candidates, weights) else {
            continue;
        };
        if !resolution.discarded.is_empty() {
            conflicts.push(ConflictEntry::from_resolution(id, stage, &resolution));
        }
        table.insert(id.clone(), resolution.winner);
    }
    (table, conflicts)
}
