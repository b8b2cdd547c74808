//! Run report and conflict report.

use crate::digest::canonical_json;
use crate::narrative::NarrativeSummary;
use crate::relations::ExtractionStrategy;
use crate::scoring::{ConflictEntry, ScoreWeights};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    DryRun,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunChecks {
    pub required_entries: Vec<String>,
    pub optional_entries: Vec<String>,
    pub missing_optional: Vec<String>,
    pub relationship_strategy: ExtractionStrategy,
    pub relationship_source_files_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub persons: usize,
    pub assertions: usize,
    pub layers: usize,
    pub relationship_source_files: usize,
    pub raw_candidates: usize,
    pub conflict_ids: usize,
    pub discarded_rows: usize,
    pub narrative_rows: usize,
    pub skipped_entity_records: usize,
    pub skipped_relationship_records: usize,
    pub placeholder_endpoints: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictSummary {
    pub total_conflict_ids: usize,
    pub discarded_rows: usize,
    pub ids: Vec<String>,
}

impl ConflictSummary {
    pub fn from_entries(entries: &[ConflictEntry]) -> Self {
        let ids: BTreeSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        Self {
            total_conflict_ids: ids.len(),
            discarded_rows: entries.iter().map(|e| e.discarded.len()).sum(),
            ids: ids.into_iter().map(str::to_string).collect(),
        }
    }
}

/// Written next to the run report; holds every resolution decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictReport {
    pub total_conflict_ids: usize,
    pub discarded_rows: usize,
    pub conflicts: Vec<ConflictEntry>,
}

impl ConflictReport {
    pub fn new(conflicts: Vec<ConflictEntry>) -> Self {
        let summary = ConflictSummary::from_entries(&conflicts);
        Self {
            total_conflict_ids: summary.total_conflict_ids,
            discarded_rows: summary.discarded_rows,
            conflicts,
        }
    }

    pub fn summary(&self) -> ConflictSummary {
        ConflictSummary::from_entries(&self.conflicts)
    }
}

/// `docs/report.json` → `docs/report.conflicts.json`.
pub fn conflict_report_path(report_path: &Path) -> PathBuf {
    let name = report_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let conflicts_name = match name.strip_suffix(".json") {
        Some(stem) => format!("{stem}.conflicts.json"),
        None => format!("{name}.conflicts.json"),
    };
    report_path.with_file_name(conflicts_name)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub mode: RunMode,
    pub strict: bool,
    pub source: String,
    pub output: String,
    pub score_config: Option<String>,
    pub score_weights: ScoreWeights,
    pub backup_path: Option<String>,
    pub conflict_report_path: Option<String>,
    pub checks: RunChecks,
    pub counts: RunCounts,
    pub duplicate_conflict_summary: ConflictSummary,
    pub narrative_layer_summary: NarrativeSummary,
    pub warnings: Vec<String>,
    /// Artifact file name → SHA-256 of its written bytes.
    pub critical_hashes: BTreeMap<String, String>,
}

impl RunReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        canonical_json(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::CandidateOrigin;
    use crate::scoring::{ConflictRow, ConflictStage};
    use serde_json::Map;

    fn row(score: f64) -> ConflictRow {
        ConflictRow {
            score,
            origin: CandidateOrigin { file: "f".into(), pointer: "/0".into() },
            assertion: Map::new(),
        }
    }

    fn entry(id: &str, stage: ConflictStage, discarded: usize) -> ConflictEntry {
        ConflictEntry {
            id: id.into(),
            stage,
            candidates: discarded + 1,
            winner: row(2.0),
            discarded: (0..discarded).map(|_| row(1.0)).collect(),
        }
    }

    #[test]
    fn conflict_path_replaces_json_suffix() {
        assert_eq!(
            conflict_report_path(Path::new("docs/dist-run-import-report.json")),
            Path::new("docs/dist-run-import-report.conflicts.json")
        );
        assert_eq!(
            conflict_report_path(Path::new("/tmp/report")),
            Path::new("/tmp/report.conflicts.json")
        );
    }

    #[test]
    fn summary_counts_distinct_ids() {
        let report = ConflictReport::new(vec![
            entry("a1", ConflictStage::Primary, 1),
            entry("a1", ConflictStage::Narrative, 1),
            entry("b2", ConflictStage::Primary, 2),
        ]);
        assert_eq!(report.total_conflict_ids, 2);
        assert_eq!(report.discarded_rows, 4);
        assert_eq!(report.summary().ids, vec!["a1", "b2"]);
    }

    #[test]
    fn mode_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&RunMode::DryRun).unwrap(), "\"dry-run\"");
        assert_eq!(serde_json::to_string(&RunMode::Apply).unwrap(), "\"apply\"");
    }
}
