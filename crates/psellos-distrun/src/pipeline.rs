//! Run orchestration.
//!
//! ```text
//! validate → build (in memory) → [apply] backup → clear → write → report
//! ```
//!
//! Every fatal condition surfaces before the output directory is touched:
//! the whole artifact set, including its hashes, exists in memory before
//! the first destructive step.

use crate::digest::{canonical_json, sha256_hex};
use crate::entities::{consolidate_machine_dir, EntityConsolidation, TypePrecedence};
use crate::error::{ImportError, Result};
use crate::indexes::{
    build_indexes, build_manifest, relationship_array, relationship_map, BuilderProvenance,
    DerivedIndexes, Manifest,
};
use crate::layout::{DistRunLayout, LayoutChecks};
use crate::narrative::{apply_narrative_layer, NarrativeSummary, NARRATIVE_FILE};
use crate::output::{backup_dir, clear_dir, write_artifacts, write_file, Artifact};
use crate::relations::{extract_relationships, ExtractionStrategy, RelationKeyPredicate};
use crate::report::{
    conflict_report_path, ConflictReport, RunChecks, RunCounts, RunMode, RunReport,
};
use crate::scoring::{resolve_all, ConflictStage, RelationshipTable, ScoreWeights};
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

pub const PERSONS_FILE: &str = "persons.json";
pub const ASSERTIONS_BY_ID_FILE: &str = "assertions_by_id.json";
pub const ASSERTIONS_FILE: &str = "assertions.json";
pub const ASSERTIONS_BY_LAYER_FILE: &str = "assertions_by_layer.json";
pub const LAYERS_FILE: &str = "layers.json";
pub const ASSERTIONS_BY_PERSON_FILE: &str = "assertions_by_person.json";
pub const ASSERTIONS_BY_PERSON_BY_LAYER_FILE: &str = "assertions_by_person_by_layer.json";
pub const MANIFEST_FILE: &str = "manifest.json";

pub const DEFAULT_OUT_DIR: &str = "public/data";
pub const DEFAULT_REPORT_PATH: &str = "docs/dist-run-import-report.json";

/// Resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub dist_run: PathBuf,
    pub out_dir: PathBuf,
    pub report_path: PathBuf,
    pub strict: bool,
    pub dry_run: bool,
    pub score_config: Option<PathBuf>,
    pub type_precedence: TypePrecedence,
    pub relation_keys: RelationKeyPredicate,
}

impl ImportOptions {
    pub fn new(dist_run: impl Into<PathBuf>) -> Self {
        Self {
            dist_run: dist_run.into(),
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            strict: false,
            dry_run: false,
            score_config: None,
            type_precedence: TypePrecedence::default(),
            relation_keys: RelationKeyPredicate::default(),
        }
    }

    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }

    pub fn with_report_path(mut self, report_path: impl Into<PathBuf>) -> Self {
        self.report_path = report_path.into();
        self
    }

    pub fn with_score_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.score_config = Some(path.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn mode(&self) -> RunMode {
        if self.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Apply
        }
    }
}

/// The complete in-memory result of the build stage.
#[derive(Debug, Clone)]
pub struct ImportBuild {
    pub entities: EntityConsolidation,
    pub strategy: ExtractionStrategy,
    pub relationship_source_files: Vec<String>,
    pub raw_candidates: usize,
    pub skipped_relationship_records: usize,
    pub placeholder_endpoints: usize,
    pub table: RelationshipTable,
    pub indexes: DerivedIndexes,
    pub manifest: Manifest,
    pub narrative: NarrativeSummary,
    pub conflict_report: ConflictReport,
    pub artifacts: Vec<Artifact>,
    pub warnings: Vec<String>,
}

impl ImportBuild {
    pub fn critical_hashes(&self) -> BTreeMap<String, String> {
        self.artifacts
            .iter()
            .map(|a| (a.name.clone(), sha256_hex(&a.bytes)))
            .collect()
    }
}

/// Run every pure stage over a validated layout.
pub fn build_import(
    layout: &DistRunLayout,
    options: &ImportOptions,
    weights: &ScoreWeights,
) -> Result<ImportBuild> {
    let mut warnings = Vec::new();

    let entities = consolidate_machine_dir(&layout.machine_dir(), &options.type_precedence)?;
    info!(
        persons = entities.entities.len(),
        files = entities.files.len(),
        "consolidated entities"
    );
    if entities.skipped_records > 0 {
        warnings.push(format!(
            "Skipped {} entity records without qid/id",
            entities.skipped_records
        ));
    }

    let extraction = extract_relationships(
        &layout.relationship_index(),
        &layout.entities_dir(),
        &options.relation_keys,
    )?;
    info!(
        strategy = ?extraction.strategy,
        files = extraction.source_files.len(),
        candidates = extraction.sets.candidate_count(),
        "extracted relationship candidates"
    );
    warnings.extend(extraction.warnings.iter().cloned());
    if extraction.skipped_records > 0 {
        warnings.push(format!(
            "Skipped {} relationship records without id",
            extraction.skipped_records
        ));
    }

    let (primary, mut conflicts) = resolve_all(&extraction.sets, weights, ConflictStage::Primary);
    info!(
        assertions = primary.len(),
        conflicts = conflicts.len(),
        "resolved duplicate relationship ids"
    );

    let narrative = apply_narrative_layer(&layout.narrative_file(), NARRATIVE_FILE, primary, weights)?;
    warnings.extend(narrative.warnings);
    conflicts.extend(narrative.conflicts);
    let table = narrative.table;

    let indexes = build_indexes(&table);
    let builder = BuilderProvenance::load(&layout.run_summary(), &mut warnings);
    let manifest = build_manifest(&entities.entities, &table, &indexes, builder);
    info!(layers = indexes.layers.len(), "built derived indexes");

    let artifacts = vec![
        Artifact::new(PERSONS_FILE, canonical_json(&entities.entities)?),
        Artifact::new(ASSERTIONS_BY_ID_FILE, canonical_json(&relationship_map(&table))?),
        Artifact::new(ASSERTIONS_FILE, canonical_json(&relationship_array(&table))?),
        Artifact::new(ASSERTIONS_BY_LAYER_FILE, canonical_json(&indexes.by_layer)?),
        Artifact::new(LAYERS_FILE, canonical_json(&indexes.layers)?),
        Artifact::new(ASSERTIONS_BY_PERSON_FILE, canonical_json(&indexes.by_person)?),
        Artifact::new(
            ASSERTIONS_BY_PERSON_BY_LAYER_FILE,
            canonical_json(&indexes.by_person_by_layer)?,
        ),
        Artifact::new(MANIFEST_FILE, canonical_json(&manifest)?),
    ];

    Ok(ImportBuild {
        entities,
        strategy: extraction.strategy,
        relationship_source_files: extraction.source_files,
        raw_candidates: extraction.sets.candidate_count(),
        skipped_relationship_records: extraction.skipped_records,
        placeholder_endpoints: extraction.placeholder_endpoints + narrative.placeholder_endpoints,
        table,
        indexes,
        manifest,
        narrative: narrative.summary,
        conflict_report: ConflictReport::new(conflicts),
        artifacts,
        warnings,
    })
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Validate, build, optionally publish, and report. The report is written
/// to `options.report_path` in both modes.
pub fn run_import(options: &ImportOptions) -> Result<RunReport> {
    let started_at = now_rfc3339();
    let layout = DistRunLayout::new(&options.dist_run);
    let checks = layout.validate(options.strict)?;
    let weights = match &options.score_config {
        Some(path) => ScoreWeights::load(path)?,
        None => ScoreWeights::default(),
    };

    let build = build_import(&layout, options, &weights)?;

    let mut backup_path = None;
    let mut conflicts_written = None;
    if !options.dry_run {
        fs::create_dir_all(&options.out_dir).map_err(|e| ImportError::io(&options.out_dir, e))?;
        backup_path = backup_dir(&options.out_dir)?;
        clear_dir(&options.out_dir)?;
        write_artifacts(&options.out_dir, &build.artifacts)?;

        let path = conflict_report_path(&options.report_path);
        write_file(&path, canonical_json(&build.conflict_report)?.as_bytes())?;
        conflicts_written = Some(path);
        info!(out = %options.out_dir.display(), "wrote artifacts");
    } else {
        info!("dry run: output directory left untouched");
    }

    let report = assemble_report(
        options,
        &weights,
        checks,
        &build,
        started_at,
        backup_path.map(|p| p.display().to_string()),
        conflicts_written.map(|p| p.display().to_string()),
    );
    for warning in &report.warnings {
        warn!("{warning}");
    }
    write_file(&options.report_path, report.to_json()?.as_bytes())?;
    Ok(report)
}

fn assemble_report(
    options: &ImportOptions,
    weights: &ScoreWeights,
    checks: LayoutChecks,
    build: &ImportBuild,
    started_at: String,
    backup_path: Option<String>,
    conflict_report_path: Option<String>,
) -> RunReport {
    let mut warnings = checks.warnings;
    warnings.extend(build.warnings.iter().cloned());
    let conflicts = build.conflict_report.summary();

    RunReport {
        started_at,
        finished_at: now_rfc3339(),
        mode: options.mode(),
        strict: options.strict,
        source: options.dist_run.display().to_string(),
        output: options.out_dir.display().to_string(),
        score_config: options.score_config.as_ref().map(|p| p.display().to_string()),
        score_weights: *weights,
        backup_path,
        conflict_report_path,
        checks: RunChecks {
            required_entries: checks.required_entries,
            optional_entries: checks.optional_entries,
            missing_optional: checks.missing_optional,
            relationship_strategy: build.strategy,
            relationship_source_files_count: build.relationship_source_files.len(),
        },
        counts: RunCounts {
            persons: build.entities.entities.len(),
            assertions: build.table.len(),
            layers: build.indexes.layers.len(),
            relationship_source_files: build.relationship_source_files.len(),
            raw_candidates: build.raw_candidates,
            conflict_ids: conflicts.total_conflict_ids,
            discarded_rows: conflicts.discarded_rows,
            narrative_rows: build.narrative.rows,
            skipped_entity_records: build.entities.skipped_records,
            skipped_relationship_records: build.skipped_relationship_records,
            placeholder_endpoints: build.placeholder_endpoints,
        },
        duplicate_conflict_summary: conflicts,
        narrative_layer_summary: build.narrative.clone(),
        warnings,
        critical_hashes: build.critical_hashes(),
    }
}
