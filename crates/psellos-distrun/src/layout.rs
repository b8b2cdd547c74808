//! Dist-run input layout and validation.

use crate::error::{ImportError, Result};
use crate::narrative::NARRATIVE_FILE;
use std::path::{Path, PathBuf};

pub const MACHINE_DIR: &str = "machine";
pub const ENTITIES_DIR: &str = "entities";
pub const INDEXES_DIR: &str = "indexes";
pub const REPORTS_DIR: &str = "reports";

pub const REQUIRED_ENTRIES: &[&str] = &[MACHINE_DIR, ENTITIES_DIR];
pub const OPTIONAL_ENTRIES: &[&str] = &[INDEXES_DIR, REPORTS_DIR, NARRATIVE_FILE];

const RELATIONSHIP_INDEX_FILE: &str = "assertions_by_id.json";
const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Paths inside one compiled dist-run root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistRunLayout {
    root: PathBuf,
}

impl DistRunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn machine_dir(&self) -> PathBuf {
        self.root.join(MACHINE_DIR)
    }

    pub fn entities_dir(&self) -> PathBuf {
        self.root.join(ENTITIES_DIR)
    }

    pub fn relationship_index(&self) -> PathBuf {
        self.root.join(INDEXES_DIR).join(RELATIONSHIP_INDEX_FILE)
    }

    pub fn run_summary(&self) -> PathBuf {
        self.root.join(REPORTS_DIR).join(RUN_SUMMARY_FILE)
    }

    pub fn narrative_file(&self) -> PathBuf {
        self.root.join(NARRATIVE_FILE)
    }

    /// Check the root and its entries. Missing optional entries become
    /// warnings, or a fatal error when `strict`.
    pub fn validate(&self, strict: bool) -> Result<LayoutChecks> {
        if !self.root.exists() {
            return Err(ImportError::MissingRoot(self.root.clone()));
        }

        let missing_required: Vec<String> = REQUIRED_ENTRIES
            .iter()
            .filter(|name| !self.root.join(name).exists())
            .map(|name| name.to_string())
            .collect();
        if !missing_required.is_empty() {
            return Err(ImportError::MissingRequired(missing_required));
        }

        let missing_optional: Vec<String> = OPTIONAL_ENTRIES
            .iter()
            .filter(|name| !self.root.join(name).exists())
            .map(|name| name.to_string())
            .collect();
        if strict && !missing_optional.is_empty() {
            return Err(ImportError::StrictMissingOptional(missing_optional));
        }

        let warnings = missing_optional
            .iter()
            .map(|name| format!("Optional dist-run entry missing: {name}"))
            .collect();

        Ok(LayoutChecks {
            required_entries: REQUIRED_ENTRIES.iter().map(|s| s.to_string()).collect(),
            optional_entries: OPTIONAL_ENTRIES.iter().map(|s| s.to_string()).collect(),
            missing_optional,
            warnings,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutChecks {
    pub required_entries: Vec<String>,
    pub optional_entries: Vec<String>,
    pub missing_optional: Vec<String>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn layout_with(entries: &[&str]) -> (TempDir, DistRunLayout) {
        let dir = TempDir::new().unwrap();
        for name in entries {
            if name.ends_with(".yml") {
                fs::write(dir.path().join(name), "rows: []\n").unwrap();
            } else {
                fs::create_dir_all(dir.path().join(name)).unwrap();
            }
        }
        let layout = DistRunLayout::new(dir.path());
        (dir, layout)
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let layout = DistRunLayout::new(dir.path().join("nope"));
        assert!(matches!(layout.validate(false), Err(ImportError::MissingRoot(_))));
    }

    #[test]
    fn missing_required_entries_are_all_reported() {
        let (_dir, layout) = layout_with(&[]);
        match layout.validate(false) {
            Err(ImportError::MissingRequired(names)) => assert_eq!(names, vec!["machine", "entities"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_optional_warns_unless_strict() {
        let (_dir, layout) = layout_with(&["machine", "entities", "reports"]);
        let checks = layout.validate(false).unwrap();
        assert_eq!(checks.missing_optional, vec!["indexes", NARRATIVE_FILE]);
        assert_eq!(checks.warnings.len(), 2);

        match layout.validate(true) {
            Err(ImportError::StrictMissingOptional(names)) => assert_eq!(names.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn complete_layout_is_clean_in_strict_mode() {
        let (_dir, layout) =
            layout_with(&["machine", "entities", "indexes", "reports", NARRATIVE_FILE]);
        let checks = layout.validate(true).unwrap();
        assert!(checks.missing_optional.is_empty());
        assert!(checks.warnings.is_empty());
    }
}
