//! Fatal import errors.
//!
//! Anything in this enum aborts the run before the output directory is
//! touched. Non-fatal conditions are accumulated as report warnings instead.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Dist-run path not found: {0}")]
    MissingRoot(PathBuf),

    #[error("Missing required dist-run entries: {}", .0.join(", "))]
    MissingRequired(Vec<String>),

    #[error("Missing optional dist-run entries: {} (strict mode)", .0.join(", "))]
    StrictMissingOptional(Vec<String>),

    #[error("Score config not found: {0}")]
    ScoreConfigNotFound(PathBuf),

    #[error("Invalid score config {path}: {message}")]
    InvalidScoreConfig { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ImportError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ImportError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(path: &Path, message: impl ToString) -> Self {
        ImportError::Parse {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_lists_every_entry() {
        let err = ImportError::MissingRequired(vec!["machine".into(), "entities".into()]);
        assert_eq!(
            err.to_string(),
            "Missing required dist-run entries: machine, entities"
        );
    }

    #[test]
    fn strict_message_names_mode() {
        let err = ImportError::StrictMissingOptional(vec!["reports".into()]);
        assert!(err.to_string().ends_with("(strict mode)"));
    }
}
