//! Output directory lifecycle: backup, clear, write.
//!
//! Apply mode runs these in that order, and only after the whole artifact set
//! has been built in memory.

use crate::error::{ImportError, Result};
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// One serialized artifact file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, text: String) -> Self {
        Self {
            name: name.into(),
            bytes: text.into_bytes(),
        }
    }
}

/// True if `dir` exists and holds at least one entry, hidden ones included.
pub fn has_entries(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let mut entries = fs::read_dir(dir).map_err(|e| ImportError::io(dir, e))?;
    match entries.next() {
        Some(entry) => entry.map(|_| true).map_err(|e| ImportError::io(dir, e)),
        None => Ok(false),
    }
}

/// `2026-02-01T10:11:12.345Z` → `2026-02-01T10-11-12-345Z`.
pub fn backup_timestamp() -> String {
    Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// First free sibling path `<out>.bak.<stamp>`, suffixed `-N` on collision.
pub fn backup_path_for(out_dir: &Path, stamp: &str) -> Result<PathBuf> {
    let name = out_dir.file_name().ok_or_else(|| {
        ImportError::io(
            out_dir,
            io::Error::new(io::ErrorKind::InvalidInput, "output path has no directory name"),
        )
    })?;
    let parent = out_dir.parent().unwrap_or_else(|| Path::new(""));
    let base = format!("{}.bak.{stamp}", name.to_string_lossy());
    let mut candidate = parent.join(&base);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{base}-{n}"));
        n += 1;
    }
    Ok(candidate)
}

/// Copy the whole output tree to a timestamped sibling. `None` when the
/// directory is missing or empty.
pub fn backup_dir(out_dir: &Path) -> Result<Option<PathBuf>> {
    if !has_entries(out_dir)? {
        return Ok(None);
    }
    let target = backup_path_for(out_dir, &backup_timestamp())?;
    copy_tree(out_dir, &target)?;
    info!(backup = %target.display(), "backed up previous output");
    Ok(Some(target))
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            ImportError::io(&path, io::Error::other(e.to_string()))
        })?;
        let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| ImportError::io(&dest, e))?;
        } else {
            fs::copy(entry.path(), &dest).map_err(|e| ImportError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

/// Remove every entry of `dir`, hidden ones included.
pub fn clear_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir).map_err(|e| ImportError::io(dir, e))? {
        let entry = entry.map_err(|e| ImportError::io(dir, e))?;
        let path = entry.path();
        let is_dir = fs::symlink_metadata(&path)
            .map(|m| m.is_dir())
            .map_err(|e| ImportError::io(&path, e))?;
        let removed = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| ImportError::io(&path, e))?;
    }
    Ok(())
}

pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ImportError::io(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| ImportError::io(path, e))
}

pub fn write_artifacts(out_dir: &Path, artifacts: &[Artifact]) -> Result<()> {
    fs::create_dir_all(out_dir).map_err(|e| ImportError::io(out_dir, e))?;
    for artifact in artifacts {
        debug!(file = %artifact.name, bytes = artifact.bytes.len(), "writing artifact");
        write_file(&out_dir.join(&artifact.name), &artifact.bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn timestamp_has_no_colons_or_dots() {
        let stamp = backup_timestamp();
        assert!(!stamp.contains(':'));
        assert!(!stamp.contains('.'));
        assert!(stamp.ends_with('Z'));
    }

    #[test]
    fn missing_or_empty_directory_is_not_backed_up() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        assert_eq!(backup_dir(&out).unwrap(), None);
        fs::create_dir_all(&out).unwrap();
        assert_eq!(backup_dir(&out).unwrap(), None);
    }

    #[test]
    fn hidden_only_directory_is_backed_up_before_clearing() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join(".keep"), "marker").unwrap();

        let backup = backup_dir(&out).unwrap().expect("backup of hidden entry");
        clear_dir(&out).unwrap();
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
        assert_eq!(fs::read_to_string(backup.join(".keep")).unwrap(), "marker");
    }

    #[test]
    fn backup_copies_nested_tree_to_sibling() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(out.join("nested")).unwrap();
        fs::write(out.join("persons.json"), "{}\n").unwrap();
        fs::write(out.join("nested/keep.txt"), "old").unwrap();

        let backup = backup_dir(&out).unwrap().unwrap();
        assert_eq!(backup.parent(), Some(dir.path()));
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("out.bak."));
        assert_eq!(fs::read_to_string(backup.join("persons.json")).unwrap(), "{}\n");
        assert_eq!(fs::read_to_string(backup.join("nested/keep.txt")).unwrap(), "old");
    }

    #[test]
    fn colliding_backup_names_get_a_suffix() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(dir.path().join("out.bak.X")).unwrap();
        assert_eq!(backup_path_for(&out, "X").unwrap(), dir.path().join("out.bak.X-1"));
    }

    #[test]
    fn clear_then_write() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(out.join("sub")).unwrap();
        fs::write(out.join("stale.json"), "x").unwrap();
        fs::write(out.join(".hidden"), "x").unwrap();

        clear_dir(&out).unwrap();
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);

        write_artifacts(&out, &[Artifact::new("layers.json", "[]\n".to_string())]).unwrap();
        assert_eq!(fs::read_to_string(out.join("layers.json")).unwrap(), "[]\n");
    }
}
