// Finds the newest archive in a backup directory.

use crate::error::{Error, Result};
use globset::{Glob, GlobMatcher};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestFile {
    pub path: PathBuf,
    pub created: SystemTime,
}

/// Creation time when the platform records it, modification time otherwise.
fn creation_time(meta: &fs::Metadata) -> std::io::Result<SystemTime> {
    meta.created().or_else(|_| meta.modified())
}

fn matcher(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| Error::Config(format!("bad file pattern `{pattern}`: {e}")))
}

/// Pick the candidate with the greatest timestamp. Ties go to whichever of
/// the tied entries `max_by_key` settles on; callers must not rely on it.
pub fn pick_latest(candidates: impl IntoIterator<Item = LatestFile>) -> Option<LatestFile> {
    candidates.into_iter().max_by_key(|f| f.created)
}

/// Newest regular file in `dir` whose name matches `pattern`.
///
/// An empty or missing directory yields `Ok(None)` and prints a notice;
/// that is the normal state for a category that has not been backed up yet.
pub fn latest_backup(dir: &Path, pattern: &str) -> Result<Option<LatestFile>> {
    let glob = matcher(pattern)?;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("backup directory {} does not exist", dir.display());
            println!("No backup files found in {}.", dir.display());
            return Ok(None);
        }
        Err(e) => return Err(Error::local_file(dir, e)),
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::local_file(dir, e))?;
        let name = entry.file_name();
        if !glob.is_match(Path::new(&name)) {
            continue;
        }
        let path = entry.path();
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            // Removed between listing and stat.
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::local_file(&path, e)),
        };
        if !meta.is_file() {
            continue;
        }
        let created = creation_time(&meta).map_err(|e| Error::local_file(&path, e))?;
        debug!(path = %path.display(), "candidate backup");
        candidates.push(LatestFile { path, created });
    }

    let latest = pick_latest(candidates);
    if latest.is_none() {
        println!("No backup files found in {}.", dir.display());
    }
    Ok(latest)
}
