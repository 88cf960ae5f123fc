//! Directory snapshots: image file list plus order-independent fingerprint

use crate::{fold_hash256, is_supported_image, FsError, Fingerprint, Result};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// Image files of one directory at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySnapshot {
    dir: PathBuf,
    files: Vec<PathBuf>,
    fingerprint: Fingerprint,
}

impl DirectorySnapshot {
    /// Scan `dir` (non-recursive).
    ///
    /// An unreadable directory is not an error here: it produces an empty
    /// snapshot with the zero fingerprint.
    pub fn scan<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        match list_image_files(dir) {
            Ok(files) => Self::from_files(dir, files),
            Err(e) => {
                tracing::warn!("Cannot scan {}: {}", dir.display(), e);
                Self::empty(dir)
            }
        }
    }

    /// Build a snapshot from an already enumerated file list, in any order
    pub fn from_files<P: AsRef<Path>>(dir: P, mut files: Vec<PathBuf>) -> Self {
        files.sort_by(|a, b| compare_file_names(a, b));
        files.dedup();

        let fingerprint = fold_hash256(files.iter().map(|p| p.to_string_lossy().into_owned()));
        tracing::debug!(
            "Snapshot of {}: {} files, {:?}",
            dir.as_ref().display(),
            files.len(),
            fingerprint
        );

        Self {
            dir: dir.as_ref().to_path_buf(),
            files,
            fingerprint,
        }
    }

    pub fn empty<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            files: Vec::new(),
            fingerprint: Fingerprint::ZERO,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files sorted case-insensitively by name
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn into_files(self) -> Vec<PathBuf> {
        self.files
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Case-insensitive comparison of final path segments, ties by full path
pub fn compare_file_names(a: &Path, b: &Path) -> Ordering {
    let name = |p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    };
    name(a).cmp(&name(b)).then_with(|| a.cmp(b))
}

fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(FsError::NotFound(dir.display().to_string()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| FsError::from_io(dir, e))? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue, // Skip entries we can't read
        };

        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let path = entry.path();
        if is_file && is_supported_image(&path) {
            files.push(path);
        }
    }

    Ok(files)
}
