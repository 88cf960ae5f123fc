//! Detects when the open directory changed behind our back

use crate::AppError;
use app_fs::{DirWatcher, DirectorySnapshot, Fingerprint};
use std::path::{Path, PathBuf};

/// Keeps the fingerprint of the last snapshot the catalog was built from
pub struct ChangeMonitor {
    dir: PathBuf,
    fingerprint: Fingerprint,
    watcher: Option<DirWatcher>,
}

impl ChangeMonitor {
    pub fn new(snapshot: &DirectorySnapshot) -> Self {
        Self {
            dir: snapshot.dir().to_path_buf(),
            fingerprint: snapshot.fingerprint(),
            watcher: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Called when the application regains focus.
    ///
    /// Rescans the directory and returns the new snapshot if its
    /// fingerprint differs from the stored one, which is then replaced.
    pub fn on_refocus(&mut self) -> Option<DirectorySnapshot> {
        let snapshot = DirectorySnapshot::scan(&self.dir);
        self.compare(snapshot)
    }

    fn compare(&mut self, snapshot: DirectorySnapshot) -> Option<DirectorySnapshot> {
        if snapshot.fingerprint() == self.fingerprint {
            tracing::debug!("Directory unchanged: {}", self.dir.display());
            return None;
        }

        tracing::info!(
            "Directory changed: {} ({:?} -> {:?}, {} images)",
            self.dir.display(),
            self.fingerprint,
            snapshot.fingerprint(),
            snapshot.len()
        );
        self.fingerprint = snapshot.fingerprint();
        Some(snapshot)
    }

    /// Start watching the directory in addition to refocus checks
    pub fn watch(&mut self) -> Result<(), AppError> {
        if self.watcher.is_none() {
            self.watcher = Some(DirWatcher::new(&self.dir)?);
        }
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Rescan if the watcher reported touched image files since last poll
    pub fn poll_watcher(&mut self) -> Option<DirectorySnapshot> {
        let changed = self.watcher.as_ref()?.poll_changed();
        if changed.is_empty() {
            return None;
        }
        tracing::debug!("Watcher reported {} paths", changed.len());
        self.on_refocus()
    }
}
