//! Directory watcher with notify-debouncer-mini

use crate::{is_supported_image, Result};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind, Debouncer};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

/// Watches one directory (non-recursive) and reports touched image paths
pub struct DirWatcher {
    debouncer: Debouncer<RecommendedWatcher>,
    event_rx: Receiver<std::result::Result<Vec<DebouncedEvent>, notify::Error>>,
    dir: PathBuf,
}

impl DirWatcher {
    /// Start watching `dir` with a 100ms debounce
    pub fn new(dir: &Path) -> Result<Self> {
        let (tx, rx) = channel();
        let mut debouncer = new_debouncer(Duration::from_millis(100), tx)?;
        debouncer.watcher().watch(dir, RecursiveMode::NonRecursive)?;
        tracing::info!("Watching: {}", dir.display());

        Ok(Self {
            debouncer,
            event_rx: rx,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drain pending events (non-blocking).
    ///
    /// Only image paths are reported; the watcher does not say what happened
    /// to them, callers re-snapshot to find out.
    pub fn poll_changed(&self) -> Vec<PathBuf> {
        let mut changed = Vec::new();

        while let Ok(result) = self.event_rx.try_recv() {
            match result {
                Ok(events) => {
                    changed.extend(
                        events
                            .into_iter()
                            .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                            .map(|e| e.path)
                            .filter(|p| is_supported_image(p)),
                    );
                }
                Err(e) => {
                    tracing::warn!("Watcher error: {:?}", e);
                }
            }
        }

        changed.sort();
        changed.dedup();
        changed
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        let _ = self.debouncer.watcher().unwatch(&self.dir);
    }
}
