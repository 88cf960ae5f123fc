//! Viewer session: the owning context for one open directory
//!
//! Ties together the catalog, the load manager, the thumbnail store and
//! the change monitor. Everything here runs on the main thread; only
//! thumbnail generation happens elsewhere.

use crate::catalog::{Catalog, ImageRecord, RecordId};
use crate::change_monitor::ChangeMonitor;
use crate::config::{AppConfig, SortKey};
use crate::decoder::{DecodedImage, Decoder};
use crate::load_manager::{LoadManager, PlaybackMode, SelectOutcome};
use crate::thumbnail_store::{ThumbnailEvent, ThumbnailHandle, ThumbnailState, ThumbnailStore};
use crate::AppError;
use app_fs::DirectorySnapshot;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Something the user should hear about, as plain text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    DecodeFailed { path: PathBuf, message: String },
    Evicted { path: PathBuf, bytes: u64 },
    Resynced { dir: PathBuf, images: usize },
    ThumbnailFailed { path: PathBuf, reason: String },
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::DecodeFailed { message, .. } => write!(f, "{}", message),
            StatusEvent::Evicted { path, bytes } => {
                write!(f, "Unloaded {} ({} KB)", path.display(), bytes / 1024)
            }
            StatusEvent::Resynced { dir, images } => {
                write!(f, "Reloaded {} ({} images)", dir.display(), images)
            }
            StatusEvent::ThumbnailFailed { path, reason } => {
                write!(f, "No thumbnail for {}: {}", path.display(), reason)
            }
        }
    }
}

pub struct ViewerSession {
    config: AppConfig,
    catalog: Catalog,
    loader: LoadManager,
    monitor: ChangeMonitor,
    thumbnails: ThumbnailStore,
    current: Option<RecordId>,
    events: Vec<StatusEvent>,
}

impl ViewerSession {
    /// Open `dir` and select `initial` if it is in the catalog, otherwise
    /// the first image
    pub fn open(
        config: AppConfig,
        dir: &Path,
        initial: Option<&Path>,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Self, AppError> {
        let snapshot = DirectorySnapshot::scan(dir);
        let mut monitor = ChangeMonitor::new(&snapshot);

        let mut catalog = Catalog::build(dir, snapshot.into_files());
        catalog.sort(config.viewer.sort_key, config.viewer.sort_ascending);
        tracing::info!("Opened {} with {} images", dir.display(), catalog.len());

        let loader = LoadManager::new(config.cache.memory_budget_bytes(), decoder.clone());
        let thumbnails = ThumbnailStore::new(&config.cache, decoder)?;

        if config.viewer.watch_directory {
            if let Err(e) = monitor.watch() {
                tracing::warn!("Directory watch unavailable, relying on refocus: {}", e);
            }
        }

        let mut session = Self {
            config,
            catalog,
            loader,
            monitor,
            thumbnails,
            current: None,
            events: Vec::new(),
        };

        match initial {
            Some(path) => session.select_path(path),
            None => session.select_first(),
        };
        Ok(session)
    }

    /// Open a file's directory with that file selected, or a directory as is
    pub fn open_path(config: AppConfig, path: &Path, decoder: Arc<dyn Decoder>) -> Result<Self, AppError> {
        if path.is_file() {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            Self::open(config, &dir, Some(path), decoder)
        } else {
            Self::open(config, path, None, decoder)
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn thumbnail_store(&self) -> &ThumbnailStore {
        &self.thumbnails
    }

    pub fn current(&self) -> Option<RecordId> {
        self.current
    }

    pub fn current_record(&self) -> Option<&ImageRecord> {
        self.catalog.get(self.current?)
    }

    pub fn current_image(&self) -> Option<&Arc<DecodedImage>> {
        self.current_record()?.image()
    }

    /// Decoded bytes held and the budget they are held against
    pub fn memory_usage(&self) -> (u64, u64) {
        (self.catalog.loaded_footprint(), self.loader.budget())
    }

    pub fn set_memory_budget(&mut self, bytes: u64) {
        self.loader.set_budget(bytes);
        let report = self.loader.reclaim(&mut self.catalog, self.current);
        self.record_evictions(&report.evicted);
    }

    /// Select by file name, falling back to the first image
    pub fn select_path(&mut self, path: &Path) -> Option<RecordId> {
        match self.catalog.find(path) {
            Some(id) => {
                self.select(id);
                Some(id)
            }
            None => {
                tracing::debug!("{} not in catalog, selecting first", path.display());
                self.select_first()
            }
        }
    }

    pub fn select_first(&mut self) -> Option<RecordId> {
        let id = self.catalog.first();
        match id {
            Some(id) => {
                self.select(id);
            }
            None => self.current = None,
        }
        id
    }

    /// Make `id` current and load it. A failed decode still moves the
    /// selection; the failure is reported as a status event.
    /// Returns whether the image is loaded afterwards.
    pub fn select(&mut self, id: RecordId) -> bool {
        self.current = Some(id);

        match self.loader.select(&mut self.catalog, id) {
            SelectOutcome::AlreadyLoaded => true,
            SelectOutcome::Loaded { reclaim, .. } => {
                self.record_evictions(&reclaim.evicted);
                true
            }
            SelectOutcome::Failed(e) => {
                let path = self
                    .catalog
                    .get(id)
                    .map(|r| r.path().to_path_buf())
                    .unwrap_or_default();
                self.events.push(StatusEvent::DecodeFailed {
                    path,
                    message: e.user_message(),
                });
                false
            }
        }
    }

    fn record_evictions(&mut self, evicted: &[(RecordId, PathBuf, u64)]) {
        self.events.extend(evicted.iter().map(|(_, path, bytes)| StatusEvent::Evicted {
            path: path.clone(),
            bytes: *bytes,
        }));
    }

    /// Step forward. Wraps around only while a looping slideshow plays.
    pub fn next(&mut self) -> Option<RecordId> {
        let Some(current) = self.current else {
            return self.select_first();
        };
        let target = if self.loader.playback().is_looping() {
            self.catalog.next_circular(current)
        } else {
            self.catalog.next(current)
        }?;
        self.select(target);
        Some(target)
    }

    /// Step back. Wraps around only while a looping slideshow plays.
    pub fn prev(&mut self) -> Option<RecordId> {
        let Some(current) = self.current else {
            return self.select_first();
        };
        let target = if self.loader.playback().is_looping() {
            self.catalog.prev_circular(current)
        } else {
            self.catalog.prev(current)
        }?;
        self.select(target);
        Some(target)
    }

    /// Re-sort; the selection stays on the same record
    pub fn set_sort(&mut self, key: SortKey, ascending: bool) {
        self.catalog.sort(key, ascending);
    }

    pub fn set_playback(&mut self, mode: PlaybackMode) {
        self.loader.set_playback(mode);
    }

    pub fn playback(&self) -> PlaybackMode {
        self.loader.playback()
    }

    /// Start a slideshow using the configured interval and looping
    pub fn start_slideshow(&mut self) {
        self.set_playback(PlaybackMode::Slideshow {
            interval: self.config.viewer.slideshow_interval(),
            looping: self.config.viewer.slideshow_looping,
        });
    }

    pub fn stop_slideshow(&mut self) {
        self.set_playback(PlaybackMode::Stopped);
    }

    /// Focus regained: rebuild if the directory contents changed.
    /// Returns whether a rebuild happened.
    pub fn refocus(&mut self) -> bool {
        match self.monitor.on_refocus() {
            Some(snapshot) => {
                self.resync(snapshot);
                true
            }
            None => false,
        }
    }

    /// Apply watcher notifications, if watching
    pub fn poll_external_changes(&mut self) -> bool {
        match self.monitor.poll_watcher() {
            Some(snapshot) => {
                self.resync(snapshot);
                true
            }
            None => false,
        }
    }

    /// Replace the catalog, keeping the sort and reselecting the previous
    /// file by name
    fn resync(&mut self, snapshot: DirectorySnapshot) {
        let previous = self.current_record().map(|r| r.path().to_path_buf());

        if let Some(record) = self.current_record() {
            if record.is_dirty() {
                tracing::warn!("Discarding unsaved edits to {}", record.path().display());
            }
        }

        let (key, ascending) = self.catalog.sort_key();
        let dir = snapshot.dir().to_path_buf();
        let mut catalog = Catalog::build(&dir, snapshot.into_files());
        catalog.sort(key, ascending);
        self.thumbnails
            .retain_fingerprints(catalog.iter().map(|(_, record)| record.path()));

        self.catalog = catalog;
        self.current = None;
        self.events.push(StatusEvent::Resynced {
            dir,
            images: self.catalog.len(),
        });

        match previous {
            Some(path) => self.select_path(&path),
            None => self.select_first(),
        };
    }

    /// Thumbnail for `path`; pending until a worker finishes
    pub fn thumbnail(&self, path: &Path) -> ThumbnailHandle {
        self.thumbnails.get(path)
    }

    /// Request thumbnails for every image in display order
    pub fn request_all_thumbnails(&self) -> Vec<ThumbnailHandle> {
        self.catalog
            .iter()
            .map(|(_, record)| self.thumbnails.get(record.path()))
            .collect()
    }

    /// Collect finished thumbnail jobs, reporting failures
    pub fn poll_thumbnails(&mut self) -> Vec<ThumbnailEvent> {
        let done = self.thumbnails.poll_completed();
        for event in &done {
            if let ThumbnailState::Failed(reason) = &event.state {
                self.events.push(StatusEvent::ThumbnailFailed {
                    path: event.path.clone(),
                    reason: reason.clone(),
                });
            }
        }
        done
    }

    pub fn mark_current_dirty(&mut self) {
        if let Some(id) = self.current {
            self.catalog.mark_dirty(id);
        }
    }

    pub fn drain_events(&mut self) -> Vec<StatusEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drop decoded images and close the thumbnail store (prune or purge).
    /// Returns the number of pruned cache files.
    pub fn shutdown(mut self) -> Result<usize, AppError> {
        let freed = self.loader.unload_all(&mut self.catalog);
        tracing::debug!("Released {} bytes of decoded images", freed);
        self.thumbnails.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use app_fs::ImageFormat;
    use std::time::Duration;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    /// 512x512 RGBA (1 MB) for every file; names containing "bad" fail
    struct MegabyteDecoder;

    impl Decoder for MegabyteDecoder {
        fn decode(&self, path: &Path, _format: ImageFormat) -> Result<DecodedImage, AppError> {
            if path.to_string_lossy().contains("bad") {
                return Err(AppError::decode(path, "truncated"));
            }
            Ok(DecodedImage::new(512, 512, vec![0; MB as usize]))
        }
    }

    struct Fixture {
        temp: TempDir,
        dir: PathBuf,
        config: AppConfig,
    }

    fn fixture(names: &[&str]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("photos");
        std::fs::create_dir_all(&dir).unwrap();
        for name in names {
            std::fs::write(dir.join(name), name.as_bytes()).unwrap();
        }

        let config = AppConfig {
            cache: CacheConfig {
                cache_dir: Some(temp.path().join("thumbs")),
                thumbnail_workers: 1,
                thumbnail_size: 32,
                ..Default::default()
            },
            ..Default::default()
        };

        Fixture { temp, dir, config }
    }

    fn open(f: &Fixture, initial: Option<&str>) -> ViewerSession {
        let initial = initial.map(|n| f.dir.join(n));
        ViewerSession::open(f.config.clone(), &f.dir, initial.as_deref(), Arc::new(MegabyteDecoder)).unwrap()
    }

    fn current_name(session: &ViewerSession) -> Option<String> {
        session.current_record().map(|r| r.file_name())
    }

    #[test]
    fn test_open_selects_initial_file() {
        let f = fixture(&["b.png", "a.png", "c.jpg"]);
        let session = open(&f, Some("B.PNG"));

        assert_eq!(current_name(&session).as_deref(), Some("b.png"));
        assert!(session.current_image().is_some());
    }

    #[test]
    fn test_open_falls_back_to_first() {
        let f = fixture(&["b.png", "a.png", "c.jpg"]);
        let session = open(&f, Some("missing.png"));
        assert_eq!(current_name(&session).as_deref(), Some("a.png"));
    }

    #[test]
    fn test_open_path_with_file() {
        let f = fixture(&["b.png", "a.png"]);
        let session =
            ViewerSession::open_path(f.config.clone(), &f.dir.join("b.png"), Arc::new(MegabyteDecoder)).unwrap();
        assert_eq!(current_name(&session).as_deref(), Some("b.png"));
        assert_eq!(session.catalog().len(), 2);
    }

    #[test]
    fn test_navigation_wraps_only_in_looping_slideshow() {
        let f = fixture(&["b.png", "a.png", "c.jpg"]);
        let mut session = open(&f, None);

        assert!(session.prev().is_none());
        assert_eq!(current_name(&session).as_deref(), Some("a.png"));

        session.next();
        session.next();
        assert_eq!(current_name(&session).as_deref(), Some("c.jpg"));
        assert!(session.next().is_none());

        session.start_slideshow();
        assert!(session.playback().is_looping());
        session.next();
        assert_eq!(current_name(&session).as_deref(), Some("a.png"));
        session.prev();
        assert_eq!(current_name(&session).as_deref(), Some("c.jpg"));

        session.stop_slideshow();
        assert!(session.next().is_none());
    }

    #[test]
    fn test_set_sort_keeps_selection() {
        let f = fixture(&["b.png", "a.png", "c.jpg"]);
        let mut session = open(&f, Some("b.png"));

        session.set_sort(SortKey::Name, false);
        assert_eq!(current_name(&session).as_deref(), Some("b.png"));
        session.next();
        assert_eq!(current_name(&session).as_deref(), Some("a.png"));
    }

    #[test]
    fn test_eviction_is_reported() {
        let mut f = fixture(&["a.png", "b.png", "c.png"]);
        f.config.cache.max_image_mem_mb = 2;
        let mut session = open(&f, None);

        session.next();
        assert!(session.drain_events().is_empty());

        session.next();
        let events = session.drain_events();
        assert_eq!(
            events,
            vec![StatusEvent::Evicted {
                path: f.dir.join("a.png"),
                bytes: MB,
            }]
        );
        assert_eq!(session.memory_usage(), (2 * MB, 2 * MB));
        assert!(session.current_image().is_some());
    }

    #[test]
    fn test_shrinking_budget_keeps_current() {
        let f = fixture(&["a.png", "b.png"]);
        let mut session = open(&f, None);
        session.next();

        session.set_memory_budget(MB / 2);
        assert_eq!(current_name(&session).as_deref(), Some("b.png"));
        assert!(session.current_image().is_some());
        assert_eq!(session.memory_usage().0, MB);
    }

    #[test]
    fn test_decode_failure_moves_selection() {
        let f = fixture(&["a.png", "bad.png"]);
        let mut session = open(&f, None);

        session.next();
        assert_eq!(current_name(&session).as_deref(), Some("bad.png"));
        assert!(session.current_image().is_none());

        let events = session.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StatusEvent::DecodeFailed { .. }));
        assert_eq!(events[0].to_string(), "Cannot load image: bad.png");
    }

    #[test]
    fn test_refocus_rebuilds_and_keeps_selection() {
        let f = fixture(&["a.png", "b.png", "c.png"]);
        let mut session = open(&f, Some("b.png"));
        assert!(!session.refocus());

        std::fs::rename(f.dir.join("a.png"), f.dir.join("z.png")).unwrap();
        assert!(session.refocus());

        assert_eq!(current_name(&session).as_deref(), Some("b.png"));
        let names: Vec<String> = session.catalog().iter().map(|(_, r)| r.file_name()).collect();
        assert_eq!(names, vec!["b.png", "c.png", "z.png"]);
        assert!(session
            .drain_events()
            .iter()
            .any(|e| matches!(e, StatusEvent::Resynced { images: 3, .. })));
    }

    #[test]
    fn test_refocus_after_current_deleted() {
        let f = fixture(&["a.png", "b.png", "c.png"]);
        let mut session = open(&f, Some("c.png"));

        std::fs::remove_file(f.dir.join("c.png")).unwrap();
        assert!(session.refocus());
        assert_eq!(current_name(&session).as_deref(), Some("a.png"));
    }

    #[test]
    fn test_unusable_cache_dir_does_not_block_open() {
        let mut f = fixture(&["a.png", "b.png"]);
        let blocker = f.temp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        f.config.cache.cache_dir = Some(blocker.join("thumbs"));

        let mut session = open(&f, None);
        assert_eq!(current_name(&session).as_deref(), Some("a.png"));
        session.next();
        assert_eq!(current_name(&session).as_deref(), Some("b.png"));

        let handle = session.thumbnail(&f.dir.join("a.png"));
        let event = session
            .thumbnail_store()
            .recv_completed_timeout(Duration::from_secs(10))
            .expect("thumbnail job did not finish");
        assert!(matches!(event.state, ThumbnailState::Ready(_)));
        assert!(handle.thumbnail().is_some());
    }

    #[test]
    fn test_watcher_triggers_resync() {
        let mut f = fixture(&["a.png"]);
        f.config.viewer.watch_directory = true;
        let mut session = open(&f, None);

        std::fs::write(f.dir.join("b.png"), b"b").unwrap();

        let mut resynced = false;
        for _ in 0..100 {
            if session.poll_external_changes() {
                resynced = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        assert!(resynced);
        assert_eq!(session.catalog().len(), 2);
        assert_eq!(current_name(&session).as_deref(), Some("a.png"));
    }

    #[test]
    fn test_resync_forgets_departed_fingerprints() {
        let f = fixture(&["a.png", "b.png"]);
        let mut session = open(&f, None);
        session.request_all_thumbnails();
        assert_eq!(session.thumbnail_store().stats().fingerprints, 2);

        std::fs::remove_file(f.dir.join("b.png")).unwrap();
        assert!(session.refocus());
        assert_eq!(session.thumbnail_store().stats().fingerprints, 1);
    }

    #[test]
    fn test_empty_directory() {
        let f = fixture(&[]);
        let mut session = open(&f, None);

        assert!(session.current().is_none());
        assert!(session.next().is_none());
        assert!(session.prev().is_none());
        assert!(!session.refocus());
    }

    #[test]
    fn test_thumbnails_and_shutdown() {
        let f = fixture(&["a.png", "b.png"]);
        let mut session = open(&f, None);

        let handles = session.request_all_thumbnails();
        assert_eq!(handles.len(), 2);

        let mut finished = 0;
        while finished < 2 {
            let event = session
                .thumbnail_store()
                .recv_completed_timeout(Duration::from_secs(10))
                .expect("thumbnail job did not finish");
            assert!(matches!(event.state, ThumbnailState::Ready(_)));
            finished += 1;
        }
        assert!(handles.iter().all(|h| h.thumbnail().is_some()));
        assert!(session.poll_thumbnails().is_empty());

        // Served from disk now
        assert!(session.thumbnail(&f.dir.join("a.png")).thumbnail().is_some());

        assert_eq!(session.shutdown().unwrap(), 0);
        assert!(f.temp.path().join("thumbs").exists());
    }
}
