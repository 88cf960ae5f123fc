//! Disk-backed thumbnail cache
//!
//! Integrates:
//! - Content-fingerprint keyed cache files (`<hex>.bin`, bincode)
//! - A fixed pool of generation workers fed by a crossbeam queue
//! - Per-path coalescing of in-flight jobs
//! - Count-based pruning and full purge on shutdown

use crate::config::CacheConfig;
use crate::decoder::{DecodedImage, Decoder};
use crate::AppError;
use app_fs::{hash_file, FileStat, Fingerprint, ImageFormat};
use crossbeam_channel::{Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

/// Extension of cache files
pub const CACHE_FILE_EXT: &str = "bin";

/// Extension of half-written cache files
const TMP_FILE_EXT: &str = "tmp";

/// Slack left below the limit after pruning so it does not run every exit
pub const PRUNE_MARGIN: usize = 100;

/// A generated preview, RGBA8
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Thumbnail {
    fn is_well_formed(&self) -> bool {
        self.pixels.len() as u64 == self.width as u64 * self.height as u64 * 4
    }
}

impl From<DecodedImage> for Thumbnail {
    fn from(img: DecodedImage) -> Self {
        Self {
            width: img.width,
            height: img.height,
            pixels: img.pixels,
        }
    }
}

/// What a handle currently holds
#[derive(Debug, Clone)]
pub enum ThumbnailState {
    /// Generation queued or running; show a placeholder
    Pending,
    Ready(Arc<Thumbnail>),
    Failed(String),
}

/// Shared view of one thumbnail request.
///
/// A worker publishes into it exactly once; readers see either the pending
/// state or the final one.
#[derive(Debug, Clone)]
pub struct ThumbnailHandle {
    inner: Arc<RwLock<ThumbnailState>>,
}

impl ThumbnailHandle {
    fn with_state(state: ThumbnailState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    fn pending() -> Self {
        Self::with_state(ThumbnailState::Pending)
    }

    fn ready(thumb: Arc<Thumbnail>) -> Self {
        Self::with_state(ThumbnailState::Ready(thumb))
    }

    fn failed(reason: impl ToString) -> Self {
        Self::with_state(ThumbnailState::Failed(reason.to_string()))
    }

    fn publish(&self, state: ThumbnailState) {
        *self.inner.write() = state;
    }

    pub fn state(&self) -> ThumbnailState {
        self.inner.read().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.read(), ThumbnailState::Pending)
    }

    pub fn thumbnail(&self) -> Option<Arc<Thumbnail>> {
        match &*self.inner.read() {
            ThumbnailState::Ready(t) => Some(t.clone()),
            _ => None,
        }
    }

    /// Both handles observe the same request
    pub fn same_request(&self, other: &ThumbnailHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Completion notice from a worker
#[derive(Debug, Clone)]
pub struct ThumbnailEvent {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub state: ThumbnailState,
}

/// Counters for monitoring
#[derive(Debug, Clone)]
pub struct ThumbnailStats {
    pub in_flight: usize,
    pub jobs_dispatched: u64,
    pub cache_hits: u64,
    /// Paths whose content fingerprint is memoized
    pub fingerprints: usize,
    pub cache_dir: PathBuf,
}

struct Job {
    path: PathBuf,
    fingerprint: Fingerprint,
    format: ImageFormat,
    handle: ThumbnailHandle,
}

/// State shared between the requesting thread and the workers
struct Shared {
    cache_dir: PathBuf,
    thumbnail_size: u32,
    decoder: Arc<dyn Decoder>,
    in_flight: DashMap<PathBuf, ThumbnailHandle>,
    /// Content fingerprints, reused while size and mtime are unchanged
    fingerprints: DashMap<PathBuf, (FileStat, Fingerprint)>,
    jobs_dispatched: AtomicU64,
    cache_hits: AtomicU64,
    tmp_counter: AtomicU64,
}

/// Thumbnail store handles lookup, generation and pruning
pub struct ThumbnailStore {
    shared: Arc<Shared>,
    job_tx: Option<Sender<Job>>,
    done_rx: Receiver<ThumbnailEvent>,
    workers: Vec<JoinHandle<()>>,
    max_entries: usize,
    delete_all_on_exit: bool,
}

impl ThumbnailStore {
    /// Create the cache directory if needed and start the worker pool
    pub fn new(config: &CacheConfig, decoder: Arc<dyn Decoder>) -> Result<Self, AppError> {
        let cache_dir = config.thumbnail_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            // Writes retry the directory; until then thumbnails live in memory only
            tracing::warn!("Cannot create thumbnail cache {}: {}", cache_dir.display(), e);
        }

        let shared = Arc::new(Shared {
            cache_dir,
            thumbnail_size: config.thumbnail_size.max(1),
            decoder,
            in_flight: DashMap::new(),
            fingerprints: DashMap::new(),
            jobs_dispatched: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            tmp_counter: AtomicU64::new(0),
        });

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<ThumbnailEvent>();

        let mut workers = Vec::with_capacity(config.worker_count());
        for i in 0..config.worker_count() {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let shared = shared.clone();
            let worker = std::thread::Builder::new()
                .name(format!("thumb-worker-{}", i))
                .spawn(move || worker_loop(job_rx, done_tx, shared))
                .map_err(|e| AppError::Init(format!("cannot spawn thumbnail worker: {}", e)))?;
            workers.push(worker);
        }

        tracing::info!(
            "Thumbnail store at {} with {} workers",
            shared.cache_dir.display(),
            workers.len()
        );

        Ok(Self {
            shared,
            job_tx: Some(job_tx),
            done_rx,
            workers,
            max_entries: config.max_cache_files,
            delete_all_on_exit: config.delete_all_on_exit,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.shared.cache_dir
    }

    /// Get a handle for `path` without blocking on a worker.
    ///
    /// Returns the in-flight handle if a job for this path is pending, a
    /// ready handle on a fresh cache hit, or a new pending handle after
    /// queueing exactly one job.
    pub fn get(&self, path: &Path) -> ThumbnailHandle {
        if let Some(handle) = self.shared.in_flight.get(path) {
            return handle.clone();
        }

        let Some(format) = ImageFormat::from_path(path) else {
            return ThumbnailHandle::failed(AppError::UnsupportedFormat(path.display().to_string()));
        };

        let (stat, fingerprint) = match self.content_fingerprint(path) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Cannot fingerprint {}: {}", path.display(), e);
                return ThumbnailHandle::failed(e);
            }
        };

        if let Some(thumb) = self.read_cached(fingerprint, &stat) {
            self.shared.cache_hits.fetch_add(1, Ordering::Relaxed);
            return ThumbnailHandle::ready(Arc::new(thumb));
        }

        let handle = match self.shared.in_flight.entry(path.to_path_buf()) {
            Entry::Occupied(e) => return e.get().clone(),
            Entry::Vacant(e) => {
                let handle = ThumbnailHandle::pending();
                e.insert(handle.clone());
                handle
            }
        };

        let job = Job {
            path: path.to_path_buf(),
            fingerprint,
            format,
            handle: handle.clone(),
        };
        let sent = self.job_tx.as_ref().map(|tx| tx.send(job).is_ok()).unwrap_or(false);

        if sent {
            self.shared.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Queued thumbnail for {}", path.display());
        } else {
            self.shared.in_flight.remove(path);
            handle.publish(ThumbnailState::Failed("thumbnail workers stopped".into()));
        }

        handle
    }

    /// Compute or reuse the content fingerprint of `path`
    fn content_fingerprint(&self, path: &Path) -> Result<(FileStat, Fingerprint), AppError> {
        let stat = FileStat::read(path)?;

        if let Some(cached) = self.shared.fingerprints.get(path) {
            if cached.0 == stat {
                return Ok(*cached);
            }
        }

        let fingerprint = hash_file(path).map_err(|e| {
            AppError::FilesystemFailure(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.shared
            .fingerprints
            .insert(path.to_path_buf(), (stat, fingerprint));
        Ok((stat, fingerprint))
    }

    /// Load a cache entry that is at least as new as the source file
    fn read_cached(&self, fingerprint: Fingerprint, source: &FileStat) -> Option<Thumbnail> {
        let cache_path = cache_file_path(&self.shared.cache_dir, fingerprint);
        let cache_mtime = std::fs::metadata(&cache_path).and_then(|m| m.modified()).ok()?;

        if let Some(source_mtime) = source.modified {
            if cache_mtime < source_mtime {
                tracing::debug!("Stale thumbnail {:?}", fingerprint);
                return None;
            }
        }

        let bytes = std::fs::read(&cache_path).ok()?;
        match bincode::deserialize::<Thumbnail>(&bytes) {
            Ok(thumb) if thumb.is_well_formed() => Some(thumb),
            _ => {
                tracing::debug!("Unreadable cache file {}", cache_path.display());
                None
            }
        }
    }

    /// Drop memoized fingerprints for paths not in `keep`
    pub fn retain_fingerprints<'a, I>(&self, keep: I)
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let keep: HashSet<&Path> = keep.into_iter().collect();
        self.shared
            .fingerprints
            .retain(|path, _| keep.contains(path.as_path()));
    }

    /// Drain completion events (non-blocking)
    pub fn poll_completed(&self) -> Vec<ThumbnailEvent> {
        self.done_rx.try_iter().collect()
    }

    /// Wait up to `timeout` for the next completion event
    pub fn recv_completed_timeout(&self, timeout: Duration) -> Option<ThumbnailEvent> {
        self.done_rx.recv_timeout(timeout).ok()
    }

    pub fn stats(&self) -> ThumbnailStats {
        ThumbnailStats {
            in_flight: self.shared.in_flight.len(),
            jobs_dispatched: self.shared.jobs_dispatched.load(Ordering::Relaxed),
            cache_hits: self.shared.cache_hits.load(Ordering::Relaxed),
            fingerprints: self.shared.fingerprints.len(),
            cache_dir: self.shared.cache_dir.clone(),
        }
    }

    /// Stop accepting jobs and wait for queued ones to finish
    fn stop_workers(&mut self) {
        // Workers exit once the queue is drained and the sender is gone
        self.job_tx = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Thumbnail worker panicked");
            }
        }
    }

    /// Finish outstanding jobs, then prune (or purge) the cache directory.
    /// Returns the number of cache files removed by pruning.
    pub fn shutdown(mut self) -> Result<usize, AppError> {
        self.stop_workers();

        let cache_dir = self.shared.cache_dir.clone();
        if self.delete_all_on_exit {
            purge(&cache_dir)?;
            Ok(0)
        } else {
            prune(&cache_dir, self.max_entries)
        }
    }
}

impl Drop for ThumbnailStore {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

fn worker_loop(job_rx: Receiver<Job>, done_tx: Sender<ThumbnailEvent>, shared: Arc<Shared>) {
    while let Ok(job) = job_rx.recv() {
        let state = match generate(shared.decoder.as_ref(), &job.path, job.format, shared.thumbnail_size) {
            Ok(thumb) => {
                if let Err(e) = write_cache_file(&shared, job.fingerprint, &thumb) {
                    // Next request regenerates
                    tracing::warn!("{}", e);
                }
                ThumbnailState::Ready(Arc::new(thumb))
            }
            Err(e) => {
                tracing::warn!("Thumbnail failed for {}: {}", job.path.display(), e);
                ThumbnailState::Failed(e.to_string())
            }
        };

        job.handle.publish(state.clone());
        shared
            .in_flight
            .remove_if(&job.path, |_, h| h.same_request(&job.handle));

        let event = ThumbnailEvent {
            path: job.path,
            fingerprint: job.fingerprint,
            state,
        };
        if done_tx.send(event).is_err() {
            break;
        }
    }
}

/// Decode and downscale one source image
fn generate(decoder: &dyn Decoder, path: &Path, format: ImageFormat, size: u32) -> Result<Thumbnail, AppError> {
    tracing::debug!("Generating thumbnail: {}", path.display());
    let image = decoder.decode(path, format)?;
    Ok(image.thumbnail(size)?.into())
}

/// Write to a unique temporary name, then rename into place
fn write_cache_file(shared: &Shared, fingerprint: Fingerprint, thumb: &Thumbnail) -> Result<(), AppError> {
    let write_failure = |e: std::io::Error| {
        AppError::CacheWriteFailure(format!("{:?}: {}", fingerprint, e))
    };

    std::fs::create_dir_all(&shared.cache_dir).map_err(write_failure)?;

    let bytes = bincode::serialize(thumb)?;
    let n = shared.tmp_counter.fetch_add(1, Ordering::Relaxed);
    let tmp_path = shared.cache_dir.join(format!("{}.{}.{}", fingerprint.to_hex(), n, TMP_FILE_EXT));
    let final_path = cache_file_path(&shared.cache_dir, fingerprint);

    std::fs::write(&tmp_path, &bytes).map_err(write_failure)?;
    if let Err(e) = std::fs::rename(&tmp_path, &final_path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(write_failure(e));
    }
    Ok(())
}

pub fn cache_file_path(cache_dir: &Path, fingerprint: Fingerprint) -> PathBuf {
    cache_dir.join(format!("{}.{}", fingerprint.to_hex(), CACHE_FILE_EXT))
}

/// A cache file with the time used to age it
#[derive(Debug, Clone)]
struct CacheFileEntry {
    path: PathBuf,
    created: SystemTime,
}

/// Oldest entries to delete so that `max_entries - PRUNE_MARGIN` remain,
/// or nothing if the count is within `max_entries`
fn prune_victims(mut entries: Vec<CacheFileEntry>, max_entries: usize) -> Vec<PathBuf> {
    if entries.len() <= max_entries {
        return Vec::new();
    }

    entries.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
    let target = max_entries.saturating_sub(PRUNE_MARGIN);
    let excess = entries.len() - target;
    entries.into_iter().take(excess).map(|e| e.path).collect()
}

/// Delete the oldest cache files once there are more than `max_entries`,
/// along with temporary files left by interrupted writes.
/// Returns how many cache files were deleted.
pub fn prune(cache_dir: &Path, max_entries: usize) -> Result<usize, AppError> {
    let read_dir = match std::fs::read_dir(cache_dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(app_fs::FsError::from_io(cache_dir, e).into()),
    };

    let (cache_files, others): (Vec<_>, Vec<_>) = read_dir
        .filter_map(|entry| entry.ok())
        .partition(|entry| entry.path().extension().map_or(false, |ext| ext == CACHE_FILE_EXT));

    // Workers are stopped before pruning, so no write is still in progress
    for entry in others {
        let path = entry.path();
        let is_tmp = path.extension().map_or(false, |ext| ext == TMP_FILE_EXT);
        if is_tmp && entry.file_type().map_or(false, |t| t.is_file()) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Removed stray {}", path.display()),
                Err(e) => tracing::warn!("Cannot delete {}: {}", path.display(), e),
            }
        }
    }

    let entries: Vec<CacheFileEntry> = cache_files
        .into_iter()
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            // Birth time is not available everywhere
            let created = metadata.created().or_else(|_| metadata.modified()).ok()?;
            Some(CacheFileEntry {
                path: entry.path(),
                created,
            })
        })
        .collect();

    let total = entries.len();
    let mut deleted = 0;
    for path in prune_victims(entries, max_entries) {
        match std::fs::remove_file(&path) {
            Ok(()) => deleted += 1,
            Err(e) => tracing::warn!("Cannot delete {}: {}", path.display(), e),
        }
    }

    if deleted > 0 {
        tracing::info!("Pruned {} of {} thumbnail cache files", deleted, total);
    }
    Ok(deleted)
}

/// Remove the whole cache directory
pub fn purge(cache_dir: &Path) -> Result<(), AppError> {
    match std::fs::remove_dir_all(cache_dir) {
        Ok(()) => {
            tracing::info!("Purged thumbnail cache {}", cache_dir.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(app_fs::FsError::from_io(cache_dir, e).into()),
    }
}
