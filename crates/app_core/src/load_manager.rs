//! Lazy decoding and memory-budget eviction
//!
//! Runs on the main thread only. A record is decoded the first time it is
//! selected (or preloaded); after every fresh decode the total decoded
//! footprint is checked against the budget and the least recently loaded
//! records are unloaded until it fits. The selected record is never evicted.

use crate::catalog::{Catalog, RecordId};
use crate::decoder::Decoder;
use crate::AppError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Slideshows advancing faster than this do not evict
pub const FAST_SLIDESHOW_INTERVAL: Duration = Duration::from_millis(500);

/// Playback state as far as eviction cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    #[default]
    Stopped,
    Slideshow { interval: Duration, looping: bool },
}

impl PlaybackMode {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackMode::Slideshow { .. })
    }

    /// Navigation wraps at the ends
    pub fn is_looping(&self) -> bool {
        matches!(self, PlaybackMode::Slideshow { looping: true, .. })
    }

    /// Decode-then-evict on every frame would thrash
    pub fn suppresses_eviction(&self) -> bool {
        matches!(self, PlaybackMode::Slideshow { interval, .. } if *interval < FAST_SLIDESHOW_INTERVAL)
    }
}

/// What one eviction pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub used_before: u64,
    pub used_after: u64,
    pub budget: u64,
    /// Evicted records with the bytes each freed, oldest first
    pub evicted: Vec<(RecordId, PathBuf, u64)>,
    /// Pass skipped because of fast playback
    pub skipped: bool,
}

impl ReclaimReport {
    pub fn freed(&self) -> u64 {
        self.evicted.iter().map(|(_, _, bytes)| bytes).sum()
    }
}

/// Result of selecting or preloading a record
#[derive(Debug)]
pub enum SelectOutcome {
    AlreadyLoaded,
    Loaded { bytes: u64, reclaim: ReclaimReport },
    /// Record stays unloaded; navigation carries on
    Failed(AppError),
}

pub struct LoadManager {
    decoder: Arc<dyn Decoder>,
    budget: u64,
    playback: PlaybackMode,
}

impl LoadManager {
    pub fn new(budget_bytes: u64, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            decoder,
            budget: budget_bytes,
            playback: PlaybackMode::Stopped,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn set_budget(&mut self, budget_bytes: u64) {
        self.budget = budget_bytes;
    }

    pub fn playback(&self) -> PlaybackMode {
        self.playback
    }

    pub fn set_playback(&mut self, mode: PlaybackMode) {
        self.playback = mode;
    }

    /// Make `id` the displayed record: decode it if needed, pinning it
    /// during the eviction pass that follows
    pub fn select(&mut self, catalog: &mut Catalog, id: RecordId) -> SelectOutcome {
        self.load(catalog, id, Some(id))
    }

    /// Decode `id` ahead of time while `pinned` stays on screen
    pub fn preload(&mut self, catalog: &mut Catalog, id: RecordId, pinned: Option<RecordId>) -> SelectOutcome {
        self.load(catalog, id, pinned)
    }

    fn load(&mut self, catalog: &mut Catalog, id: RecordId, pinned: Option<RecordId>) -> SelectOutcome {
        let Some(record) = catalog.get(id) else {
            return SelectOutcome::Failed(AppError::FilesystemFailure(format!(
                "no record {:?} in catalog",
                id
            )));
        };

        if record.is_loaded() {
            return SelectOutcome::AlreadyLoaded;
        }

        let path = record.path().to_path_buf();
        match self.decoder.decode(&path, record.format()) {
            Ok(image) => {
                let bytes = image.memory_size();
                tracing::debug!("Loaded {} ({} bytes)", path.display(), bytes);
                catalog.set_loaded(id, Arc::new(image));
                let reclaim = self.reclaim(catalog, pinned);
                SelectOutcome::Loaded { bytes, reclaim }
            }
            Err(e) => {
                tracing::warn!("Decode failed for {}: {}", path.display(), e);
                SelectOutcome::Failed(e)
            }
        }
    }

    /// Evict least recently loaded records until the decoded footprint is
    /// within budget. `pinned` is never evicted, so the pass may end over
    /// budget with only the pinned record left.
    pub fn reclaim(&mut self, catalog: &mut Catalog, pinned: Option<RecordId>) -> ReclaimReport {
        let mut used = catalog.loaded_footprint();
        let mut report = ReclaimReport {
            used_before: used,
            used_after: used,
            budget: self.budget,
            ..Default::default()
        };

        if self.playback.suppresses_eviction() {
            report.skipped = true;
            return report;
        }

        if used <= self.budget {
            return report;
        }

        tracing::info!(
            "Used image mem ({}) bigger than max ({}). Unloading.",
            used,
            self.budget
        );

        let oldest_first = catalog.load_order().to_vec();
        for id in oldest_first {
            if Some(id) == pinned {
                continue;
            }
            let Some(record) = catalog.get(id) else {
                continue;
            };
            if !record.is_loaded() {
                continue;
            }

            let path = record.path().to_path_buf();
            if record.is_dirty() {
                tracing::warn!("Evicting {} with unsaved edits", path.display());
            }

            let freed = catalog.unload(id);
            used = used.saturating_sub(freed);
            tracing::info!("Unloading {} freeing {} bytes", path.display(), freed);
            report.evicted.push((id, path, freed));

            if used <= self.budget {
                break;
            }
        }

        report.used_after = used;
        tracing::info!("Used mem {}B out of max {}B", used, self.budget);
        report
    }

    /// Drop every decoded image
    pub fn unload_all(&mut self, catalog: &mut Catalog) -> u64 {
        let ids = catalog.order().to_vec();
        ids.into_iter().map(|id| catalog.unload(id)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodedImage;
    use app_fs::ImageFormat;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::Path;

    const KB: u64 = 1024;

    /// Decodes to a buffer whose size is looked up by file name
    struct SizedDecoder {
        sizes: HashMap<String, u64>,
        calls: Mutex<Vec<String>>,
    }

    impl SizedDecoder {
        fn new(sizes: &[(&str, u64)]) -> Arc<Self> {
            Arc::new(Self {
                sizes: sizes.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl Decoder for SizedDecoder {
        fn decode(&self, path: &Path, _format: ImageFormat) -> Result<DecodedImage, AppError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.calls.lock().push(name.clone());
            match self.sizes.get(&name) {
                Some(&bytes) => Ok(DecodedImage::new(1, 1, vec![0; bytes as usize])),
                None => Err(AppError::decode(path, "corrupt")),
            }
        }
    }

    fn catalog(names: &[&str]) -> Catalog {
        let dir = Path::new("/nonexistent");
        Catalog::build(dir, names.iter().map(|n| dir.join(n)).collect())
    }

    #[test]
    fn test_pinned_survives_scenario() {
        // 100 budget; X, Y, Z at 40 each, Y selected while Z is loaded
        let decoder = SizedDecoder::new(&[("x.png", 40 * KB), ("y.png", 40 * KB), ("z.png", 40 * KB)]);
        let mut c = catalog(&["x.png", "y.png", "z.png"]);
        let (x, y, z) = (c.find("x.png").unwrap(), c.find("y.png").unwrap(), c.find("z.png").unwrap());
        let mut lm = LoadManager::new(100 * KB, decoder);

        assert!(matches!(lm.select(&mut c, x), SelectOutcome::Loaded { .. }));
        assert!(matches!(lm.select(&mut c, y), SelectOutcome::Loaded { .. }));

        let SelectOutcome::Loaded { reclaim, .. } = lm.preload(&mut c, z, Some(y)) else {
            panic!("z should load");
        };
        assert_eq!(reclaim.used_before, 120 * KB);
        assert_eq!(reclaim.used_after, 80 * KB);
        assert_eq!(reclaim.evicted.len(), 1);
        assert_eq!(reclaim.evicted[0].0, x);
        assert!(!c.get(x).unwrap().is_loaded());
        assert!(c.get(y).unwrap().is_loaded());
        assert!(c.get(z).unwrap().is_loaded());
    }

    #[test]
    fn test_pinned_never_evicted_even_if_oldest() {
        let decoder = SizedDecoder::new(&[("a.png", 60 * KB), ("b.png", 60 * KB), ("c.png", 60 * KB)]);
        let mut c = catalog(&["a.png", "b.png", "c.png"]);
        let (a, b, cc) = (c.find("a.png").unwrap(), c.find("b.png").unwrap(), c.find("c.png").unwrap());
        let mut lm = LoadManager::new(100 * KB, decoder);

        lm.select(&mut c, a);
        lm.preload(&mut c, b, Some(a));
        // a is the oldest load but pinned; b goes instead
        assert!(c.get(a).unwrap().is_loaded());
        assert!(!c.get(b).unwrap().is_loaded());

        lm.preload(&mut c, cc, Some(a));
        assert!(c.get(a).unwrap().is_loaded());
        assert!(c.loaded_footprint() <= 100 * KB || c.loaded_count() == 1);
    }

    #[test]
    fn test_oversized_pinned_stays_alone() {
        let decoder = SizedDecoder::new(&[("small.png", 10 * KB), ("huge.png", 500 * KB)]);
        let mut c = catalog(&["small.png", "huge.png"]);
        let (small, huge) = (c.find("small.png").unwrap(), c.find("huge.png").unwrap());
        let mut lm = LoadManager::new(100 * KB, decoder);

        lm.select(&mut c, small);
        let SelectOutcome::Loaded { reclaim, .. } = lm.select(&mut c, huge) else {
            panic!("huge should load");
        };
        assert_eq!(reclaim.freed(), 10 * KB);
        assert_eq!(c.loaded_count(), 1);
        assert!(c.get(huge).unwrap().is_loaded());
        assert!(c.loaded_footprint() > lm.budget());
    }

    #[test]
    fn test_already_loaded_does_not_redecode() {
        let decoder = SizedDecoder::new(&[("a.png", KB)]);
        let mut c = catalog(&["a.png"]);
        let a = c.first().unwrap();
        let mut lm = LoadManager::new(100 * KB, decoder.clone());

        lm.select(&mut c, a);
        assert!(matches!(lm.select(&mut c, a), SelectOutcome::AlreadyLoaded));
        assert_eq!(decoder.calls.lock().len(), 1);
    }

    #[test]
    fn test_decode_failure_leaves_record_unloaded() {
        let decoder = SizedDecoder::new(&[]);
        let mut c = catalog(&["broken.png"]);
        let id = c.first().unwrap();
        let mut lm = LoadManager::new(100 * KB, decoder);

        let SelectOutcome::Failed(err) = lm.select(&mut c, id) else {
            panic!("decode should fail");
        };
        assert!(err.is_recoverable());
        assert!(!c.get(id).unwrap().is_loaded());
        assert_eq!(c.get(id).unwrap().memory_footprint(), 0);
    }

    #[test]
    fn test_fast_slideshow_skips_eviction() {
        let decoder = SizedDecoder::new(&[("a.png", 80 * KB), ("b.png", 80 * KB)]);
        let mut c = catalog(&["a.png", "b.png"]);
        let (a, b) = (c.find("a.png").unwrap(), c.find("b.png").unwrap());
        let mut lm = LoadManager::new(100 * KB, decoder);
        lm.set_playback(PlaybackMode::Slideshow {
            interval: Duration::from_millis(200),
            looping: true,
        });

        lm.select(&mut c, a);
        let SelectOutcome::Loaded { reclaim, .. } = lm.select(&mut c, b) else {
            panic!("b should load");
        };
        assert!(reclaim.skipped);
        assert_eq!(c.loaded_count(), 2);

        // Slow slideshow evicts again
        lm.set_playback(PlaybackMode::Slideshow {
            interval: Duration::from_secs(3),
            looping: true,
        });
        let report = lm.reclaim(&mut c, Some(b));
        assert!(!report.skipped);
        assert!(!c.get(a).unwrap().is_loaded());
    }

    #[test]
    fn test_under_budget_is_noop() {
        let decoder = SizedDecoder::new(&[("a.png", KB), ("b.png", KB)]);
        let mut c = catalog(&["a.png", "b.png"]);
        let mut lm = LoadManager::new(100 * KB, decoder);
        for id in c.order().to_vec() {
            lm.select(&mut c, id);
        }
        assert_eq!(c.loaded_count(), 2);
        assert_eq!(lm.unload_all(&mut c), 2 * KB);
        assert_eq!(c.loaded_count(), 0);
    }
}
