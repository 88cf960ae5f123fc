//! Image catalog: one arena of records, a user-sorted primary order and a
//! load-order index used for eviction

use crate::config::SortKey;
use crate::decoder::DecodedImage;
use app_fs::{FileStat, ImageFormat};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Stable handle to a record, valid for the lifetime of one catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(usize);

impl RecordId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Decode state. The pixel buffer only exists while loaded, so the footprint
/// is zero exactly when unloaded.
#[derive(Debug, Clone, Default)]
pub enum DecodeState {
    #[default]
    Unloaded,
    Loaded {
        image: Arc<DecodedImage>,
        loaded_at: Instant,
    },
}

/// One image file of the catalog
#[derive(Debug, Clone)]
pub struct ImageRecord {
    path: PathBuf,
    /// Lowercase file name, used for sorting and lookup
    name_key: String,
    size: u64,
    modified: Option<SystemTime>,
    format: ImageFormat,
    state: DecodeState,
    dirty: bool,
}

impl ImageRecord {
    fn new(path: PathBuf, format: ImageFormat, stat: Option<FileStat>) -> Self {
        let name_key = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let stat = stat.unwrap_or(FileStat { size: 0, modified: None });

        Self {
            path,
            name_key,
            size: stat.size,
            modified: stat.modified,
            format,
            state: DecodeState::Unloaded,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn state(&self) -> &DecodeState {
        &self.state
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, DecodeState::Loaded { .. })
    }

    pub fn image(&self) -> Option<&Arc<DecodedImage>> {
        match &self.state {
            DecodeState::Loaded { image, .. } => Some(image),
            DecodeState::Unloaded => None,
        }
    }

    pub fn loaded_at(&self) -> Option<Instant> {
        match &self.state {
            DecodeState::Loaded { loaded_at, .. } => Some(*loaded_at),
            DecodeState::Unloaded => None,
        }
    }

    /// Decoded bytes held by this record; zero when unloaded
    pub fn memory_footprint(&self) -> u64 {
        self.image().map(|i| i.memory_size()).unwrap_or(0)
    }

    /// In-memory edits not yet written back
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn compare(&self, other: &Self, key: SortKey) -> Ordering {
        match key {
            SortKey::Name => self.name_key.cmp(&other.name_key),
            SortKey::ModTime => self.modified.cmp(&other.modified),
            SortKey::Size => self.size.cmp(&other.size),
            SortKey::Type => self.format.rank().cmp(&other.format.rank()),
        }
    }
}

/// Ordered collection of image records for one directory
#[derive(Debug, Clone)]
pub struct Catalog {
    dir: PathBuf,
    records: Vec<ImageRecord>,
    /// Primary (user-sorted) order
    order: Vec<RecordId>,
    /// `positions[id]` is the index of `id` within `order`
    positions: Vec<usize>,
    /// Oldest load first; ids move to the back when loaded
    load_order: Vec<RecordId>,
    sort_key: SortKey,
    ascending: bool,
}

impl Catalog {
    /// Build from a file list, sorted by name ascending. Unknown extensions
    /// and duplicate paths are dropped.
    pub fn build<P: AsRef<Path>>(dir: P, files: Vec<PathBuf>) -> Self {
        let mut seen = HashSet::new();
        let files: Vec<(PathBuf, ImageFormat)> = files
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .filter_map(|p| match ImageFormat::from_path(&p) {
                Some(format) => Some((p, format)),
                None => {
                    tracing::debug!("Skipping non-image: {}", p.display());
                    None
                }
            })
            .collect();

        let records: Vec<ImageRecord> = files
            .into_par_iter()
            .map(|(path, format)| {
                let stat = match FileStat::read(&path) {
                    Ok(stat) => Some(stat),
                    Err(e) => {
                        tracing::debug!("No stat for {}: {}", path.display(), e);
                        None
                    }
                };
                ImageRecord::new(path, format, stat)
            })
            .collect();

        let order: Vec<RecordId> = (0..records.len()).map(RecordId).collect();
        let positions = (0..records.len()).collect();
        let load_order = order.clone();

        tracing::info!(
            "Catalog built for {}: {} images",
            dir.as_ref().display(),
            records.len()
        );

        let mut catalog = Self {
            dir: dir.as_ref().to_path_buf(),
            records,
            order,
            positions,
            load_order,
            sort_key: SortKey::Name,
            ascending: true,
        };
        catalog.sort(SortKey::Name, true);
        catalog
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: RecordId) -> Option<&ImageRecord> {
        self.records.get(id.0)
    }

    /// Records in primary order
    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &ImageRecord)> + '_ {
        self.order.iter().map(move |&id| (id, &self.records[id.0]))
    }

    pub fn order(&self) -> &[RecordId] {
        &self.order
    }

    /// Ids from least to most recently loaded
    pub fn load_order(&self) -> &[RecordId] {
        &self.load_order
    }

    pub fn sort_key(&self) -> (SortKey, bool) {
        (self.sort_key, self.ascending)
    }

    /// Re-sort the primary order. Ties fall back to the path so the result
    /// does not depend on the previous order.
    pub fn sort(&mut self, key: SortKey, ascending: bool) {
        let records = &self.records;
        self.order.sort_by(|a, b| {
            let (ra, rb) = (&records[a.0], &records[b.0]);
            let ord = ra.compare(rb, key);
            let ord = if ascending { ord } else { ord.reverse() };
            ord.then_with(|| ra.path.cmp(&rb.path))
        });

        self.sort_key = key;
        self.ascending = ascending;
        self.rebuild_positions();
    }

    fn rebuild_positions(&mut self) {
        for (pos, id) in self.order.iter().enumerate() {
            self.positions[id.0] = pos;
        }
    }

    pub fn position(&self, id: RecordId) -> Option<usize> {
        self.positions.get(id.0).copied()
    }

    pub fn first(&self) -> Option<RecordId> {
        self.order.first().copied()
    }

    pub fn last(&self) -> Option<RecordId> {
        self.order.last().copied()
    }

    pub fn next(&self, id: RecordId) -> Option<RecordId> {
        let pos = self.position(id)?;
        self.order.get(pos + 1).copied()
    }

    pub fn prev(&self, id: RecordId) -> Option<RecordId> {
        let pos = self.position(id)?;
        pos.checked_sub(1).map(|p| self.order[p])
    }

    pub fn next_circular(&self, id: RecordId) -> Option<RecordId> {
        let pos = self.position(id)?;
        Some(self.order[(pos + 1) % self.order.len()])
    }

    pub fn prev_circular(&self, id: RecordId) -> Option<RecordId> {
        let pos = self.position(id)?;
        let len = self.order.len();
        Some(self.order[(pos + len - 1) % len])
    }

    /// Look up by file name only, ignoring case. Any directory part of
    /// `path` is ignored, so relative and absolute spellings both resolve.
    pub fn find<P: AsRef<Path>>(&self, path: P) -> Option<RecordId> {
        let wanted = path.as_ref().file_name()?.to_string_lossy().to_lowercase();
        self.order
            .iter()
            .copied()
            .find(|id| self.records[id.0].name_key == wanted)
    }

    /// Sum of footprints of all loaded records
    pub fn loaded_footprint(&self) -> u64 {
        self.records.iter().map(ImageRecord::memory_footprint).sum()
    }

    pub fn loaded_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_loaded()).count()
    }

    pub fn mark_dirty(&mut self, id: RecordId) {
        if let Some(r) = self.records.get_mut(id.0) {
            r.dirty = true;
        }
    }

    pub fn clear_dirty(&mut self, id: RecordId) {
        if let Some(r) = self.records.get_mut(id.0) {
            r.dirty = false;
        }
    }

    /// Attach a decoded image and move the record to the newest end of the
    /// load order
    pub(crate) fn set_loaded(&mut self, id: RecordId, image: Arc<DecodedImage>) {
        let Some(record) = self.records.get_mut(id.0) else {
            return;
        };
        record.state = DecodeState::Loaded {
            image,
            loaded_at: Instant::now(),
        };
        self.touch_loaded(id);
    }

    fn touch_loaded(&mut self, id: RecordId) {
        if let Some(pos) = self.load_order.iter().position(|&x| x == id) {
            self.load_order.remove(pos);
            self.load_order.push(id);
        }
    }

    /// Drop the decoded image, returning the bytes freed
    pub(crate) fn unload(&mut self, id: RecordId) -> u64 {
        match self.records.get_mut(id.0) {
            Some(record) => {
                let freed = record.memory_footprint();
                record.state = DecodeState::Unloaded;
                freed
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(names: &[&str]) -> Catalog {
        let dir = Path::new("/nonexistent/pics");
        Catalog::build(dir, names.iter().map(|n| dir.join(n)).collect())
    }

    fn names(catalog: &Catalog) -> Vec<String> {
        catalog.iter().map(|(_, r)| r.file_name()).collect()
    }

    fn assert_orderings_consistent(catalog: &Catalog) {
        let mut primary = catalog.order().to_vec();
        let mut by_load = catalog.load_order().to_vec();
        primary.sort();
        by_load.sort();
        assert_eq!(primary, by_load);
        assert_eq!(primary.len(), catalog.len());
    }

    #[test]
    fn test_sort_and_navigate_scenario() {
        let mut c = catalog(&["b.png", "a.png", "c.jpg"]);
        c.sort(SortKey::Name, true);
        assert_eq!(names(&c), vec!["a.png", "b.png", "c.jpg"]);

        let a = c.find("a.png").unwrap();
        let b = c.find("b.png").unwrap();
        let cc = c.find("c.jpg").unwrap();
        assert_eq!(c.next(a), Some(b));
        assert_eq!(c.prev(a), None);
        assert_eq!(c.prev_circular(a), Some(cc));
        assert_eq!(c.next(cc), None);
        assert_eq!(c.next_circular(cc), Some(a));
        assert_orderings_consistent(&c);
    }

    #[test]
    fn test_build_starts_in_name_order() {
        let c = catalog(&["c.jpg", "B.png", "a.png"]);
        assert_eq!(names(&c), vec!["a.png", "B.png", "c.jpg"]);
        assert_eq!(c.sort_key(), (SortKey::Name, true));
    }

    #[test]
    fn test_name_sort_ignores_case_and_descends() {
        let mut c = catalog(&["B.png", "a.png", "C.png"]);
        c.sort(SortKey::Name, false);
        assert_eq!(names(&c), vec!["C.png", "B.png", "a.png"]);
    }

    #[test]
    fn test_type_sort_breaks_ties_by_path() {
        let mut c = catalog(&["z.png", "y.jpg", "a.png", "b.jpg"]);
        c.sort(SortKey::Type, true);
        assert_eq!(names(&c), vec!["b.jpg", "y.jpg", "a.png", "z.png"]);

        // Descending reverses the key, not the tie-break
        c.sort(SortKey::Type, false);
        assert_eq!(names(&c), vec!["a.png", "z.png", "b.jpg", "y.jpg"]);
    }

    #[test]
    fn test_resort_keeps_selection_changes_neighbours() {
        let mut c = catalog(&["a.png", "b.png", "c.png"]);
        let b = c.find("b.png").unwrap();
        assert_eq!(c.next(b).and_then(|id| c.get(id)).map(|r| r.file_name()), Some("c.png".into()));

        c.sort(SortKey::Name, false);
        assert_eq!(c.position(b), Some(1));
        assert_eq!(c.next(b).and_then(|id| c.get(id)).map(|r| r.file_name()), Some("a.png".into()));
    }

    #[test]
    fn test_find_matches_file_name_only() {
        let c = catalog(&["Photo.JPG", "other.png"]);
        let id = c.find("photo.jpg").unwrap();
        assert_eq!(c.find("/somewhere/else/PHOTO.jpg"), Some(id));
        assert_eq!(c.find("./Photo.JPG"), Some(id));
        assert_eq!(c.find("missing.png"), None);
    }

    #[test]
    fn test_build_drops_duplicates_and_non_images() {
        let dir = Path::new("/nonexistent/pics");
        let c = Catalog::build(
            dir,
            vec![dir.join("a.png"), dir.join("a.png"), dir.join("readme.txt")],
        );
        assert_eq!(c.len(), 1);
        let (_, record) = c.iter().next().unwrap();
        assert_eq!(record.size(), 0);
        assert!(!record.is_loaded());
        assert_eq!(record.memory_footprint(), 0);
    }

    #[test]
    fn test_load_order_tracks_loads() {
        let mut c = catalog(&["a.png", "b.png", "c.png"]);
        let a = c.find("a.png").unwrap();
        let b = c.find("b.png").unwrap();
        let img = Arc::new(DecodedImage::new(1, 1, vec![0; 4]));

        c.set_loaded(b, img.clone());
        c.set_loaded(a, img);
        assert_eq!(&c.load_order()[1..], &[b, a]);
        assert_eq!(c.loaded_footprint(), 8);
        assert_orderings_consistent(&c);

        assert_eq!(c.unload(b), 4);
        assert_eq!(c.get(b).unwrap().memory_footprint(), 0);
        assert_eq!(c.loaded_count(), 1);
    }

    #[test]
    fn test_dirty_flag() {
        let mut c = catalog(&["a.png"]);
        let a = c.first().unwrap();
        c.mark_dirty(a);
        assert!(c.get(a).unwrap().is_dirty());
        c.clear_dirty(a);
        assert!(!c.get(a).unwrap().is_dirty());
    }

    #[test]
    fn test_empty_catalog_navigation() {
        let c = catalog(&[]);
        assert!(c.is_empty());
        assert_eq!(c.first(), None);
        assert_eq!(c.next_circular(RecordId(0)), None);
    }
}
