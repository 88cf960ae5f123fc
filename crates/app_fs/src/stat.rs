//! File metadata used by the catalog and thumbnail freshness checks

use crate::{FsError, Result};
use std::path::Path;
use std::time::SystemTime;

/// Size and modification time of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileStat {
    pub fn read(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| FsError::from_io(path, e))?;
        if !metadata.is_file() {
            return Err(FsError::InvalidPath(format!("Not a file: {}", path.display())));
        }

        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}
