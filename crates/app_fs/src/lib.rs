//! LumenView file system layer
//!
//! Provides:
//! - Image format tags and extension recognition
//! - File stat helpers (size, modification time)
//! - 256-bit fingerprint folding (BLAKE3)
//! - Directory snapshots with order-independent fingerprints
//! - Debounced directory watching

mod format;
mod stat;
mod hash;
mod snapshot;
mod watcher;

pub use format::{ImageFormat, IMAGE_EXTENSIONS, is_supported_image};
pub use stat::FileStat;
pub use hash::{Fingerprint, hash256, fold_hash256, hash_file};
pub use snapshot::{DirectorySnapshot, compare_file_names};
pub use watcher::DirWatcher;

use std::io;
use std::path::Path;
use thiserror::Error;

/// File system errors
#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Watch error: {0}")]
    Watch(String),
}

impl FsError {
    /// Classify an I/O error against the path it happened on
    pub fn from_io(path: &Path, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => FsError::AccessDenied(path.display().to_string()),
            _ => FsError::Io(e),
        }
    }
}

impl From<notify::Error> for FsError {
    fn from(e: notify::Error) -> Self {
        FsError::Watch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
