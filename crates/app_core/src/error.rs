//! Application error types

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Recoverable, per request (report, continue) =====
    #[error("Cannot decode {path}: {reason}")]
    DecodeFailure { path: PathBuf, reason: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Filesystem error: {0}")]
    FilesystemFailure(String),

    #[error("Thumbnail cache write failed: {0}")]
    CacheWriteFailure(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Fatal (startup only) =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization failed: {0}")]
    Init(String),
}

impl AppError {
    pub fn decode(path: &Path, reason: impl ToString) -> Self {
        AppError::DecodeFailure {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Is this error recoverable?
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::DecodeFailure { .. }
                | AppError::UnsupportedFormat(_)
                | AppError::FilesystemFailure(_)
                | AppError::CacheWriteFailure(_)
                | AppError::Io(_)
        )
    }

    /// Is this a fatal error?
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Get a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AppError::DecodeFailure { path, .. } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                format!("Cannot load image: {}", name)
            }
            AppError::UnsupportedFormat(ext) => format!("Unsupported format: {}", ext),
            AppError::FilesystemFailure(msg) => format!("File access failed: {}", msg),
            _ => self.to_string(),
        }
    }
}

impl From<app_fs::FsError> for AppError {
    fn from(e: app_fs::FsError) -> Self {
        AppError::FilesystemFailure(e.to_string())
    }
}

impl From<bincode::Error> for AppError {
    fn from(e: bincode::Error) -> Self {
        AppError::CacheWriteFailure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AppError::decode(Path::new("/x/a.png"), "bad header").is_recoverable());
        assert!(AppError::CacheWriteFailure("disk full".into()).is_recoverable());
        assert!(AppError::Config("bad toml".into()).is_fatal());
    }

    #[test]
    fn test_user_message_uses_file_name() {
        let err = AppError::decode(Path::new("/x/a.png"), "bad header");
        assert_eq!(err.user_message(), "Cannot load image: a.png");
        assert!(err.to_string().contains("bad header"));
    }

    #[test]
    fn test_fs_error_maps_to_filesystem_failure() {
        let err: AppError = app_fs::FsError::NotFound("/gone".into()).into();
        assert!(matches!(err, AppError::FilesystemFailure(_)));
    }
}
