//! LumenView core
//!
//! This crate contains:
//! - Configuration and error types
//! - The image catalog for the open directory
//! - Decoded-image memory budgeting
//! - The disk thumbnail store and its worker pool
//! - Directory change detection
//! - The viewer session tying them together

pub mod config;
pub mod error;
pub mod decoder;
pub mod catalog;
pub mod load_manager;
pub mod thumbnail_store;
pub mod change_monitor;
pub mod session;

pub use config::{AppConfig, CacheConfig, ViewerConfig, SortKey};
pub use error::AppError;
pub use decoder::{DecodedImage, Decoder, ImageCrateDecoder, fit_within};
pub use catalog::{Catalog, DecodeState, ImageRecord, RecordId};
pub use load_manager::{LoadManager, PlaybackMode, ReclaimReport, SelectOutcome, FAST_SLIDESHOW_INTERVAL};
pub use thumbnail_store::{
    Thumbnail, ThumbnailEvent, ThumbnailHandle, ThumbnailState, ThumbnailStats, ThumbnailStore,
    prune, purge, PRUNE_MARGIN,
};
pub use change_monitor::ChangeMonitor;
pub use session::{StatusEvent, ViewerSession};
