//! Application configuration

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub viewer: ViewerConfig,
}

/// Memory budget and thumbnail cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Ceiling on the decoded footprint of all loaded images
    pub max_image_mem_mb: u64,
    /// Thumbnail files kept on disk before shutdown pruning kicks in
    pub max_cache_files: usize,
    /// Purge the whole thumbnail directory on exit instead of pruning
    pub delete_all_on_exit: bool,
    pub thumbnail_workers: usize,
    /// Longest edge of a generated thumbnail, in pixels
    pub thumbnail_size: u32,
    /// Overrides the platform cache directory
    pub cache_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_image_mem_mb: 1024,
            max_cache_files: 5000,
            delete_all_on_exit: false,
            thumbnail_workers: 4,
            thumbnail_size: 256,
            cache_dir: None,
        }
    }
}

impl CacheConfig {
    pub fn memory_budget_bytes(&self) -> u64 {
        self.max_image_mem_mb.saturating_mul(1024 * 1024)
    }

    /// Worker count, clamped to a small fixed pool
    pub fn worker_count(&self) -> usize {
        self.thumbnail_workers.clamp(1, 8)
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            ProjectDirs::from("com", "LumenView", "LumenView")
                .map(|dirs| dirs.cache_dir().join("thumbnails"))
                .unwrap_or_else(|| PathBuf::from("./cache/thumbnails"))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub sort_key: SortKey,
    pub sort_ascending: bool,
    pub slideshow_interval_ms: u64,
    pub slideshow_looping: bool,
    /// Also resync on filesystem events, not only on refocus
    pub watch_directory: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            sort_key: SortKey::Name,
            sort_ascending: true,
            slideshow_interval_ms: 3000,
            slideshow_looping: true,
            watch_directory: false,
        }
    }
}

impl ViewerConfig {
    pub fn slideshow_interval(&self) -> Duration {
        Duration::from_millis(self.slideshow_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "modified")]
    ModTime,
    #[serde(rename = "size")]
    Size,
    #[serde(rename = "type")]
    Type,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::info!("Configuration loaded from {:?}", config_path);
            Ok(config)
        } else {
            tracing::info!("Using default configuration");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        tracing::info!("Configuration saved to {:?}", config_path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        ProjectDirs::from("com", "LumenView", "LumenView")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./config.toml"))
    }
}
