//! LumenView - image cache and thumbnail store driver
//!
//! Opens a directory (or a file inside one), builds thumbnails and walks the
//! catalog once under the configured memory budget.

mod app;

use anyhow::Result;
use std::path::PathBuf;

fn main() -> Result<()> {
    // Initialize logging and panic hook first
    let _log_guard = app_log::init()?;

    // Clean up old logs (7 days)
    if let Err(e) = app_log::cleanup_old_logs(&app_log::log_dir(), 7) {
        tracing::warn!("Failed to cleanup old logs: {}", e);
    }

    tracing::info!("LumenView starting...");

    // Load configuration
    let config = match app_core::AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Using default configuration: {:#}", e);
            app_core::AppConfig::default()
        }
    };

    let target = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    app::run(config, &target)
}
