//! Application run loop

use anyhow::{Context, Result};
use app_core::{AppConfig, ImageCrateDecoder, ThumbnailState, ViewerSession};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest we wait for outstanding thumbnails before moving on
const THUMBNAIL_WAIT: Duration = Duration::from_secs(30);

pub fn run(config: AppConfig, target: &Path) -> Result<()> {
    let mut session = ViewerSession::open_path(config, target, Arc::new(ImageCrateDecoder))
        .with_context(|| format!("cannot open {}", target.display()))?;

    if session.catalog().is_empty() {
        tracing::info!("No images in {}", target.display());
        if let Err(e) = session.shutdown() {
            tracing::warn!("Thumbnail cache cleanup failed: {}", e);
        }
        return Ok(());
    }

    warm_thumbnails(&mut session);
    browse(&mut session);

    // Pick up anything that changed while we were busy
    if session.refocus() {
        tracing::info!("Directory changed during the run");
    }
    session.poll_external_changes();
    report(&mut session);

    let stats = session.thumbnail_store().stats();
    tracing::info!(
        "Thumbnails: {} generated, {} from cache ({})",
        stats.jobs_dispatched,
        stats.cache_hits,
        stats.cache_dir.display()
    );

    match session.shutdown() {
        Ok(pruned) => tracing::info!("Shutdown complete, pruned {} cache files", pruned),
        Err(e) => tracing::warn!("Thumbnail cache cleanup failed: {}", e),
    }
    Ok(())
}

/// Request every thumbnail and wait for the pending ones
fn warm_thumbnails(session: &mut ViewerSession) {
    let handles = session.request_all_thumbnails();
    let deadline = Instant::now() + THUMBNAIL_WAIT;

    while handles.iter().any(|h| h.is_pending()) {
        let now = Instant::now();
        if now >= deadline {
            tracing::warn!("Gave up waiting for thumbnails");
            break;
        }
        let _ = session
            .thumbnail_store()
            .recv_completed_timeout((deadline - now).min(Duration::from_millis(200)));
    }

    session.poll_thumbnails();

    let ready = handles
        .iter()
        .filter(|h| matches!(h.state(), ThumbnailState::Ready(_)))
        .count();
    tracing::info!("{} of {} thumbnails ready", ready, handles.len());
    report(session);
}

/// Step through the catalog once from the current image
fn browse(session: &mut ViewerSession) {
    let start = session.current();
    let mut visited = 1;

    while let Some(id) = session.next() {
        if Some(id) == start {
            break;
        }
        visited += 1;
        let (used, budget) = session.memory_usage();
        tracing::debug!("Showing {:?}: {} of {} bytes in use", id, used, budget);
        report(session);
    }

    tracing::info!("Visited {} images", visited);
}

fn report(session: &mut ViewerSession) {
    for event in session.drain_events() {
        tracing::info!("{}", event);
    }
}
