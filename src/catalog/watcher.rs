//! Catalog file reloader
//!
//! Polls the catalog file's modification time and swaps in a freshly built
//! catalog when it changes. An invalid document leaves the running catalog in
//! place.

use super::{Catalog, CatalogHandle};
use crate::routing::telemetry::{self as routing_telemetry, ReloadOutcome};
use crate::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct CatalogWatcher {
    path: PathBuf,
    handle: CatalogHandle,
    interval: Duration,
    last_modified: Option<SystemTime>,
    shutdown: CancellationToken,
}

impl CatalogWatcher {
    pub fn new(path: impl Into<PathBuf>, handle: CatalogHandle, interval: Duration) -> Self {
        Self {
            path: path.into(),
            handle,
            interval,
            last_modified: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops [`CatalogWatcher::run`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Poll until the shutdown token is cancelled
    pub async fn run(mut self) {
        self.last_modified = modified_at(&self.path).await.ok();
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.check().await {
                        warn!(path = %self.path.display(), error = %e, "Catalog check failed");
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Catalog watcher shutting down");
                    break;
                }
            }
        }
    }

    /// Reload once if the file changed since the last check
    ///
    /// Returns whether a new catalog was installed.
    pub async fn check(&mut self) -> Result<bool> {
        let modified = modified_at(&self.path).await?;
        if self.last_modified == Some(modified) {
            return Ok(false);
        }
        self.last_modified = Some(modified);
        debug!(path = %self.path.display(), "Catalog file changed");

        let bytes = tokio::fs::read(&self.path).await?;
        match Catalog::from_bytes(&bytes, &self.path) {
            Ok(catalog) => {
                info!(
                    path = %self.path.display(),
                    effective_date = %catalog.effective_date(),
                    "Reloaded catalog"
                );
                self.handle.swap(catalog);
                routing_telemetry::record_catalog_reload(ReloadOutcome::Applied);
                Ok(true)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Rejected catalog update, keeping the current catalog"
                );
                routing_telemetry::record_catalog_reload(ReloadOutcome::Rejected);
                Ok(false)
            }
        }
    }
}

async fn modified_at(path: &Path) -> Result<SystemTime> {
    Ok(tokio::fs::metadata(path).await?.modified()?)
}
