//! Environment-based router configuration
//!
//! Environment variables:
//! - SHARDMESH_CATALOG_PATH: catalog document (default: catalog.json)
//! - SHARDMESH_RELOAD_INTERVAL_SECS: catalog poll interval, 0 disables reload (default: 5)
//! - SHARDMESH_DEFAULT_REPLICA: top, random or all (default: random)
//! - SHARDMESH_LIVE_NODES: comma-separated live node names (default: every node is live)

use crate::catalog::{CatalogHandle, CatalogWatcher};
use crate::routing::{ReplicaPolicy, Router};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

const DEFAULT_CATALOG_PATH: &str = "catalog.json";
const DEFAULT_RELOAD_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    pub catalog_path: PathBuf,
    /// `None` disables catalog reloading
    pub reload_interval: Option<Duration>,
    pub default_replica: ReplicaPolicy,
    pub live_nodes: Option<Vec<String>>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            reload_interval: Some(Duration::from_secs(DEFAULT_RELOAD_INTERVAL_SECS)),
            default_replica: ReplicaPolicy::Random,
            live_nodes: None,
        }
    }
}

impl RouterConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("SHARDMESH_CATALOG_PATH") {
            let path = path.trim();
            if path.is_empty() {
                return Err(Error::Config("SHARDMESH_CATALOG_PATH cannot be empty".to_string()));
            }
            config.catalog_path = PathBuf::from(path);
        }

        if let Some(raw) = lookup("SHARDMESH_RELOAD_INTERVAL_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!(
                    "SHARDMESH_RELOAD_INTERVAL_SECS must be a non-negative integer, got '{raw}': {e}"
                ))
            })?;
            config.reload_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(raw) = lookup("SHARDMESH_DEFAULT_REPLICA") {
            config.default_replica = raw
                .parse()
                .map_err(|e| Error::Config(format!("SHARDMESH_DEFAULT_REPLICA: {e}")))?;
        }

        if let Some(raw) = lookup("SHARDMESH_LIVE_NODES") {
            let nodes: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|node| !node.is_empty())
                .map(str::to_string)
                .collect();
            config.live_nodes = Some(nodes);
        }

        Ok(config)
    }

    /// Load the configured catalog into a new handle
    pub fn load_catalog(&self) -> Result<CatalogHandle> {
        let catalog = crate::catalog::load(&self.catalog_path)?;
        Ok(CatalogHandle::new(catalog))
    }

    /// Router over the handle's current catalog
    pub fn router(&self, handle: &CatalogHandle) -> Router {
        let router = Router::from_handle(handle).with_default_replica(self.default_replica);
        match &self.live_nodes {
            Some(nodes) => router.with_live_nodes(nodes.iter().cloned()),
            None => router,
        }
    }

    /// Watcher reloading the catalog into `handle`, if reloading is enabled
    pub fn watcher(&self, handle: CatalogHandle) -> Option<CatalogWatcher> {
        let interval = self.reload_interval?;
        info!(
            path = %self.catalog_path.display(),
            interval_secs = interval.as_secs(),
            "Catalog reload enabled"
        );
        Some(CatalogWatcher::new(self.catalog_path.clone(), handle, interval))
    }
}
