//! Catalog: cluster topology and dataset sharding
//!
//! A catalog document is either the flat-ring layout (version 1, the default
//! when `version` is absent) or the volume-tree layout (version 2). Both are
//! validated exhaustively before anything is built, so an operator sees every
//! problem in one pass. A built [`Catalog`] is immutable; reloads build a new
//! one and swap it through [`CatalogHandle`].

pub mod continuum;
mod errors;
mod handle;
pub(crate) mod validation;
pub mod version1;
pub mod version2;
pub mod volume;
mod watcher;

pub use continuum::{Continuum, ContinuumPoint, WeightedTarget};
pub use errors::{MultiplexError, ValidationError, ValidationErrorKind};
pub use handle::CatalogHandle;
pub use version1::{Farm, RingCatalog, RingDataset, RingZone};
pub use version2::{Dataset, VolumeCatalog};
pub use volume::{ReplicasVolume, SingleVolume, Slice, SlicesVolume, Volume};
pub use watcher::CatalogWatcher;

use crate::routing::RoutingRequest;
use crate::{Error, Result, RoutingError};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::info;

/// Startup options for one local partition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionOptions {
    pub dataset: String,
    pub database_path: PathBuf,
    pub n_workers: u64,
    pub plugins: Vec<String>,
}

/// Version-specific body of a catalog
#[derive(Debug, Clone)]
pub enum Layout {
    Ring(RingCatalog),
    Volumes(VolumeCatalog),
}

/// Dataset of either layout
#[derive(Debug, Clone, Copy)]
pub enum DatasetRef<'a> {
    Ring(&'a RingDataset),
    Volume(&'a Dataset),
}

impl<'a> DatasetRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            DatasetRef::Ring(dataset) => &dataset.name,
            DatasetRef::Volume(dataset) => &dataset.name,
        }
    }

    pub fn n_workers(&self) -> u64 {
        match self {
            DatasetRef::Ring(dataset) => dataset.workers,
            DatasetRef::Volume(dataset) => dataset.n_workers,
        }
    }

    pub fn plugins(&self) -> &'a [String] {
        match self {
            DatasetRef::Ring(dataset) => &dataset.plugins,
            DatasetRef::Volume(dataset) => &dataset.plugins,
        }
    }

    pub fn all_nodes(&self) -> Vec<String> {
        match self {
            DatasetRef::Ring(dataset) => dataset.all_nodes(),
            DatasetRef::Volume(dataset) => dataset.all_nodes(),
        }
    }
}

/// Parsed and validated catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    version: u64,
    path: PathBuf,
    layout: Layout,
}

impl Catalog {
    /// Validate `document` and build the catalog it describes
    ///
    /// `source_path` names the file the document came from; relative
    /// database paths resolve against its directory. A relative
    /// `source_path` is resolved against the working directory once, here.
    pub fn parse(document: &Value, source_path: impl AsRef<Path>) -> Result<Self> {
        let path = absolute_path(source_path.as_ref())?;
        let source = path.display().to_string();

        let version = match document.get("version") {
            None | Some(Value::Null) => 1,
            Some(value) => match value.as_u64() {
                Some(version @ (1 | 2)) => version,
                _ => {
                    return Err(Error::Validation(MultiplexError::new(vec![
                        ValidationError::new(
                            "version",
                            ValidationErrorKind::UnsupportedVersion {
                                value: value.to_string(),
                            },
                            source,
                        ),
                    ])))
                }
            },
        };

        let layout = if version == 1 {
            Layout::Ring(RingCatalog::parse(document, &source)?)
        } else {
            Layout::Volumes(VolumeCatalog::parse(document, &source)?)
        };

        Ok(Self {
            version,
            path,
            layout,
        })
    }

    /// Parse a JSON document held in memory
    pub fn from_bytes(bytes: &[u8], source_path: impl AsRef<Path>) -> Result<Self> {
        let document: Value = serde_json::from_slice(bytes)?;
        Self::parse(&document, source_path)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute directory relative database paths resolve against
    pub fn base_path(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) => parent.to_path_buf(),
            None => self.path.clone(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn effective_date(&self) -> DateTime<Utc> {
        match &self.layout {
            Layout::Ring(ring) => ring.effective_date,
            Layout::Volumes(volumes) => volumes.effective_date,
        }
    }

    pub fn dataset_names(&self) -> Vec<&str> {
        match &self.layout {
            Layout::Ring(ring) => ring.datasets.keys().map(String::as_str).collect(),
            Layout::Volumes(volumes) => volumes.datasets.keys().map(String::as_str).collect(),
        }
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.dataset(name).is_ok()
    }

    pub fn dataset(&self, name: &str) -> std::result::Result<DatasetRef<'_>, RoutingError> {
        let found = match &self.layout {
            Layout::Ring(ring) => ring.datasets.get(name).map(DatasetRef::Ring),
            Layout::Volumes(volumes) => volumes.datasets.get(name).map(DatasetRef::Volume),
        };
        found.ok_or_else(|| RoutingError::UnknownDataset(name.to_string()))
    }

    /// Every node of every dataset, deduplicated and sorted
    pub fn all_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self
            .dataset_names()
            .into_iter()
            .filter_map(|name| self.dataset(name).ok())
            .flat_map(|dataset| dataset.all_nodes())
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// Destination addresses for `request` against `dataset`
    pub fn get_routes(
        &self,
        dataset: &str,
        request: &RoutingRequest,
    ) -> std::result::Result<Vec<String>, RoutingError> {
        self.get_routes_with_rng(dataset, request, &mut rand::thread_rng())
    }

    /// [`Catalog::get_routes`] with a caller-supplied random source
    pub fn get_routes_with_rng<R: Rng + ?Sized>(
        &self,
        dataset: &str,
        request: &RoutingRequest,
        rng: &mut R,
    ) -> std::result::Result<Vec<String>, RoutingError> {
        match self.dataset(dataset)? {
            DatasetRef::Ring(dataset) => dataset.compute_routes(request, rng),
            DatasetRef::Volume(dataset) => Ok(dataset
                .compute_routes(request, rng)?
                .into_iter()
                .map(|address| address.to_string())
                .collect()),
        }
    }

    /// Ring zone owning `key` (flat-ring catalogs only)
    pub fn get_partition(
        &self,
        dataset: &str,
        key: &Value,
    ) -> std::result::Result<Option<&RingZone>, RoutingError> {
        match self.dataset(dataset)? {
            DatasetRef::Ring(dataset) => dataset.get_partition(key).map(Some),
            DatasetRef::Volume(_) => Ok(None),
        }
    }

    /// Partitions to start for a farm (version 1) or node (version 2)
    pub fn get_partitions(&self, name: &str) -> BTreeMap<String, PartitionOptions> {
        let base_path = self.base_path();
        match &self.layout {
            Layout::Ring(ring) => ring.get_partitions(name, &base_path),
            Layout::Volumes(volumes) => volumes.get_partitions(name, &base_path),
        }
    }
}

/// Read, parse and validate the catalog at `path`
pub fn load(path: impl AsRef<Path>) -> Result<Catalog> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let catalog = Catalog::from_bytes(&bytes, path)?;
    info!(
        path = %path.display(),
        version = catalog.version(),
        datasets = catalog.dataset_names().len(),
        "Loaded catalog"
    );
    Ok(catalog)
}

/// `path` made absolute against the working directory
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(expand_path(Path::new("/"), path));
    }
    let cwd = std::env::current_dir()?;
    Ok(expand_path(&cwd, path))
}

/// Resolve `path` against `base` and fold `.`/`..` components lexically
pub fn expand_path(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
