//! Volume tree of the version 2 catalog
//!
//! A volume is a single address, a set of weighted slices (shards), or a set
//! of replicas holding identical content. Slices and replicas nest other
//! volumes, so a dataset is a tree whose leaves are always single addresses.

use super::continuum::{routing_key, Continuum, WeightedTarget};
use crate::address::{sort_and_dedup, NodeAddress};
use crate::routing::{ReplicaPolicy, RouteType, RoutingRequest};
use crate::RoutingError;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};
use tracing::debug;

/// Default slicing dimension
pub const DEFAULT_DIMENSION: &str = "_key";
/// Slicer that distributes records over slices by consistent hashing
pub const HASH_SLICER: &str = "hash";

/// Routable target description
#[derive(Debug, Clone)]
pub enum Volume {
    Single(SingleVolume),
    Slices(SlicesVolume),
    Replicas(ReplicasVolume),
}

/// Leaf: one concrete address
#[derive(Debug, Clone)]
pub struct SingleVolume {
    address: NodeAddress,
}

/// Sharded volume
#[derive(Debug, Clone)]
pub struct SlicesVolume {
    dimension: String,
    slicer: String,
    slices: Vec<Slice>,
    continuum: Option<Continuum<usize>>,
}

/// One shard of a sliced volume
#[derive(Debug, Clone)]
pub struct Slice {
    weight: f64,
    label: String,
    boundary: Option<Value>,
    volume: Volume,
}

/// Redundant copies of the same content
#[derive(Debug, Clone)]
pub struct ReplicasVolume {
    replicas: Vec<Volume>,
}

impl Volume {
    /// Build a volume from its document, failing closed on unknown shapes
    pub fn from_document(raw: &Value, field: &str) -> Result<Self, RoutingError> {
        let Value::Object(map) = raw else {
            return Err(RoutingError::UnknownVolumeType(field.to_string()));
        };

        if let Some(address) = map.get("address") {
            let address = address
                .as_str()
                .ok_or_else(|| RoutingError::InvalidAddress(address.to_string()))?;
            return Ok(Volume::Single(SingleVolume {
                address: NodeAddress::parse(address)?,
            }));
        }
        if map.contains_key("slices") {
            return SlicesVolume::from_document(map, field).map(Volume::Slices);
        }
        if let Some(replicas) = map.get("replicas") {
            return ReplicasVolume::from_document(replicas, &format!("{}.replicas", field))
                .map(Volume::Replicas);
        }

        Err(RoutingError::UnknownVolumeType(field.to_string()))
    }

    /// Deduplicated, sorted `host:port/tag` strings beneath this volume
    pub fn all_nodes(&self) -> Vec<String> {
        match self {
            Volume::Single(single) => vec![single.address.node()],
            Volume::Slices(slices) => collect_nodes(slices.slices.iter().map(|s| &s.volume)),
            Volume::Replicas(replicas) => collect_nodes(replicas.replicas.iter()),
        }
    }

    /// Every leaf address beneath this volume, in document order
    pub fn addresses(&self) -> Vec<&NodeAddress> {
        let mut out = Vec::new();
        self.push_addresses(&mut out);
        out
    }

    fn push_addresses<'a>(&'a self, out: &mut Vec<&'a NodeAddress>) {
        match self {
            Volume::Single(single) => out.push(&single.address),
            Volume::Slices(slices) => {
                for slice in &slices.slices {
                    slice.volume.push_addresses(out);
                }
            }
            Volume::Replicas(replicas) => {
                for replica in &replicas.replicas {
                    replica.push_addresses(out);
                }
            }
        }
    }

    /// Destinations for `request`, deduplicated and sorted
    pub fn compute_routes<R: Rng + ?Sized>(
        &self,
        request: &RoutingRequest,
        rng: &mut R,
    ) -> Result<Vec<NodeAddress>, RoutingError> {
        match self {
            Volume::Single(single) => Ok(vec![single.address.clone()]),
            Volume::Slices(slices) => slices.compute_routes(request, rng),
            Volume::Replicas(replicas) => replicas.compute_routes(request, rng),
        }
    }

    /// True when no path through the tree splits into more than one slice
    pub fn is_single_slice(&self) -> bool {
        match self {
            Volume::Single(_) => true,
            Volume::Slices(slices) => {
                slices.slices.len() <= 1 && slices.slices.iter().all(|s| s.volume.is_single_slice())
            }
            Volume::Replicas(replicas) => replicas.replicas.iter().all(Volume::is_single_slice),
        }
    }
}

impl SingleVolume {
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }
}

impl SlicesVolume {
    fn from_document(map: &Map<String, Value>, field: &str) -> Result<Self, RoutingError> {
        let dimension = map
            .get("dimension")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_DIMENSION)
            .to_string();
        let slicer = map
            .get("slicer")
            .and_then(Value::as_str)
            .unwrap_or(HASH_SLICER)
            .to_string();

        let raw_slices = match map.get("slices") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Err(RoutingError::UnknownVolumeType(format!("{}.slices", field))),
        };

        let slices = raw_slices
            .iter()
            .enumerate()
            .map(|(index, raw)| Slice::from_document(raw, index, &format!("{}.slices[{}]", field, index)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut volume = Self {
            dimension,
            slicer,
            slices,
            continuum: None,
        };
        if volume.is_hash_sliced() && volume.slices.len() > 1 {
            volume.continuum = Some(volume.compute_continuum()?);
        }
        Ok(volume)
    }

    fn compute_continuum(&self) -> Result<Continuum<usize>, RoutingError> {
        let targets = self
            .slices
            .iter()
            .enumerate()
            .map(|(index, slice)| WeightedTarget::new(index, slice.weight, slice.label.clone()))
            .collect();
        Continuum::build(targets, self.slices.len() as u64)
    }

    pub fn dimension(&self) -> &str {
        &self.dimension
    }

    pub fn slicer(&self) -> &str {
        &self.slicer
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn is_hash_sliced(&self) -> bool {
        self.slicer == HASH_SLICER
    }

    /// Label-sorted slices, optionally windowed
    pub fn select_slices(&self, range: Option<std::ops::Range<usize>>) -> Vec<&Slice> {
        let mut sorted: Vec<&Slice> = self.slices.iter().collect();
        sorted.sort_by(|a, b| a.label.cmp(&b.label));
        match range {
            Some(range) => {
                let end = range.end.min(sorted.len());
                let start = range.start.min(end);
                sorted[start..end].to_vec()
            }
            None => sorted,
        }
    }

    /// Slice owning the record described by `request`
    pub fn choose_slice(&self, request: &RoutingRequest) -> Result<&Slice, RoutingError> {
        let Some(continuum) = &self.continuum else {
            // Ordinal slicers and single-slice volumes always use the first slice.
            return self.slices.first().ok_or_else(|| {
                RoutingError::InvalidWeightConfiguration("volume has no slice".to_string())
            });
        };

        let value = request
            .dimension_value(&self.dimension)
            .ok_or_else(|| RoutingError::MissingScatterKey {
                dimension: self.dimension.clone(),
            })?;
        let key = routing_key(&value)?;
        let index = *continuum.lookup(key.as_bytes());
        Ok(&self.slices[index])
    }

    fn compute_routes<R: Rng + ?Sized>(
        &self,
        request: &RoutingRequest,
        rng: &mut R,
    ) -> Result<Vec<NodeAddress>, RoutingError> {
        let mut routes = Vec::new();
        match request.route_type {
            RouteType::Broadcast => {
                for slice in self.select_slices(None) {
                    routes.extend(slice.volume.compute_routes(request, rng)?);
                }
            }
            RouteType::Scatter => {
                let slice = self.choose_slice(request)?;
                debug!(label = %slice.label, "Scatter chose slice");
                routes.extend(slice.volume.compute_routes(request, rng)?);
            }
        }
        sort_and_dedup(&mut routes);
        Ok(routes)
    }
}

impl Slice {
    fn from_document(raw: &Value, index: usize, field: &str) -> Result<Self, RoutingError> {
        let Value::Object(map) = raw else {
            return Err(RoutingError::UnknownVolumeType(field.to_string()));
        };
        let weight = map.get("weight").and_then(Value::as_f64).unwrap_or(1.0);
        let label = map
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:03}", index));
        let boundary = map.get("boundary").cloned();
        let raw_volume = map
            .get("volume")
            .ok_or_else(|| RoutingError::UnknownVolumeType(format!("{}.volume", field)))?;

        Ok(Self {
            weight,
            label,
            boundary,
            volume: Volume::from_document(raw_volume, &format!("{}.volume", field))?,
        })
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn boundary(&self) -> Option<&Value> {
        self.boundary.as_ref()
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn all_nodes(&self) -> Vec<String> {
        self.volume.all_nodes()
    }
}

impl ReplicasVolume {
    /// Build from an array of replica volume documents
    pub fn from_document(raw: &Value, field: &str) -> Result<Self, RoutingError> {
        let Value::Array(items) = raw else {
            return Err(RoutingError::UnknownVolumeType(field.to_string()));
        };
        let replicas = items
            .iter()
            .enumerate()
            .map(|(index, item)| Volume::from_document(item, &format!("{}[{}]", field, index)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { replicas })
    }

    pub fn replicas(&self) -> &[Volume] {
        &self.replicas
    }

    /// Replicas eligible for `request`, then narrowed by `policy`
    ///
    /// A replica with any node missing from the live set is excluded whole.
    pub fn select<'a, R: Rng + ?Sized>(
        &'a self,
        policy: ReplicaPolicy,
        request: &RoutingRequest,
        rng: &mut R,
    ) -> Vec<&'a Volume> {
        let live: Vec<&Volume> = self
            .replicas
            .iter()
            .filter(|replica| request.all_alive(replica.all_nodes().iter()))
            .collect();
        if live.len() < self.replicas.len() {
            debug!(
                excluded = self.replicas.len() - live.len(),
                "Excluded replicas with dead nodes"
            );
        }

        match policy {
            ReplicaPolicy::Top => live.into_iter().take(1).collect(),
            ReplicaPolicy::Random => live.choose(rng).copied().into_iter().collect(),
            ReplicaPolicy::All => live,
        }
    }

    fn compute_routes<R: Rng + ?Sized>(
        &self,
        request: &RoutingRequest,
        rng: &mut R,
    ) -> Result<Vec<NodeAddress>, RoutingError> {
        let mut routes = Vec::new();
        for replica in self.select(request.replica, request, rng) {
            routes.extend(replica.compute_routes(request, rng)?);
        }
        sort_and_dedup(&mut routes);
        Ok(routes)
    }

    pub fn all_nodes(&self) -> Vec<String> {
        collect_nodes(self.replicas.iter())
    }
}

fn collect_nodes<'a>(volumes: impl Iterator<Item = &'a Volume>) -> Vec<String> {
    let mut nodes: Vec<String> = volumes.flat_map(|volume| volume.all_nodes()).collect();
    nodes.sort();
    nodes.dedup();
    nodes
}
