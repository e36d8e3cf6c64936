//! Flat-ring catalog (version 1)
//!
//! Each dataset owns a ring of zones. A zone carries a weight and a set of
//! time-labelled partitions, each listing the partition references
//! (`farm.database`) that hold identical copies of that time range.

use super::continuum::{routing_key, Continuum, WeightedTarget};
use super::errors::{MultiplexError, ValidationError, ValidationErrorKind};
use super::validation::Validator;
use super::{expand_path, PartitionOptions};
use crate::address::NodeAddress;
use crate::routing::{ReplicaPolicy, RouteType, RoutingRequest};
use crate::RoutingError;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Only supported `date_range`
pub const DATE_RANGE_INFINITY: &str = "infinity";
/// Only supported `partition_key`
pub const PARTITION_KEY: &str = "_key";

/// Storage location owned by a farm
#[derive(Debug, Clone, PartialEq)]
pub struct Farm {
    pub name: String,
    pub device: String,
}

/// Weighted member of a dataset ring
#[derive(Debug, Clone)]
pub struct RingZone {
    pub name: String,
    pub weight: f64,
    /// `(time label, partition references)`, sorted by label
    pub partitions: Vec<(String, Vec<String>)>,
}

/// Dataset in the flat-ring layout
#[derive(Debug, Clone)]
pub struct RingDataset {
    pub name: String,
    pub number_of_partitions: u64,
    pub number_of_replicas: u64,
    pub workers: u64,
    pub plugins: Vec<String>,
    /// Zones in document order
    pub zones: Vec<RingZone>,
    continuum: Option<Continuum<usize>>,
}

impl RingDataset {
    pub fn has_continuum(&self) -> bool {
        self.continuum.is_some()
    }

    /// Zone owning `key`; datasets without a continuum always use their first zone
    pub fn get_partition(&self, key: &Value) -> Result<&RingZone, RoutingError> {
        let index = match &self.continuum {
            Some(continuum) => *continuum.lookup(routing_key(key)?.as_bytes()),
            None => 0,
        };
        self.zones.get(index).ok_or_else(|| {
            RoutingError::InvalidWeightConfiguration(format!("dataset {} has no zone", self.name))
        })
    }

    /// Every partition reference in the ring
    pub fn partition_refs(&self) -> impl Iterator<Item = &String> {
        self.zones
            .iter()
            .flat_map(|zone| zone.partitions.iter())
            .flat_map(|(_, refs)| refs.iter())
    }

    pub fn all_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self
            .partition_refs()
            .filter_map(|reference| NodeAddress::parse(reference).ok())
            .map(|address| address.node())
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    pub fn compute_routes<R: Rng + ?Sized>(
        &self,
        request: &RoutingRequest,
        rng: &mut R,
    ) -> Result<Vec<String>, RoutingError> {
        let mut routes = Vec::new();
        match request.route_type {
            RouteType::Broadcast => {
                for zone in &self.zones {
                    select_range_and_replicas(zone, request, rng, &mut routes);
                }
            }
            RouteType::Scatter => {
                let key = request
                    .dimension_value(PARTITION_KEY)
                    .ok_or_else(|| RoutingError::MissingScatterKey {
                        dimension: PARTITION_KEY.to_string(),
                    })?;
                let zone = self.get_partition(&key)?;
                debug!(dataset = %self.name, zone = %zone.name, "Scatter chose zone");
                select_range_and_replicas(zone, request, rng, &mut routes);
            }
        }
        routes.sort();
        routes.dedup();
        Ok(routes)
    }
}

fn select_range_and_replicas<R: Rng + ?Sized>(
    zone: &RingZone,
    request: &RoutingRequest,
    rng: &mut R,
    routes: &mut Vec<String>,
) {
    let window = match &request.date_range {
        Some(range) => range.slice(&zone.partitions),
        None => &zone.partitions[..],
    };
    for (_, replicas) in window {
        let live: Vec<&String> = replicas
            .iter()
            .filter(|reference| {
                let node = NodeAddress::parse(reference)
                    .map(|address| address.node())
                    .unwrap_or_else(|_| (*reference).clone());
                request.all_alive([&node])
            })
            .collect();
        match request.replica {
            ReplicaPolicy::Top => routes.extend(live.first().map(|r| (*r).clone())),
            ReplicaPolicy::Random => routes.extend(live.choose(rng).map(|r| (*r).clone())),
            ReplicaPolicy::All => routes.extend(live.into_iter().cloned()),
        }
    }
}

/// Validated flat-ring catalog body
#[derive(Debug, Clone)]
pub struct RingCatalog {
    pub effective_date: DateTime<Utc>,
    pub zones: Vec<String>,
    pub farms: BTreeMap<String, Farm>,
    pub datasets: BTreeMap<String, RingDataset>,
}

impl RingCatalog {
    /// Validate `document` and build the ring model
    pub fn parse(document: &Value, source_path: &str) -> Result<Self, MultiplexError> {
        validate(document, source_path)?;

        let empty = Map::new();
        let root = document.as_object().unwrap_or(&empty);
        let effective_date = root
            .get("effectiveDate")
            .and_then(Value::as_str)
            .and_then(super::validation::parse_datetime)
            .unwrap_or_default();
        let zones = string_list(root.get("zones"));

        let farms = object_entries(root.get("farms"))
            .map(|(name, farm)| {
                let device = farm
                    .get("device")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                (name.clone(), Farm { name: name.clone(), device })
            })
            .collect();

        let mut datasets = BTreeMap::new();
        for (name, raw) in object_entries(root.get("datasets")) {
            let dataset = build_dataset(name, raw).map_err(|e| {
                debug!(error = %e, "Ring continuum could not be built");
                MultiplexError::new(vec![ValidationError::new(
                    format!("datasets.{}.ring", name),
                    ValidationErrorKind::InvalidWeightConfiguration,
                    source_path,
                )])
            })?;
            datasets.insert(name.clone(), dataset);
        }

        Ok(Self {
            effective_date,
            zones,
            farms,
            datasets,
        })
    }

    /// Startup options for every partition stored on `farm_name`
    pub fn get_partitions(&self, farm_name: &str, base_path: &Path) -> BTreeMap<String, PartitionOptions> {
        let mut results = BTreeMap::new();
        let Some(farm) = self.farms.get(farm_name) else {
            return results;
        };
        let prefix = format!("{}.", farm_name);

        for (dataset_name, dataset) in &self.datasets {
            for reference in dataset.partition_refs() {
                let Some(database) = reference.strip_prefix(&prefix) else {
                    continue;
                };
                let path: PathBuf = [farm.device.as_str(), database, "db"].iter().collect();
                results.insert(
                    reference.clone(),
                    PartitionOptions {
                        dataset: dataset_name.clone(),
                        database_path: expand_path(base_path, &path),
                        n_workers: dataset.workers,
                        plugins: dataset.plugins.clone(),
                    },
                );
            }
        }
        results
    }

    /// Farm whose name prefixes `reference`, longest match first
    pub fn farm_for(&self, reference: &str) -> Option<&Farm> {
        self.farms
            .values()
            .filter(|farm| {
                reference.len() > farm.name.len()
                    && reference.starts_with(farm.name.as_str())
                    && reference.as_bytes()[farm.name.len()] == b'.'
            })
            .max_by_key(|farm| farm.name.len())
    }
}

fn build_dataset(name: &str, raw: &Map<String, Value>) -> Result<RingDataset, RoutingError> {
    let int = |field: &str| raw.get(field).and_then(Value::as_u64).unwrap_or_default();
    let number_of_partitions = int("number_of_partitions");

    let mut zones = Vec::new();
    for (zone_name, zone) in raw.get("ring").and_then(Value::as_object).into_iter().flatten() {
        let weight = zone.get("weight").and_then(Value::as_f64).unwrap_or_default();
        let mut partitions: Vec<(String, Vec<String>)> = zone
            .get("partitions")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .map(|(label, refs)| (label.clone(), string_list(Some(refs))))
            .collect();
        partitions.sort_by(|a, b| a.0.cmp(&b.0));
        zones.push(RingZone {
            name: zone_name.clone(),
            weight,
            partitions,
        });
    }

    let continuum = if number_of_partitions >= 2 {
        let targets = zones
            .iter()
            .enumerate()
            .map(|(index, zone)| WeightedTarget::new(index, zone.weight, zone.name.clone()))
            .collect();
        Some(Continuum::build(targets, number_of_partitions)?)
    } else {
        None
    };

    Ok(RingDataset {
        name: name.to_string(),
        number_of_partitions,
        number_of_replicas: int("number_of_replicas"),
        workers: int("workers"),
        plugins: string_list(raw.get("plugins")),
        zones,
        continuum,
    })
}

fn object_entries(value: Option<&Value>) -> impl Iterator<Item = (&String, &Map<String, Value>)> {
    value
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter_map(|(name, item)| item.as_object().map(|map| (name, map)))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

/// Run every rule and collect all violations
fn validate(document: &Value, source_path: &str) -> Result<(), MultiplexError> {
    let mut v = Validator::new(source_path);
    let Some(root) = v.object(document, "catalog") else {
        return v.finish();
    };

    if let Some(date) = v.required(root.get("effectiveDate"), "effectiveDate") {
        v.datetime(date, "effectiveDate");
    }
    if let Some(zones) = root.get("zones") {
        v.string_array(zones, "zones");
    }

    let farms = validate_farms(&mut v, root.get("farms"));
    let datasets = validate_datasets(&mut v, root.get("datasets"));

    if let (Some(farms), Some(datasets)) = (farms, datasets) {
        validate_database_relations(&mut v, &farms, datasets);
    }
    v.finish()
}

/// Farm names when every farm validated
fn validate_farms(v: &mut Validator, farms: Option<&Value>) -> Option<Vec<String>> {
    let farms = v.required(farms, "farms")?;
    let farms = v.object(farms, "farms")?;
    let before = v.error_count();
    for (name, farm) in farms {
        let field = format!("farms.{}", name);
        let Some(farm) = v.object(farm, &field) else {
            continue;
        };
        let device_field = format!("{}.device", field);
        if let Some(device) = v.required(farm.get("device"), &device_field) {
            v.string(device, &device_field);
        }
    }
    (v.error_count() == before).then(|| farms.keys().cloned().collect())
}

fn validate_datasets<'d>(
    v: &mut Validator,
    datasets: Option<&'d Value>,
) -> Option<&'d Map<String, Value>> {
    let datasets = v.required(datasets, "datasets")?;
    let datasets = v.object(datasets, "datasets")?;
    for (name, dataset) in datasets {
        let field = format!("datasets.{}", name);
        if let Some(dataset) = v.object(dataset, &field) {
            validate_dataset(v, dataset, &field);
        }
    }
    Some(datasets)
}

fn validate_dataset(v: &mut Validator, dataset: &Map<String, Value>, field: &str) {
    let sub = |name: &str| format!("{}.{}", field, name);

    let partitions = v
        .required(dataset.get("number_of_partitions"), &sub("number_of_partitions"))
        .and_then(|value| v.one_or_larger_integer(value, &sub("number_of_partitions")));
    if let Some(value) = v.required(dataset.get("number_of_replicas"), &sub("number_of_replicas")) {
        v.one_or_larger_integer(value, &sub("number_of_replicas"));
    }
    if let Some(value) = v.required(dataset.get("workers"), &sub("workers")) {
        v.non_negative_integer(value, &sub("workers"));
    }
    if let Some(value) = v.required(dataset.get("date_range"), &sub("date_range")) {
        v.literal(value, &sub("date_range"), DATE_RANGE_INFINITY);
    }
    if let Some(value) = v.required(dataset.get("partition_key"), &sub("partition_key")) {
        v.literal(value, &sub("partition_key"), PARTITION_KEY);
    }
    if let Some(plugins) = dataset.get("plugins") {
        v.string_array(plugins, &sub("plugins"));
    }

    let Some(ring) = v.required(dataset.get("ring"), &sub("ring")) else {
        return;
    };
    let Some(ring) = v.object(ring, &sub("ring")) else {
        return;
    };

    let mut total_weight = 0.0;
    let mut weights_valid = true;
    for (zone_name, zone) in ring {
        let zone_field = format!("{}.ring.{}", field, zone_name);
        let Some(zone) = v.object(zone, &zone_field) else {
            weights_valid = false;
            continue;
        };

        let weight_field = format!("{}.weight", zone_field);
        match v
            .required(zone.get("weight"), &weight_field)
            .and_then(|weight| v.non_negative_number(weight, &weight_field))
        {
            Some(weight) => total_weight += weight,
            None => weights_valid = false,
        }

        let partitions_field = format!("{}.partitions", zone_field);
        if let Some(partitions) = v.required(zone.get("partitions"), &partitions_field) {
            if let Some(partitions) = v.object(partitions, &partitions_field) {
                for (label, refs) in partitions {
                    v.string_array(refs, &format!("{}.{}", partitions_field, label));
                }
            }
        }
    }

    if weights_valid && partitions.is_some_and(|n| n >= 2) && total_weight <= 0.0 {
        v.error(sub("ring"), ValidationErrorKind::InvalidWeightConfiguration);
    }
}

/// Every partition reference must name a known farm and a database
fn validate_database_relations(
    v: &mut Validator,
    farms: &[String],
    datasets: &Map<String, Value>,
) {
    for (name, dataset) in datasets {
        let ring = dataset.get("ring").and_then(Value::as_object);
        for (zone_name, zone) in ring.into_iter().flatten() {
            let partitions = zone.get("partitions").and_then(Value::as_object);
            for (label, refs) in partitions.into_iter().flatten() {
                let field = format!("datasets.{}.ring.{}.partitions.{}", name, zone_name, label);
                for reference in refs.as_array().into_iter().flatten().filter_map(Value::as_str) {
                    check_reference(v, farms, reference, &field);
                }
            }
        }
    }
}

fn check_reference(v: &mut Validator, farms: &[String], reference: &str, field: &str) {
    let farm = farms
        .iter()
        .filter(|farm| reference.starts_with(farm.as_str()))
        .filter(|farm| reference[farm.len()..].starts_with('.') || reference.len() == farm.len())
        .max_by_key(|farm| farm.len());

    match farm {
        None => v.error(
            field,
            ValidationErrorKind::UnknownFarm {
                partition: reference.to_string(),
            },
        ),
        Some(farm) if reference.len() <= farm.len() + 1 => v.error(
            field,
            ValidationErrorKind::MissingDatabaseName {
                partition: reference.to_string(),
            },
        ),
        Some(_) => {}
    }
}
