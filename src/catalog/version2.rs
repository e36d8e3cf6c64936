//! Volume-tree catalog (version 2)

use super::errors::{MultiplexError, ValidationError, ValidationErrorKind};
use super::validation::{parse_datetime, Validator};
use super::volume::{ReplicasVolume, Volume, HASH_SLICER};
use super::{expand_path, PartitionOptions};
use crate::address::NodeAddress;
use crate::routing::RoutingRequest;
use crate::RoutingError;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Dataset in the volume-tree layout
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub n_workers: u64,
    pub plugins: Vec<String>,
    pub fact: Option<String>,
    pub schema: Option<Value>,
    pub replicas: Volume,
}

impl Dataset {
    pub fn all_nodes(&self) -> Vec<String> {
        self.replicas.all_nodes()
    }

    pub fn compute_routes<R: Rng + ?Sized>(
        &self,
        request: &RoutingRequest,
        rng: &mut R,
    ) -> Result<Vec<NodeAddress>, RoutingError> {
        self.replicas.compute_routes(request, rng)
    }

    pub fn is_single_slice(&self) -> bool {
        self.replicas.is_single_slice()
    }
}

/// Validated volume-tree catalog body
#[derive(Debug, Clone)]
pub struct VolumeCatalog {
    pub effective_date: DateTime<Utc>,
    pub datasets: BTreeMap<String, Dataset>,
}

impl VolumeCatalog {
    pub fn parse(document: &Value, source_path: &str) -> Result<Self, MultiplexError> {
        validate(document, source_path)?;

        let empty = Map::new();
        let root = document.as_object().unwrap_or(&empty);
        let effective_date = root
            .get("effectiveDate")
            .and_then(Value::as_str)
            .and_then(parse_datetime)
            .unwrap_or_default();

        let mut datasets = BTreeMap::new();
        let mut errors = Vec::new();
        for (name, raw) in root.get("datasets").and_then(Value::as_object).into_iter().flatten() {
            let field = format!("datasets.{}.replicas", name);
            match build_dataset(name, raw, &field) {
                Ok(dataset) => {
                    datasets.insert(name.clone(), dataset);
                }
                Err(e) => errors.push(ValidationError::new(field, routing_kind(&e), source_path)),
            }
        }
        if !errors.is_empty() {
            return Err(MultiplexError::new(errors));
        }

        Ok(Self {
            effective_date,
            datasets,
        })
    }

    /// Startup options for every partition served by `node` (`host:port/tag`)
    pub fn get_partitions(&self, node: &str, base_path: &Path) -> BTreeMap<String, PartitionOptions> {
        let mut results = BTreeMap::new();
        for (dataset_name, dataset) in &self.datasets {
            for address in dataset.replicas.addresses() {
                if address.node() != node {
                    continue;
                }
                let local = address.local_name.as_deref().unwrap_or(&address.tag);
                let path = Path::new("databases").join(local).join("db");
                results.insert(
                    address.to_string(),
                    PartitionOptions {
                        dataset: dataset_name.clone(),
                        database_path: expand_path(base_path, &path),
                        n_workers: dataset.n_workers,
                        plugins: dataset.plugins.clone(),
                    },
                );
            }
        }
        results
    }
}

fn routing_kind(error: &RoutingError) -> ValidationErrorKind {
    match error {
        RoutingError::InvalidAddress(value) => ValidationErrorKind::InvalidAddress {
            value: value.clone(),
        },
        RoutingError::InvalidWeightConfiguration(_) => ValidationErrorKind::InvalidWeightConfiguration,
        _ => ValidationErrorKind::UnknownVolumeType,
    }
}

fn build_dataset(name: &str, raw: &Value, field: &str) -> Result<Dataset, RoutingError> {
    let replicas = match raw.get("replicas") {
        Some(replicas @ Value::Array(_)) => {
            Volume::Replicas(ReplicasVolume::from_document(replicas, field)?)
        }
        Some(volume) => Volume::from_document(volume, field)?,
        None => return Err(RoutingError::UnknownVolumeType(field.to_string())),
    };

    Ok(Dataset {
        name: name.to_string(),
        n_workers: raw.get("nWorkers").and_then(Value::as_u64).unwrap_or_default(),
        plugins: raw
            .get("plugins")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        fact: raw.get("fact").and_then(Value::as_str).map(str::to_string),
        schema: raw.get("schema").cloned(),
        replicas,
    })
}

fn validate(document: &Value, source_path: &str) -> Result<(), MultiplexError> {
    let mut v = Validator::new(source_path);
    let Some(root) = v.object(document, "catalog") else {
        return v.finish();
    };

    if let Some(date) = v.required(root.get("effectiveDate"), "effectiveDate") {
        v.datetime(date, "effectiveDate");
    }

    let Some(datasets) = v.required(root.get("datasets"), "datasets") else {
        return v.finish();
    };
    let Some(datasets) = v.object(datasets, "datasets") else {
        return v.finish();
    };

    for (name, dataset) in datasets {
        let field = format!("datasets.{}", name);
        let Some(dataset) = v.object(dataset, &field) else {
            continue;
        };
        if let Some(value) = dataset.get("nWorkers") {
            v.non_negative_integer(value, &format!("{}.nWorkers", field));
        }
        if let Some(value) = dataset.get("plugins") {
            v.string_array(value, &format!("{}.plugins", field));
        }
        if let Some(value) = dataset.get("fact") {
            v.string(value, &format!("{}.fact", field));
        }
        let replicas_field = format!("{}.replicas", field);
        if let Some(replicas) = v.required(dataset.get("replicas"), &replicas_field) {
            match replicas {
                Value::Array(items) => {
                    for (index, item) in items.iter().enumerate() {
                        validate_volume(&mut v, item, &format!("{}[{}]", replicas_field, index));
                    }
                }
                other => validate_volume(&mut v, other, &replicas_field),
            }
        }
    }
    v.finish()
}

/// Recursive shape check of one volume document
fn validate_volume(v: &mut Validator, raw: &Value, field: &str) {
    let Some(volume) = v.object(raw, field) else {
        return;
    };

    if let Some(address) = volume.get("address") {
        let address_field = format!("{}.address", field);
        if let Some(address) = v.string(address, &address_field) {
            if NodeAddress::parse(address).is_err() {
                v.error(
                    address_field,
                    ValidationErrorKind::InvalidAddress {
                        value: address.to_string(),
                    },
                );
            }
        }
    } else if let Some(slices) = volume.get("slices") {
        validate_slices(v, volume, slices, field);
    } else if let Some(replicas) = volume.get("replicas") {
        let replicas_field = format!("{}.replicas", field);
        if let Some(items) = v.array(replicas, &replicas_field) {
            for (index, item) in items.iter().enumerate() {
                validate_volume(v, item, &format!("{}[{}]", replicas_field, index));
            }
        }
    } else {
        v.error(field, ValidationErrorKind::UnknownVolumeType);
    }
}

fn validate_slices(v: &mut Validator, volume: &Map<String, Value>, slices: &Value, field: &str) {
    if let Some(dimension) = volume.get("dimension") {
        v.string(dimension, &format!("{}.dimension", field));
    }
    let slicer = match volume.get("slicer") {
        Some(slicer) => v.string(slicer, &format!("{}.slicer", field)),
        None => Some(HASH_SLICER),
    };

    let slices_field = format!("{}.slices", field);
    let Some(items) = v.array(slices, &slices_field) else {
        return;
    };

    let mut total_weight = 0.0;
    let mut weights_valid = true;
    for (index, item) in items.iter().enumerate() {
        let slice_field = format!("{}[{}]", slices_field, index);
        let Some(slice) = v.object(item, &slice_field) else {
            weights_valid = false;
            continue;
        };
        match slice.get("weight") {
            Some(weight) => match v.non_negative_number(weight, &format!("{}.weight", slice_field)) {
                Some(weight) => total_weight += weight,
                None => weights_valid = false,
            },
            None => total_weight += 1.0,
        }
        if let Some(label) = slice.get("label") {
            v.string(label, &format!("{}.label", slice_field));
        }
        let volume_field = format!("{}.volume", slice_field);
        if let Some(inner) = v.required(slice.get("volume"), &volume_field) {
            validate_volume(v, inner, &volume_field);
        }
    }

    if weights_valid && slicer == Some(HASH_SLICER) && items.len() > 1 && total_weight <= 0.0 {
        v.error(slices_field, ValidationErrorKind::InvalidWeightConfiguration);
    }
}
