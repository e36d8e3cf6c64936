//! Gather-time post-processing
//!
//! Runs once per fully reduced output and reshapes it for the client:
//! counts derived from merged records, the final offset/limit window, the
//! attribute allow-list and the record format.

use super::UNLIMITED;
use crate::MergeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Record shape returned to the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// Positional arrays
    #[default]
    Simple,
    /// Objects keyed by attribute label
    Complex,
}

/// Final shaping of a `records` element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordsMapper {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "unlimited")]
    pub limit: i64,
    #[serde(default)]
    pub format: RecordFormat,
    /// Client-visible attribute labels; trailing columns past them are
    /// dropped, down to none. `None` keeps every column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
    /// Remove the element after it has served other mappers
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_output: bool,
}

fn unlimited() -> i64 {
    UNLIMITED
}

impl Default for RecordsMapper {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: UNLIMITED,
            format: RecordFormat::Simple,
            attributes: None,
            no_output: false,
        }
    }
}

/// Gather-time mapping of one element of a reduced value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementMapper {
    /// Element becomes the length of the `target` array
    Count { target: String },
    Records(RecordsMapper),
}

/// Where one reduced output goes and how it is reshaped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatherSpec {
    /// Client-visible output name
    pub output: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub elements: BTreeMap<String, ElementMapper>,
}

impl GatherSpec {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            elements: BTreeMap::new(),
        }
    }

    pub fn with_element(mut self, name: impl Into<String>, mapper: ElementMapper) -> Self {
        self.elements.insert(name.into(), mapper);
        self
    }
}

/// Reshape a reduced value per `spec`
pub fn gather(value: Value, spec: &GatherSpec) -> Result<Value, MergeError> {
    if spec.elements.is_empty() {
        return Ok(value);
    }
    let Value::Object(mut object) = value else {
        return Ok(value);
    };

    // Counts first: they read the records before the output window cuts them.
    for (element, mapper) in &spec.elements {
        if let ElementMapper::Count { target } = mapper {
            let count = match object.get(target) {
                Some(Value::Array(items)) => items.len(),
                Some(Value::Null) | None => 0,
                Some(other) => {
                    return Err(MergeError::InvalidParameter(format!(
                        "count target \"{}\" must be an array, got {}",
                        target,
                        super::type_name(other)
                    )))
                }
            };
            object.insert(element.clone(), Value::from(count));
        }
    }

    for (element, mapper) in &spec.elements {
        let ElementMapper::Records(mapper) = mapper else {
            continue;
        };
        if mapper.no_output {
            object.remove(element);
            continue;
        }
        if let Some(records) = object.get_mut(element) {
            let taken = records.take();
            *records = map_records(taken, mapper)?;
        }
    }
    Ok(Value::Object(object))
}

fn map_records(records: Value, mapper: &RecordsMapper) -> Result<Value, MergeError> {
    let records = match records {
        Value::Array(records) => records,
        Value::Null => return Ok(Value::Null),
        other => {
            return Err(MergeError::InvalidParameter(format!(
                "records must be an array, got {}",
                super::type_name(&other)
            )))
        }
    };

    let records = apply_output_range(records, mapper.offset, mapper.limit);
    let records = records
        .into_iter()
        .map(|record| shape_record(record, mapper))
        .collect();
    Ok(Value::Array(records))
}

fn shape_record(record: Value, mapper: &RecordsMapper) -> Value {
    let Value::Array(mut columns) = record else {
        return record;
    };
    let labels = mapper.attributes.as_deref().unwrap_or_default();
    if mapper.attributes.is_some() {
        columns.truncate(labels.len());
    }
    match mapper.format {
        RecordFormat::Simple => Value::Array(columns),
        RecordFormat::Complex => {
            let object: Map<String, Value> = labels.iter().cloned().zip(columns).collect();
            Value::Object(object)
        }
    }
}

/// Skip `offset` items, then keep at most `limit` (`-1` keeps the rest)
pub fn apply_output_range<T>(items: Vec<T>, offset: i64, limit: i64) -> Vec<T> {
    let offset = offset.max(0) as usize;
    let iter = items.into_iter().skip(offset);
    if limit < 0 {
        iter.collect()
    } else {
        iter.take(limit as usize).collect()
    }
}
