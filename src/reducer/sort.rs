//! Sort reducer: stable merge of sorted record lists
//!
//! Records are positional arrays compared column by column. With a
//! `key_column`, records sharing a key are one group: their numeric columns
//! add up and their array columns (sub-records) concatenate.

use super::{add_numbers, type_name, ReducerSpec, SORT};
use crate::MergeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Sort direction, serialized as `<` (ascending) or `>` (descending)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "<")]
    Ascending,
    #[serde(rename = ">")]
    Descending,
}

/// One column of a lexicographic comparator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOperator {
    pub column: usize,
    pub operator: SortDirection,
}

impl SortOperator {
    pub fn ascending(column: usize) -> Self {
        Self {
            column,
            operator: SortDirection::Ascending,
        }
    }

    pub fn descending(column: usize) -> Self {
        Self {
            column,
            operator: SortDirection::Descending,
        }
    }
}

/// Merge two sorted record lists
pub fn merge(left: Value, right: Value, spec: &ReducerSpec) -> Result<Value, MergeError> {
    let (left, right) = match (left, right) {
        (Value::Array(left), Value::Array(right)) => (left, right),
        (left, right) => {
            return Err(MergeError::TypeMismatch {
                reducer: SORT.to_string(),
                left: type_name(&left),
                right: type_name(&right),
            })
        }
    };

    let mut merged = merge_sorted(left, right, &spec.operators);
    if let Some(key_column) = spec.key_column {
        merged = unify_by_key(merged, key_column, &spec.sub_operators)?;
        // Summed aggregates may have moved groups out of order.
        merged.sort_by(|a, b| compare_records(a, b, &spec.operators));
    }
    if let Some(limit) = spec.effective_limit() {
        merged.truncate(limit);
    }
    Ok(Value::Array(merged))
}

/// Stable two-way merge; ties take the left record first
pub fn merge_sorted(left: Vec<Value>, right: Vec<Value>, operators: &[SortOperator]) -> Vec<Value> {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare_records(l, r, operators) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }
    merged
}

/// Lexicographic comparison over `operators`; the first decisive column wins
pub fn compare_records(a: &Value, b: &Value, operators: &[SortOperator]) -> Ordering {
    for operator in operators {
        let ordering = compare_values(column(a, operator.column), column(b, operator.column));
        let ordering = match operator.operator {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Column of a positional record; a scalar record is its own column 0
fn column(record: &Value, index: usize) -> &Value {
    match record {
        Value::Array(columns) => columns.get(index).unwrap_or(&Value::Null),
        other if index == 0 => other,
        _ => &Value::Null,
    }
}

/// Total order over JSON values
///
/// Values of different kinds order as null, boolean, number, string, array,
/// object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (x, y) in x.iter().zip(y) {
                let ordering = compare_values(x, y);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Collapse records sharing a key into the first record of the group
fn unify_by_key(
    records: Vec<Value>,
    key_column: usize,
    sub_operators: &[SortOperator],
) -> Result<Vec<Value>, MergeError> {
    let mut unified: Vec<Value> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in records {
        let key = column(&record, key_column).to_string();
        match positions.get(&key) {
            Some(&position) => {
                let group = std::mem::take(&mut unified[position]);
                unified[position] = unify_records(group, record, key_column, sub_operators)?;
            }
            None => {
                positions.insert(key, unified.len());
                unified.push(record);
            }
        }
    }
    Ok(unified)
}

fn unify_records(
    base: Value,
    other: Value,
    key_column: usize,
    sub_operators: &[SortOperator],
) -> Result<Value, MergeError> {
    let (Value::Array(mut base), Value::Array(other)) = (base, other) else {
        return Err(MergeError::InvalidParameter(
            "grouped records must be arrays".to_string(),
        ));
    };

    for (index, value) in other.into_iter().enumerate() {
        if index == key_column {
            continue;
        }
        if index >= base.len() {
            base.push(value);
            continue;
        }
        let current = std::mem::take(&mut base[index]);
        base[index] = match (current, value) {
            (Value::Number(a), Value::Number(b)) => Value::Number(add_numbers(&a, &b)?),
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                if !sub_operators.is_empty() {
                    a.sort_by(|x, y| compare_records(x, y, sub_operators));
                }
                Value::Array(a)
            }
            (Value::Null, value) => value,
            (current, _) => current,
        };
    }
    Ok(Value::Array(base))
}
