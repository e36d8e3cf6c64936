//! Reducers for partial results
//!
//! Partial results for one output arrive in any order and are folded pairwise,
//! `accumulator = reduce(accumulator, next)`. Every reducer treats `null` as
//! its identity, so a missing partial never poisons the accumulator.

pub mod gatherer;
pub mod sort;

pub use gatherer::{apply_output_range, gather, ElementMapper, GatherSpec, RecordFormat, RecordsMapper};
pub use sort::{compare_values, SortDirection, SortOperator};

use crate::MergeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const SUM: &str = "sum";
pub const RECURSIVE_SUM: &str = "recursive-sum";
pub const AVERAGE: &str = "average";
pub const AND: &str = "and";
pub const OR: &str = "or";
pub const SORT: &str = "sort";

/// Limit value meaning "no limit"
pub const UNLIMITED: i64 = -1;

/// How one output (or one element of it) is merged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducerSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operators: Vec<SortOperator>,
    /// Column holding the group identity for grouped sort merges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_column: Option<usize>,
    /// Ordering of concatenated sub-records inside a group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_operators: Vec<SortOperator>,
}

impl ReducerSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            limit: None,
            operators: Vec::new(),
            key_column: None,
            sub_operators: Vec::new(),
        }
    }

    pub fn sum() -> Self {
        Self::new(SUM)
    }

    pub fn and() -> Self {
        Self::new(AND)
    }

    pub fn or() -> Self {
        Self::new(OR)
    }

    pub fn sort(operators: Vec<SortOperator>) -> Self {
        Self {
            operators,
            ..Self::new(SORT)
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_key_column(mut self, key_column: usize) -> Self {
        self.key_column = Some(key_column);
        self
    }

    pub fn with_sub_operators(mut self, sub_operators: Vec<SortOperator>) -> Self {
        self.sub_operators = sub_operators;
        self
    }

    /// Limit as a count, `None` when unlimited
    pub fn effective_limit(&self) -> Option<usize> {
        match self.limit {
            Some(limit) if limit >= 0 => Some(limit as usize),
            _ => None,
        }
    }
}

/// Reduction attached to one reduce-step output
///
/// Either a single reducer for the whole value, or one reducer per element
/// of an object-shaped value (e.g. `count` and `records` of a search result).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReduceSpec {
    Value(ReducerSpec),
    Elements(BTreeMap<String, ReducerSpec>),
}

impl From<ReducerSpec> for ReduceSpec {
    fn from(spec: ReducerSpec) -> Self {
        ReduceSpec::Value(spec)
    }
}

/// Pairwise merge function
pub trait Reducer: Send + Sync {
    /// Combine two non-null partial values
    fn reduce(&self, left: Value, right: Value, spec: &ReducerSpec) -> Result<Value, MergeError>;
}

impl<F> Reducer for F
where
    F: Fn(Value, Value, &ReducerSpec) -> Result<Value, MergeError> + Send + Sync,
{
    fn reduce(&self, left: Value, right: Value, spec: &ReducerSpec) -> Result<Value, MergeError> {
        self(left, right, spec)
    }
}

/// Reducers by type name
#[derive(Clone)]
pub struct ReducerRegistry {
    reducers: HashMap<String, Arc<dyn Reducer>>,
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.reducers.keys().collect();
        names.sort();
        f.debug_struct("ReducerRegistry").field("reducers", &names).finish()
    }
}

impl ReducerRegistry {
    /// Registry without any reducer
    pub fn empty() -> Self {
        Self {
            reducers: HashMap::new(),
        }
    }

    /// Registry with the built-in reducers
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(SUM, sum);
        registry.register(RECURSIVE_SUM, recursive_sum);
        registry.register(AVERAGE, average);
        registry.register(AND, and);
        registry.register(OR, or);
        registry.register(SORT, sort::merge);
        registry
    }

    /// Add or replace the reducer for `name`
    pub fn register(&mut self, name: impl Into<String>, reducer: impl Reducer + 'static) {
        self.reducers.insert(name.into(), Arc::new(reducer));
    }

    pub fn get(&self, name: &str) -> Result<&dyn Reducer, MergeError> {
        self.reducers
            .get(name)
            .map(|reducer| reducer.as_ref())
            .ok_or_else(|| MergeError::UnknownReducer(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.reducers.contains_key(name)
    }

    /// Reduce two values with the reducer named by `spec`
    pub fn reduce(&self, left: Value, right: Value, spec: &ReducerSpec) -> Result<Value, MergeError> {
        let reducer = self.get(&spec.kind)?;
        match (left, right) {
            (Value::Null, right) => Ok(right),
            (left, Value::Null) => Ok(left),
            (left, right) => reducer.reduce(left, right, spec),
        }
    }

    /// Reduce per [`ReduceSpec`], element-wise for object-shaped values
    ///
    /// Elements without a reducer keep the left value, or the right one when
    /// the left side lacks them.
    pub fn reduce_with(&self, left: Value, right: Value, spec: &ReduceSpec) -> Result<Value, MergeError> {
        match spec {
            ReduceSpec::Value(spec) => self.reduce(left, right, spec),
            ReduceSpec::Elements(elements) => {
                let (mut left, mut right) = match (left, right) {
                    (Value::Null, right) => return Ok(right),
                    (left, Value::Null) => return Ok(left),
                    (Value::Object(left), Value::Object(right)) => (left, right),
                    (left, right) => {
                        return Err(MergeError::TypeMismatch {
                            reducer: "elements".to_string(),
                            left: type_name(&left),
                            right: type_name(&right),
                        })
                    }
                };

                for (element, reducer) in elements {
                    let l = left.get_mut(element).map(Value::take).unwrap_or(Value::Null);
                    let r = right.remove(element).unwrap_or(Value::Null);
                    let reduced = self.reduce(l, r, reducer)?;
                    if reduced.is_null() {
                        left.remove(element);
                    } else {
                        left.insert(element.clone(), reduced);
                    }
                }
                merge_missing(&mut left, right);
                Ok(Value::Object(left))
            }
        }
    }
}

/// Numeric add, string and array concatenation, shallow map merge
pub fn sum(left: Value, right: Value, spec: &ReducerSpec) -> Result<Value, MergeError> {
    match (left, right) {
        (Value::Null, right) => Ok(right),
        (left, Value::Null) => Ok(left),
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(add_numbers(&a, &b)?)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            if let Some(limit) = spec.effective_limit() {
                a.truncate(limit);
            }
            Ok(Value::Array(a))
        }
        (Value::Object(mut a), Value::Object(b)) => {
            a.extend(b);
            Ok(Value::Object(a))
        }
        (left, right) => Err(mismatch(SUM, &left, &right)),
    }
}

/// Like [`sum`], but maps merge key by key and arrays add index by index
pub fn recursive_sum(left: Value, right: Value, spec: &ReducerSpec) -> Result<Value, MergeError> {
    match (left, right) {
        (Value::Null, right) => Ok(right),
        (left, Value::Null) => Ok(left),
        (Value::Object(mut a), Value::Object(b)) => {
            for (key, value) in b {
                match a.get_mut(&key) {
                    Some(existing) => *existing = recursive_sum(existing.take(), value, spec)?,
                    None => {
                        a.insert(key, value);
                    }
                }
            }
            Ok(Value::Object(a))
        }
        (Value::Array(a), Value::Array(b)) => {
            let len = a.len().max(b.len());
            let mut a = a.into_iter();
            let mut b = b.into_iter();
            let mut out = Vec::with_capacity(len);
            for _ in 0..len {
                let x = a.next().unwrap_or(Value::Null);
                let y = b.next().unwrap_or(Value::Null);
                out.push(recursive_sum(x, y, spec)?);
            }
            Ok(Value::Array(out))
        }
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(add_numbers(&a, &b)?)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (left, right) => Err(mismatch(RECURSIVE_SUM, &left, &right)),
    }
}

/// Pairwise mean `(a + b) / 2`
///
/// This is not a running mean: folding three values weights the last one by
/// one half.
pub fn average(left: Value, right: Value, _spec: &ReducerSpec) -> Result<Value, MergeError> {
    match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            float((a + b) / 2.0)
        }
        _ => Err(mismatch(AVERAGE, &left, &right)),
    }
}

pub fn and(left: Value, right: Value, _spec: &ReducerSpec) -> Result<Value, MergeError> {
    match (&left, &right) {
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
        _ => Err(mismatch(AND, &left, &right)),
    }
}

pub fn or(left: Value, right: Value, _spec: &ReducerSpec) -> Result<Value, MergeError> {
    match (&left, &right) {
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
        _ => Err(mismatch(OR, &left, &right)),
    }
}

/// Integers add exactly while they fit in `i64`; anything else adds as `f64`
pub(crate) fn add_numbers(a: &Number, b: &Number) -> Result<Number, MergeError> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(total) = x.checked_add(y) {
            return Ok(Number::from(total));
        }
    }
    let total = a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default();
    match float(total)? {
        Value::Number(n) => Ok(n),
        _ => Err(MergeError::InvalidParameter("sum is not a number".to_string())),
    }
}

fn float(value: f64) -> Result<Value, MergeError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| MergeError::InvalidParameter(format!("{} is not a finite number", value)))
}

fn mismatch(reducer: &str, left: &Value, right: &Value) -> MergeError {
    MergeError::TypeMismatch {
        reducer: reducer.to_string(),
        left: type_name(left),
        right: type_name(right),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Left-fold `values` with `spec`, starting from the first value
pub fn fold<I>(registry: &ReducerRegistry, values: I, spec: &ReduceSpec) -> Result<Value, MergeError>
where
    I: IntoIterator<Item = Value>,
{
    values
        .into_iter()
        .try_fold(Value::Null, |acc, value| registry.reduce_with(acc, value, spec))
}

/// Merge `right` into `left`, keeping left-hand values on key collisions
pub(crate) fn merge_missing(left: &mut Map<String, Value>, right: Map<String, Value>) {
    for (key, value) in right {
        left.entry(key).or_insert(value);
    }
}
