//! Error-collecting validation helpers shared by both catalog versions
//!
//! Each check records at most one error and returns `None` when it failed, so
//! callers can keep validating unrelated fields and only descend into a field
//! whose shape is known to be right.

use super::errors::{MultiplexError, ValidationError, ValidationErrorKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

pub(crate) struct Validator {
    source_path: String,
    errors: Vec<ValidationError>,
}

impl Validator {
    pub(crate) fn new(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            errors: Vec::new(),
        }
    }

    pub(crate) fn error(&mut self, field: impl Into<String>, kind: ValidationErrorKind) {
        self.errors
            .push(ValidationError::new(field, kind, self.source_path.clone()));
    }

    pub(crate) fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub(crate) fn finish(self) -> Result<(), MultiplexError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(MultiplexError::new(self.errors))
        }
    }

    pub(crate) fn required<'v>(&mut self, value: Option<&'v Value>, field: &str) -> Option<&'v Value> {
        match value {
            Some(Value::Null) | None => {
                self.error(field, ValidationErrorKind::MissingRequiredParameter);
                None
            }
            Some(value) => Some(value),
        }
    }

    fn mismatch(&mut self, field: &str, expected: &'static str, value: &Value) {
        self.error(
            field,
            ValidationErrorKind::MismatchedParameterType {
                expected,
                actual: type_name(value),
            },
        );
    }

    pub(crate) fn object<'v>(&mut self, value: &'v Value, field: &str) -> Option<&'v Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            other => {
                self.mismatch(field, "an object", other);
                None
            }
        }
    }

    pub(crate) fn array<'v>(&mut self, value: &'v Value, field: &str) -> Option<&'v Vec<Value>> {
        match value {
            Value::Array(items) => Some(items),
            other => {
                self.mismatch(field, "an array", other);
                None
            }
        }
    }

    pub(crate) fn string<'v>(&mut self, value: &'v Value, field: &str) -> Option<&'v str> {
        match value {
            Value::String(s) => Some(s),
            other => {
                self.mismatch(field, "a string", other);
                None
            }
        }
    }

    pub(crate) fn string_array(&mut self, value: &Value, field: &str) -> Option<Vec<String>> {
        let items = self.array(value, field)?;
        let before = self.error_count();
        let strings: Vec<String> = items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                self.string(item, &format!("{}[{}]", field, index))
                    .map(str::to_string)
            })
            .collect();
        (self.error_count() == before).then_some(strings)
    }

    pub(crate) fn datetime(&mut self, value: &Value, field: &str) -> Option<DateTime<Utc>> {
        let raw = self.string(value, field)?;
        match parse_datetime(raw) {
            Some(date) => Some(date),
            None => {
                self.error(
                    field,
                    ValidationErrorKind::InvalidDate {
                        value: raw.to_string(),
                    },
                );
                None
            }
        }
    }

    pub(crate) fn non_negative_number(&mut self, value: &Value, field: &str) -> Option<f64> {
        let Some(number) = value.as_f64().filter(|_| value.is_number()) else {
            self.mismatch(field, "a number", value);
            return None;
        };
        if number < 0.0 {
            self.error(
                field,
                ValidationErrorKind::NegativeNumber {
                    value: value.to_string(),
                },
            );
            return None;
        }
        Some(number)
    }

    pub(crate) fn non_negative_integer(&mut self, value: &Value, field: &str) -> Option<u64> {
        let number = self.integer(value, field)?;
        if number < 0 {
            self.error(
                field,
                ValidationErrorKind::NegativeNumber {
                    value: number.to_string(),
                },
            );
            return None;
        }
        Some(number as u64)
    }

    pub(crate) fn one_or_larger_integer(&mut self, value: &Value, field: &str) -> Option<u64> {
        let number = self.integer(value, field)?;
        if number < 1 {
            self.error(
                field,
                ValidationErrorKind::SmallerThanOne {
                    value: number.to_string(),
                },
            );
            return None;
        }
        Some(number as u64)
    }

    fn integer(&mut self, value: &Value, field: &str) -> Option<i64> {
        match value.as_i64() {
            Some(number) => Some(number),
            None => {
                self.mismatch(field, "an integer", value);
                None
            }
        }
    }

    /// Field restricted to one literal string value
    pub(crate) fn literal(&mut self, value: &Value, field: &str, expected: &str) -> bool {
        let Some(actual) = self.string(value, field) else {
            return false;
        };
        if actual != expected {
            self.error(
                field,
                ValidationErrorKind::UnsupportedValue {
                    expected: format!("\"{}\"", expected),
                    actual: format!("\"{}\"", actual),
                },
            );
            return false;
        }
        true
    }
}

/// Name of a JSON value's type as used in error messages
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_f64() => "a float",
        Value::Number(_) => "an integer",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Accept RFC 3339 plus the plain date/time layouts operators commonly write
pub(crate) fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S %z"] {
        if let Ok(date) = DateTime::parse_from_str(raw, layout) {
            return Some(date.with_timezone(&Utc));
        }
    }
    for layout in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(date.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
}
