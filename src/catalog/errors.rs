//! Catalog validation errors

use std::fmt;

/// What is wrong with one catalog field
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationErrorKind {
    MissingRequiredParameter,
    MismatchedParameterType {
        expected: &'static str,
        actual: &'static str,
    },
    InvalidDate {
        value: String,
    },
    NegativeNumber {
        value: String,
    },
    SmallerThanOne {
        value: String,
    },
    UnsupportedValue {
        expected: String,
        actual: String,
    },
    UnknownFarm {
        partition: String,
    },
    MissingDatabaseName {
        partition: String,
    },
    UnknownVolumeType,
    InvalidAddress {
        value: String,
    },
    InvalidWeightConfiguration,
    UnsupportedVersion {
        value: String,
    },
}

/// One field-level violation in a catalog document
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `datasets.Droonga.ring.zone1.weight`
    pub field: String,
    pub kind: ValidationErrorKind,
    /// Catalog file the document came from
    pub source_path: String,
}

impl ValidationError {
    pub fn new(
        field: impl Into<String>,
        kind: ValidationErrorKind,
        source_path: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            kind,
            source_path: source_path.into(),
        }
    }

    /// Human-readable description without the source path
    pub fn message(&self) -> String {
        let name = &self.field;
        match &self.kind {
            ValidationErrorKind::MissingRequiredParameter => {
                format!("You must specify \"{}\".", name)
            }
            ValidationErrorKind::MismatchedParameterType { expected, actual } => {
                format!("\"{}\" must be {}, but {}.", name, expected, actual)
            }
            ValidationErrorKind::InvalidDate { value } => format!(
                "\"{}\" must be a valid datetime. \"{}\" cannot be parsed as a datetime.",
                name, value
            ),
            ValidationErrorKind::NegativeNumber { value } => {
                format!("\"{}\" must be a positive number, but {}.", name, value)
            }
            ValidationErrorKind::SmallerThanOne { value } => {
                format!("\"{}\" must be 1 or larger number, but {}.", name, value)
            }
            ValidationErrorKind::UnsupportedValue { expected, actual } => format!(
                "\"{}\" must be {}, but {}. Other values are not supported yet.",
                name, expected, actual
            ),
            ValidationErrorKind::UnknownFarm { partition } => format!(
                "The partition {} at \"{}\" seems to be bound to an unknown farm.",
                partition, name
            ),
            ValidationErrorKind::MissingDatabaseName { partition } => format!(
                "The partition {} at \"{}\" has no database name. \
                 You have to specify a database name after the farm name like \"{}.<database name>\".",
                partition, name, partition.trim_end_matches('.')
            ),
            ValidationErrorKind::UnknownVolumeType => format!(
                "\"{}\" must have one of \"address\", \"slices\" or \"replicas\".",
                name
            ),
            ValidationErrorKind::InvalidAddress { value } => format!(
                "\"{}\" must be 'host:port/tag.name' format, but \"{}\".",
                name, value
            ),
            ValidationErrorKind::InvalidWeightConfiguration => format!(
                "\"{}\" must have at least one member with a weight larger than zero.",
                name
            ),
            ValidationErrorKind::UnsupportedVersion { value } => {
                format!("\"{}\" must be 1 or 2, but {}.", name, value)
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error in {}: {}", self.source_path, self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Every violation found in one catalog document
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiplexError {
    errors: Vec<ValidationError>,
}

impl MultiplexError {
    pub fn new(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Errors whose kind matches `predicate`
    pub fn count_where(&self, predicate: impl Fn(&ValidationErrorKind) -> bool) -> usize {
        self.errors.iter().filter(|e| predicate(&e.kind)).count()
    }
}

impl fmt::Display for MultiplexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("\n"))
    }
}

impl std::error::Error for MultiplexError {}
