//! Error types for shardmesh

use crate::catalog::MultiplexError;
use serde_json::{json, Value};
use std::fmt;

/// Result type alias for shardmesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for shardmesh
#[derive(Debug)]
pub enum Error {
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Configuration errors (environment, CLI)
    Config(String),
    /// Catalog document failed validation
    Validation(MultiplexError),
    /// Request could not be routed
    Routing(RoutingError),
    /// Request could not be planned
    Planning(PlanningError),
    /// Partial results could not be merged
    Merge(MergeError),
}

/// Routing-specific errors
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingError {
    /// Volume document has none of `address`, `slices` or `replicas`
    UnknownVolumeType(String),
    /// Dataset is not declared in the catalog
    UnknownDataset(String),
    /// Scatter request without a usable key for the slicing dimension
    MissingScatterKey { dimension: String },
    /// Scatter key is neither a string nor an integer
    UnhashableKey(String),
    /// Continuum targets are empty or weigh nothing
    InvalidWeightConfiguration(String),
    /// Address string does not match `host:port/tag[.name]`
    InvalidAddress(String),
    /// Every candidate replica was filtered out
    NoRoutes { dataset: String },
}

/// Planning-specific errors
#[derive(Debug, Clone, PartialEq)]
pub enum PlanningError {
    /// Search request without any query
    NoQuery,
    /// Query does not declare its `source`
    MissingSource(String),
    /// Queries reference each other through `source` in a loop
    CyclicSource(Vec<String>),
    /// Planner finished without a broadcast or scatter step
    MissingBroadcast,
    /// Request body has an unexpected shape
    InvalidRequest(String),
}

/// Merge-specific errors
#[derive(Debug, Clone, PartialEq)]
pub enum MergeError {
    /// Two partial values cannot be combined by the reducer
    TypeMismatch {
        reducer: String,
        left: &'static str,
        right: &'static str,
    },
    /// No reducer is registered under the requested type
    UnknownReducer(String),
    /// Reducer parameters or values are out of range
    InvalidParameter(String),
}

impl Error {
    /// Status code reported to the client for a request-level failure
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Routing(RoutingError::UnknownDataset(_)) => 404,
            Error::Routing(_) | Error::Planning(_) => 400,
            _ => 500,
        }
    }

    /// Short error class name used in error bodies and telemetry
    pub fn name(&self) -> &'static str {
        match self {
            Error::Io(_) => "IOError",
            Error::Serialization(_) => "SerializationError",
            Error::Config(_) => "ConfigurationError",
            Error::Validation(_) => "ValidationError",
            Error::Routing(e) => e.name(),
            Error::Planning(e) => e.name(),
            Error::Merge(e) => e.name(),
        }
    }

    /// Structured `{statusCode, body: {name, message}}` error body
    pub fn to_error_body(&self) -> Value {
        json!({
            "statusCode": self.status_code(),
            "body": {
                "name": self.name(),
                "message": self.to_string(),
            },
        })
    }
}

impl RoutingError {
    pub fn name(&self) -> &'static str {
        match self {
            RoutingError::UnknownVolumeType(_) => "UnknownVolumeType",
            RoutingError::UnknownDataset(_) => "UnknownDataset",
            RoutingError::MissingScatterKey { .. } => "MissingScatterKey",
            RoutingError::UnhashableKey(_) => "UnhashableKey",
            RoutingError::InvalidWeightConfiguration(_) => "InvalidWeightConfiguration",
            RoutingError::InvalidAddress(_) => "InvalidAddress",
            RoutingError::NoRoutes { .. } => "NoRoutes",
        }
    }
}

impl PlanningError {
    pub fn name(&self) -> &'static str {
        match self {
            PlanningError::NoQuery => "NoQuery",
            PlanningError::MissingSource(_) => "MissingSource",
            PlanningError::CyclicSource(_) => "CyclicSource",
            PlanningError::MissingBroadcast => "MissingBroadcast",
            PlanningError::InvalidRequest(_) => "InvalidRequest",
        }
    }
}

impl MergeError {
    pub fn name(&self) -> &'static str {
        match self {
            MergeError::TypeMismatch { .. } => "TypeMismatch",
            MergeError::UnknownReducer(_) => "UnknownReducer",
            MergeError::InvalidParameter(_) => "InvalidParameter",
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Validation(e) => Some(e),
            Error::Routing(e) => Some(e),
            Error::Planning(e) => Some(e),
            Error::Merge(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for RoutingError {}
impl std::error::Error for PlanningError {}
impl std::error::Error for MergeError {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Validation(e) => write!(f, "Invalid catalog: {}", e),
            Error::Routing(e) => write!(f, "Routing error: {}", e),
            Error::Planning(e) => write!(f, "Planning error: {}", e),
            Error::Merge(e) => write!(f, "Merge error: {}", e),
        }
    }
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::UnknownVolumeType(field) => {
                write!(f, "{}: volume needs one of \"address\", \"slices\" or \"replicas\"", field)
            }
            RoutingError::UnknownDataset(name) => write!(f, "unknown dataset: {}", name),
            RoutingError::MissingScatterKey { dimension } => {
                write!(f, "scatter request has no value for dimension \"{}\"", dimension)
            }
            RoutingError::UnhashableKey(value) => {
                write!(f, "scatter key must be a string or an integer, got {}", value)
            }
            RoutingError::InvalidWeightConfiguration(msg) => {
                write!(f, "invalid weight configuration: {}", msg)
            }
            RoutingError::InvalidAddress(value) => {
                write!(f, "must be 'host:port/tag.name' format: <{}>", value)
            }
            RoutingError::NoRoutes { dataset } => {
                write!(f, "no live replica available for dataset {}", dataset)
            }
        }
    }
}

impl fmt::Display for PlanningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanningError::NoQuery => write!(f, "no query is given"),
            PlanningError::MissingSource(query) => {
                write!(f, "query \"{}\" has no source", query)
            }
            PlanningError::CyclicSource(queries) => {
                write!(f, "cyclic source references between queries: {}", queries.join(", "))
            }
            PlanningError::MissingBroadcast => {
                write!(f, "plan has neither a broadcast nor a scatter step")
            }
            PlanningError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
        }
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::TypeMismatch {
                reducer,
                left,
                right,
            } => write!(f, "{} reducer cannot combine {} with {}", reducer, left, right),
            MergeError::UnknownReducer(name) => write!(f, "unknown reducer type: {}", name),
            MergeError::InvalidParameter(msg) => write!(f, "invalid reducer parameter: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<MultiplexError> for Error {
    fn from(e: MultiplexError) -> Self {
        Error::Validation(e)
    }
}

impl From<RoutingError> for Error {
    fn from(e: RoutingError) -> Self {
        Error::Routing(e)
    }
}

impl From<PlanningError> for Error {
    fn from(e: PlanningError) -> Self {
        Error::Planning(e)
    }
}

impl From<MergeError> for Error {
    fn from(e: MergeError) -> Self {
        Error::Merge(e)
    }
}
