//! Request routing over the catalog
//!
//! A [`RoutingRequest`] says whether a message goes to every partition
//! (broadcast) or to the one partition owning a key (scatter), and which
//! replicas of the selected partitions receive it.

mod router;
pub mod telemetry;

pub use router::Router;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Broadcast to every partition or scatter to one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Broadcast,
    Scatter,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::Broadcast => "broadcast",
            RouteType::Scatter => "scatter",
        }
    }
}

impl FromStr for RouteType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "broadcast" => Ok(Self::Broadcast),
            "scatter" => Ok(Self::Scatter),
            other => Err(format!(
                "unknown route type '{}'; expected broadcast or scatter",
                other
            )),
        }
    }
}

/// Which replicas of a partition receive the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaPolicy {
    /// First replica only
    Top,
    /// One replica chosen uniformly at random
    Random,
    /// Every replica
    All,
}

impl ReplicaPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaPolicy::Top => "top",
            ReplicaPolicy::Random => "random",
            ReplicaPolicy::All => "all",
        }
    }
}

impl fmt::Display for ReplicaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicaPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "random" => Ok(Self::Random),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown replica policy '{}'; expected one of top, random, all",
                other
            )),
        }
    }
}

/// Inclusive window over the time-sorted partitions of a ring zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub first: usize,
    /// `None` runs to the newest partition
    pub last: Option<usize>,
}

impl DateRange {
    pub fn new(first: usize, last: Option<usize>) -> Self {
        Self { first, last }
    }

    /// Apply the window to `items`; an out-of-range window selects nothing
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        if self.first >= items.len() {
            return &[];
        }
        let end = match self.last {
            Some(last) => (last + 1).min(items.len()),
            None => items.len(),
        };
        if end <= self.first {
            return &[];
        }
        &items[self.first..end]
    }
}

/// Per-call routing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRequest {
    #[serde(rename = "type")]
    pub route_type: RouteType,
    pub replica: ReplicaPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Record whose slicing dimension selects the partition on scatter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// Only replicas whose nodes are all in this set are eligible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_nodes: Option<BTreeSet<String>>,
}

impl RoutingRequest {
    pub fn broadcast(replica: ReplicaPolicy) -> Self {
        Self {
            route_type: RouteType::Broadcast,
            replica,
            key: None,
            record: None,
            date_range: None,
            live_nodes: None,
        }
    }

    pub fn scatter(key: impl Into<String>, replica: ReplicaPolicy) -> Self {
        Self {
            route_type: RouteType::Scatter,
            replica,
            key: Some(key.into()),
            record: None,
            date_range: None,
            live_nodes: None,
        }
    }

    /// Scatter by a record's slicing dimension
    pub fn scatter_record(record: Map<String, Value>, replica: ReplicaPolicy) -> Self {
        Self {
            route_type: RouteType::Scatter,
            replica,
            key: None,
            record: Some(record),
            date_range: None,
            live_nodes: None,
        }
    }

    pub fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = Some(date_range);
        self
    }

    pub fn with_live_nodes<I, S>(mut self, live_nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.live_nodes = Some(live_nodes.into_iter().map(Into::into).collect());
        self
    }

    /// Value used to pick a partition for `dimension`
    ///
    /// The record's field wins; the plain key stands in for `_key`.
    pub fn dimension_value(&self, dimension: &str) -> Option<Value> {
        if let Some(value) = self.record.as_ref().and_then(|r| r.get(dimension)) {
            return Some(value.clone());
        }
        if dimension == "_key" {
            return self.key.clone().map(Value::String);
        }
        None
    }

    /// Whether every node in `nodes` is alive for this request
    pub fn all_alive<'a>(&self, nodes: impl IntoIterator<Item = &'a String>) -> bool {
        match &self.live_nodes {
            Some(live) => nodes.into_iter().all(|node| live.contains(node)),
            None => true,
        }
    }
}
