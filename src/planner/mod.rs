//! Distributed command planning
//!
//! A command is expanded into three steps: a broadcast (or scatter) step that
//! sends the body to the resolved destinations, a reduce step that merges the
//! partial results per output name, and a gather step that maps each reduced
//! output back to the name and shape the client expects. The `inputs` and
//! `outputs` names wire the steps together for the dispatcher.

mod query_sorter;
pub mod search;

pub use query_sorter::QuerySorter;
pub use search::{plan_paging, DistributedSearchPlanner, PagingPlan, QueryTransformer};

use crate::reducer::{GatherSpec, ReduceSpec, ReducerSpec, UNLIMITED};
use crate::routing::telemetry;
use crate::routing::{ReplicaPolicy, Router, RoutingRequest};
use crate::{PlanningError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Suffix naming the reduced form of an output
pub const REDUCE_SUFFIX: &str = "_reduced";
/// Output carrying worker and merge errors
pub const ERRORS_OUTPUT: &str = "errors";
/// Output carrying the combined success flag
pub const SUCCESS_OUTPUT: &str = "success";

/// Incoming logical request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub command: String,
    pub dataset: String,
    #[serde(default)]
    pub body: Value,
}

impl Message {
    pub fn new(command: impl Into<String>, dataset: impl Into<String>, body: Value) -> Self {
        Self {
            command: command.into(),
            dataset: dataset.into(),
            body,
        }
    }
}

/// Sends the command body to every resolved destination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastStep {
    pub command: String,
    pub dataset: String,
    pub body: Value,
    pub routing: RoutingRequest,
    pub destinations: Vec<String>,
    /// Output names every destination answers with
    pub outputs: Vec<String>,
    /// Whether the command writes
    pub post: bool,
}

/// Merges partial results per output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReduceStep {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// input name → reduced output name → reduction
    pub body: BTreeMap<String, BTreeMap<String, ReduceSpec>>,
}

impl ReduceStep {
    /// Reduced output name and reduction for `input`
    pub fn spec_for(&self, input: &str) -> Option<(&str, &ReduceSpec)> {
        self.body
            .get(input)
            .and_then(|outputs| outputs.iter().next())
            .map(|(output, spec)| (output.as_str(), spec))
    }
}

/// Maps reduced outputs back to client-visible outputs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatherStep {
    pub inputs: Vec<String>,
    /// reduced output name → mapping
    pub body: BTreeMap<String, GatherSpec>,
    pub post: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlanStep {
    Broadcast(BroadcastStep),
    Reduce(ReduceStep),
    Gather(GatherStep),
}

/// Ordered steps of a distributed command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn broadcast(&self) -> Option<&BroadcastStep> {
        self.steps.iter().find_map(|step| match step {
            PlanStep::Broadcast(step) => Some(step),
            _ => None,
        })
    }

    pub fn reduce(&self) -> Option<&ReduceStep> {
        self.steps.iter().find_map(|step| match step {
            PlanStep::Reduce(step) => Some(step),
            _ => None,
        })
    }

    pub fn gather(&self) -> Option<&GatherStep> {
        self.steps.iter().find_map(|step| match step {
            PlanStep::Gather(step) => Some(step),
            _ => None,
        })
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Options for the broadcast or scatter step
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    pub replica: Option<ReplicaPolicy>,
    pub write: bool,
}

impl StepOptions {
    pub fn replica(replica: ReplicaPolicy) -> Self {
        Self {
            replica: Some(replica),
            write: false,
        }
    }

    pub fn write() -> Self {
        Self {
            replica: None,
            write: true,
        }
    }
}

struct Processor {
    routing: RoutingRequest,
    post: bool,
}

/// Builds a [`Plan`] for one command
pub struct DistributedCommandPlanner<'a> {
    router: &'a Router,
    message: Message,
    processor: Option<Processor>,
    outputs: Vec<String>,
    reducers: Vec<(String, ReduceSpec)>,
    gatherers: Vec<(String, GatherSpec)>,
}

impl<'a> DistributedCommandPlanner<'a> {
    pub fn new(router: &'a Router, message: Message) -> Self {
        Self {
            router,
            message,
            processor: None,
            outputs: Vec::new(),
            reducers: Vec::new(),
            gatherers: Vec::new(),
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Replace the body sent to destinations
    pub fn set_body(&mut self, body: Value) {
        self.message.body = body;
    }

    /// Send to every partition; the replica defaults to the router's policy
    pub fn broadcast(&mut self, options: StepOptions) {
        let replica = options
            .replica
            .unwrap_or_else(|| self.router.default_replica());
        self.processor = Some(Processor {
            routing: RoutingRequest::broadcast(replica),
            post: options.write,
        });
    }

    /// Send to the partition owning `record`; the replica defaults to `all`
    pub fn scatter(&mut self, record: Map<String, Value>, options: StepOptions) {
        let replica = options.replica.unwrap_or(ReplicaPolicy::All);
        self.processor = Some(Processor {
            routing: RoutingRequest::scatter_record(record, replica),
            post: options.write,
        });
    }

    /// Send to the partition owning `key`; the replica defaults to `all`
    pub fn scatter_key(&mut self, key: impl Into<String>, options: StepOptions) {
        let replica = options.replica.unwrap_or(ReplicaPolicy::All);
        self.processor = Some(Processor {
            routing: RoutingRequest::scatter(key, replica),
            post: options.write,
        });
    }

    /// Reduce output `name` and gather it back under the same name
    pub fn reduce(&mut self, name: impl Into<String>, spec: impl Into<ReduceSpec>) {
        let name = name.into();
        let gather = GatherSpec::new(name.clone());
        self.reduce_with_gather(name, spec, gather);
    }

    /// Reduce output `name` with a custom gather mapping
    pub fn reduce_with_gather(
        &mut self,
        name: impl Into<String>,
        spec: impl Into<ReduceSpec>,
        gather: GatherSpec,
    ) {
        let name = name.into();
        self.reducers.push((name.clone(), spec.into()));
        self.gatherers.push((output_name(&name), gather));
        self.outputs.push(name);
    }

    /// Build the plan: reduce, gather, then the broadcast or scatter step
    pub fn plan(mut self) -> Result<Plan> {
        let processor = self.processor.take().ok_or(PlanningError::MissingBroadcast)?;
        self.reduce(ERRORS_OUTPUT, ReducerSpec::sum().with_limit(UNLIMITED));
        self.reduce(SUCCESS_OUTPUT, ReducerSpec::and());

        let destinations = self.router.route(&self.message.dataset, &processor.routing)?;

        let reduce = ReduceStep {
            inputs: self.reducers.iter().map(|(name, _)| name.clone()).collect(),
            outputs: self.reducers.iter().map(|(name, _)| output_name(name)).collect(),
            body: self
                .reducers
                .into_iter()
                .map(|(name, spec)| {
                    let mut outputs = BTreeMap::new();
                    outputs.insert(output_name(&name), spec);
                    (name, outputs)
                })
                .collect(),
        };
        let gather = GatherStep {
            inputs: self.gatherers.iter().map(|(name, _)| name.clone()).collect(),
            body: self.gatherers.into_iter().collect(),
            post: true,
        };
        let broadcast = BroadcastStep {
            command: self.message.command.clone(),
            dataset: self.message.dataset.clone(),
            body: self.message.body,
            routing: processor.routing,
            destinations,
            outputs: self.outputs,
            post: processor.post,
        };

        debug!(
            command = %broadcast.command,
            dataset = %broadcast.dataset,
            route_type = broadcast.routing.route_type.as_str(),
            destinations = broadcast.destinations.len(),
            outputs = broadcast.outputs.len(),
            "Planned distributed command"
        );

        let plan = Plan {
            steps: vec![
                PlanStep::Reduce(reduce),
                PlanStep::Gather(gather),
                PlanStep::Broadcast(broadcast),
            ],
        };
        telemetry::record_plan(&self.message.command, plan.steps.len());
        Ok(plan)
    }
}

/// Reduced name of `name`
pub fn output_name(name: &str) -> String {
    format!("{}{}", name, REDUCE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::routing::RouteType;
    use serde_json::json;
    use std::sync::Arc;

    fn router() -> Router {
        let document = json!({
            "version": 2,
            "effectiveDate": "2014-02-28T00:00:00Z",
            "datasets": {
                "Default": {
                    "replicas": [{
                        "slices": [
                            {"label": "000", "volume": {"address": "a:1/d.000"}},
                            {"label": "001", "volume": {"address": "a:1/d.001"}}
                        ]
                    }]
                }
            }
        });
        Router::new(Arc::new(Catalog::parse(&document, "catalog.json").unwrap()))
    }

    #[test]
    fn test_plan_always_has_errors_and_success() {
        let router = router();
        let mut planner =
            DistributedCommandPlanner::new(&router, Message::new("table_create", "Default", json!({})));
        planner.broadcast(StepOptions::write());
        let plan = planner.plan().unwrap();

        let reduce = plan.reduce().unwrap();
        assert_eq!(reduce.inputs, vec!["errors", "success"]);
        assert_eq!(reduce.outputs, vec!["errors_reduced", "success_reduced"]);
        assert_eq!(
            reduce.spec_for("errors").unwrap(),
            ("errors_reduced", &ReduceSpec::Value(ReducerSpec::sum().with_limit(-1)))
        );
        assert_eq!(
            reduce.spec_for("success").unwrap().1,
            &ReduceSpec::Value(ReducerSpec::and())
        );

        let gather = plan.gather().unwrap();
        assert_eq!(gather.body["errors_reduced"].output, "errors");
        assert!(gather.post);

        let broadcast = plan.broadcast().unwrap();
        assert_eq!(broadcast.outputs, vec!["errors", "success"]);
        assert_eq!(broadcast.destinations, vec!["a:1/d.000", "a:1/d.001"]);
        assert!(broadcast.post);
    }

    #[test]
    fn test_broadcast_defaults_to_random_replica() {
        let router = router();
        let mut planner =
            DistributedCommandPlanner::new(&router, Message::new("search", "Default", json!({})));
        planner.broadcast(StepOptions::default());
        let plan = planner.plan().unwrap();
        assert_eq!(plan.broadcast().unwrap().routing.replica, ReplicaPolicy::Random);
    }

    #[test]
    fn test_scatter_defaults_to_all_replicas() {
        let router = router();
        let mut planner =
            DistributedCommandPlanner::new(&router, Message::new("add", "Default", json!({"key": "k"})));
        let mut record = Map::new();
        record.insert("_key".to_string(), json!("k"));
        planner.scatter(record, StepOptions::write());
        planner.reduce("add_result", ReducerSpec::and());
        let plan = planner.plan().unwrap();

        let broadcast = plan.broadcast().unwrap();
        assert_eq!(broadcast.routing.route_type, RouteType::Scatter);
        assert_eq!(broadcast.routing.replica, ReplicaPolicy::All);
        assert_eq!(broadcast.destinations.len(), 1);
        assert_eq!(broadcast.outputs, vec!["add_result", "errors", "success"]);
    }

    #[test]
    fn test_plan_without_processor_fails() {
        let router = router();
        let planner =
            DistributedCommandPlanner::new(&router, Message::new("search", "Default", json!({})));
        let err = planner.plan().unwrap_err();
        assert!(matches!(err, crate::Error::Planning(PlanningError::MissingBroadcast)));
    }

    #[test]
    fn test_plan_serializes_step_types() {
        let router = router();
        let mut planner =
            DistributedCommandPlanner::new(&router, Message::new("search", "Default", json!({})));
        planner.broadcast(StepOptions::replica(ReplicaPolicy::Top));
        let value = planner.plan().unwrap().to_value().unwrap();
        let types: Vec<&str> = value["steps"]
            .as_array()
            .unwrap()
            .iter()
            .map(|step| step["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["reduce", "gather", "broadcast"]);
        assert_eq!(value["steps"][2]["routing"]["type"], "broadcast");
    }
}
