//! Left-fold of partial results over a plan's reduce and gather steps
//!
//! A dispatcher feeds every partial response into [`ResultCollector::receive`]
//! as it arrives and calls [`ResultCollector::finish`] once all expected
//! inputs are in. A merge failure drops the affected output and is reported
//! through the `errors` output; the other outputs still complete.

use crate::planner::{output_name, Plan, ERRORS_OUTPUT};
use crate::reducer::{gather, GatherSpec, ReduceSpec, ReducerRegistry};
use crate::routing::telemetry;
use crate::{Error, MergeError};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Accumulates partial results for one plan
#[derive(Debug)]
pub struct ResultCollector {
    registry: ReducerRegistry,
    /// input name → (reduced output name, reduction)
    reducers: BTreeMap<String, (String, ReduceSpec)>,
    /// reduced output name → gather mapping
    gatherers: BTreeMap<String, GatherSpec>,
    accumulators: BTreeMap<String, Value>,
    failed: BTreeSet<String>,
    errors: Vec<Value>,
}

impl ResultCollector {
    pub fn new(plan: &Plan, registry: ReducerRegistry) -> Self {
        let reducers = plan
            .reduce()
            .map(|step| {
                step.body
                    .iter()
                    .filter_map(|(input, outputs)| {
                        outputs
                            .iter()
                            .next()
                            .map(|(output, spec)| (input.clone(), (output.clone(), spec.clone())))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let gatherers = plan
            .gather()
            .map(|step| step.body.clone())
            .unwrap_or_default();

        Self {
            registry,
            reducers,
            gatherers,
            accumulators: BTreeMap::new(),
            failed: BTreeSet::new(),
            errors: Vec::new(),
        }
    }

    /// Fold one partial value for `input` into its accumulator
    ///
    /// Inputs the plan does not reduce are ignored.
    pub fn receive(&mut self, input: &str, value: Value) {
        let Some((output, spec)) = self.reducers.get(input) else {
            debug!(input, "Ignoring partial result for an unplanned output");
            return;
        };
        if self.failed.contains(output) {
            return;
        }

        let accumulator = self.accumulators.remove(output).unwrap_or(Value::Null);
        match self.registry.reduce_with(accumulator, value, spec) {
            Ok(reduced) => {
                self.accumulators.insert(output.clone(), reduced);
            }
            Err(err) => {
                let output = output.clone();
                self.fail(output, err);
            }
        }
    }

    /// Fold every output of one destination's response
    pub fn receive_response(&mut self, response: Map<String, Value>) {
        for (input, value) in response {
            self.receive(&input, value);
        }
    }

    /// Whether a merge failure dropped `output` (a client-visible name)
    pub fn has_failed(&self, output: &str) -> bool {
        self.failed.contains(&output_name(output))
    }

    /// Gather every reduced output into client-visible outputs
    pub fn finish(mut self) -> Map<String, Value> {
        let mut results = Map::new();
        let gatherers = std::mem::take(&mut self.gatherers);

        for (reduced, spec) in &gatherers {
            if self.failed.contains(reduced) {
                continue;
            }
            let value = self.accumulators.remove(reduced).unwrap_or(Value::Null);
            match gather(value, spec) {
                Ok(value) => {
                    results.insert(spec.output.clone(), value);
                }
                Err(err) => self.fail(reduced.clone(), err),
            }
        }

        if !self.errors.is_empty() {
            let errors = match results.remove(ERRORS_OUTPUT) {
                Some(Value::Array(mut reported)) => {
                    reported.extend(self.errors);
                    reported
                }
                Some(Value::Null) | None => self.errors,
                Some(other) => {
                    let mut reported = vec![other];
                    reported.extend(self.errors);
                    reported
                }
            };
            results.insert(ERRORS_OUTPUT.to_string(), Value::Array(errors));
        }
        results
    }

    fn fail(&mut self, output: String, err: MergeError) {
        warn!(output = %output, error = %err, "Dropping output after merge failure");
        telemetry::record_merge_failure(err.name());
        self.accumulators.remove(&output);
        self.errors.push(Error::from(err).to_error_body());
        self.failed.insert(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::planner::{DistributedCommandPlanner, Message, StepOptions};
    use crate::reducer::ReducerSpec;
    use crate::routing::Router;
    use serde_json::json;
    use std::sync::Arc;

    fn plan() -> Plan {
        let document = json!({
            "version": 2,
            "effectiveDate": "2014-02-28T00:00:00Z",
            "datasets": {
                "Default": {"replicas": [{"address": "a:1/d"}]}
            }
        });
        let router = Router::new(Arc::new(Catalog::parse(&document, "catalog.json").unwrap()));
        let mut planner =
            DistributedCommandPlanner::new(&router, Message::new("status", "Default", json!({})));
        planner.broadcast(StepOptions::default());
        planner.reduce("total", ReducerSpec::sum());
        planner.reduce("names", ReducerSpec::sum());
        planner.plan().unwrap()
    }

    #[test]
    fn test_collects_and_gathers() {
        let mut collector = ResultCollector::new(&plan(), ReducerRegistry::default());
        collector.receive_response(
            json!({"total": 2, "names": ["a"], "success": true, "errors": []})
                .as_object()
                .cloned()
                .unwrap(),
        );
        collector.receive_response(
            json!({"total": 3, "names": ["b"], "success": true, "errors": []})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let results = collector.finish();
        assert_eq!(results["total"], 5);
        assert_eq!(results["names"], json!(["a", "b"]));
        assert_eq!(results["success"], true);
        assert_eq!(results["errors"], json!([]));
    }

    #[test]
    fn test_merge_failure_is_isolated() {
        let mut collector = ResultCollector::new(&plan(), ReducerRegistry::default());
        collector.receive("total", json!(1));
        collector.receive("total", json!("oops"));
        collector.receive("total", json!(7));
        collector.receive("names", json!(["a"]));
        collector.receive("success", json!(true));

        assert!(collector.has_failed("total"));
        let results = collector.finish();
        assert!(!results.contains_key("total"));
        assert_eq!(results["names"], json!(["a"]));

        let errors = results["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["statusCode"], 500);
        assert_eq!(errors[0]["body"]["name"], "TypeMismatch");
    }

    #[test]
    fn test_unplanned_inputs_are_ignored() {
        let mut collector = ResultCollector::new(&plan(), ReducerRegistry::default());
        collector.receive("unexpected", json!(1));
        let results = collector.finish();
        assert!(!results.contains_key("unexpected"));
        assert_eq!(results["total"], Value::Null);
    }
}
