//! Routing, planning and merge telemetry instruments.

use super::RouteType;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct RoutingInstruments {
    route_requests: Counter<u64>,
    route_fanout: Histogram<u64>,
    route_failures: Counter<u64>,
    plans_built: Counter<u64>,
    plan_steps: Histogram<u64>,
    merge_failures: Counter<u64>,
    catalog_reloads: Counter<u64>,
}

fn instruments() -> &'static RoutingInstruments {
    static INSTRUMENTS: OnceLock<RoutingInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("shardmesh.routing");
        RoutingInstruments {
            route_requests: meter
                .u64_counter("shardmesh.routing.requests")
                .with_description("Routing requests resolved by route type")
                .init(),
            route_fanout: meter
                .u64_histogram("shardmesh.routing.fanout")
                .with_description("Destinations per resolved request")
                .init(),
            route_failures: meter
                .u64_counter("shardmesh.routing.failures")
                .with_description("Routing requests that failed by error class")
                .init(),
            plans_built: meter
                .u64_counter("shardmesh.planner.plans")
                .with_description("Distributed plans built by command")
                .init(),
            plan_steps: meter
                .u64_histogram("shardmesh.planner.steps")
                .with_description("Steps per distributed plan")
                .init(),
            merge_failures: meter
                .u64_counter("shardmesh.reducer.failures")
                .with_description("Reduce or gather failures by error class")
                .init(),
            catalog_reloads: meter
                .u64_counter("shardmesh.catalog.reloads")
                .with_description("Catalog reload attempts by outcome")
                .init(),
        }
    })
}

/// Result of a catalog reload attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Applied,
    Rejected,
}

impl ReloadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadOutcome::Applied => "applied",
            ReloadOutcome::Rejected => "rejected",
        }
    }
}

pub fn record_route(route_type: RouteType, fanout: usize) {
    let i = instruments();
    let attrs = [KeyValue::new("route.type", route_type.as_str())];
    i.route_requests.add(1, &attrs);
    i.route_fanout.record(fanout as u64, &attrs);
}

pub fn record_route_failure(error_class: &'static str) {
    instruments()
        .route_failures
        .add(1, &[KeyValue::new("error.class", error_class)]);
}

pub fn record_plan(command: &str, steps: usize) {
    let i = instruments();
    let attrs = [KeyValue::new("command", command.to_string())];
    i.plans_built.add(1, &attrs);
    i.plan_steps.record(steps as u64, &attrs);
}

pub fn record_merge_failure(error_class: &'static str) {
    instruments()
        .merge_failures
        .add(1, &[KeyValue::new("error.class", error_class)]);
}

pub fn record_catalog_reload(outcome: ReloadOutcome) {
    instruments()
        .catalog_reloads
        .add(1, &[KeyValue::new("outcome", outcome.as_str())]);
}
