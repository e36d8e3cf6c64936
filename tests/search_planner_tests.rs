//! Distributed search planning tests
//!
//! Plans are checked both structurally and by folding simulated worker
//! responses through a [`ResultCollector`].

use shardmesh::catalog::Catalog;
use shardmesh::collector::ResultCollector;
use shardmesh::planner::{DistributedSearchPlanner, Message, Plan};
use shardmesh::reducer::{ElementMapper, ReduceSpec, ReducerRegistry, SortDirection};
use shardmesh::routing::{ReplicaPolicy, Router};
use shardmesh::{Error, PlanningError};

use serde_json::{json, Map, Value};
use std::sync::Arc;

fn router() -> Router {
    let document = json!({
        "version": 2,
        "effectiveDate": "2014-02-28T00:00:00Z",
        "datasets": {
            "Default": {
                "replicas": [{
                    "slices": [
                        {"label": "000", "volume": {"address": "node1:10031/droonga.000"}},
                        {"label": "001", "volume": {"address": "node1:10031/droonga.001"}}
                    ]
                }]
            }
        }
    });
    Router::new(Arc::new(Catalog::parse(&document, "catalog.json").unwrap()))
        .with_default_replica(ReplicaPolicy::Top)
}

fn plan(body: Value) -> shardmesh::Result<Plan> {
    let router = router();
    DistributedSearchPlanner::new(&router, Message::new("search", "Default", body)).plan()
}

fn response(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn paged_query() -> Value {
    json!({
        "queries": {
            "users": {
                "source": "Users",
                "sortBy": {"keys": ["-age"], "offset": 1, "limit": 2},
                "output": {
                    "elements": ["count", "records"],
                    "attributes": ["_key", "age"],
                    "offset": 4,
                    "limit": 8
                }
            }
        }
    })
}

#[test]
fn test_workers_receive_widened_window() {
    let plan = plan(paged_query()).unwrap();
    let broadcast = plan.broadcast().unwrap();
    let query = &broadcast.body["queries"]["users"];

    assert_eq!(query["sortBy"]["offset"], 0);
    assert_eq!(query["sortBy"]["limit"], 13);
    assert_eq!(query["output"]["offset"], 0);
    assert_eq!(query["output"]["limit"], 7);
    assert_eq!(broadcast.destinations.len(), 2);
    assert_eq!(broadcast.outputs, vec!["users", "errors", "success"]);
}

#[test]
fn test_reduce_and_gather_specs() {
    let plan = plan(paged_query()).unwrap();

    let (reduced, spec) = plan.reduce().unwrap().spec_for("users").unwrap();
    assert_eq!(reduced, "users_reduced");
    let ReduceSpec::Elements(elements) = spec else {
        panic!("expected element-wise reduction");
    };
    assert_eq!(elements["count"].kind, "sum");
    assert_eq!(elements["records"].kind, "sort");
    assert_eq!(elements["records"].limit, Some(7));
    assert_eq!(elements["records"].operators[0].column, 1);
    assert_eq!(elements["records"].operators[0].operator, SortDirection::Descending);

    let gather = &plan.gather().unwrap().body["users_reduced"];
    assert_eq!(gather.output, "users");
    let ElementMapper::Records(mapper) = &gather.elements["records"] else {
        panic!("expected a records mapper");
    };
    assert_eq!((mapper.offset, mapper.limit), (5, 2));
}

#[test]
fn test_paged_results_after_merge() {
    let plan = plan(paged_query()).unwrap();
    let mut collector = ResultCollector::new(&plan, ReducerRegistry::default());

    // Each worker returns its 7 best candidates, oldest first
    let even: Vec<Value> = (0..7).map(|i| json!([format!("e{i}"), 100 - 2 * i])).collect();
    let odd: Vec<Value> = (0..7).map(|i| json!([format!("o{i}"), 99 - 2 * i])).collect();
    collector.receive_response(response(json!({
        "users": {"count": 50, "records": even},
        "errors": [],
        "success": true
    })));
    collector.receive_response(response(json!({
        "users": {"count": 50, "records": odd},
        "errors": [],
        "success": true
    })));

    let results = collector.finish();
    assert_eq!(results["users"]["count"], 100);
    // Merged ages 100, 99, ... 94; the window starts at 5 and keeps 2
    assert_eq!(results["users"]["records"], json!([["o2", 95], ["e3", 94]]));
    assert_eq!(results["success"], true);
}

#[test]
fn test_sort_keys_are_hidden_from_client() {
    let plan = plan(json!({
        "queries": {
            "names": {
                "source": "Users",
                "sortBy": ["age"],
                "output": {"elements": ["records"], "attributes": ["_key"], "limit": 3}
            }
        }
    }))
    .unwrap();
    let query = &plan.broadcast().unwrap().body["queries"]["names"];
    assert_eq!(query["output"]["attributes"], json!(["_key", "age"]));

    let mut collector = ResultCollector::new(&plan, ReducerRegistry::default());
    collector.receive("names", json!({"records": [["a", 1], ["c", 5]]}));
    collector.receive("names", json!({"records": [["b", 3], ["d", 7]]}));
    let results = collector.finish();
    assert_eq!(results["names"]["records"], json!([["a"], ["b"], ["c"]]));
}

#[test]
fn test_sort_key_column_hidden_without_attributes() {
    let plan = plan(json!({
        "queries": {
            "users": {
                "source": "Users",
                "sortBy": ["age"],
                "output": {"elements": ["records"], "limit": 3}
            }
        }
    }))
    .unwrap();
    let query = &plan.broadcast().unwrap().body["queries"]["users"];
    assert_eq!(query["output"]["attributes"], json!(["age"]));

    let mut collector = ResultCollector::new(&plan, ReducerRegistry::default());
    collector.receive("users", json!({"records": [[1], [5]]}));
    collector.receive("users", json!({"records": [[3], [7]]}));
    let results = collector.finish();
    assert_eq!(results["users"]["records"], json!([[], [], []]));
}

#[test]
fn test_complex_format_restored() {
    let plan = plan(json!({
        "queries": {
            "users": {
                "source": "Users",
                "output": {
                    "elements": ["records"],
                    "format": "complex",
                    "attributes": ["_key", "age"],
                    "limit": -1
                }
            }
        }
    }))
    .unwrap();
    assert_eq!(
        plan.broadcast().unwrap().body["queries"]["users"]["output"]["format"],
        "simple"
    );

    let mut collector = ResultCollector::new(&plan, ReducerRegistry::default());
    collector.receive("users", json!({"records": [["alice", 30]]}));
    collector.receive("users", json!({"records": [["bob", 25]]}));
    let results = collector.finish();
    assert_eq!(
        results["users"]["records"],
        json!([{"_key": "alice", "age": 30}, {"_key": "bob", "age": 25}])
    );
}

#[test]
fn test_grouped_count_comes_from_unified_records() {
    let plan = plan(json!({
        "queries": {
            "ages": {
                "source": "Users",
                "groupBy": "age",
                "output": {"elements": ["count"]}
            },
            "top_ages": {
                "source": "ages",
                "sortBy": ["_key"],
                "output": {"elements": ["records"], "attributes": ["_key", "_nsubrecs"], "limit": 10}
            }
        }
    }))
    .unwrap();

    let queries = &plan.broadcast().unwrap().body["queries"];
    assert_eq!(queries["ages"]["output"]["unifiable"], true);
    assert_eq!(queries["ages"]["output"]["limit"], -1);
    assert_eq!(queries["ages"]["output"]["elements"], json!(["count", "records"]));
    // Unifiable through its source
    assert_eq!(queries["top_ages"]["output"]["unifiable"], true);

    let mut collector = ResultCollector::new(&plan, ReducerRegistry::default());
    collector.receive_response(response(json!({
        "ages": {"count": 2, "records": [[20], [30]]},
        "top_ages": {"records": [[20, 4], [30, 1]]},
        "errors": [],
        "success": true
    })));
    collector.receive_response(response(json!({
        "ages": {"count": 2, "records": [[30], [40]]},
        "top_ages": {"records": [[30, 2], [40, 6]]},
        "errors": [],
        "success": true
    })));

    let results = collector.finish();
    // Three distinct groups, not the four the workers reported
    assert_eq!(results["ages"], json!({"count": 3}));
    assert_eq!(
        results["top_ages"]["records"],
        json!([[20, 4], [30, 3], [40, 6]])
    );
}

#[test]
fn test_intermediate_queries_pass_through() {
    let plan = plan(json!({
        "queries": {
            "adults": {"source": "Users", "filter": "age >= 20"},
            "names": {
                "source": "adults",
                "output": {"elements": ["records"], "attributes": ["_key"], "limit": 5}
            }
        }
    }))
    .unwrap();

    let reduce = plan.reduce().unwrap();
    assert_eq!(reduce.inputs, vec!["names", "errors", "success"]);
    let queries = &plan.broadcast().unwrap().body["queries"];
    assert_eq!(queries["adults"], json!({"source": "Users", "filter": "age >= 20"}));
}

#[test]
fn test_request_errors() {
    let err = plan(json!({"queries": {}})).unwrap_err();
    assert!(matches!(err, Error::Planning(PlanningError::NoQuery)));

    let err = plan(json!({})).unwrap_err();
    assert!(matches!(err, Error::Planning(PlanningError::NoQuery)));

    let err = plan(json!({"queries": {"a": {"source": "b"}, "b": {"source": "a"}}})).unwrap_err();
    assert!(matches!(err, Error::Planning(PlanningError::CyclicSource(_))));
    assert_eq!(err.status_code(), 400);

    let err = plan(json!({"queries": {"a": {"output": {}}}})).unwrap_err();
    assert!(matches!(err, Error::Planning(PlanningError::MissingSource(_))));
}

#[test]
fn test_outcome_names_cannot_be_queries() {
    for name in ["errors", "success"] {
        let mut queries = Map::new();
        queries.insert(
            name.to_string(),
            json!({"source": "Users", "output": {"elements": ["count"]}}),
        );
        let err = plan(json!({ "queries": queries })).unwrap_err();
        assert!(matches!(err, Error::Planning(PlanningError::InvalidRequest(_))));
        assert!(err.to_string().contains(name));
        assert_eq!(err.status_code(), 400);
    }
}
