//! Routing resolver tests over both catalog layouts

use shardmesh::address::NodeAddress;
use shardmesh::catalog::{Catalog, CatalogHandle, Continuum, WeightedTarget};
use shardmesh::routing::{DateRange, ReplicaPolicy, Router, RoutingRequest};
use shardmesh::RoutingError;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Two replicas, each hash-sliced three ways
fn volume_catalog() -> Catalog {
    let replica = |node: &str| {
        json!({
            "dimension": "_key",
            "slicer": "hash",
            "slices": [
                {"label": "000", "weight": 50, "volume": {"address": format!("{node}:10031/droonga.000")}},
                {"label": "001", "weight": 50, "volume": {"address": format!("{node}:10031/droonga.001")}},
                {"label": "002", "weight": 50, "volume": {"address": format!("{node}:10031/droonga.002")}}
            ]
        })
    };
    let document = json!({
        "version": 2,
        "effectiveDate": "2014-02-28T00:00:00Z",
        "datasets": {
            "Default": {"replicas": [replica("node1"), replica("node2")]},
            "Users": {
                "replicas": [{
                    "dimension": "user",
                    "slices": [
                        {"label": "a", "volume": {"address": "node1:10031/users.a"}},
                        {"label": "b", "volume": {"address": "node1:10031/users.b"}}
                    ]
                }]
            }
        }
    });
    Catalog::parse(&document, "catalog.json").unwrap()
}

fn time_ring_catalog() -> Catalog {
    let document = json!({
        "effectiveDate": "2014-02-28T00:00:00Z",
        "farms": {"localhost:23003/droonga": {"device": "."}},
        "datasets": {
            "Logs": {
                "workers": 1,
                "plugins": ["search"],
                "number_of_replicas": 1,
                "number_of_partitions": 1,
                "partition_key": "_key",
                "date_range": "infinity",
                "ring": {
                    "zone1": {
                        "weight": 1,
                        "partitions": {
                            "2013-07-01": ["localhost:23003/droonga.july"],
                            "2013-08-01": ["localhost:23003/droonga.august"],
                            "2013-09-01": ["localhost:23003/droonga.september"]
                        }
                    }
                }
            }
        }
    });
    Catalog::parse(&document, "catalog.json").unwrap()
}

fn node_of(address: &str) -> String {
    NodeAddress::parse(address).unwrap().node()
}

fn slice_of(address: &str) -> String {
    NodeAddress::parse(address).unwrap().local_name.unwrap()
}

#[test]
fn test_continuum_is_deterministic_and_total() {
    let build = || {
        Continuum::build(
            vec![
                WeightedTarget::new("a", 10.0, "a"),
                WeightedTarget::new("b", 20.0, "b"),
                WeightedTarget::new("c", 30.0, "c"),
            ],
            3,
        )
        .unwrap()
    };
    let (first, second) = (build(), build());
    for i in 0..500 {
        let key = format!("key-{i}");
        assert_eq!(first.lookup(key.as_bytes()), second.lookup(key.as_bytes()));
    }
    // Past the last point wraps onto the ring
    assert!(["a", "b", "c"].contains(first.lookup_hash(u32::MAX)));
}

#[test]
fn test_continuum_points_follow_weights() {
    let continuum = Continuum::build(
        vec![
            WeightedTarget::new("a", 10.0, "a"),
            WeightedTarget::new("b", 20.0, "b"),
            WeightedTarget::new("c", 30.0, "c"),
        ],
        3,
    )
    .unwrap();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for point in continuum.points() {
        *counts.entry(point.target).or_default() += 1;
    }
    assert_eq!(counts["a"], 80);
    assert_eq!(counts["b"], 160);
    assert_eq!(counts["c"], 240);
}

#[test]
fn test_routes_are_deterministic_sorted_and_unique() {
    let router = Router::new(Arc::new(volume_catalog()));
    let request = RoutingRequest::broadcast(ReplicaPolicy::All);
    let first = router.route("Default", &request).unwrap();
    let second = router.route("Default", &request).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 6);
    let mut sorted = first.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(first, sorted);
}

#[test]
fn test_resolved_addresses_round_trip() {
    let router = Router::new(Arc::new(volume_catalog()));
    for address in router
        .route("Default", &RoutingRequest::broadcast(ReplicaPolicy::All))
        .unwrap()
    {
        let parsed = NodeAddress::parse(&address).unwrap();
        assert_eq!(parsed.to_string(), address);
        assert_eq!(NodeAddress::parse(&parsed.to_string()).unwrap(), parsed);
    }
}

#[test]
fn test_broadcast_top_uses_first_replica_only() {
    let router = Router::new(Arc::new(volume_catalog()));
    let routes = router
        .route("Default", &RoutingRequest::broadcast(ReplicaPolicy::Top))
        .unwrap();
    assert_eq!(
        routes,
        vec![
            "node1:10031/droonga.000",
            "node1:10031/droonga.001",
            "node1:10031/droonga.002"
        ]
    );
}

#[test]
fn test_scatter_hits_same_slice_on_every_replica() {
    let router = Router::new(Arc::new(volume_catalog()));
    for i in 0..50 {
        let key = format!("user-{i}");
        let routes = router
            .route("Default", &RoutingRequest::scatter(key, ReplicaPolicy::All))
            .unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(slice_of(&routes[0]), slice_of(&routes[1]));
        assert_ne!(node_of(&routes[0]), node_of(&routes[1]));
    }
}

#[test]
fn test_dead_node_never_routed() {
    let catalog = Arc::new(volume_catalog());
    for seed in 0..20 {
        let router = Router::new(catalog.clone())
            .with_live_nodes(["node1:10031/droonga"])
            .with_seed(seed);
        for policy in [ReplicaPolicy::Top, ReplicaPolicy::Random, ReplicaPolicy::All] {
            let broadcast = router
                .route("Default", &RoutingRequest::broadcast(policy))
                .unwrap();
            let scatter = router
                .route("Default", &RoutingRequest::scatter(format!("k{seed}"), policy))
                .unwrap();
            for address in broadcast.iter().chain(scatter.iter()) {
                assert_eq!(node_of(address), "node1:10031/droonga");
            }
        }
    }
}

#[test]
fn test_request_live_nodes_override_router() {
    let router = Router::new(Arc::new(volume_catalog())).with_live_nodes(["node1:10031/droonga"]);
    let request =
        RoutingRequest::broadcast(ReplicaPolicy::All).with_live_nodes(["node2:10031/droonga"]);
    let routes = router.route("Default", &request).unwrap();
    assert!(routes.iter().all(|a| node_of(a) == "node2:10031/droonga"));
}

#[test]
fn test_no_live_replica_is_an_error() {
    let router = Router::new(Arc::new(volume_catalog())).with_live_nodes(["node9:10031/droonga"]);
    let err = router
        .route("Default", &RoutingRequest::broadcast(ReplicaPolicy::All))
        .unwrap_err();
    assert_eq!(
        err,
        RoutingError::NoRoutes {
            dataset: "Default".to_string()
        }
    );
}

#[test]
fn test_scatter_by_record_dimension() {
    let router = Router::new(Arc::new(volume_catalog()));
    let mut record = Map::new();
    record.insert("user".to_string(), json!("alice"));
    let first = router
        .route(
            "Users",
            &RoutingRequest::scatter_record(record.clone(), ReplicaPolicy::All),
        )
        .unwrap();
    let again = router
        .route("Users", &RoutingRequest::scatter_record(record, ReplicaPolicy::All))
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first, again);

    let err = router
        .route("Users", &RoutingRequest::scatter("alice", ReplicaPolicy::All))
        .unwrap_err();
    assert!(matches!(err, RoutingError::MissingScatterKey { .. }));
}

#[test]
fn test_integer_keys_hash_like_their_decimal_string() {
    let catalog = volume_catalog();
    let mut rng = StdRng::seed_from_u64(7);
    for n in [0_i64, 7, 12345, -42] {
        let mut record = Map::new();
        record.insert("_key".to_string(), Value::from(n));
        let by_integer = catalog
            .get_routes_with_rng(
                "Default",
                &RoutingRequest::scatter_record(record, ReplicaPolicy::Top),
                &mut rng,
            )
            .unwrap();
        let by_string = catalog
            .get_routes_with_rng(
                "Default",
                &RoutingRequest::scatter(n.to_string(), ReplicaPolicy::Top),
                &mut rng,
            )
            .unwrap();
        assert_eq!(by_integer, by_string);
    }
}

#[test]
fn test_unknown_dataset() {
    let router = Router::new(Arc::new(volume_catalog()));
    let err = router
        .route("Nope", &RoutingRequest::broadcast(ReplicaPolicy::All))
        .unwrap_err();
    assert_eq!(err, RoutingError::UnknownDataset("Nope".to_string()));
}

#[test]
fn test_date_range_window_on_ring() {
    let router = Router::new(Arc::new(time_ring_catalog()));
    let all = router
        .route("Logs", &RoutingRequest::broadcast(ReplicaPolicy::All))
        .unwrap();
    assert_eq!(all.len(), 3);

    let recent = router
        .route(
            "Logs",
            &RoutingRequest::broadcast(ReplicaPolicy::All).with_date_range(DateRange::new(1, None)),
        )
        .unwrap();
    assert_eq!(
        recent,
        vec!["localhost:23003/droonga.august", "localhost:23003/droonga.september"]
    );

    let scatter = router
        .route(
            "Logs",
            &RoutingRequest::scatter("any", ReplicaPolicy::Top).with_date_range(DateRange::new(0, Some(0))),
        )
        .unwrap();
    assert_eq!(scatter, vec!["localhost:23003/droonga.july"]);
}

#[test]
fn test_router_follows_handle_snapshot() {
    let handle = CatalogHandle::new(volume_catalog());
    let router = Router::from_handle(&handle);
    handle.swap(time_ring_catalog());

    // The router keeps the snapshot it was built from
    assert!(router.catalog().has_dataset("Default"));
    assert!(Router::from_handle(&handle).catalog().has_dataset("Logs"));
}
