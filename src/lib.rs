//! # shardmesh
//!
//! Catalog-driven routing and distributed query planning for a sharded,
//! replicated cluster of search workers.
//!
//! ## Components
//!
//! - **Catalog**: parses and validates the cluster topology document, either
//!   the flat ring layout (version 1) or the slice/replica volume tree
//!   (version 2), and builds the consistent-hash continuums once
//! - **Routing**: resolves a broadcast or scatter request to the sorted,
//!   deduplicated set of worker addresses, honouring replica policy and
//!   live nodes
//! - **Planner**: expands a command into broadcast, reduce and gather steps;
//!   the search planner adds distributed offset/limit arithmetic and
//!   per-query sort and count reducers
//! - **Reducer**: pure pairwise merge functions behind a string-keyed
//!   registry, and the gather-time mappers restoring the client's shape
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use shardmesh::catalog::Catalog;
//! use shardmesh::routing::{ReplicaPolicy, Router, RoutingRequest};
//! use std::sync::Arc;
//!
//! let document = json!({
//!     "version": 2,
//!     "effectiveDate": "2014-02-28T00:00:00Z",
//!     "datasets": {
//!         "Default": {
//!             "replicas": [{
//!                 "slices": [
//!                     {"label": "000", "volume": {"address": "node1:10031/droonga.000"}},
//!                     {"label": "001", "volume": {"address": "node1:10031/droonga.001"}}
//!                 ]
//!             }]
//!         }
//!     }
//! });
//! let catalog = Catalog::parse(&document, "catalog.json").unwrap();
//! let router = Router::new(Arc::new(catalog));
//!
//! let routes = router
//!     .route("Default", &RoutingRequest::scatter("alice", ReplicaPolicy::All))
//!     .unwrap();
//! assert_eq!(routes.len(), 1);
//! ```

pub mod address;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod planner;
pub mod reducer;
pub mod routing;
pub mod telemetry;

mod error;

pub use error::{Error, MergeError, PlanningError, Result, RoutingError};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::address::NodeAddress;
    pub use crate::catalog::{Catalog, CatalogHandle, CatalogWatcher};
    pub use crate::collector::ResultCollector;
    pub use crate::config::RouterConfig;
    pub use crate::planner::{
        DistributedCommandPlanner, DistributedSearchPlanner, Message, Plan, StepOptions,
    };
    pub use crate::reducer::{ReduceSpec, ReducerRegistry, ReducerSpec};
    pub use crate::routing::{ReplicaPolicy, RouteType, Router, RoutingRequest};
    pub use crate::{Error, MergeError, PlanningError, Result, RoutingError};
}
