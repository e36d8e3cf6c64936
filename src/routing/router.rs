//! Routing resolver
//!
//! Resolves a [`RoutingRequest`] against one catalog snapshot and reports the
//! outcome to telemetry.

use super::telemetry;
use super::{ReplicaPolicy, RoutingRequest};
use crate::catalog::{Catalog, CatalogHandle};
use crate::RoutingError;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routing resolver bound to a catalog snapshot
pub struct Router {
    /// Catalog snapshot
    catalog: Arc<Catalog>,
    /// Policy used when a caller has no preference
    default_replica: ReplicaPolicy,
    /// Live nodes applied to requests that carry none
    live_nodes: Option<BTreeSet<String>>,
    /// Random source for `random` replica selection
    rng: Mutex<StdRng>,
}

impl Router {
    /// Create a router over `catalog`
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            default_replica: ReplicaPolicy::Random,
            live_nodes: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a router over the handle's current catalog
    pub fn from_handle(handle: &CatalogHandle) -> Self {
        Self::new(handle.load())
    }

    pub fn with_default_replica(mut self, policy: ReplicaPolicy) -> Self {
        self.default_replica = policy;
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

    /// Seed replica selection, for reproducible routing
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn default_replica(&self) -> ReplicaPolicy {
        self.default_replica
    }

    pub fn live_nodes(&self) -> Option<&BTreeSet<String>> {
        self.live_nodes.as_ref()
    }

    /// Resolve destinations for `request` against `dataset`
    ///
    /// Addresses are deduplicated and sorted. Resolving to nothing, because
    /// every candidate replica has a dead node, is a routing error.
    pub fn route(&self, dataset: &str, request: &RoutingRequest) -> Result<Vec<String>, RoutingError> {
        let mut effective;
        let request = match (&request.live_nodes, &self.live_nodes) {
            (None, Some(live)) => {
                effective = request.clone();
                effective.live_nodes = Some(live.clone());
                &effective
            }
            _ => request,
        };

        let routes = {
            let mut rng = self.rng.lock();
            self.catalog.get_routes_with_rng(dataset, request, &mut *rng)
        };

        match routes {
            Ok(routes) if routes.is_empty() => {
                warn!(dataset, "No live replica available");
                telemetry::record_route_failure("NoRoutes");
                Err(RoutingError::NoRoutes {
                    dataset: dataset.to_string(),
                })
            }
            Ok(routes) => {
                debug!(
                    dataset,
                    route_type = request.route_type.as_str(),
                    replica = request.replica.as_str(),
                    destinations = routes.len(),
                    "Resolved routes"
                );
                telemetry::record_route(request.route_type, routes.len());
                Ok(routes)
            }
            Err(e) => {
                telemetry::record_route_failure(e.name());
                Err(e)
            }
        }
    }
}
