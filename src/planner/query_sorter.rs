//! Dependency ordering of search queries
//!
//! A query whose `source` names another query depends on it. Sources that
//! name no query are tables and impose no order.

use crate::PlanningError;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

pub struct QuerySorter<'a> {
    queries: &'a Map<String, Value>,
}

impl<'a> QuerySorter<'a> {
    pub fn new(queries: &'a Map<String, Value>) -> Self {
        Self { queries }
    }

    /// Source of `name`, when it is another query
    pub fn source_query(&self, name: &str) -> Option<&'a str> {
        let source = self.queries.get(name)?.get("source")?.as_str()?;
        self.queries.contains_key(source).then_some(source)
    }

    /// Query names, every source before the queries reading it
    ///
    /// Ties keep document order.
    pub fn sort(&self) -> Result<Vec<&'a str>, PlanningError> {
        let mut pending: Vec<&'a str> = Vec::with_capacity(self.queries.len());
        let mut depends_on: HashMap<&'a str, &'a str> = HashMap::new();

        for (name, query) in self.queries {
            let source = query
                .get("source")
                .and_then(Value::as_str)
                .ok_or_else(|| PlanningError::MissingSource(name.clone()))?;
            if let Some((source, _)) = self.queries.get_key_value(source) {
                depends_on.insert(name.as_str(), source.as_str());
            }
            pending.push(name.as_str());
        }

        let mut sorted: Vec<&'a str> = Vec::with_capacity(pending.len());
        let mut done: BTreeSet<&'a str> = BTreeSet::new();
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|name| {
                let ready = depends_on
                    .get(name)
                    .map_or(true, |source| done.contains(source));
                if ready {
                    sorted.push(name);
                    done.insert(name);
                }
                !ready
            });
            if pending.len() == before {
                let mut cycle: Vec<String> = pending.iter().map(|name| name.to_string()).collect();
                cycle.sort();
                return Err(PlanningError::CyclicSource(cycle));
            }
        }
        Ok(sorted)
    }
}
