//! Planning of the multi-query `search` command
//!
//! Each query with an `output` gets an element-wise reducer (`count` summed,
//! `records` merge-sorted) and a gather mapping that cuts the final
//! offset/limit window once, after every worker's candidates are merged.
//! Workers always receive offset 0 and a limit wide enough to cover that
//! window.

use super::{
    DistributedCommandPlanner, Message, Plan, QuerySorter, StepOptions, ERRORS_OUTPUT, SUCCESS_OUTPUT,
};
use crate::reducer::{
    ElementMapper, GatherSpec, RecordFormat, RecordsMapper, ReduceSpec, ReducerSpec, SortOperator,
    UNLIMITED,
};
use crate::routing::Router;
use crate::{PlanningError, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const COUNT: &str = "count";
const RECORDS: &str = "records";
const KEY_ATTRIBUTE: &str = "_key";

/// Offsets and limits of one query, split between workers and gather
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingPlan {
    /// Offset applied once at gather time
    pub final_offset: i64,
    /// Limit applied once at gather time
    pub final_limit: i64,
    /// `sortBy.limit` sent to workers
    pub worker_sort_limit: i64,
    /// `output.limit` sent to workers, also the records reducer limit
    pub worker_output_limit: i64,
}

/// Split sort and output paging between workers and the gather step
///
/// Any negative limit means unlimited; negative offsets count as 0.
pub fn plan_paging(
    sort_offset: i64,
    sort_limit: i64,
    output_offset: i64,
    output_limit: i64,
) -> PagingPlan {
    let sort_limit = normalize_limit(sort_limit);
    let output_limit = normalize_limit(output_limit);
    let final_offset = sort_offset.max(0) + output_offset.max(0);
    let final_limit = match (sort_limit, output_limit) {
        (UNLIMITED, UNLIMITED) => UNLIMITED,
        (UNLIMITED, output) => output,
        (sort, UNLIMITED) => sort,
        (sort, output) => sort.min(output),
    };

    let worker_sort_limit = match (sort_limit, output_limit) {
        (UNLIMITED, UNLIMITED) => UNLIMITED,
        (sort, output) => final_offset + sort.max(output),
    };
    let worker_output_limit = match final_limit {
        UNLIMITED => UNLIMITED,
        0 => 0,
        limit => final_offset + limit,
    };

    PagingPlan {
        final_offset,
        final_limit,
        worker_sort_limit,
        worker_output_limit,
    }
}

fn normalize_limit(limit: i64) -> i64 {
    if limit < 0 {
        UNLIMITED
    } else {
        limit
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribute {
    label: String,
    source: String,
}

/// Rewrites one query for workers and derives its reduce and gather specs
#[derive(Debug, Clone)]
pub struct QueryTransformer {
    name: String,
    query: Map<String, Value>,
    unifiable: bool,
    paging: PagingPlan,
    reducers: BTreeMap<String, ReducerSpec>,
    gather: GatherSpec,
}

impl QueryTransformer {
    pub fn transform(name: &str, query: &Map<String, Value>) -> std::result::Result<Self, PlanningError> {
        let mut query = query.clone();
        let mut output = match query.remove("output") {
            Some(Value::Object(output)) => output,
            Some(other) => {
                return Err(invalid(name, format!("output must be an object, got {}", kind(&other))))
            }
            None => Map::new(),
        };

        let unifiable = output.get("unifiable").and_then(Value::as_bool).unwrap_or(false);
        let mut elements = string_list(name, "output.elements", output.get("elements"))?;
        let count_requested = elements.iter().any(|element| element == COUNT);
        let records_requested = elements.iter().any(|element| element == RECORDS);
        let count_from_records = unifiable && count_requested;

        let format = match output.get("format").and_then(Value::as_str) {
            Some("complex") => RecordFormat::Complex,
            _ => RecordFormat::Simple,
        };
        output.insert("format".to_string(), Value::from("simple"));

        // Sort keys and paging
        let (sort_keys, sort_offset, sort_limit, rich_sort) = match query.get("sortBy") {
            None => (Vec::new(), 0, UNLIMITED, false),
            Some(Value::Array(_)) => (
                string_list(name, "sortBy", query.get("sortBy"))?,
                0,
                UNLIMITED,
                false,
            ),
            Some(Value::Object(sort_by)) => (
                string_list(name, "sortBy.keys", sort_by.get("keys"))?,
                integer(name, "sortBy.offset", sort_by.get("offset"), 0)?,
                integer(name, "sortBy.limit", sort_by.get("limit"), UNLIMITED)?,
                true,
            ),
            Some(other) => {
                return Err(invalid(
                    name,
                    format!("sortBy must be an array or an object, got {}", kind(other)),
                ))
            }
        };
        let output_offset = integer(name, "output.offset", output.get("offset"), 0)?;
        let output_limit = integer(name, "output.limit", output.get("limit"), 0)?;
        let paging = plan_paging(sort_offset, sort_limit, output_offset, output_limit);

        let (worker_sort_limit, worker_output_limit) = if count_from_records {
            (UNLIMITED, UNLIMITED)
        } else {
            (paging.worker_sort_limit, paging.worker_output_limit)
        };
        if rich_sort {
            if let Some(Value::Object(sort_by)) = query.get_mut("sortBy") {
                sort_by.insert("offset".to_string(), Value::from(0));
                sort_by.insert("limit".to_string(), Value::from(worker_sort_limit));
            }
        }
        output.insert("offset".to_string(), Value::from(0));
        output.insert("limit".to_string(), Value::from(worker_output_limit));

        // Attributes: client-visible labels first, sort keys appended after
        let mut attributes = parse_attributes(name, output.get("attributes"))?;
        if count_from_records && !records_requested && attributes.is_empty() {
            attributes.push(Attribute::named(KEY_ATTRIBUTE));
            output.insert("attributes".to_string(), Value::from(vec![KEY_ATTRIBUTE]));
        }
        let visible: Vec<String> = attributes.iter().map(|attribute| attribute.label.clone()).collect();

        let mut hidden: Vec<String> = sort_keys
            .iter()
            .map(|key| key.trim_start_matches('-').to_string())
            .collect();
        if unifiable {
            hidden.push(KEY_ATTRIBUTE.to_string());
        }
        let mut appended = Vec::new();
        for source in hidden {
            let present = attributes.iter().any(|attribute| attribute.source == source)
                || appended.contains(&source);
            if !present {
                appended.push(source);
            }
        }
        if !appended.is_empty() {
            append_attributes(&mut output, &appended);
            attributes.extend(appended.iter().map(|source| Attribute::named(source)));
        }

        if count_from_records && !records_requested {
            elements.push(RECORDS.to_string());
            output.insert(
                "elements".to_string(),
                Value::Array(elements.iter().cloned().map(Value::from).collect()),
            );
        }
        let has_records = elements.iter().any(|element| element == RECORDS);

        // Reducers
        let mut reducers = BTreeMap::new();
        if count_requested {
            reducers.insert(COUNT.to_string(), ReducerSpec::sum());
        }
        if has_records && worker_output_limit != 0 {
            let mut operators = Vec::with_capacity(sort_keys.len());
            for key in &sort_keys {
                let (source, descending) = match key.strip_prefix('-') {
                    Some(source) => (source, true),
                    None => (key.as_str(), false),
                };
                let column = column_of(&attributes, source)
                    .ok_or_else(|| invalid(name, format!("sort key \"{}\" has no column", source)))?;
                operators.push(if descending {
                    SortOperator::descending(column)
                } else {
                    SortOperator::ascending(column)
                });
            }
            let mut records = ReducerSpec::sort(operators).with_limit(worker_output_limit);
            if unifiable {
                if let Some(key_column) = column_of(&attributes, KEY_ATTRIBUTE) {
                    records = records.with_key_column(key_column);
                }
            }
            reducers.insert(RECORDS.to_string(), records);
        }

        // Gather
        let mut gather = GatherSpec::new(name);
        if count_from_records {
            gather = gather.with_element(
                COUNT,
                ElementMapper::Count {
                    target: RECORDS.to_string(),
                },
            );
        }
        if has_records {
            gather = gather.with_element(
                RECORDS,
                ElementMapper::Records(RecordsMapper {
                    offset: paging.final_offset,
                    limit: paging.final_limit,
                    format,
                    attributes: Some(visible),
                    no_output: !records_requested,
                }),
            );
        }

        query.insert("output".to_string(), Value::Object(output));
        Ok(Self {
            name: name.to_string(),
            query,
            unifiable,
            paging,
            reducers,
            gather,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The query as sent to workers
    pub fn query(&self) -> &Map<String, Value> {
        &self.query
    }

    pub fn is_unifiable(&self) -> bool {
        self.unifiable
    }

    pub fn paging(&self) -> PagingPlan {
        self.paging
    }

    pub fn reducers(&self) -> &BTreeMap<String, ReducerSpec> {
        &self.reducers
    }

    pub fn gather(&self) -> &GatherSpec {
        &self.gather
    }

    pub fn into_parts(self) -> (Map<String, Value>, ReduceSpec, GatherSpec) {
        (self.query, ReduceSpec::Elements(self.reducers), self.gather)
    }
}

impl Attribute {
    fn named(name: &str) -> Self {
        Self {
            label: name.to_string(),
            source: name.to_string(),
        }
    }
}

fn column_of(attributes: &[Attribute], source: &str) -> Option<usize> {
    attributes
        .iter()
        .position(|attribute| attribute.source == source)
        .or_else(|| attributes.iter().position(|attribute| attribute.label == source))
}

fn parse_attributes(query: &str, value: Option<&Value>) -> std::result::Result<Vec<Attribute>, PlanningError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => Ok(Attribute::named(name)),
                Value::Object(object) => {
                    let source = object
                        .get("source")
                        .and_then(Value::as_str)
                        .ok_or_else(|| invalid(query, "attribute object needs a source".to_string()))?;
                    let label = object.get("label").and_then(Value::as_str).unwrap_or(source);
                    Ok(Attribute {
                        label: label.to_string(),
                        source: source.to_string(),
                    })
                }
                other => Err(invalid(query, format!("attribute must be a string or an object, got {}", kind(other)))),
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(label, source)| {
                let source = match source {
                    Value::String(source) => source.as_str(),
                    Value::Object(object) => object
                        .get("source")
                        .and_then(Value::as_str)
                        .ok_or_else(|| invalid(query, format!("attribute \"{}\" needs a source", label)))?,
                    other => {
                        return Err(invalid(
                            query,
                            format!("attribute \"{}\" must name a source, got {}", label, kind(other)),
                        ))
                    }
                };
                Ok(Attribute {
                    label: label.clone(),
                    source: source.to_string(),
                })
            })
            .collect(),
        Some(other) => Err(invalid(
            query,
            format!("output.attributes must be an array or an object, got {}", kind(other)),
        )),
    }
}

fn append_attributes(output: &mut Map<String, Value>, sources: &[String]) {
    match output.get_mut("attributes") {
        Some(Value::Object(map)) => {
            for source in sources {
                map.insert(source.clone(), Value::from(source.as_str()));
            }
        }
        Some(Value::Array(items)) => {
            items.extend(sources.iter().map(|source| Value::from(source.as_str())));
        }
        _ => {
            output.insert(
                "attributes".to_string(),
                Value::Array(sources.iter().map(|source| Value::from(source.as_str())).collect()),
            );
        }
    }
}

fn string_list(query: &str, field: &str, value: Option<&Value>) -> std::result::Result<Vec<String>, PlanningError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(query, format!("{} must contain strings, got {}", field, kind(item))))
            })
            .collect(),
        Some(other) => Err(invalid(query, format!("{} must be an array, got {}", field, kind(other)))),
    }
}

fn integer(query: &str, field: &str, value: Option<&Value>, default: i64) -> std::result::Result<i64, PlanningError> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| invalid(query, format!("{} must be an integer, got {}", field, kind(value)))),
    }
}

fn invalid(query: &str, message: String) -> PlanningError {
    PlanningError::InvalidRequest(format!("query \"{}\": {}", query, message))
}

fn kind(value: &Value) -> &'static str {
    crate::reducer::type_name(value)
}

/// Plans a `search` command over a [`Router`]
pub struct DistributedSearchPlanner<'a> {
    router: &'a Router,
    message: Message,
}

impl<'a> DistributedSearchPlanner<'a> {
    pub fn new(router: &'a Router, message: Message) -> Self {
        Self { router, message }
    }

    pub fn plan(self) -> Result<Plan> {
        let mut body = match self.message.body.clone() {
            Value::Object(body) => body,
            _ => return Err(PlanningError::NoQuery.into()),
        };
        let queries = match body.remove("queries") {
            Some(Value::Object(queries)) if !queries.is_empty() => queries,
            _ => return Err(PlanningError::NoQuery.into()),
        };
        if let Some(reserved) = [ERRORS_OUTPUT, SUCCESS_OUTPUT]
            .into_iter()
            .find(|name| queries.contains_key(*name))
        {
            return Err(invalid(reserved, "name is reserved for the command outcome".to_string()).into());
        }
        let order: Vec<String> = QuerySorter::new(&queries)
            .sort()?
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut planner = DistributedCommandPlanner::new(self.router, self.message);
        let mut unifiable: HashMap<String, bool> = HashMap::new();
        let mut transformed = Map::new();

        for name in &order {
            let Some(Value::Object(query)) = queries.get(name) else {
                return Err(invalid(name, "query must be an object".to_string()).into());
            };
            let mut query = query.clone();
            let source_unifiable = query
                .get("source")
                .and_then(Value::as_str)
                .and_then(|source| unifiable.get(source).copied())
                .unwrap_or(false);
            let is_unifiable = query.contains_key("groupBy") || source_unifiable;
            unifiable.insert(name.clone(), is_unifiable);

            let wants_output = match query.get_mut("output") {
                Some(Value::Object(output)) => {
                    if is_unifiable {
                        output.insert("unifiable".to_string(), Value::Bool(true));
                    }
                    true
                }
                _ => false,
            };
            if !wants_output {
                transformed.insert(name.clone(), Value::Object(query));
                continue;
            }

            let transformer = QueryTransformer::transform(name, &query)?;
            debug!(
                query = %name,
                unifiable = is_unifiable,
                final_offset = transformer.paging().final_offset,
                final_limit = transformer.paging().final_limit,
                "Transformed search query"
            );
            let (query, reduce, gather) = transformer.into_parts();
            planner.reduce_with_gather(name.clone(), reduce, gather);
            transformed.insert(name.clone(), Value::Object(query));
        }

        // Keep the client's query order in the worker body
        let mut worker_queries = Map::new();
        for name in queries.keys() {
            if let Some(query) = transformed.remove(name) {
                worker_queries.insert(name.clone(), query);
            }
        }
        body.insert("queries".to_string(), Value::Object(worker_queries));
        planner.set_body(Value::Object(body));
        planner.broadcast(StepOptions::default());
        planner.plan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::SortDirection;
    use serde_json::json;

    fn transform(query: Value) -> QueryTransformer {
        QueryTransformer::transform("q", query.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_paging_algebra() {
        let paging = plan_paging(1, 2, 4, 8);
        assert_eq!(paging.final_offset, 5);
        assert_eq!(paging.final_limit, 2);
        assert_eq!(paging.worker_sort_limit, 13);
        assert_eq!(paging.worker_output_limit, 7);
    }

    #[test]
    fn test_paging_with_unlimited_bounds() {
        let both = plan_paging(0, UNLIMITED, 0, UNLIMITED);
        assert_eq!((both.final_limit, both.worker_sort_limit, both.worker_output_limit), (-1, -1, -1));

        let output_only = plan_paging(0, UNLIMITED, 3, 10);
        assert_eq!(output_only.final_limit, 10);
        assert_eq!(output_only.worker_sort_limit, 13);
        assert_eq!(output_only.worker_output_limit, 13);

        let sort_only = plan_paging(2, 5, 0, UNLIMITED);
        assert_eq!(sort_only.final_limit, 5);
        assert_eq!(sort_only.worker_output_limit, 7);
    }

    #[test]
    fn test_zero_limit_asks_workers_for_nothing() {
        assert_eq!(plan_paging(0, UNLIMITED, 5, 0).worker_output_limit, 0);
    }

    #[test]
    fn test_negative_limits_are_unlimited() {
        assert_eq!(plan_paging(2, UNLIMITED, 3, -5), plan_paging(2, UNLIMITED, 3, UNLIMITED));
        assert_eq!(plan_paging(2, -7, 3, 4), plan_paging(2, UNLIMITED, 3, 4));

        let transformer = transform(json!({
            "source": "Users",
            "sortBy": {"keys": ["age"], "offset": 2},
            "output": {"elements": ["records"], "attributes": ["age"], "limit": -5}
        }));
        let query = transformer.query();
        assert_eq!(query["sortBy"]["limit"], UNLIMITED);
        assert_eq!(query["output"]["limit"], UNLIMITED);
        assert_eq!(transformer.reducers()["records"].limit, Some(UNLIMITED));
    }

    #[test]
    fn test_rich_sort_rewrites_worker_window() {
        let transformer = transform(json!({
            "source": "Users",
            "sortBy": {"keys": ["-age"], "offset": 1, "limit": 2},
            "output": {
                "elements": ["count", "records"],
                "attributes": ["_key"],
                "offset": 4,
                "limit": 8
            }
        }));
        let query = transformer.query();
        assert_eq!(query["sortBy"]["offset"], 0);
        assert_eq!(query["sortBy"]["limit"], 13);
        assert_eq!(query["output"]["offset"], 0);
        assert_eq!(query["output"]["limit"], 7);
        assert_eq!(query["output"]["attributes"], json!(["_key", "age"]));

        let records = &transformer.reducers()["records"];
        assert_eq!(records.kind, "sort");
        assert_eq!(records.limit, Some(7));
        assert_eq!(records.operators[0].column, 1);
        assert_eq!(records.operators[0].operator, SortDirection::Descending);
        assert_eq!(records.key_column, None);
        assert_eq!(transformer.reducers()["count"].kind, "sum");

        let ElementMapper::Records(mapper) = &transformer.gather().elements["records"] else {
            panic!("expected a records mapper");
        };
        assert_eq!((mapper.offset, mapper.limit), (5, 2));
        assert_eq!(mapper.attributes, Some(vec!["_key".to_string()]));
    }

    #[test]
    fn test_complex_format_is_restored_at_gather() {
        let transformer = transform(json!({
            "source": "Users",
            "output": {"elements": ["records"], "format": "complex", "attributes": ["name"], "limit": 5}
        }));
        assert_eq!(transformer.query()["output"]["format"], "simple");
        let ElementMapper::Records(mapper) = &transformer.gather().elements["records"] else {
            panic!("expected a records mapper");
        };
        assert_eq!(mapper.format, RecordFormat::Complex);
    }

    #[test]
    fn test_unifiable_count_forces_full_records() {
        let transformer = transform(json!({
            "source": "Users",
            "groupBy": "age",
            "output": {"elements": ["count"], "unifiable": true, "limit": 10}
        }));
        let output = &transformer.query()["output"];
        assert_eq!(output["limit"], -1);
        assert_eq!(output["elements"], json!(["count", "records"]));
        assert_eq!(output["attributes"], json!(["_key"]));

        let records = &transformer.reducers()["records"];
        assert_eq!(records.limit, Some(-1));
        assert_eq!(records.key_column, Some(0));

        assert_eq!(
            transformer.gather().elements["count"],
            ElementMapper::Count {
                target: "records".to_string()
            }
        );
        let ElementMapper::Records(mapper) = &transformer.gather().elements["records"] else {
            panic!("expected a records mapper");
        };
        assert!(mapper.no_output);
    }

    #[test]
    fn test_attribute_forms() {
        let objects = transform(json!({
            "source": "Users",
            "sortBy": ["score"],
            "output": {
                "elements": ["records"],
                "attributes": [{"label": "id", "source": "_key"}, "score"],
                "limit": 3
            }
        }));
        assert_eq!(objects.reducers()["records"].operators[0].column, 1);

        let map = transform(json!({
            "source": "Users",
            "sortBy": ["_key"],
            "output": {"elements": ["records"], "attributes": {"id": "_key"}, "limit": 3}
        }));
        assert_eq!(map.reducers()["records"].operators[0].column, 0);
        let ElementMapper::Records(mapper) = &map.gather().elements["records"] else {
            panic!("expected a records mapper");
        };
        assert_eq!(mapper.attributes, Some(vec!["id".to_string()]));
    }

    #[test]
    fn test_malformed_sort_by_is_rejected() {
        let err = QueryTransformer::transform(
            "q",
            json!({"source": "Users", "sortBy": 3, "output": {}}).as_object().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, PlanningError::InvalidRequest(_)));
    }
}
