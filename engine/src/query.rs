//! Query evaluation: predicates, sort factories, and result shaping.
//!
//! Records are selected by a predicate object such as `{"order": {"$lt": 15}}`.
//! The matcher, the sorter, and the publication predicate are all pluggable;
//! this module supplies the defaults and the `$sort`/`$skip`/`$limit`/`$select`
//! clause handling shared by the local and in-memory query surfaces.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// Call parameters carried alongside every service method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// The query predicate, including reserved `$`-clauses
    #[serde(default)]
    pub query: Map<String, Value>,
}

impl Params {
    /// Build params from a JSON query object. Non-objects yield empty params.
    pub fn with_query(query: Value) -> Self {
        match query {
            Value::Object(map) => Self { query: map },
            _ => Self::default(),
        }
    }
}

/// Predicate over one record and a criteria object.
pub type Matcher = Arc<dyn Fn(&Record, &Map<String, Value>) -> bool + Send + Sync>;

/// Comparator over two records.
pub type Sorter = Arc<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;

/// Predicate selecting which records belong to this client's view.
pub type Publication = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// The default matcher, evaluating [`matches`].
pub fn default_matcher() -> Matcher {
    Arc::new(|record, criteria| matches(record, criteria))
}

/// Build a publication predicate from a query object.
pub fn publication_from_query(query: Value) -> Publication {
    let criteria = match query {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Arc::new(move |record| matches(record, &criteria))
}

/// Evaluate a criteria object against one record.
///
/// Top-level fields are matched by equality, or by an operator object with
/// `$lt`, `$lte`, `$gt`, `$gte`, `$ne`, `$in`, `$nin`. Reserved `$`-clauses
/// at the top level are skipped.
pub fn matches(record: &Record, criteria: &Map<String, Value>) -> bool {
    criteria
        .iter()
        .filter(|(field, _)| !field.starts_with('$'))
        .all(|(field, condition)| matches_condition(record.get(field), condition))
}

fn matches_condition(actual: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => ops
            .iter()
            .all(|(op, operand)| apply_operator(actual, op, operand)),
        expected => actual == Some(expected),
    }
}

fn apply_operator(actual: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$ne" => actual != Some(operand),
        "$in" => operand
            .as_array()
            .is_some_and(|set| actual.is_some_and(|a| set.contains(a))),
        "$nin" => !operand
            .as_array()
            .is_some_and(|set| actual.is_some_and(|a| set.contains(a))),
        "$lt" => actual.is_some_and(|a| cmp_values(a, operand) == Ordering::Less),
        "$lte" => actual.is_some_and(|a| cmp_values(a, operand) != Ordering::Greater),
        "$gt" => actual.is_some_and(|a| cmp_values(a, operand) == Ordering::Greater),
        "$gte" => actual.is_some_and(|a| cmp_values(a, operand) != Ordering::Less),
        _ => false,
    }
}

/// Total order over JSON values.
///
/// Values of different types order by type rank (null, bool, number, string,
/// array, object); numbers compare by value, strings lexicographically.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Comparator over one field, ascending. Missing fields sort first.
pub fn sort(field: impl Into<String>) -> Sorter {
    multi_sort(&[(field.into(), 1)])
}

/// Comparator over ordered `(field, direction)` pairs; direction is `1` for
/// ascending, `-1` for descending. Stable on ties.
pub fn multi_sort<S: AsRef<str>>(pairs: &[(S, i32)]) -> Sorter {
    let pairs: Vec<(String, i32)> = pairs
        .iter()
        .map(|(field, dir)| (field.as_ref().to_string(), *dir))
        .collect();

    Arc::new(move |a, b| {
        for (field, dir) in &pairs {
            let left = a.get(field).unwrap_or(&Value::Null);
            let right = b.get(field).unwrap_or(&Value::Null);
            let ordering = cmp_values(left, right);
            if ordering != Ordering::Equal {
                return if *dir < 0 { ordering.reverse() } else { ordering };
            }
        }
        Ordering::Equal
    })
}

/// Build a sorter from a `$sort` specification object.
pub fn sorter_from_spec(spec: &Map<String, Value>) -> Sorter {
    let pairs: Vec<(String, i32)> = spec
        .iter()
        .map(|(field, dir)| (field.clone(), dir.as_i64().unwrap_or(1) as i32))
        .collect();
    multi_sort(&pairs)
}

/// The reserved clauses split out of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clauses {
    pub sort: Option<Map<String, Value>>,
    pub skip: usize,
    pub limit: Option<usize>,
    pub select: Option<Vec<String>>,
}

/// Split a query into plain criteria and its reserved `$`-clauses.
pub fn split_query(query: &Map<String, Value>) -> (Map<String, Value>, Clauses) {
    let mut criteria = Map::new();
    let mut clauses = Clauses::default();

    for (field, value) in query.iter() {
        match field.as_str() {
            "$sort" => clauses.sort = value.as_object().cloned(),
            "$skip" => clauses.skip = value.as_u64().unwrap_or(0) as usize,
            "$limit" => clauses.limit = value.as_u64().map(|n| n as usize),
            "$select" => {
                clauses.select = value.as_array().map(|fields| {
                    fields
                        .iter()
                        .filter_map(|f| f.as_str().map(str::to_string))
                        .collect()
                })
            }
            _ if field.starts_with('$') => {}
            _ => {
                criteria.insert(field.clone(), value.clone());
            }
        }
    }

    (criteria, clauses)
}

/// Project a record onto the selected fields.
///
/// `id`, `_id`, and `uuid` are always retained.
pub fn project(record: &Record, select: &[String]) -> Record {
    let mut out = Map::new();
    for (field, value) in record.as_map().iter() {
        let always = matches!(field.as_str(), "id" | "_id" | "uuid");
        if always || select.iter().any(|s| s == field) {
            out.insert(field.clone(), value.clone());
        }
    }
    Record::from(out)
}

/// Pagination defaults for a find surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginate {
    /// Page size when the query carries no `$limit`
    pub default: usize,
    /// Upper bound on any requested `$limit`
    pub max: usize,
}

/// Paginated result envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub total: usize,
    pub limit: usize,
    pub skip: usize,
    pub data: Vec<Record>,
}

/// Result of a `find`: a bare record list, or a page when pagination is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FindResult {
    Page(Page),
    Records(Vec<Record>),
}

impl FindResult {
    /// The records, discarding any envelope.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            FindResult::Page(page) => page.data,
            FindResult::Records(records) => records,
        }
    }

    /// Number of records carried in this result.
    pub fn len(&self) -> usize {
        match self {
            FindResult::Page(page) => page.data.len(),
            FindResult::Records(records) => records.len(),
        }
    }

    /// Whether this result carries no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run a full local find: match, sort, page, and project.
pub fn run_find(
    records: Vec<Record>,
    query: &Map<String, Value>,
    matcher: &Matcher,
    paginate: Option<Paginate>,
) -> FindResult {
    let (criteria, clauses) = split_query(query);

    let mut matched: Vec<Record> = records
        .into_iter()
        .filter(|record| matcher(record, &criteria))
        .collect();
    let total = matched.len();

    if let Some(spec) = &clauses.sort {
        let sorter = sorter_from_spec(spec);
        matched.sort_by(|a, b| sorter(a, b));
    }

    let limit = match paginate {
        Some(p) => Some(clauses.limit.unwrap_or(p.default).min(p.max)),
        None => clauses.limit,
    };

    let mut data: Vec<Record> = matched
        .into_iter()
        .skip(clauses.skip)
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    if let Some(select) = &clauses.select {
        data = data.iter().map(|record| project(record, select)).collect();
    }

    match (paginate, limit) {
        (Some(_), Some(limit)) => FindResult::Page(Page {
            total,
            limit,
            skip: clauses.skip,
            data,
        }),
        _ => FindResult::Records(data),
    }
}
