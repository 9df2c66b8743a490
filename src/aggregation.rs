//! Aggregation pipeline: $match, $unwind, $group, $sort, $project, $limit,
//! $skip, $count
//!
//! Stages are parsed once and folded left-to-right over a working set that
//! starts as a copy of the input collection. Unknown stage keys and
//! malformed stage specs are no-ops (deliberate permissiveness); query
//! contract violations inside `$match`/`$project` specs are errors and
//! propagate.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::expression::{leading_integer, Expression, Scope};
use crate::path::FieldPath;
use crate::projection::Projection;
use crate::query::Query;
use crate::value::{coerce_number, is_truthy, key_string, loose_compare, Value};
use crate::QueryError;

/// A parsed aggregation pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// One pipeline stage.
#[derive(Debug, Clone)]
pub enum Stage {
    /// `$match` — filter by query
    Match(Query),
    /// `$unwind` — one output record per array element
    Unwind(UnwindSpec),
    /// `$group` — fold into per-key accumulator records
    Group(GroupSpec),
    /// `$sort` — stable multi-key sort
    Sort(Vec<SortKey>),
    /// `$project` — reshape (no positional support at this stage)
    Project(Projection),
    /// `$limit` — truncate
    Limit(usize),
    /// `$skip` — drop a prefix
    Skip(usize),
    /// `$count` — single record with the count under the given field
    Count(String),
    /// Unknown or malformed stage: working set passes through unchanged
    Noop,
}

/// `$unwind` stage spec.
#[derive(Debug, Clone)]
pub struct UnwindSpec {
    path: FieldPath,
    preserve_null: bool,
}

/// One `$sort` key with its direction.
#[derive(Debug, Clone)]
pub struct SortKey {
    path: FieldPath,
    descending: bool,
}

/// `$group` stage spec.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    id: Expression,
    fields: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
struct Accumulator {
    op: AccumulatorOp,
    operand: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    Push,
    First,
    Last,
    /// Unknown accumulator operators stay `null` for every group
    Unrecognized,
}

/// Running state per group and output field.
///
/// `None` inside `Min`/`Max`/`First` is the unset sentinel: it keeps being
/// replaced until a defined value arrives.
#[derive(Debug, Clone)]
enum AccumulatorState {
    Sum(f64),
    Avg { sum: f64, count: usize },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Option<Value>),
    Push(Vec<Value>),
    Null,
}

impl Pipeline {
    /// Parse a pipeline from JSON stage mappings.
    pub fn from_json(stages: Vec<serde_json::Value>) -> Result<Self, QueryError> {
        let stages: Vec<Value> = stages.into_iter().map(Value::from).collect();
        Self::parse(&stages)
    }

    /// Parse a pipeline. Stage order is preserved exactly.
    pub fn parse(specs: &[Value]) -> Result<Self, QueryError> {
        let stages = specs
            .iter()
            .map(Self::parse_stage)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { stages })
    }

    fn parse_stage(spec: &Value) -> Result<Stage, QueryError> {
        let Some((key, operand)) = spec.as_object().and_then(|map| map.iter().next()) else {
            return Ok(Stage::Noop);
        };

        let stage = match key.as_str() {
            "$match" => match operand {
                // a non-mapping $match spec filters nothing
                Value::Object(_) => Stage::Match(Query::parse(operand)?),
                _ => Stage::Noop,
            },
            "$unwind" => match UnwindSpec::parse(operand) {
                Some(spec) => Stage::Unwind(spec),
                None => Stage::Noop,
            },
            "$group" => match GroupSpec::parse(operand) {
                Some(spec) => Stage::Group(spec),
                None => Stage::Noop,
            },
            "$sort" => match parse_sort_keys(operand) {
                Some(keys) => Stage::Sort(keys),
                None => Stage::Noop,
            },
            "$project" => Stage::Project(Projection::parse(operand)?),
            "$limit" => Stage::Limit(clamped_count(operand)),
            "$skip" => Stage::Skip(clamped_count(operand)),
            "$count" => match operand {
                Value::String(field) if !field.is_empty() => Stage::Count(field.clone()),
                _ => Stage::Noop,
            },
            other => {
                debug!(stage = other, "skipping unrecognized pipeline stage");
                Stage::Noop
            }
        };
        Ok(stage)
    }

    /// Run the pipeline over a collection.
    ///
    /// The input is never mutated; the working set starts as a copy and each
    /// stage is a pure transformation of it.
    pub fn execute(&self, docs: &[Value]) -> Result<Vec<Value>, QueryError> {
        let mut working: Vec<Value> = docs.to_vec();
        for stage in &self.stages {
            working = stage.execute(working)?;
        }
        Ok(working)
    }
}

impl Stage {
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>, QueryError> {
        match self {
            Stage::Match(query) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if query.matches(&doc)? {
                        kept.push(doc);
                    }
                }
                Ok(kept)
            }
            Stage::Unwind(spec) => Ok(spec.execute(docs)),
            Stage::Group(spec) => Ok(spec.execute(&docs)),
            Stage::Sort(keys) => {
                let mut docs = docs;
                sort_documents(&mut docs, keys);
                Ok(docs)
            }
            Stage::Project(projection) => docs
                .iter()
                .map(|doc| projection.apply(doc, None))
                .collect(),
            Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
            Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            Stage::Count(field) => {
                let mut record = BTreeMap::new();
                record.insert(field.clone(), Value::Number(docs.len() as f64));
                Ok(vec![Value::Object(record)])
            }
            Stage::Noop => Ok(docs),
        }
    }
}

impl UnwindSpec {
    fn parse(spec: &Value) -> Option<Self> {
        let (raw_path, preserve_null) = match spec {
            Value::String(path) => (path.as_str(), false),
            Value::Object(map) => {
                let path = map
                    .get("path")
                    .or_else(|| map.get("$path"))
                    .or_else(|| map.get("field"))
                    .and_then(Value::as_str)?;
                let preserve = is_truthy(map.get("preserveNullAndEmptyArrays"));
                (path, preserve)
            }
            _ => return None,
        };
        if raw_path.is_empty() {
            return None;
        }
        let path = raw_path.strip_prefix('$').unwrap_or(raw_path);
        Some(Self {
            path: FieldPath::parse(path),
            preserve_null,
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        let mut out = Vec::new();
        for doc in docs {
            match self.path.resolve(&doc) {
                Some(Value::Array(elements)) => {
                    // an empty array yields no copies, preserve flag or not
                    let elements = elements.clone();
                    for element in elements {
                        let mut copy = doc.clone();
                        self.path.write(&mut copy, element);
                        out.push(copy);
                    }
                }
                _ => {
                    if self.preserve_null {
                        let mut copy = doc.clone();
                        self.path.write(&mut copy, Value::Null);
                        out.push(copy);
                    }
                }
            }
        }
        out
    }
}

impl GroupSpec {
    fn parse(spec: &Value) -> Option<Self> {
        let map = spec.as_object()?;
        let id = map
            .get("_id")
            .map(Expression::parse)
            .unwrap_or(Expression::Undefined);

        let mut fields = Vec::new();
        for (name, accumulator) in map {
            if name == "_id" {
                continue;
            }
            fields.push((name.clone(), Accumulator::parse(accumulator)));
        }
        Some(Self { id, fields })
    }

    fn execute(&self, docs: &[Value]) -> Vec<Value> {
        let scope = Scope::default();
        // first-seen key order is the output order
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (Option<Value>, Vec<AccumulatorState>)> = HashMap::new();

        for doc in docs {
            let id = self.id.evaluate(doc, &scope);
            let key = key_string(id.as_ref());
            let (_, states) = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                let states = self
                    .fields
                    .iter()
                    .map(|(_, acc)| acc.initial_state())
                    .collect();
                (id, states)
            });

            for ((_, accumulator), state) in self.fields.iter().zip(states.iter_mut()) {
                let value = accumulator.operand.evaluate(doc, &scope);
                state.fold(value);
            }
        }

        order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .map(|(id, states)| {
                let mut record = BTreeMap::new();
                if let Some(id) = id {
                    record.insert("_id".to_string(), id);
                }
                for ((name, _), state) in self.fields.iter().zip(states) {
                    if let Some(finalized) = state.finalize() {
                        record.insert(name.clone(), finalized);
                    }
                }
                Value::Object(record)
            })
            .collect()
    }
}

impl Accumulator {
    fn parse(spec: &Value) -> Self {
        let op = spec
            .as_object()
            .and_then(|map| map.iter().next())
            .map(|(key, _)| match key.as_str() {
                "$sum" => AccumulatorOp::Sum,
                "$avg" => AccumulatorOp::Avg,
                "$min" => AccumulatorOp::Min,
                "$max" => AccumulatorOp::Max,
                "$push" => AccumulatorOp::Push,
                "$first" => AccumulatorOp::First,
                "$last" => AccumulatorOp::Last,
                _ => AccumulatorOp::Unrecognized,
            })
            .unwrap_or(AccumulatorOp::Unrecognized);
        let operand = spec
            .as_object()
            .and_then(|map| map.values().next())
            .map(Expression::parse)
            .unwrap_or(Expression::Undefined);
        Self { op, operand }
    }

    fn initial_state(&self) -> AccumulatorState {
        match self.op {
            AccumulatorOp::Sum => AccumulatorState::Sum(0.0),
            AccumulatorOp::Avg => AccumulatorState::Avg { sum: 0.0, count: 0 },
            AccumulatorOp::Min => AccumulatorState::Min(None),
            AccumulatorOp::Max => AccumulatorState::Max(None),
            AccumulatorOp::First => AccumulatorState::First(None),
            AccumulatorOp::Last => AccumulatorState::Last(None),
            AccumulatorOp::Push => AccumulatorState::Push(Vec::new()),
            AccumulatorOp::Unrecognized => AccumulatorState::Null,
        }
    }
}

impl AccumulatorState {
    fn fold(&mut self, value: Option<Value>) {
        match self {
            AccumulatorState::Sum(total) => {
                *total += coerce_number(value.as_ref()).unwrap_or(0.0);
            }
            AccumulatorState::Avg { sum, count } => {
                if let Some(n) = coerce_number(value.as_ref()) {
                    *sum += n;
                    *count += 1;
                }
            }
            AccumulatorState::Min(held) => {
                if held.is_none()
                    || (value.is_some()
                        && loose_compare(value.as_ref(), held.as_ref())
                            == Some(Ordering::Less))
                {
                    *held = value;
                }
            }
            AccumulatorState::Max(held) => {
                if held.is_none()
                    || (value.is_some()
                        && loose_compare(value.as_ref(), held.as_ref())
                            == Some(Ordering::Greater))
                {
                    *held = value;
                }
            }
            AccumulatorState::First(held) => {
                if held.is_none() {
                    *held = value;
                }
            }
            AccumulatorState::Last(last) => *last = value,
            AccumulatorState::Push(items) => items.push(value.unwrap_or(Value::Null)),
            AccumulatorState::Null => {}
        }
    }

    fn finalize(self) -> Option<Value> {
        match self {
            AccumulatorState::Sum(total) => Some(Value::Number(total)),
            AccumulatorState::Avg { count: 0, .. } => Some(Value::Null),
            AccumulatorState::Avg { sum, count } => Some(Value::Number(sum / count as f64)),
            AccumulatorState::Min(held)
            | AccumulatorState::Max(held)
            | AccumulatorState::First(held) => held,
            AccumulatorState::Last(last) => last,
            AccumulatorState::Push(items) => Some(Value::Array(items)),
            AccumulatorState::Null => Some(Value::Null),
        }
    }
}

/// Parse a `$sort`-style spec: a mapping from field path to direction, where
/// only `-1` is descending. `None` for non-mapping specs.
pub(crate) fn parse_sort_keys(spec: &Value) -> Option<Vec<SortKey>> {
    let map = spec.as_object()?;
    Some(
        map.iter()
            .map(|(field, dir)| SortKey {
                path: FieldPath::parse(field),
                descending: dir.as_f64() == Some(-1.0),
            })
            .collect(),
    )
}

/// Stable multi-key sort shared by the `$sort` stage and the cursor.
///
/// Missing and null values place with the same direction multiplier as
/// present values, so their position flips with the sort direction. This
/// asymmetry (relative to conventional "nulls last") is intentional and
/// pinned by tests.
pub(crate) fn sort_documents(docs: &mut [Value], keys: &[SortKey]) {
    docs.sort_by(|a, b| {
        for key in keys {
            let va = key.path.resolve(a);
            let vb = key.path.resolve(b);
            let a_nullish = matches!(va, None | Some(Value::Null));
            let b_nullish = matches!(vb, None | Some(Value::Null));

            let ordering = if a_nullish && b_nullish {
                continue;
            } else if a_nullish {
                Ordering::Less
            } else if b_nullish {
                Ordering::Greater
            } else {
                match loose_compare(va, vb) {
                    Some(Ordering::Less) => Ordering::Less,
                    Some(Ordering::Greater) => Ordering::Greater,
                    _ => continue,
                }
            };

            return if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
        }
        Ordering::Equal
    });
}

fn clamped_count(spec: &Value) -> usize {
    let n = match spec {
        Value::Number(n) => n.trunc() as i64,
        Value::String(s) => leading_integer(s).unwrap_or(0),
        _ => 0,
    };
    n.max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    fn run(docs: serde_json::Value, pipeline: Vec<serde_json::Value>) -> Vec<Value> {
        let docs: Vec<Value> = docs
            .as_array()
            .unwrap()
            .iter()
            .map(|d| Value::from(d.clone()))
            .collect();
        Pipeline::from_json(pipeline).unwrap().execute(&docs).unwrap()
    }

    fn cities() -> serde_json::Value {
        json!([
            { "city": "NY", "age": 28 },
            { "city": "NY", "age": 34 },
            { "city": "LA", "age": 20 }
        ])
    }

    #[test]
    fn test_group_count_per_city_first_seen_order() {
        let out = run(
            cities(),
            vec![json!({ "$group": { "_id": "$city", "count": { "$sum": 1 } } })],
        );
        assert_eq!(
            out,
            vec![
                v(json!({ "_id": "NY", "count": 2.0 })),
                v(json!({ "_id": "LA", "count": 1.0 })),
            ]
        );
    }

    #[test]
    fn test_match_then_group() {
        let out = run(
            cities(),
            vec![
                json!({ "$match": { "age": { "$gte": 25 } } }),
                json!({ "$group": { "_id": "$city", "avgAge": { "$avg": "$age" } } }),
            ],
        );
        assert_eq!(out, vec![v(json!({ "_id": "NY", "avgAge": 31.0 }))]);
    }

    #[test]
    fn test_unwind_drops_empty_arrays() {
        let out = run(
            json!([
                { "id": 1, "tags": ["a", "b"] },
                { "id": 2, "tags": [] }
            ]),
            vec![json!({ "$unwind": "$tags" })],
        );
        assert_eq!(
            out,
            vec![
                v(json!({ "id": 1, "tags": "a" })),
                v(json!({ "id": 1, "tags": "b" })),
            ]
        );
    }

    #[test]
    fn test_unwind_preserve_null() {
        let out = run(
            json!([
                { "id": 1, "tags": ["a"] },
                { "id": 2 },
                { "id": 3, "tags": [] }
            ]),
            vec![json!({ "$unwind": { "path": "$tags", "preserveNullAndEmptyArrays": true } })],
        );
        // missing field is preserved as null; an empty array still drops
        assert_eq!(
            out,
            vec![
                v(json!({ "id": 1, "tags": "a" })),
                v(json!({ "id": 2, "tags": null })),
            ]
        );
    }

    #[test]
    fn test_unwind_nested_path_creates_intermediates() {
        let out = run(
            json!([{ "a": { "b": [1, 2] } }]),
            vec![json!({ "$unwind": "$a.b" })],
        );
        assert_eq!(
            out,
            vec![v(json!({ "a": { "b": 1 } })), v(json!({ "a": { "b": 2 } }))]
        );
    }

    #[test]
    fn test_group_id_null_single_group() {
        let out = run(
            cities(),
            vec![json!({ "$group": { "_id": null, "total": { "$sum": "$age" } } })],
        );
        assert_eq!(out, vec![v(json!({ "_id": null, "total": 82.0 }))]);
    }

    #[test]
    fn test_group_over_empty_input_is_empty() {
        let out = run(
            json!([]),
            vec![json!({ "$group": { "_id": null, "count": { "$sum": 1 } } })],
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_avg_of_absent_field_is_null() {
        let out = run(
            json!([{ "a": 1 }, { "a": 2 }]),
            vec![json!({ "$group": { "_id": null, "avg": { "$avg": "$missing" } } })],
        );
        assert_eq!(out, vec![v(json!({ "_id": null, "avg": null }))]);
    }

    #[test]
    fn test_min_max_first_last_push() {
        let out = run(
            cities(),
            vec![json!({ "$group": {
                "_id": null,
                "lo": { "$min": "$age" },
                "hi": { "$max": "$age" },
                "first": { "$first": "$city" },
                "last": { "$last": "$city" },
                "all": { "$push": "$age" }
            } })],
        );
        assert_eq!(
            out,
            vec![v(json!({
                "_id": null,
                "lo": 20, "hi": 34,
                "first": "NY", "last": "LA",
                "all": [28, 34, 20]
            }))]
        );
    }

    #[test]
    fn test_unrecognized_accumulator_is_null() {
        let out = run(
            json!([{ "a": 1 }]),
            vec![json!({ "$group": { "_id": null, "x": { "$stdDevPop": "$a" } } })],
        );
        assert_eq!(out, vec![v(json!({ "_id": null, "x": null }))]);
    }

    #[test]
    fn test_compound_literal_group_id_collapses() {
        // a bare mapping `_id` goes through the expression evaluator, which
        // yields false for unrecognized mappings: all docs share one group
        let out = run(
            cities(),
            vec![json!({ "$group": { "_id": { "c": "$city" }, "n": { "$sum": 1 } } })],
        );
        assert_eq!(out, vec![v(json!({ "_id": false, "n": 3.0 }))]);
    }

    #[test]
    fn test_sort_stable_and_directional() {
        let out = run(
            cities(),
            vec![json!({ "$sort": { "age": -1 } })],
        );
        let ages: Vec<Option<f64>> = out
            .iter()
            .map(|d| FieldPath::parse("age").resolve(d).and_then(Value::as_f64))
            .collect();
        assert_eq!(ages, vec![Some(34.0), Some(28.0), Some(20.0)]);
    }

    #[test]
    fn test_sort_null_placement_flips_with_direction() {
        let docs = json!([{ "a": 1 }, { "b": 1 }, { "a": 2 }]);
        let asc = run(docs.clone(), vec![json!({ "$sort": { "a": 1 } })]);
        // ascending: the missing value sorts first
        assert_eq!(asc[0], v(json!({ "b": 1 })));
        let desc = run(docs, vec![json!({ "$sort": { "a": -1 } })]);
        // descending: the same multiplier flips it to last
        assert_eq!(desc[2], v(json!({ "b": 1 })));
        assert_eq!(desc[0], v(json!({ "a": 2 })));
    }

    #[test]
    fn test_limit_and_skip_clamped() {
        let out = run(cities(), vec![json!({ "$limit": 2 })]);
        assert_eq!(out.len(), 2);
        let out = run(cities(), vec![json!({ "$limit": -5 })]);
        assert!(out.is_empty());
        let out = run(cities(), vec![json!({ "$limit": "oops" })]);
        assert!(out.is_empty());
        let out = run(cities(), vec![json!({ "$skip": 1 })]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_count_stage() {
        let out = run(cities(), vec![
            json!({ "$match": { "city": "NY" } }),
            json!({ "$count": "total" }),
        ]);
        assert_eq!(out, vec![v(json!({ "total": 2.0 }))]);
    }

    #[test]
    fn test_unknown_stage_is_noop() {
        let out = run(cities(), vec![json!({ "$facet": { "x": 1 } })]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_project_stage_computed() {
        let out = run(
            json!([{ "price": 10, "qty": 3 }]),
            vec![json!({ "$project": {
                "total": { "$multiply": ["$price", "$qty"] },
                "price": 1
            } })],
        );
        assert_eq!(out, vec![v(json!({ "price": 10, "total": 30.0 }))]);
    }

    #[test]
    fn test_empty_pipeline_copies_input() {
        let out = run(cities(), vec![]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_match_contract_error_propagates() {
        let err = Pipeline::from_json(vec![json!({ "$match": { "$and": 5 } })]);
        assert!(matches!(err, Err(QueryError::InvalidQuery(_))));
    }
}
