//! MongoDB-style query parsing and matching
//!
//! Queries are parsed once into a closed [`Query`] tree. Shape contract
//! violations (malformed combinators, conditions with no recognized
//! operator, invalid `$regex` patterns) are rejected at parse time; the
//! `$regex`-on-non-string violation is data-driven and surfaces at match
//! time. Everything else is error-safe: an odd operand shape makes the
//! operator not match, it never fails the call.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use crate::expression::{Expression, Scope};
use crate::path::FieldPath;
use crate::value::{is_truthy, key_string, kind_of, Value};
use crate::QueryError;

/// A parsed query.
///
/// Combinators take priority over field checks and are considered at most
/// once, in this order: `$and`, `$or`, `$not`, `$nor`, `$expr`. A query with
/// a combinator ignores its remaining keys; otherwise every key is a field
/// clause and all clauses must match.
#[derive(Debug, Clone)]
pub enum Query {
    /// `$and` — every sub-query matches
    And(Vec<Query>),
    /// `$or` — any sub-query matches
    Or(Vec<Query>),
    /// `$not` — nested query does not match
    Not(Box<Query>),
    /// `$nor` — no sub-query matches
    Nor(Vec<Query>),
    /// `$expr` — expression evaluated against the record, coerced to boolean
    Expr(Expression),
    /// Field clauses, combined with logical AND (empty matches everything)
    Fields(Vec<FieldClause>),
    /// A non-mapping sub-query: matches nothing
    Never,
}

/// One field-path condition of a query.
#[derive(Debug, Clone)]
pub struct FieldClause {
    /// Field path the condition applies to
    pub path: FieldPath,
    /// Condition on the resolved value
    pub condition: Condition,
}

/// Condition applied to a resolved field value.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Plain literal: strict equality
    Equals(Value),
    /// Operator mapping: every operator must accept the value
    Operators(Vec<FieldOperator>),
}

/// A single recognized field-level operator.
#[derive(Debug, Clone)]
pub enum FieldOperator {
    /// `$eq` — strict equality
    Eq(Value),
    /// `$ne` — strict inequality
    Ne(Value),
    /// `$in` — containment (any-overlap for array values)
    In(Value),
    /// `$nin` — non-containment (none-overlap for array values)
    Nin(Value),
    /// `$exists` — presence compared to the operand
    Exists(Value),
    /// `$size` — array of exactly this length
    Size(Value),
    /// `$all` — array containing every operand element
    All(Value),
    /// `$elemMatch` — some array element satisfies all sub-conditions
    ElemMatch(Vec<(FieldPath, Condition)>),
    /// `$type` — classifier tag (or any-of tags)
    Type(Value),
    /// `$mod [divisor, remainder]`
    Mod(Value),
    /// `$lt` — strict type-matched less-than
    Lt(Value),
    /// `$lte`
    Lte(Value),
    /// `$gt`
    Gt(Value),
    /// `$gte`
    Gte(Value),
    /// `$regex` (with optional `$options` flags), compiled at parse time
    Regex(Regex),
}

impl Query {
    /// A query that matches every record.
    pub fn match_all() -> Self {
        Query::Fields(Vec::new())
    }

    /// Parse a query from JSON.
    pub fn from_json(spec: serde_json::Value) -> Result<Self, QueryError> {
        Self::parse(&Value::from(spec))
    }

    /// Parse a query spec.
    ///
    /// A non-mapping spec parses to a query matching nothing (sub-query
    /// position); the facade treats a non-mapping *top-level* query as
    /// match-all before it gets here.
    pub fn parse(spec: &Value) -> Result<Self, QueryError> {
        let Some(map) = spec.as_object() else {
            return Ok(Query::Never);
        };

        // combinator shape contracts, checked regardless of which one runs
        for key in ["$and", "$or", "$nor"] {
            if let Some(v) = map.get(key) {
                if v.as_array().is_none() {
                    return Err(QueryError::InvalidQuery(format!(
                        "{key} should be an array"
                    )));
                }
            }
        }
        if let Some(v) = map.get("$not") {
            if v.as_object().is_none() {
                return Err(QueryError::InvalidQuery(
                    "$not should be an object".to_string(),
                ));
            }
        }

        if let Some(subs) = map.get("$and").and_then(Value::as_array) {
            return Ok(Query::And(Self::parse_all(subs)?));
        }
        if let Some(subs) = map.get("$or").and_then(Value::as_array) {
            return Ok(Query::Or(Self::parse_all(subs)?));
        }
        if let Some(sub) = map.get("$not") {
            return Ok(Query::Not(Box::new(Self::parse(sub)?)));
        }
        if let Some(subs) = map.get("$nor").and_then(Value::as_array) {
            return Ok(Query::Nor(Self::parse_all(subs)?));
        }
        if let Some(expr) = map.get("$expr") {
            return Ok(Query::Expr(Expression::parse(expr)));
        }

        let mut clauses = Vec::with_capacity(map.len());
        for (key, condition) in map {
            clauses.push(FieldClause {
                path: FieldPath::parse(key),
                condition: Condition::parse(condition)?,
            });
        }
        Ok(Query::Fields(clauses))
    }

    fn parse_all(specs: &[Value]) -> Result<Vec<Query>, QueryError> {
        specs.iter().map(Self::parse).collect()
    }

    /// Check whether a record matches.
    ///
    /// Fallible only for the `$regex`-on-non-string contract violation; the
    /// record itself is never mutated.
    pub fn matches(&self, record: &Value) -> Result<bool, QueryError> {
        match self {
            Query::And(subs) => {
                for sub in subs {
                    if !sub.matches(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Query::Or(subs) => {
                for sub in subs {
                    if sub.matches(record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Query::Not(sub) => Ok(!sub.matches(record)?),
            Query::Nor(subs) => {
                for sub in subs {
                    if sub.matches(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Query::Expr(expr) => Ok(is_truthy(
                expr.evaluate(record, &Scope::default()).as_ref(),
            )),
            Query::Fields(clauses) => {
                for clause in clauses {
                    let value = clause.path.resolve(record);
                    // `$regex` demands a string value, even when smuggled in
                    // as a top-level field path
                    let regex_shaped = clause.path.raw() == "$regex"
                        || matches!(&clause.condition, Condition::Operators(ops)
                            if ops.iter().any(|op| matches!(op, FieldOperator::Regex(_))));
                    if regex_shaped && !matches!(value, Some(Value::String(_))) {
                        return Err(QueryError::RegexTypeMismatch(clause.path.raw().to_string()));
                    }
                    if !clause.condition.accepts(value)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Query::Never => Ok(false),
        }
    }

    /// The `$eq`-style lookup value when this query is a single-field
    /// equality check, eligible for index acceleration.
    fn single_equality(&self) -> Option<(&FieldPath, &Value)> {
        let Query::Fields(clauses) = self else {
            return None;
        };
        let [clause] = clauses.as_slice() else {
            return None;
        };
        match &clause.condition {
            Condition::Equals(v) => Some((&clause.path, v)),
            Condition::Operators(ops) => ops.iter().find_map(|op| match op {
                FieldOperator::Eq(v) => Some((&clause.path, v)),
                _ => None,
            }),
        }
    }
}

impl Condition {
    /// Parse a field condition.
    ///
    /// A non-mapping condition is a strict-equality literal. A mapping must
    /// contain at least one recognized operator key (unrecognized keys
    /// alongside recognized ones are ignored); zero recognized operators is a
    /// contract violation.
    pub fn parse(spec: &Value) -> Result<Self, QueryError> {
        let Some(map) = spec.as_object() else {
            return Ok(Condition::Equals(spec.clone()));
        };

        let mut operators = Vec::new();
        for (key, operand) in map {
            match key.as_str() {
                "$eq" => operators.push(FieldOperator::Eq(operand.clone())),
                "$ne" => operators.push(FieldOperator::Ne(operand.clone())),
                "$in" => operators.push(FieldOperator::In(operand.clone())),
                "$nin" => operators.push(FieldOperator::Nin(operand.clone())),
                "$exists" => operators.push(FieldOperator::Exists(operand.clone())),
                "$size" => operators.push(FieldOperator::Size(operand.clone())),
                "$all" => operators.push(FieldOperator::All(operand.clone())),
                "$elemMatch" => {
                    let conditions = match operand.as_object() {
                        Some(sub) => sub
                            .iter()
                            .map(|(path, cond)| {
                                Ok((FieldPath::parse(path), Condition::parse(cond)?))
                            })
                            .collect::<Result<Vec<_>, QueryError>>()?,
                        // non-mapping operand never matches anything
                        None => Vec::new(),
                    };
                    operators.push(FieldOperator::ElemMatch(conditions));
                }
                "$type" => operators.push(FieldOperator::Type(operand.clone())),
                "$mod" => operators.push(FieldOperator::Mod(operand.clone())),
                "$lt" => operators.push(FieldOperator::Lt(operand.clone())),
                "$lte" => operators.push(FieldOperator::Lte(operand.clone())),
                "$gt" => operators.push(FieldOperator::Gt(operand.clone())),
                "$gte" => operators.push(FieldOperator::Gte(operand.clone())),
                "$regex" => {
                    let pattern = match operand {
                        Value::String(s) => s.clone(),
                        other => crate::value::to_display_string(other),
                    };
                    let options = map.get("$options").and_then(Value::as_str).unwrap_or("");
                    operators.push(FieldOperator::Regex(compile_regex(&pattern, options)?));
                }
                _ => {} // ignored alongside recognized operators
            }
        }

        if operators.is_empty() {
            return Err(QueryError::InvalidQuery(format!(
                "no recognized operators in condition: {:?}",
                spec
            )));
        }
        Ok(Condition::Operators(operators))
    }

    /// Whether a resolved field value satisfies this condition.
    pub fn accepts(&self, value: Option<&Value>) -> Result<bool, QueryError> {
        match self {
            Condition::Equals(expected) => Ok(value == Some(expected)),
            Condition::Operators(ops) => {
                for op in ops {
                    if !op.accepts(value)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

impl FieldOperator {
    fn accepts(&self, value: Option<&Value>) -> Result<bool, QueryError> {
        match self {
            FieldOperator::Eq(expected) => Ok(value == Some(expected)),
            FieldOperator::Ne(expected) => Ok(value != Some(expected)),
            FieldOperator::In(list) => Ok(in_list(value, list)),
            FieldOperator::Nin(list) => {
                // non-array operand is error-safe false, not "not in"
                match list.as_array() {
                    Some(_) => Ok(!in_list(value, list)),
                    None => Ok(false),
                }
            }
            FieldOperator::Exists(expected) => {
                Ok(Value::Bool(value.is_some()) == *expected)
            }
            FieldOperator::Size(expected) => Ok(match value {
                Some(Value::Array(items)) => {
                    Value::Number(items.len() as f64) == *expected
                }
                _ => false,
            }),
            FieldOperator::All(items) => Ok(match (value, items.as_array()) {
                (Some(Value::Array(values)), Some(wanted)) => {
                    wanted.iter().all(|item| values.contains(item))
                }
                _ => false,
            }),
            FieldOperator::ElemMatch(conditions) => {
                if conditions.is_empty() {
                    return Ok(false);
                }
                let Some(Value::Array(elements)) = value else {
                    return Ok(false);
                };
                for element in elements {
                    if !matches!(element, Value::Object(_)) {
                        continue;
                    }
                    let mut all = true;
                    for (path, condition) in conditions {
                        if !condition.accepts(path.resolve(element))? {
                            all = false;
                            break;
                        }
                    }
                    if all {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            FieldOperator::Type(expected) => {
                let kind = kind_of(value);
                Ok(match expected {
                    Value::Array(names) => names
                        .iter()
                        .any(|n| n.as_str() == Some(kind.as_str())),
                    Value::String(name) => name == kind.as_str(),
                    _ => false,
                })
            }
            FieldOperator::Mod(operand) => Ok(mod_matches(value, operand)),
            FieldOperator::Lt(bound) => Ok(typed_ordering(value, bound)
                .is_some_and(|o| o == Ordering::Less)),
            FieldOperator::Lte(bound) => Ok(typed_ordering(value, bound)
                .is_some_and(|o| o != Ordering::Greater)),
            FieldOperator::Gt(bound) => Ok(typed_ordering(value, bound)
                .is_some_and(|o| o == Ordering::Greater)),
            FieldOperator::Gte(bound) => Ok(typed_ordering(value, bound)
                .is_some_and(|o| o != Ordering::Less)),
            FieldOperator::Regex(regex) => match value {
                Some(Value::String(s)) => Ok(regex.is_match(s)),
                // unreachable through Query::matches, which pre-checks; kept
                // for direct Condition use
                other => Err(QueryError::RegexTypeMismatch(format!(
                    "{}",
                    kind_of(other)
                ))),
            },
        }
    }
}

fn in_list(value: Option<&Value>, list: &Value) -> bool {
    let Some(items) = list.as_array() else {
        return false;
    };
    match value {
        Some(Value::Array(values)) => values.iter().any(|v| items.contains(v)),
        Some(v) => items.contains(v),
        None => false,
    }
}

fn mod_matches(value: Option<&Value>, operand: &Value) -> bool {
    let Some(Value::Number(n)) = value else {
        return false;
    };
    let Some(args) = operand.as_array() else {
        return false;
    };
    if args.len() < 2 {
        return false;
    }
    let (Some(divisor), Some(remainder)) = (args[0].as_f64(), args[1].as_f64()) else {
        return false;
    };
    n % divisor == remainder
}

/// Strict type-matched ordering: dates compare by timestamp, every other
/// pair must share a classifier tag (no cross-type coercion). Nulls compare
/// equal to nulls; arrays and objects never order.
fn typed_ordering(value: Option<&Value>, bound: &Value) -> Option<Ordering> {
    let value = value?;
    if let (Value::Date(a), Value::Date(b)) = (value, bound) {
        return Some(a.cmp(b));
    }
    if kind_of(Some(value)) != kind_of(Some(bound)) {
        return None;
    }
    match (value, bound) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn compile_regex(pattern: &str, options: &str) -> Result<Regex, QueryError> {
    let flags: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();
    let full = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    };
    Regex::new(&full).map_err(|e| QueryError::InvalidRegex(format!("{}: {}", pattern, e)))
}

/// Per-field equality lookup structure for accelerating single-field
/// equality queries.
///
/// Maps a field name to a map from value key (its stable string form) to the
/// positions of candidate records. Candidates are always re-verified against
/// the full query.
#[derive(Debug, Clone, Default)]
pub struct EqualityIndex {
    fields: HashMap<String, HashMap<String, Vec<usize>>>,
}

impl EqualityIndex {
    /// Build an index over `docs` for the given field paths.
    pub fn build(docs: &[Value], fields: &[&str]) -> Self {
        let mut index = Self::default();
        for field in fields {
            let path = FieldPath::parse(field);
            let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
            for (position, doc) in docs.iter().enumerate() {
                if let Some(value) = path.resolve(doc) {
                    buckets
                        .entry(key_string(Some(value)))
                        .or_default()
                        .push(position);
                }
            }
            index.fields.insert(field.to_string(), buckets);
        }
        index
    }

    fn candidates(&self, field: &str, value: &Value) -> Option<&[usize]> {
        self.fields
            .get(field)
            .map(|buckets| {
                buckets
                    .get(&key_string(Some(value)))
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
            })
    }
}

/// Filter a collection by a query, preserving input order.
///
/// When an [`EqualityIndex`] is supplied and the query is a single-field
/// equality check on an indexed field, the candidate set is looked up
/// directly and re-verified; every other query shape full-scans.
pub fn apply_query(
    docs: &[Value],
    query: &Query,
    indexes: Option<&EqualityIndex>,
) -> Result<Vec<Value>, QueryError> {
    if let (Some(indexes), Some((path, value))) =
        (indexes, query.single_equality())
    {
        if let Some(candidates) = indexes.candidates(path.raw(), value) {
            debug!(field = path.raw(), "using equality index for query");
            let mut results = Vec::with_capacity(candidates.len());
            for &position in candidates {
                let doc = &docs[position];
                if query.matches(doc)? {
                    results.push(doc.clone());
                }
            }
            return Ok(results);
        }
    }

    let mut results = Vec::new();
    for doc in docs {
        if query.matches(doc)? {
            results.push(doc.clone());
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    fn matches(query: serde_json::Value, record: serde_json::Value) -> bool {
        Query::from_json(query).unwrap().matches(&v(record)).unwrap()
    }

    #[test]
    fn test_literal_equality() {
        assert!(matches(json!({ "name": "Alice" }), json!({ "name": "Alice" })));
        assert!(!matches(json!({ "name": "Alice" }), json!({ "name": "Bob" })));
        assert!(!matches(json!({ "name": "Alice" }), json!({})));
        assert!(matches(json!({ "a.b": 1 }), json!({ "a": { "b": 1 } })));
    }

    #[test]
    fn test_operator_and_across_same_field() {
        let q = json!({ "age": { "$gte": 30, "$lte": 40 } });
        assert!(matches(q.clone(), json!({ "age": 35 })));
        assert!(!matches(q.clone(), json!({ "age": 45 })));
        assert!(!matches(q, json!({ "age": 20 })));
    }

    #[test]
    fn test_strict_type_matched_comparison() {
        // "5" is not greater than 3: no cross-type coercion
        assert!(!matches(json!({ "n": { "$gt": 3 } }), json!({ "n": "5" })));
        assert!(matches(json!({ "n": { "$gt": 3 } }), json!({ "n": 5 })));
        assert!(matches(json!({ "s": { "$lt": "b" } }), json!({ "s": "a" })));
    }

    #[test]
    fn test_in_nin() {
        assert!(matches(json!({ "x": { "$in": [1, 2] } }), json!({ "x": 2 })));
        assert!(!matches(json!({ "x": { "$in": [1, 2] } }), json!({ "x": 3 })));
        // array field: any-overlap
        assert!(matches(json!({ "tags": { "$in": ["a"] } }), json!({ "tags": ["a", "b"] })));
        assert!(matches(json!({ "tags": { "$nin": ["z"] } }), json!({ "tags": ["a", "b"] })));
        // non-array operand is error-safe false for both
        assert!(!matches(json!({ "x": { "$in": 5 } }), json!({ "x": 5 })));
        assert!(!matches(json!({ "x": { "$nin": 5 } }), json!({ "x": 6 })));
    }

    #[test]
    fn test_exists_size_all() {
        assert!(matches(json!({ "a": { "$exists": true } }), json!({ "a": null })));
        assert!(matches(json!({ "a": { "$exists": false } }), json!({ "b": 1 })));
        assert!(matches(json!({ "t": { "$size": 2 } }), json!({ "t": [1, 2] })));
        assert!(!matches(json!({ "t": { "$size": 2 } }), json!({ "t": "ab" })));
        assert!(matches(json!({ "t": { "$all": [1, 2] } }), json!({ "t": [2, 1, 3] })));
        assert!(!matches(json!({ "t": { "$all": [1, 4] } }), json!({ "t": [1, 2] })));
    }

    #[test]
    fn test_elem_match() {
        let q = json!({ "items": { "$elemMatch": { "qty": { "$gt": 10 }, "sku": "a" } } });
        assert!(matches(
            q.clone(),
            json!({ "items": [{ "sku": "a", "qty": 20 }, { "sku": "b", "qty": 5 }] })
        ));
        assert!(!matches(
            q,
            json!({ "items": [{ "sku": "a", "qty": 5 }, { "sku": "b", "qty": 20 }] })
        ));
        // empty operand mapping never matches
        assert!(!matches(json!({ "items": { "$elemMatch": {} } }), json!({ "items": [{}] })));
    }

    #[test]
    fn test_type_and_mod() {
        assert!(matches(json!({ "a": { "$type": "number" } }), json!({ "a": 1 })));
        assert!(matches(json!({ "a": { "$type": ["string", "null"] } }), json!({ "a": null })));
        assert!(!matches(json!({ "a": { "$type": "object" } }), json!({ "a": [1] })));
        assert!(matches(json!({ "age": { "$mod": [2, 0] } }), json!({ "age": 28 })));
        assert!(!matches(json!({ "age": { "$mod": [2, 0] } }), json!({ "age": 35 })));
        assert!(!matches(json!({ "age": { "$mod": ["2", 0] } }), json!({ "age": 28 })));
        assert!(!matches(json!({ "age": { "$mod": [2, 0] } }), json!({ "age": "28" })));
    }

    #[test]
    fn test_combinators() {
        let record = json!({ "a": 1, "b": 2 });
        assert!(matches(json!({ "$and": [{ "a": 1 }, { "b": 2 }] }), record.clone()));
        assert!(!matches(json!({ "$and": [{ "a": 1 }, { "b": 3 }] }), record.clone()));
        assert!(matches(json!({ "$or": [{ "a": 9 }, { "b": 2 }] }), record.clone()));
        assert!(matches(json!({ "$not": { "a": 9 } }), record.clone()));
        assert!(matches(json!({ "$nor": [{ "a": 9 }, { "b": 9 }] }), record.clone()));
        // nor is the negation of or
        assert!(!matches(json!({ "$nor": [{ "a": 1 }, { "b": 9 }] }), record));
    }

    #[test]
    fn test_expr() {
        assert!(matches(
            json!({ "$expr": { "$gt": ["$spent", "$budget"] } }),
            json!({ "spent": 120, "budget": 100 })
        ));
        assert!(!matches(
            json!({ "$expr": { "$gt": ["$spent", "$budget"] } }),
            json!({ "spent": 80, "budget": 100 })
        ));
    }

    #[test]
    fn test_contract_violations() {
        assert!(matches!(
            Query::from_json(json!({ "$and": 5 })),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            Query::from_json(json!({ "$or": { "a": 1 } })),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            Query::from_json(json!({ "$not": [1] })),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            Query::from_json(json!({ "a": { "$bogus": 1 } })),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            Query::from_json(json!({ "a": { "$regex": "[" } })),
            Err(QueryError::InvalidRegex(_))
        ));
    }

    #[test]
    fn test_regex() {
        assert!(matches(json!({ "name": { "$regex": "^Al" } }), json!({ "name": "Alice" })));
        assert!(matches(
            json!({ "name": { "$regex": "^al", "$options": "i" } }),
            json!({ "name": "Alice" })
        ));
        // non-string field value is a contract violation at match time
        let q = Query::from_json(json!({ "n": { "$regex": "1" } })).unwrap();
        assert!(matches!(
            q.matches(&v(json!({ "n": 1 }))),
            Err(QueryError::RegexTypeMismatch(_))
        ));
    }

    #[test]
    fn test_combinator_priority_ignores_other_keys() {
        // with $and present, sibling field keys are not consulted
        assert!(matches(
            json!({ "$and": [{ "a": 1 }], "zzz": "ignored" }),
            json!({ "a": 1 })
        ));
    }

    #[test]
    fn test_equality_index_acceleration() {
        let docs: Vec<Value> = vec![
            v(json!({ "city": "NY", "age": 28 })),
            v(json!({ "city": "NY", "age": 34 })),
            v(json!({ "city": "LA", "age": 20 })),
        ];
        let index = EqualityIndex::build(&docs, &["city"]);

        let q = Query::from_json(json!({ "city": "NY" })).unwrap();
        let indexed = apply_query(&docs, &q, Some(&index)).unwrap();
        let scanned = apply_query(&docs, &q, None).unwrap();
        assert_eq!(indexed, scanned);
        assert_eq!(indexed.len(), 2);

        // $eq with extra operators still uses the index, then re-verifies
        let q = Query::from_json(json!({ "city": { "$eq": "NY", "$ne": "LA" } })).unwrap();
        assert_eq!(apply_query(&docs, &q, Some(&index)).unwrap().len(), 2);

        // unindexed field falls back to the scan
        let q = Query::from_json(json!({ "age": 20 })).unwrap();
        assert_eq!(apply_query(&docs, &q, Some(&index)).unwrap().len(), 1);
    }
}
