//! Projection engine: inclusion/exclusion reshaping, array slicing, element
//! matching, and the positional operator
//!
//! A projection runs in one of two modes, inferred from the spec: inclusion
//! (any value is exactly `1`, or a `$slice`/`$elemMatch` mapping) or
//! exclusion (everything else, including an empty spec, which degrades to a
//! copy). Records are never aliased between input and output.

use crate::expression::{Expression, Scope};
use crate::path::FieldPath;
use crate::query::{Condition, FieldClause, FieldOperator, Query};
use crate::value::Value;
use crate::QueryError;

/// A parsed projection spec.
#[derive(Debug, Clone)]
pub struct Projection {
    entries: Vec<(String, ProjectionValue)>,
    mode: ProjectionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProjectionMode {
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
enum ProjectionValue {
    /// Exactly `1`
    Include,
    /// Exactly `0`
    Exclude,
    /// `{ $slice: n }` — raw slice operand
    Slice(Value),
    /// `{ $elemMatch: { ... } }` — parsed sub-conditions
    ElemMatch(Vec<(FieldPath, Condition)>),
    /// Field reference string or expression mapping
    Computed(Expression),
    /// Anything else: no effect in either mode
    Ignored,
}

impl Projection {
    /// Parse a projection from JSON.
    pub fn from_json(spec: serde_json::Value) -> Result<Self, QueryError> {
        Self::parse(&Value::from(spec))
    }

    /// Parse a projection spec. Non-mapping specs behave as an empty spec.
    pub fn parse(spec: &Value) -> Result<Self, QueryError> {
        let mut entries = Vec::new();
        if let Some(map) = spec.as_object() {
            for (key, value) in map {
                entries.push((key.clone(), ProjectionValue::parse(value)?));
            }
        }
        let include = entries.iter().any(|(_, pv)| {
            matches!(
                pv,
                ProjectionValue::Include | ProjectionValue::Slice(_) | ProjectionValue::ElemMatch(_)
            )
        });
        Ok(Self {
            entries,
            mode: if include {
                ProjectionMode::Include
            } else {
                ProjectionMode::Exclude
            },
        })
    }

    /// Reshape one record.
    ///
    /// `query` is the originating query, consulted only by the positional
    /// (`field.$`) operator. The result never shares structure with the
    /// input.
    pub fn apply(&self, record: &Value, query: Option<&Query>) -> Result<Value, QueryError> {
        match self.mode {
            ProjectionMode::Include => self.apply_include(record, query),
            ProjectionMode::Exclude => self.apply_exclude(record),
        }
    }

    fn apply_include(&self, record: &Value, query: Option<&Query>) -> Result<Value, QueryError> {
        let mut result = Value::empty_object();

        for (key, pv) in &self.entries {
            if key == "_id" && matches!(pv, ProjectionValue::Exclude) {
                continue;
            }

            if let Some(array_field) = key.strip_suffix(".$") {
                self.project_positional(record, query, array_field, &mut result)?;
                continue;
            }

            let path = FieldPath::parse(key);
            match pv {
                ProjectionValue::Include => {
                    if let Some(value) = path.resolve(record) {
                        path.write(&mut result, value.clone());
                    }
                }
                ProjectionValue::ElemMatch(conditions) => {
                    if let Some(Value::Array(elements)) = path.resolve(record) {
                        for element in elements {
                            if element_matches(element, conditions)? {
                                path.write(&mut result, Value::Array(vec![element.clone()]));
                                break;
                            }
                        }
                    }
                }
                ProjectionValue::Slice(n) => {
                    if let Some(value) = path.resolve(record) {
                        path.write(&mut result, slice_value(value, n));
                    }
                }
                ProjectionValue::Computed(expr) => {
                    if let Some(value) = expr.evaluate(record, &Scope::default()) {
                        path.write(&mut result, value);
                    }
                }
                ProjectionValue::Exclude | ProjectionValue::Ignored => {}
            }
        }

        // `_id` rides along unless its spec value is exactly 0
        let id_excluded = self
            .entries
            .iter()
            .any(|(key, pv)| key == "_id" && matches!(pv, ProjectionValue::Exclude));
        if !id_excluded {
            if let Some(id) = record.as_object().and_then(|map| map.get("_id")) {
                if let Value::Object(out) = &mut result {
                    out.insert("_id".to_string(), id.clone());
                }
            }
        }

        Ok(result)
    }

    fn apply_exclude(&self, record: &Value) -> Result<Value, QueryError> {
        let mut result = match record {
            Value::Object(_) => record.clone(),
            _ => Value::empty_object(),
        };

        for (key, pv) in &self.entries {
            let path = FieldPath::parse(key);
            match pv {
                ProjectionValue::Exclude => path.remove(&mut result),
                ProjectionValue::Computed(expr) => {
                    if let Some(value) = expr.evaluate(record, &Scope::default()) {
                        path.write(&mut result, value);
                    }
                }
                _ => {}
            }
        }

        Ok(result)
    }

    fn project_positional(
        &self,
        record: &Value,
        query: Option<&Query>,
        array_field: &str,
        result: &mut Value,
    ) -> Result<(), QueryError> {
        let path = FieldPath::parse(array_field);
        let Some(Value::Array(elements)) = path.resolve(record) else {
            return Ok(());
        };
        let Some(query) = query else {
            return Ok(());
        };

        let mut conditions = Vec::new();
        collect_array_conditions(query, array_field, &mut conditions);
        if conditions.is_empty() {
            return Ok(());
        }

        for element in elements {
            if positional_matches(element, &conditions)? {
                path.write(result, Value::Array(vec![element.clone()]));
                return Ok(());
            }
        }
        Ok(())
    }
}

impl ProjectionValue {
    fn parse(value: &Value) -> Result<Self, QueryError> {
        match value {
            Value::Number(n) if *n == 1.0 => Ok(ProjectionValue::Include),
            Value::Number(n) if *n == 0.0 => Ok(ProjectionValue::Exclude),
            Value::String(s) if s.starts_with('$') => {
                Ok(ProjectionValue::Computed(Expression::parse(value)))
            }
            Value::Object(map) => {
                if let Some(condition) = map.get("$elemMatch") {
                    let conditions = match condition.as_object() {
                        Some(sub) => sub
                            .iter()
                            .map(|(path, cond)| {
                                Ok((FieldPath::parse(path), Condition::parse(cond)?))
                            })
                            .collect::<Result<Vec<_>, QueryError>>()?,
                        None => Vec::new(),
                    };
                    return Ok(ProjectionValue::ElemMatch(conditions));
                }
                if let Some(n) = map.get("$slice") {
                    return Ok(ProjectionValue::Slice(n.clone()));
                }
                Ok(ProjectionValue::Computed(Expression::parse(value)))
            }
            _ => Ok(ProjectionValue::Ignored),
        }
    }
}

/// Conditions the originating query places on elements of `array_field`,
/// collected recursively through `$and` only.
enum ArrayCondition<'q> {
    /// From `{ array_field: { $elemMatch: {...} } }`
    Elem(&'q [(FieldPath, Condition)]),
    /// From `{ "array_field.sub": cond }`
    Subfield {
        path: FieldPath,
        condition: &'q Condition,
    },
}

fn collect_array_conditions<'q>(
    query: &'q Query,
    array_field: &str,
    acc: &mut Vec<ArrayCondition<'q>>,
) {
    match query {
        Query::And(subs) => {
            for sub in subs {
                collect_array_conditions(sub, array_field, acc);
            }
        }
        Query::Fields(clauses) => {
            for FieldClause { path, condition } in clauses {
                if path.raw() == array_field {
                    if let Condition::Operators(ops) = condition {
                        for op in ops {
                            if let FieldOperator::ElemMatch(conditions) = op {
                                acc.push(ArrayCondition::Elem(conditions));
                            }
                        }
                    }
                }
                if let Some(sub) = path
                    .raw()
                    .strip_prefix(array_field)
                    .and_then(|rest| rest.strip_prefix('.'))
                {
                    acc.push(ArrayCondition::Subfield {
                        path: FieldPath::parse(sub),
                        condition,
                    });
                }
            }
        }
        _ => {}
    }
}

fn positional_matches(
    element: &Value,
    conditions: &[ArrayCondition<'_>],
) -> Result<bool, QueryError> {
    for condition in conditions {
        match condition {
            ArrayCondition::Elem(sub_conditions) => {
                if !element_matches(element, sub_conditions)? {
                    return Ok(false);
                }
            }
            ArrayCondition::Subfield { path, condition } => {
                if !condition.accepts(path.resolve(element))? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn element_matches(
    element: &Value,
    conditions: &[(FieldPath, Condition)],
) -> Result<bool, QueryError> {
    if conditions.is_empty() {
        return Ok(false);
    }
    for (path, condition) in conditions {
        if !condition.accepts(path.resolve(element))? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `$slice` semantics: first `n` (n > 0), last `|n|` (n < 0), empty for 0 or
/// a non-numeric operand; non-array values pass through unchanged.
fn slice_value(value: &Value, n: &Value) -> Value {
    let Value::Array(items) = value else {
        return value.clone();
    };
    let Some(n) = n.as_f64() else {
        return Value::Array(Vec::new());
    };
    let n = n.trunc() as i64;
    if n == 0 {
        return Value::Array(Vec::new());
    }
    let sliced: Vec<Value> = if n > 0 {
        items.iter().take(n as usize).cloned().collect()
    } else {
        let skip = items.len().saturating_sub((-n) as usize);
        items.iter().skip(skip).cloned().collect()
    };
    Value::Array(sliced)
}

/// Project every record of a collection independently.
///
/// A missing projection copies each record; output never aliases input.
pub fn project_collection(
    docs: &[Value],
    projection: Option<&Projection>,
    query: Option<&Query>,
) -> Result<Vec<Value>, QueryError> {
    match projection {
        None => Ok(docs.to_vec()),
        Some(projection) => docs
            .iter()
            .map(|doc| projection.apply(doc, query))
            .collect(),
    }
}
