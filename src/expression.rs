//! Expression evaluation engine
//!
//! Expressions are parsed once into a closed [`Expression`] tree and then
//! evaluated against a document plus a bound-variable scope. The evaluator
//! never fails: every malformed shape degrades to a documented default value
//! (`false`, `0`, `""`, `null`, undefined, or `[]`). Shapes that are
//! statically malformed (wrong arity, non-array operand lists) are folded to
//! their default at parse time.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{Datelike, Timelike};
use regex::Regex;

use crate::path::FieldPath;
use crate::value::{
    coerce_number, display_or_undefined, is_truthy, parse_date, to_display_string, Value,
};

/// Immutable bound-variable frame for `$filter`/`$map`/`$reduce` bodies.
///
/// Child frames are created by cloning and extending the parent; an unbound
/// name resolves to undefined.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    bindings: HashMap<String, Value>,
}

impl Scope {
    /// Look up a variable; `None` when unbound.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Extend with a binding. An undefined value leaves the name unbound.
    fn bind(&mut self, name: &str, value: Option<Value>) {
        if let Some(v) = value {
            self.bindings.insert(name.to_string(), v);
        } else {
            self.bindings.remove(name);
        }
    }
}

/// Date component extracted by the date operator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    /// `$year`
    Year,
    /// `$month` (1-based)
    Month,
    /// `$dayOfMonth`
    DayOfMonth,
    /// `$hour`
    Hour,
    /// `$minute`
    Minute,
    /// `$second`
    Second,
}

/// A parsed expression tree.
#[derive(Debug, Clone)]
pub enum Expression {
    /// Literal value
    Literal(Value),
    /// `$field.path` reference, resolved against the document
    FieldRef(FieldPath),
    /// `$$name` reference, resolved against the variable scope
    VarRef(String),
    /// Operand fan-out: each element evaluated independently
    Array(Vec<Expression>),
    /// `$and` — all operands truthy (empty ⇒ false)
    And(Vec<Expression>),
    /// `$or` — any operand truthy
    Or(Vec<Expression>),
    /// `$not` — negated truthiness
    Not(Box<Expression>),
    /// `$add` (string operands concatenate)
    Add(Box<Expression>, Box<Expression>),
    /// `$subtract`
    Subtract(Box<Expression>, Box<Expression>),
    /// `$multiply`
    Multiply(Box<Expression>, Box<Expression>),
    /// `$divide`
    Divide(Box<Expression>, Box<Expression>),
    /// `$lt`
    Lt(Box<Expression>, Box<Expression>),
    /// `$lte`
    Lte(Box<Expression>, Box<Expression>),
    /// `$gt`
    Gt(Box<Expression>, Box<Expression>),
    /// `$gte`
    Gte(Box<Expression>, Box<Expression>),
    /// `$eq` — strict structural equality
    Eq(Box<Expression>, Box<Expression>),
    /// `$ne`
    Ne(Box<Expression>, Box<Expression>),
    /// `$in` — membership in an array operand
    In(Box<Expression>, Box<Expression>),
    /// `$strLenCP` — code-point length
    StrLenCp(Box<Expression>),
    /// `$indexOfCP`
    IndexOfCp {
        /// String searched in
        source: Box<Expression>,
        /// Substring searched for
        substring: Box<Expression>,
        /// Optional starting code-point index
        start: Option<Box<Expression>>,
    },
    /// `$split`
    Split(Box<Expression>, Box<Expression>),
    /// `$concat` — string-joins the evaluated parts
    Concat(Vec<Expression>),
    /// `$toLower`
    ToLower(Box<Expression>),
    /// `$toUpper`
    ToUpper(Box<Expression>),
    /// `$substr`
    Substr(Box<Expression>, Box<Expression>, Box<Expression>),
    /// `$size` — array length, 0 otherwise
    Size(Box<Expression>),
    /// `$arrayElemAt` — negative index counts from the end
    ArrayElemAt(Box<Expression>, Box<Expression>),
    /// `$filter { input, as, cond }`
    Filter {
        /// Array expression
        input: Box<Expression>,
        /// Element binding name (default `this`)
        as_name: String,
        /// Per-element condition
        cond: Box<Expression>,
    },
    /// `$map { input, as, in }`
    Map {
        /// Array expression
        input: Box<Expression>,
        /// Element binding name (default `this`)
        as_name: String,
        /// Per-element body
        body: Box<Expression>,
    },
    /// `$reduce { input, initialValue, in }`
    Reduce {
        /// Array expression
        input: Box<Expression>,
        /// Initial accumulator value
        initial: Box<Expression>,
        /// Folding body; sees `$$value`, `$$this`, `$$index`
        body: Box<Expression>,
    },
    /// Date component extraction (UTC)
    DateExtract(DatePart, Box<Expression>),
    /// `$cond` (either form)
    Cond {
        /// Condition
        cond: Box<Expression>,
        /// Truthy branch
        then: Box<Expression>,
        /// Falsy branch
        otherwise: Box<Expression>,
    },
    /// `$ifNull [a, b]`
    IfNull(Box<Expression>, Box<Expression>),
    /// `$switch { branches, default }`
    Switch {
        /// `(case, then)` pairs, first truthy case wins
        branches: Vec<(Expression, Expression)>,
        /// Fallback (absent ⇒ null)
        default: Option<Box<Expression>>,
    },
    /// `$toString` (nullish ⇒ null)
    ToString(Box<Expression>),
    /// `$toInt` (failure ⇒ 0)
    ToInt(Box<Expression>),
    /// `$toDouble` (failure ⇒ 0.0)
    ToDouble(Box<Expression>),
    /// `$toDate` (invalid ⇒ null)
    ToDate(Box<Expression>),
    /// Mapping with zero keys ⇒ false
    Empty,
    /// Mapping with an unknown operator key ⇒ false
    Unrecognized,
    /// Statically undefined result
    Undefined,
}

impl Expression {
    /// Parse an expression spec.
    ///
    /// Strings prefixed `$$`/`$` become variable/field references; arrays fan
    /// out; mappings dispatch on their first key. Unknown operators and
    /// malformed operand shapes are not errors — they parse to the node that
    /// produces their degraded default.
    pub fn parse(spec: &Value) -> Expression {
        match spec {
            Value::String(s) => {
                if let Some(name) = s.strip_prefix("$$") {
                    Expression::VarRef(name.to_string())
                } else if let Some(path) = s.strip_prefix('$') {
                    Expression::FieldRef(FieldPath::parse(path))
                } else {
                    Expression::Literal(spec.clone())
                }
            }
            Value::Array(items) => Expression::Array(items.iter().map(Expression::parse).collect()),
            Value::Object(map) => {
                let Some((op, operand)) = map.iter().next() else {
                    return Expression::Empty;
                };
                Self::parse_operator(op, operand)
            }
            other => Expression::Literal(other.clone()),
        }
    }

    fn parse_operator(op: &str, operand: &Value) -> Expression {
        match op {
            "$and" => match operand.as_array() {
                Some(items) => Expression::And(items.iter().map(Expression::parse).collect()),
                None => Expression::Literal(Value::Bool(false)),
            },
            "$or" => match operand.as_array() {
                Some(items) => Expression::Or(items.iter().map(Expression::parse).collect()),
                None => Expression::Literal(Value::Bool(false)),
            },
            "$not" => Expression::Not(Box::new(Expression::parse(operand))),
            "$add" => Self::parse_binary(operand, Expression::Add),
            "$subtract" => Self::parse_binary(operand, Expression::Subtract),
            "$multiply" => Self::parse_binary(operand, Expression::Multiply),
            "$divide" => Self::parse_binary(operand, Expression::Divide),
            "$lt" => Self::parse_binary(operand, Expression::Lt),
            "$lte" => Self::parse_binary(operand, Expression::Lte),
            "$gt" => Self::parse_binary(operand, Expression::Gt),
            "$gte" => Self::parse_binary(operand, Expression::Gte),
            "$eq" => Self::parse_binary(operand, Expression::Eq),
            "$ne" => Self::parse_binary(operand, Expression::Ne),
            "$in" => Self::parse_binary(operand, Expression::In),
            "$strLenCP" => Expression::StrLenCp(Box::new(Expression::parse(operand))),
            "$indexOfCP" => match operand.as_array() {
                Some(args) if args.len() >= 2 => Expression::IndexOfCp {
                    source: Box::new(Expression::parse(&args[0])),
                    substring: Box::new(Expression::parse(&args[1])),
                    start: args.get(2).map(|a| Box::new(Expression::parse(a))),
                },
                _ => Expression::Literal(Value::Number(-1.0)),
            },
            "$split" => match operand.as_array() {
                Some(args) if args.len() >= 2 => Expression::Split(
                    Box::new(Expression::parse(&args[0])),
                    Box::new(Expression::parse(&args[1])),
                ),
                _ => Expression::Literal(Value::Array(Vec::new())),
            },
            "$concat" => match operand.as_array() {
                Some(parts) => Expression::Concat(parts.iter().map(Expression::parse).collect()),
                None => Expression::Literal(Value::String(String::new())),
            },
            "$toLower" => Expression::ToLower(Box::new(Expression::parse(operand))),
            "$toUpper" => Expression::ToUpper(Box::new(Expression::parse(operand))),
            "$substr" => match operand.as_array() {
                Some(args) if args.len() >= 3 => Expression::Substr(
                    Box::new(Expression::parse(&args[0])),
                    Box::new(Expression::parse(&args[1])),
                    Box::new(Expression::parse(&args[2])),
                ),
                _ => Expression::Literal(Value::String(String::new())),
            },
            "$size" => Expression::Size(Box::new(Expression::parse(operand))),
            "$arrayElemAt" => match operand.as_array() {
                Some(args) if args.len() >= 2 => Expression::ArrayElemAt(
                    Box::new(Expression::parse(&args[0])),
                    Box::new(Expression::parse(&args[1])),
                ),
                _ => Expression::Undefined,
            },
            "$filter" => match operand.as_object() {
                Some(spec) => Expression::Filter {
                    input: Box::new(Self::parse_field_or_undefined(spec.get("input"))),
                    as_name: Self::binding_name(spec.get("as")),
                    cond: Box::new(Self::parse_field_or_undefined(spec.get("cond"))),
                },
                None => Expression::Literal(Value::Array(Vec::new())),
            },
            "$map" => match operand.as_object() {
                Some(spec) => Expression::Map {
                    input: Box::new(Self::parse_field_or_undefined(spec.get("input"))),
                    as_name: Self::binding_name(spec.get("as")),
                    body: Box::new(Self::parse_field_or_undefined(spec.get("in"))),
                },
                None => Expression::Literal(Value::Array(Vec::new())),
            },
            "$reduce" => match operand.as_object() {
                Some(spec) => Expression::Reduce {
                    input: Box::new(Self::parse_field_or_undefined(spec.get("input"))),
                    initial: Box::new(Self::parse_field_or_undefined(spec.get("initialValue"))),
                    body: Box::new(Self::parse_field_or_undefined(spec.get("in"))),
                },
                None => Expression::Literal(Value::Null),
            },
            "$year" => Expression::DateExtract(DatePart::Year, Box::new(Expression::parse(operand))),
            "$month" => {
                Expression::DateExtract(DatePart::Month, Box::new(Expression::parse(operand)))
            }
            "$dayOfMonth" => {
                Expression::DateExtract(DatePart::DayOfMonth, Box::new(Expression::parse(operand)))
            }
            "$hour" => Expression::DateExtract(DatePart::Hour, Box::new(Expression::parse(operand))),
            "$minute" => {
                Expression::DateExtract(DatePart::Minute, Box::new(Expression::parse(operand)))
            }
            "$second" => {
                Expression::DateExtract(DatePart::Second, Box::new(Expression::parse(operand)))
            }
            "$cond" => match operand {
                Value::Array(args) if args.len() == 3 => Expression::Cond {
                    cond: Box::new(Expression::parse(&args[0])),
                    then: Box::new(Expression::parse(&args[1])),
                    otherwise: Box::new(Expression::parse(&args[2])),
                },
                Value::Object(spec) => Expression::Cond {
                    cond: Box::new(Self::parse_field_or_undefined(spec.get("if"))),
                    then: Box::new(Self::parse_field_or_undefined(spec.get("then"))),
                    otherwise: Box::new(Self::parse_field_or_undefined(spec.get("else"))),
                },
                _ => Expression::Literal(Value::Null),
            },
            "$ifNull" => match operand.as_array() {
                Some(args) if args.len() >= 2 => Expression::IfNull(
                    Box::new(Expression::parse(&args[0])),
                    Box::new(Expression::parse(&args[1])),
                ),
                // Short operand lists degrade to the evaluated operand itself
                _ => Expression::parse(operand),
            },
            "$switch" => match operand.as_object() {
                Some(spec) => {
                    let branches = spec
                        .get("branches")
                        .and_then(Value::as_array)
                        .map(|items| {
                            items
                                .iter()
                                .map(|item| {
                                    let branch = item.as_object();
                                    (
                                        Self::parse_field_or_undefined(
                                            branch.and_then(|b| b.get("case")),
                                        ),
                                        Self::parse_field_or_undefined(
                                            branch.and_then(|b| b.get("then")),
                                        ),
                                    )
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    Expression::Switch {
                        branches,
                        default: spec.get("default").map(|d| Box::new(Expression::parse(d))),
                    }
                }
                None => Expression::Literal(Value::Null),
            },
            "$toString" => Expression::ToString(Box::new(Expression::parse(operand))),
            "$toInt" => Expression::ToInt(Box::new(Expression::parse(operand))),
            "$toDouble" => Expression::ToDouble(Box::new(Expression::parse(operand))),
            "$toDate" => Expression::ToDate(Box::new(Expression::parse(operand))),
            _ => Expression::Unrecognized,
        }
    }

    fn parse_binary(
        operand: &Value,
        make: fn(Box<Expression>, Box<Expression>) -> Expression,
    ) -> Expression {
        match operand.as_array() {
            Some(args) if args.len() >= 2 => make(
                Box::new(Expression::parse(&args[0])),
                Box::new(Expression::parse(&args[1])),
            ),
            _ => Expression::Literal(Value::Bool(false)),
        }
    }

    fn parse_field_or_undefined(field: Option<&Value>) -> Expression {
        field.map(Expression::parse).unwrap_or(Expression::Undefined)
    }

    fn binding_name(field: Option<&Value>) -> String {
        match field {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => "this".to_string(),
        }
    }

    /// Evaluate against a document and variable scope.
    ///
    /// `None` is the undefined result. Never fails.
    pub fn evaluate(&self, doc: &Value, vars: &Scope) -> Option<Value> {
        match self {
            Expression::Literal(v) => Some(v.clone()),
            Expression::FieldRef(path) => path.resolve(doc).cloned(),
            Expression::VarRef(name) => vars.get(name).cloned(),
            Expression::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|e| e.evaluate(doc, vars).unwrap_or(Value::Null))
                    .collect(),
            )),
            Expression::And(exprs) => {
                let all = !exprs.is_empty()
                    && exprs
                        .iter()
                        .all(|e| is_truthy(e.evaluate(doc, vars).as_ref()));
                Some(Value::Bool(all))
            }
            Expression::Or(exprs) => Some(Value::Bool(
                exprs
                    .iter()
                    .any(|e| is_truthy(e.evaluate(doc, vars).as_ref())),
            )),
            Expression::Not(expr) => {
                Some(Value::Bool(!is_truthy(expr.evaluate(doc, vars).as_ref())))
            }
            Expression::Add(l, r) => {
                let lv = l.evaluate(doc, vars);
                let rv = r.evaluate(doc, vars);
                if matches!(lv, Some(Value::String(_))) || matches!(rv, Some(Value::String(_))) {
                    Some(Value::String(
                        display_or_undefined(lv.as_ref()) + &display_or_undefined(rv.as_ref()),
                    ))
                } else {
                    Some(Value::Number(
                        numeric_or_nan(lv.as_ref()) + numeric_or_nan(rv.as_ref()),
                    ))
                }
            }
            Expression::Subtract(l, r) => Some(Value::Number(
                numeric_or_nan(l.evaluate(doc, vars).as_ref())
                    - numeric_or_nan(r.evaluate(doc, vars).as_ref()),
            )),
            Expression::Multiply(l, r) => Some(Value::Number(
                numeric_or_nan(l.evaluate(doc, vars).as_ref())
                    * numeric_or_nan(r.evaluate(doc, vars).as_ref()),
            )),
            Expression::Divide(l, r) => Some(Value::Number(
                numeric_or_nan(l.evaluate(doc, vars).as_ref())
                    / numeric_or_nan(r.evaluate(doc, vars).as_ref()),
            )),
            Expression::Lt(l, r) => Some(Value::Bool(self.relational(doc, vars, l, r, |o| {
                o == std::cmp::Ordering::Less
            }))),
            Expression::Lte(l, r) => Some(Value::Bool(self.relational(doc, vars, l, r, |o| {
                o != std::cmp::Ordering::Greater
            }))),
            Expression::Gt(l, r) => Some(Value::Bool(self.relational(doc, vars, l, r, |o| {
                o == std::cmp::Ordering::Greater
            }))),
            Expression::Gte(l, r) => Some(Value::Bool(self.relational(doc, vars, l, r, |o| {
                o != std::cmp::Ordering::Less
            }))),
            Expression::Eq(l, r) => Some(Value::Bool(
                l.evaluate(doc, vars) == r.evaluate(doc, vars),
            )),
            Expression::Ne(l, r) => Some(Value::Bool(
                l.evaluate(doc, vars) != r.evaluate(doc, vars),
            )),
            Expression::In(value, list) => {
                let v = value.evaluate(doc, vars);
                let contained = match (v, list.evaluate(doc, vars)) {
                    (Some(v), Some(Value::Array(items))) => items.contains(&v),
                    _ => false,
                };
                Some(Value::Bool(contained))
            }
            Expression::StrLenCp(expr) => {
                let len = match expr.evaluate(doc, vars) {
                    None | Some(Value::Null) => 0,
                    Some(Value::Array(items)) => items.len(),
                    Some(other) => to_display_string(&other).chars().count(),
                };
                Some(Value::Number(len as f64))
            }
            Expression::IndexOfCp {
                source,
                substring,
                start,
            } => {
                let source = display_or_undefined(source.evaluate(doc, vars).as_ref());
                let substring = display_or_undefined(substring.evaluate(doc, vars).as_ref());
                let start = start
                    .as_ref()
                    .and_then(|s| coerce_number(s.evaluate(doc, vars).as_ref()))
                    .unwrap_or(0.0);
                Some(Value::Number(index_of_code_points(
                    &source,
                    &substring,
                    start.trunc() as i64,
                ) as f64))
            }
            Expression::Split(source, delimiter) => {
                let source = display_or_undefined(source.evaluate(doc, vars).as_ref());
                let delimiter = display_or_undefined(delimiter.evaluate(doc, vars).as_ref());
                let parts: Vec<Value> = if delimiter.is_empty() {
                    source
                        .chars()
                        .map(|c| Value::String(c.to_string()))
                        .collect()
                } else {
                    source
                        .split(delimiter.as_str())
                        .map(|p| Value::String(p.to_string()))
                        .collect()
                };
                Some(Value::Array(parts))
            }
            Expression::Concat(parts) => {
                let joined: String = parts
                    .iter()
                    .map(|p| match p.evaluate(doc, vars) {
                        None | Some(Value::Null) => String::new(),
                        Some(v) => to_display_string(&v),
                    })
                    .collect();
                Some(Value::String(joined))
            }
            Expression::ToLower(expr) => match expr.evaluate(doc, vars) {
                None => None,
                Some(Value::Null) => Some(Value::Null),
                Some(v) => Some(Value::String(to_display_string(&v).to_lowercase())),
            },
            Expression::ToUpper(expr) => match expr.evaluate(doc, vars) {
                None => None,
                Some(Value::Null) => Some(Value::Null),
                Some(v) => Some(Value::String(to_display_string(&v).to_uppercase())),
            },
            Expression::Substr(source, start, length) => {
                let source = display_or_undefined(source.evaluate(doc, vars).as_ref());
                let start = coerce_number(start.evaluate(doc, vars).as_ref())
                    .unwrap_or(0.0)
                    .trunc() as i64;
                let length = coerce_number(length.evaluate(doc, vars).as_ref())
                    .unwrap_or(0.0)
                    .trunc() as i64;
                Some(Value::String(substr(&source, start, length)))
            }
            Expression::Size(expr) => {
                let len = match expr.evaluate(doc, vars) {
                    Some(Value::Array(items)) => items.len(),
                    _ => 0,
                };
                Some(Value::Number(len as f64))
            }
            Expression::ArrayElemAt(array, index) => {
                let Some(Value::Array(items)) = array.evaluate(doc, vars) else {
                    return None;
                };
                let idx = coerce_number(index.evaluate(doc, vars).as_ref())?;
                if idx.fract() != 0.0 {
                    return None;
                }
                let idx = idx as i64;
                let resolved = if idx < 0 { items.len() as i64 + idx } else { idx };
                usize::try_from(resolved)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
            }
            Expression::Filter {
                input,
                as_name,
                cond,
            } => {
                let Some(Value::Array(items)) = input.evaluate(doc, vars) else {
                    return Some(Value::Array(Vec::new()));
                };
                let kept = items
                    .into_iter()
                    .enumerate()
                    .filter(|(index, element)| {
                        let (element_doc, scope) =
                            element_context(element, *index, as_name, vars, None);
                        is_truthy(cond.evaluate(&element_doc, &scope).as_ref())
                    })
                    .map(|(_, element)| element)
                    .collect();
                Some(Value::Array(kept))
            }
            Expression::Map {
                input,
                as_name,
                body,
            } => {
                let Some(Value::Array(items)) = input.evaluate(doc, vars) else {
                    return Some(Value::Array(Vec::new()));
                };
                let mapped = items
                    .into_iter()
                    .enumerate()
                    .map(|(index, element)| {
                        let (element_doc, scope) =
                            element_context(&element, index, as_name, vars, None);
                        body.evaluate(&element_doc, &scope).unwrap_or(Value::Null)
                    })
                    .collect();
                Some(Value::Array(mapped))
            }
            Expression::Reduce {
                input,
                initial,
                body,
            } => {
                let initial = initial.evaluate(doc, vars);
                let Some(Value::Array(items)) = input.evaluate(doc, vars) else {
                    return initial;
                };
                let mut accumulator = initial;
                for (index, element) in items.into_iter().enumerate() {
                    let (element_doc, scope) =
                        element_context(&element, index, "this", vars, Some(accumulator.clone()));
                    accumulator = body.evaluate(&element_doc, &scope);
                }
                accumulator
            }
            Expression::DateExtract(part, expr) => {
                let Some(date) = parse_date(expr.evaluate(doc, vars).as_ref()) else {
                    return Some(Value::Null);
                };
                let component = match part {
                    DatePart::Year => date.year() as f64,
                    DatePart::Month => date.month() as f64,
                    DatePart::DayOfMonth => date.day() as f64,
                    DatePart::Hour => date.hour() as f64,
                    DatePart::Minute => date.minute() as f64,
                    DatePart::Second => date.second() as f64,
                };
                Some(Value::Number(component))
            }
            Expression::Cond {
                cond,
                then,
                otherwise,
            } => {
                if is_truthy(cond.evaluate(doc, vars).as_ref()) {
                    then.evaluate(doc, vars)
                } else {
                    otherwise.evaluate(doc, vars)
                }
            }
            Expression::IfNull(value, fallback) => match value.evaluate(doc, vars) {
                None | Some(Value::Null) => fallback.evaluate(doc, vars),
                defined => defined,
            },
            Expression::Switch { branches, default } => {
                for (case, then) in branches {
                    if is_truthy(case.evaluate(doc, vars).as_ref()) {
                        return then.evaluate(doc, vars);
                    }
                }
                match default {
                    Some(d) => d.evaluate(doc, vars),
                    None => Some(Value::Null),
                }
            }
            Expression::ToString(expr) => match expr.evaluate(doc, vars) {
                None | Some(Value::Null) => Some(Value::Null),
                Some(v) => Some(Value::String(to_display_string(&v))),
            },
            Expression::ToInt(expr) => {
                let text = display_or_undefined(expr.evaluate(doc, vars).as_ref());
                Some(Value::Number(leading_integer(&text).unwrap_or(0) as f64))
            }
            Expression::ToDouble(expr) => {
                let text = display_or_undefined(expr.evaluate(doc, vars).as_ref());
                Some(Value::Number(leading_float(&text).unwrap_or(0.0)))
            }
            Expression::ToDate(expr) => Some(
                parse_date(expr.evaluate(doc, vars).as_ref())
                    .map(Value::Date)
                    .unwrap_or(Value::Null),
            ),
            Expression::Empty | Expression::Unrecognized => Some(Value::Bool(false)),
            Expression::Undefined => None,
        }
    }

    fn relational(
        &self,
        doc: &Value,
        vars: &Scope,
        left: &Expression,
        right: &Expression,
        accept: fn(std::cmp::Ordering) -> bool,
    ) -> bool {
        let lv = left.evaluate(doc, vars);
        let rv = right.evaluate(doc, vars);
        crate::value::loose_compare(lv.as_ref(), rv.as_ref()).is_some_and(accept)
    }
}

/// Document + scope seen by a `$filter`/`$map`/`$reduce` body: the element
/// itself is the document (an empty record for non-mapping elements), and the
/// scope extends the ambient one with the element bindings.
fn element_context(
    element: &Value,
    index: usize,
    as_name: &str,
    parent: &Scope,
    accumulator: Option<Option<Value>>,
) -> (Value, Scope) {
    let element_doc = match element {
        Value::Object(_) => element.clone(),
        _ => Value::empty_object(),
    };
    let mut scope = parent.clone();
    scope.bind(as_name, Some(element.clone()));
    scope.bind("index", Some(Value::Number(index as f64)));
    if let Some(acc) = accumulator {
        scope.bind("value", acc);
        scope.bind("this", Some(element.clone()));
    }
    (element_doc, scope)
}

fn numeric_or_nan(value: Option<&Value>) -> f64 {
    coerce_number(value).unwrap_or(f64::NAN)
}

/// Code-point index of `substring` in `source` at or after `start`; −1 when
/// absent.
fn index_of_code_points(source: &str, substring: &str, start: i64) -> i64 {
    let source: Vec<char> = source.chars().collect();
    let needle: Vec<char> = substring.chars().collect();
    let start = start.max(0) as usize;

    if needle.is_empty() {
        return start.min(source.len()) as i64;
    }
    if needle.len() > source.len() {
        return -1;
    }
    let last = source.len() - needle.len();
    if start > last {
        return -1;
    }
    (start..=last)
        .find(|&i| source[i..i + needle.len()] == needle[..])
        .map(|i| i as i64)
        .unwrap_or(-1)
}

/// Substring by code points; negative `start` counts from the end.
fn substr(source: &str, start: i64, length: i64) -> String {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len() as i64;
    let begin = if start < 0 {
        (len + start).max(0)
    } else {
        start.min(len)
    };
    let take = length.clamp(0, len - begin);
    chars[begin as usize..(begin + take) as usize].iter().collect()
}

/// Parse the leading signed-integer prefix of a string, if any.
pub(crate) fn leading_integer(text: &str) -> Option<i64> {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    let re = PREFIX.get_or_init(|| Regex::new(r"^[+-]?\d+").expect("static pattern"));
    re.find(text.trim()).and_then(|m| m.as_str().parse().ok())
}

/// Parse the leading float prefix of a string, if any.
fn leading_float(text: &str) -> Option<f64> {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    let re = PREFIX
        .get_or_init(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?").expect("static pattern"));
    re.find(text.trim()).and_then(|m| m.as_str().parse().ok())
}
