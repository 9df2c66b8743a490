//! Collection facade: the public query surface over an in-memory record set
//!
//! The collection owns an ordered sequence of records; insertion order is
//! the canonical baseline order. Every operation is read-only over the
//! records, and every returned structure is freshly allocated.

use std::collections::HashSet;

use tracing::debug;

use crate::aggregation::Pipeline;
use crate::cursor::Cursor;
use crate::path::FieldPath;
use crate::projection::Projection;
use crate::query::Query;
use crate::value::{key_string, Value};
use crate::QueryError;

/// An ordered, immutable collection of records.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    items: Vec<Value>,
}

impl Collection {
    /// Create a collection from owned record values.
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }

    /// Create a collection from a JSON array of records.
    ///
    /// Rejects any non-array input.
    pub fn from_json(items: serde_json::Value) -> Result<Self, QueryError> {
        match Value::from(items) {
            Value::Array(items) => Ok(Self::new(items)),
            other => Err(QueryError::InvalidCollection(format!(
                "expected an array of records, got {}",
                other.kind()
            ))),
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the collection holds no records.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Borrow the underlying records.
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Build a deferred cursor over the collection.
    ///
    /// A non-mapping (or `null`) query matches every record. Query contract
    /// violations surface here, not at materialization.
    pub fn find(&self, query: serde_json::Value) -> Result<Cursor<'_>, QueryError> {
        self.find_with_projection(query, serde_json::Value::Null)
    }

    /// [`Collection::find`] with an initial projection spec.
    pub fn find_with_projection(
        &self,
        query: serde_json::Value,
        projection: serde_json::Value,
    ) -> Result<Cursor<'_>, QueryError> {
        let query = parse_top_level_query(Value::from(query))?;
        let projection = Value::from(projection);
        let projection = match projection.as_object() {
            Some(_) => Some(Projection::parse(&projection)?),
            None => None,
        };
        Ok(Cursor::new(&self.items, query, projection))
    }

    /// First matching record, or `None`.
    pub fn find_one(&self, query: serde_json::Value) -> Result<Option<Value>, QueryError> {
        let mut results = self.find(query)?.to_array()?;
        if results.is_empty() {
            Ok(None)
        } else {
            Ok(Some(results.swap_remove(0)))
        }
    }

    /// Number of matching records.
    pub fn count(&self, query: serde_json::Value) -> Result<usize, QueryError> {
        Ok(self.find(query)?.to_array()?.len())
    }

    /// Whether any record matches.
    pub fn exists(&self, query: serde_json::Value) -> Result<bool, QueryError> {
        Ok(self.count(query)? > 0)
    }

    /// Unique defined values of a field across the collection, in first-seen
    /// order. The field may carry an optional `$` prefix; an empty field
    /// yields nothing.
    pub fn distinct(&self, field: &str) -> Vec<Value> {
        if field.is_empty() {
            return Vec::new();
        }
        let path = FieldPath::parse(field.strip_prefix('$').unwrap_or(field));

        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for item in &self.items {
            if let Some(value) = path.resolve(item) {
                if seen.insert(key_string(Some(value))) {
                    values.push(value.clone());
                }
            }
        }
        values
    }

    /// Run an aggregation pipeline over the collection.
    ///
    /// An empty pipeline returns a copy of the input.
    pub fn aggregate(&self, pipeline: Vec<serde_json::Value>) -> Result<Vec<Value>, QueryError> {
        debug!(stages = pipeline.len(), "running aggregation pipeline");
        Pipeline::from_json(pipeline)?.execute(&self.items)
    }

    /// Copy of all records. Never an alias into the collection.
    pub fn to_array(&self) -> Vec<Value> {
        self.items.clone()
    }
}

/// A non-mapping top-level query (including `null`) matches everything; a
/// non-mapping *sub*-query inside a combinator matches nothing. The facade
/// owns the first rule, [`Query::parse`] the second.
fn parse_top_level_query(query: Value) -> Result<Query, QueryError> {
    if query.as_object().is_none() {
        return Ok(Query::match_all());
    }
    Query::parse(&query)
}
