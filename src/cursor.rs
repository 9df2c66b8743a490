//! Deferred query cursor
//!
//! A cursor holds sort/skip/limit/projection state and materializes on
//! [`Cursor::to_array`], applying match → sort → skip → limit → projection
//! in that fixed order every time. Materialization is idempotent and never
//! touches the underlying collection.

use crate::aggregation::{parse_sort_keys, sort_documents, SortKey};
use crate::projection::{project_collection, Projection};
use crate::query::{apply_query, Query};
use crate::value::Value;
use crate::QueryError;

/// A deferred query over a borrowed collection.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    items: &'a [Value],
    query: Query,
    projection: Option<Projection>,
    sort: Option<Vec<SortKey>>,
    skip: usize,
    limit: Option<usize>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(items: &'a [Value], query: Query, projection: Option<Projection>) -> Self {
        Self {
            items,
            query,
            projection,
            sort: None,
            skip: 0,
            limit: None,
        }
    }

    /// Set the sort spec (a mapping from field path to `1`/`-1`).
    ///
    /// A non-mapping spec clears any previous sort.
    pub fn sort(mut self, spec: serde_json::Value) -> Self {
        self.sort = parse_sort_keys(&Value::from(spec));
        self
    }

    /// Set the projection. A non-mapping spec keeps the current projection.
    pub fn project(mut self, spec: serde_json::Value) -> Result<Self, QueryError> {
        let spec = Value::from(spec);
        if spec.as_object().is_some() {
            self.projection = Some(Projection::parse(&spec)?);
        }
        Ok(self)
    }

    /// Skip the first `n` results (negative clamps to 0).
    pub fn skip(mut self, n: i64) -> Self {
        self.skip = n.max(0) as usize;
        self
    }

    /// Keep at most `n` results (negative clamps to 0).
    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n.max(0) as usize);
        self
    }

    /// Materialize the results.
    ///
    /// Applies match, sort, skip, limit, and projection in that order. Safe
    /// to call repeatedly; returned records never alias the collection.
    pub fn to_array(&self) -> Result<Vec<Value>, QueryError> {
        let mut results = apply_query(self.items, &self.query, None)?;

        if let Some(keys) = &self.sort {
            sort_documents(&mut results, keys);
        }
        if self.skip > 0 {
            results.drain(..self.skip.min(results.len()));
        }
        if let Some(limit) = self.limit {
            results.truncate(limit);
        }

        project_collection(&results, self.projection.as_ref(), Some(&self.query))
    }
}
