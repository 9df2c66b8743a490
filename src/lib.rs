#![forbid(unsafe_code)]
#![warn(missing_docs)]
//! # memquery
//!
//! An in-process query and aggregation engine for in-memory JSON-like
//! documents. It evaluates a MongoDB-style query language, projection
//! language, and aggregation pipeline against an ordered collection of
//! records, without a database.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Collection (facade)                     │
//! │        find / findOne / count / exists / distinct           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                          Cursor                             │
//! │            deferred sort / skip / limit / project           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐ ┌────────────┐ ┌────────────┐ ┌──────────┐  │
//! │  │   Query   │ │ Expression │ │ Projection │ │ Pipeline │  │
//! │  │  matcher  │ │ evaluator  │ │   engine   │ │ executor │  │
//! │  └───────────┘ └────────────┘ └────────────┘ └──────────┘  │
//! ├─────────────────────────────────────────────────────────────┤
//! │              Value model & field path resolver              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use memquery::Collection;
//! use serde_json::json;
//!
//! let people = Collection::from_json(json!([
//!     { "name": "Alice", "city": "NYC", "age": 30 },
//!     { "name": "Bob", "city": "LA", "age": 25 },
//! ]))?;
//!
//! let adults = people.find(json!({ "age": { "$gte": 18 } }))?.to_array()?;
//!
//! let by_city = people.aggregate(vec![
//!     json!({ "$group": { "_id": "$city", "count": { "$sum": 1 } } }),
//!     json!({ "$sort": { "count": -1 } }),
//! ])?;
//! ```

pub mod aggregation;
pub mod collection;
pub mod cursor;
pub mod expression;
pub mod path;
pub mod projection;
pub mod query;
pub mod value;

pub use aggregation::{Pipeline, Stage};
pub use collection::Collection;
pub use cursor::Cursor;
pub use expression::{Expression, Scope};
pub use path::FieldPath;
pub use projection::Projection;
pub use query::{apply_query, EqualityIndex, Query};
pub use value::{Value, ValueKind};

/// Errors raised for query contract violations.
///
/// Only programmer errors in the supplied query/collection shapes construct
/// these. Data-shape anomalies (unparseable numbers, invalid dates, wrong
/// operand arity in expressions) never error; they degrade to documented
/// default values instead.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Collection input was not an array of records
    #[error("Invalid collection: {0}")]
    InvalidCollection(String),

    /// Malformed query shape (combinator or field condition)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Unparseable `$regex` pattern
    #[error("Invalid $regex pattern: {0}")]
    InvalidRegex(String),

    /// `$regex` applied to a non-string field value
    #[error("$regex used on non-string value: {0}")]
    RegexTypeMismatch(String),
}
