//! Dotted field path parsing, resolution, and writing

use std::fmt;

use crate::value::Value;

/// A dotted field path, parsed once into its segments.
///
/// Resolution never fails: any missing intermediate yields `None`
/// ("undefined"). The empty path addresses the record itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path.
    pub fn parse(path: &str) -> Self {
        let segments = if path.is_empty() {
            Vec::new()
        } else {
            path.split('.').map(str::to_string).collect()
        };
        Self {
            raw: path.to_string(),
            segments,
        }
    }

    /// The unparsed path string.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Resolve this path against a record.
    ///
    /// Descends one key at a time, short-circuiting to `None` the moment an
    /// intermediate is missing or null. Numeric segments index into arrays.
    /// Never creates structure.
    pub fn resolve<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        let mut current = record;
        for segment in &self.segments {
            match current {
                Value::Object(map) => current = map.get(segment)?,
                Value::Array(arr) => {
                    let index: usize = segment.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }
        Some(current)
    }

    /// Write `value` at this path inside `root`, creating missing
    /// intermediate mappings.
    ///
    /// A non-mapping intermediate is overwritten with a fresh mapping. The
    /// empty path is a no-op, as is a non-mapping `root`.
    pub fn write(&self, root: &mut Value, value: Value) {
        let Some((last, parents)) = self.segments.split_last() else {
            return;
        };

        let mut current = root;
        for segment in parents {
            let Value::Object(map) = current else {
                return;
            };
            let entry = map
                .entry(segment.clone())
                .or_insert_with(Value::empty_object);
            if !matches!(entry, Value::Object(_)) {
                *entry = Value::empty_object();
            }
            current = entry;
        }

        if let Value::Object(map) = current {
            map.insert(last.clone(), value);
        }
    }

    /// Remove the leaf addressed by this path, leaving intermediates intact.
    ///
    /// Only the final segment is deleted; a missing intermediate makes this a
    /// no-op. Used by exclusion-mode projection.
    pub fn remove(&self, root: &mut Value) {
        let Some((last, parents)) = self.segments.split_last() else {
            return;
        };

        let mut current = root;
        for segment in parents {
            let Value::Object(map) = current else {
                return;
            };
            match map.get_mut(segment) {
                Some(next) => current = next,
                None => return,
            }
        }

        if let Value::Object(map) = current {
            map.remove(last);
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
