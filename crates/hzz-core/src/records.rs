//! Columnar event records.
//!
//! An `EventChunk` is a set of named columns of equal length. Row `i` of the
//! chunk is the `i`-th element of every column. Per-lepton quantities are
//! jagged list columns (one list per event).
//!
//! JSON shape:
//! ```text
//! { "lep_pt": { "type": "float_list", "values": [[...], [...]] },
//!   "mcWeight": { "type": "float", "values": [1.0, 0.98] } }
//! ```

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

// ── Column ────────────────────────────────────────────────────────────────────

/// One named field across every record of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    FloatList(Vec<Vec<f64>>),
    IntList(Vec<Vec<i64>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::FloatList(v) => v.len(),
            Column::IntList(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Column::Float(_) => "float",
            Column::Int(_) => "int",
            Column::FloatList(_) => "float_list",
            Column::IntList(_) => "int_list",
        }
    }

    /// Copy of rows `range`. Caller guarantees the range is in bounds.
    fn slice(&self, range: Range<usize>) -> Column {
        match self {
            Column::Float(v) => Column::Float(v[range].to_vec()),
            Column::Int(v) => Column::Int(v[range].to_vec()),
            Column::FloatList(v) => Column::FloatList(v[range].to_vec()),
            Column::IntList(v) => Column::IntList(v[range].to_vec()),
        }
    }

    /// Rows where `mask` is true. Caller guarantees `mask.len() == self.len()`.
    fn filter(&self, mask: &[bool]) -> Column {
        fn keep<T: Clone>(values: &[T], mask: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(v, _)| v.clone())
                .collect()
        }
        match self {
            Column::Float(v) => Column::Float(keep(v, mask)),
            Column::Int(v) => Column::Int(keep(v, mask)),
            Column::FloatList(v) => Column::FloatList(keep(v, mask)),
            Column::IntList(v) => Column::IntList(keep(v, mask)),
        }
    }

    fn append(&mut self, name: &str, other: &Column) -> Result<(), RecordError> {
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => a.extend_from_slice(b),
            (Column::Int(a), Column::Int(b)) => a.extend_from_slice(b),
            (Column::FloatList(a), Column::FloatList(b)) => a.extend_from_slice(b),
            (Column::IntList(a), Column::IntList(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(RecordError::WrongKind {
                    column: name.to_string(),
                    expected: a.kind(),
                    found: b.kind(),
                })
            }
        }
        Ok(())
    }
}

// ── EventChunk ────────────────────────────────────────────────────────────────

/// An ordered slice of a dataset's records, stored column-wise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventChunk {
    columns: BTreeMap<String, Column>,
}

impl EventChunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chunk from named columns, rejecting ragged input.
    pub fn from_columns<I, S>(columns: I) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut chunk = Self::new();
        for (name, column) in columns {
            chunk.insert(name, column)?;
        }
        Ok(chunk)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.columns.values().next().map(Column::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Add or replace a column. Its length must match the existing records.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<(), RecordError> {
        let name = name.into();
        let others = self.columns.iter().find(|(n, _)| **n != name);
        if let Some((_, existing)) = others {
            if existing.len() != column.len() {
                return Err(RecordError::LengthMismatch {
                    column: name,
                    expected: existing.len(),
                    found: column.len(),
                });
            }
        }
        self.columns.insert(name, column);
        Ok(())
    }

    /// Check every column has the same length. Deserialized chunks are not
    /// validated until this is called.
    pub fn validate(&self) -> Result<(), RecordError> {
        let expected = self.len();
        for (name, column) in &self.columns {
            if column.len() != expected {
                return Err(RecordError::LengthMismatch {
                    column: name.clone(),
                    expected,
                    found: column.len(),
                });
            }
        }
        Ok(())
    }

    /// Copy of records `range` (record indices, end exclusive).
    pub fn slice(&self, range: Range<usize>) -> Result<EventChunk, RecordError> {
        let len = self.len();
        if range.start > range.end || range.end > len {
            return Err(RecordError::OutOfRange {
                start: range.start,
                end: range.end,
                len,
            });
        }
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| (name.clone(), column.slice(range.clone())))
            .collect();
        Ok(EventChunk { columns })
    }

    /// Records where `mask` is true, in their original order.
    pub fn filter(&self, mask: &[bool]) -> Result<EventChunk, RecordError> {
        if mask.len() != self.len() {
            return Err(RecordError::LengthMismatch {
                column: "<mask>".to_string(),
                expected: self.len(),
                found: mask.len(),
            });
        }
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| (name.clone(), column.filter(mask)))
            .collect();
        Ok(EventChunk { columns })
    }

    /// Concatenate chunks in order. All non-trivial chunks must share the same
    /// column names and kinds; chunks with no columns are skipped.
    pub fn concat<I>(chunks: I) -> Result<EventChunk, RecordError>
    where
        I: IntoIterator<Item = EventChunk>,
    {
        let mut out: Option<EventChunk> = None;
        for chunk in chunks {
            if chunk.num_columns() == 0 {
                continue;
            }
            match out.as_mut() {
                None => out = Some(chunk),
                Some(acc) => acc.append(&chunk)?,
            }
        }
        Ok(out.unwrap_or_default())
    }

    /// Ok if `other` can be appended to `self`: same column names, same
    /// kinds. A chunk with no columns fits anything.
    pub fn check_compatible(&self, other: &EventChunk) -> Result<(), RecordError> {
        if self.num_columns() == 0 || other.num_columns() == 0 {
            return Ok(());
        }
        if !self.columns.keys().eq(other.columns.keys()) {
            let ours: Vec<&str> = self.column_names().collect();
            let theirs: Vec<&str> = other.column_names().collect();
            return Err(RecordError::SchemaMismatch(format!(
                "{ours:?} vs {theirs:?}"
            )));
        }
        for ((name, ours), theirs) in self.columns.iter().zip(other.columns.values()) {
            if ours.kind() != theirs.kind() {
                return Err(RecordError::WrongKind {
                    column: name.clone(),
                    expected: ours.kind(),
                    found: theirs.kind(),
                });
            }
        }
        Ok(())
    }

    fn append(&mut self, other: &EventChunk) -> Result<(), RecordError> {
        self.check_compatible(other)?;
        for (name, column) in self.columns.iter_mut() {
            // Keys are equal, so the lookup always succeeds.
            if let Some(theirs) = other.columns.get(name) {
                column.append(name, theirs)?;
            }
        }
        Ok(())
    }

    // ── Typed accessors ──────────────────────────────────────────────────────

    pub fn float(&self, name: &str) -> Result<&[f64], RecordError> {
        match self.require(name)? {
            Column::Float(v) => Ok(v),
            other => Err(wrong_kind(name, "float", other)),
        }
    }

    pub fn float_list(&self, name: &str) -> Result<&[Vec<f64>], RecordError> {
        match self.require(name)? {
            Column::FloatList(v) => Ok(v),
            other => Err(wrong_kind(name, "float_list", other)),
        }
    }

    pub fn int_list(&self, name: &str) -> Result<&[Vec<i64>], RecordError> {
        match self.require(name)? {
            Column::IntList(v) => Ok(v),
            other => Err(wrong_kind(name, "int_list", other)),
        }
    }

    fn require(&self, name: &str) -> Result<&Column, RecordError> {
        self.columns
            .get(name)
            .ok_or_else(|| RecordError::MissingColumn(name.to_string()))
    }
}

fn wrong_kind(name: &str, expected: &'static str, found: &Column) -> RecordError {
    RecordError::WrongKind {
        column: name.to_string(),
        expected,
        found: found.kind(),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("missing column {0:?}")]
    MissingColumn(String),

    #[error("column {column:?} is {found}, expected {expected}")]
    WrongKind {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("column {column:?} has {found} records, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("record range {start}..{end} out of bounds for {len} records")]
    OutOfRange { start: usize, end: usize, len: usize },

    #[error("column sets differ: {0}")]
    SchemaMismatch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> EventChunk {
        EventChunk::from_columns([
            ("x", Column::Float((0..n).map(|i| i as f64).collect())),
            ("id", Column::Int((0..n as i64).collect())),
        ])
        .unwrap()
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let err = EventChunk::from_columns([
            ("a", Column::Float(vec![1.0, 2.0])),
            ("b", Column::Float(vec![1.0])),
        ])
        .unwrap_err();
        assert!(matches!(err, RecordError::LengthMismatch { .. }));
    }

    #[test]
    fn replacing_a_column_keeps_record_count() {
        let mut chunk = sample(3);
        chunk.insert("x", Column::Float(vec![9.0; 3])).unwrap();
        assert_eq!(chunk.float("x").unwrap(), &[9.0, 9.0, 9.0]);
        assert_eq!(chunk.len(), 3);
    }

    #[test]
    fn slice_and_concat_restore_the_original() {
        let chunk = sample(10);
        let parts = vec![
            chunk.slice(0..4).unwrap(),
            chunk.slice(4..8).unwrap(),
            chunk.slice(8..10).unwrap(),
        ];
        assert_eq!(EventChunk::concat(parts).unwrap(), chunk);
    }

    #[test]
    fn slice_out_of_bounds_fails() {
        assert!(matches!(
            sample(3).slice(2..5),
            Err(RecordError::OutOfRange { len: 3, .. })
        ));
    }

    #[test]
    fn filter_keeps_order() {
        let chunk = sample(4);
        let kept = chunk.filter(&[true, false, false, true]).unwrap();
        assert_eq!(kept.float("x").unwrap(), &[0.0, 3.0]);
        assert!(chunk.filter(&[true]).is_err());
    }

    #[test]
    fn concat_rejects_different_columns() {
        let a = sample(2);
        let b = EventChunk::from_columns([("y", Column::Float(vec![1.0]))]).unwrap();
        assert!(matches!(
            EventChunk::concat([a, b]),
            Err(RecordError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn compatibility_compares_names_and_kinds() {
        let a = sample(2);
        assert!(a.check_compatible(&sample(5)).is_ok());
        assert!(a.check_compatible(&EventChunk::new()).is_ok());

        let renamed = EventChunk::from_columns([("x", Column::Float(vec![1.0]))]).unwrap();
        assert!(matches!(
            a.check_compatible(&renamed),
            Err(RecordError::SchemaMismatch(_))
        ));

        let retyped = EventChunk::from_columns([
            ("x", Column::Float(vec![1.0])),
            ("id", Column::Float(vec![1.0])),
        ])
        .unwrap();
        assert!(matches!(
            a.check_compatible(&retyped),
            Err(RecordError::WrongKind { .. })
        ));
    }

    #[test]
    fn concat_skips_column_less_chunks() {
        let merged = EventChunk::concat([EventChunk::new(), sample(2)]).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(EventChunk::concat(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn typed_accessor_reports_kind() {
        let err = sample(1).float_list("x").unwrap_err();
        assert_eq!(
            err.to_string(),
            "column \"x\" is float, expected float_list"
        );
    }

    #[test]
    fn json_shape_is_tagged_per_column() {
        let json = serde_json::to_value(sample(1)).unwrap();
        assert_eq!(json["x"]["type"], "float");
        assert_eq!(json["id"]["values"][0], 0);
    }

    #[test]
    fn validate_catches_ragged_json() {
        let chunk: EventChunk = serde_json::from_str(
            r#"{"a":{"type":"float","values":[1.0]},"b":{"type":"int","values":[]}}"#,
        )
        .unwrap();
        assert!(chunk.validate().is_err());
    }
}
