use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::Value;

/// Ordered mapping from column name to value.
///
/// Column names are shared between all the rows produced by the same query
/// execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

/// A fully materialized query result.
pub type RowSet = Vec<Row>;

impl Row {
    /// Creates a new row. `values` must line up with `columns`; missing trailing
    /// values are filled with [`Value::Null`], extra values are dropped.
    pub fn new(columns: Arc<[String]>, mut values: Vec<Value>) -> Self {
        values.resize(columns.len(), Value::Null);
        Self { columns, values }
    }

    /// Convenience constructor, mostly used to build fixtures.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// A bounded window of rows produced by a [`crate::cursor::BatchCursor`].
///
/// A batch handed to a consumer always holds at least one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Zero based position of the window in the sequence.
    pub index: usize,
    /// Offset of the first row of the window.
    pub offset: usize,
    rows: Vec<Row>,
}

impl Batch {
    pub(crate) fn new(index: usize, offset: usize, rows: Vec<Row>) -> Self {
        debug_assert!(!rows.is_empty(), "BUG: empty batch");
        Self {
            index,
            offset,
            rows,
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Applies a consumer-side predicate to the rows of this batch.
    pub fn filter<P>(&self, mut predicate: P) -> Vec<&Row>
    where
        P: FnMut(&Row) -> bool,
    {
        self.rows.iter().filter(|r| predicate(r)).collect()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl IntoIterator for Batch {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
