//! Bounded staging area for rows awaiting transfer
//!
//! A `RowBuffer` accepts rows until it is finalized. Every row is checked
//! against the job schema before it is stored, and a rejected row never
//! changes the buffer. After `finalize` the buffer is read-only and hands out
//! `FinalizedRows`, a borrowed view that can be iterated any number of times.

use std::iter::FusedIterator;
use std::slice;

use crate::error::{Error, Result};
use crate::types::{Row, Schema};

/// Append-only row buffer bound to one schema
#[derive(Debug)]
pub struct RowBuffer {
    schema: Schema,
    rows: Vec<Row>,
    max_rows: usize,
    finalized: bool,
}

impl RowBuffer {
    /// Create an empty buffer holding at most `max_rows` rows
    pub fn new(schema: Schema, max_rows: usize) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            max_rows,
            finalized: false,
        }
    }

    /// Schema every row must match
    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of buffered rows
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows are buffered
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Configured row limit
    #[inline]
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Whether the buffer has been finalized
    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Append a row.
    ///
    /// Fails with `InvalidState` after finalize, `CapacityExceeded` once the
    /// limit is reached and `SchemaMismatch` if the row does not fit.
    pub fn append(&mut self, row: Row) -> Result<()> {
        if self.finalized {
            return Err(Error::invalid_state("cannot append to a finalized buffer"));
        }
        if self.rows.len() >= self.max_rows {
            return Err(Error::CapacityExceeded {
                max_rows: self.max_rows,
            });
        }
        self.schema.check_row(&row)?;
        self.rows.push(row);
        Ok(())
    }

    /// Make the buffer read-only and return a view of its rows.
    ///
    /// Idempotent: a second call returns the same view.
    pub fn finalize(&mut self) -> FinalizedRows<'_> {
        self.finalized = true;
        self.rows.shrink_to_fit();
        FinalizedRows {
            schema: &self.schema,
            rows: &self.rows,
        }
    }

    /// View of the rows, available only after finalize
    pub fn rows(&self) -> Result<FinalizedRows<'_>> {
        if !self.finalized {
            return Err(Error::invalid_state("buffer has not been finalized"));
        }
        Ok(FinalizedRows {
            schema: &self.schema,
            rows: &self.rows,
        })
    }
}

/// Read-only view over a finalized buffer
#[derive(Debug, Clone, Copy)]
pub struct FinalizedRows<'a> {
    schema: &'a Schema,
    rows: &'a [Row],
}

impl<'a> FinalizedRows<'a> {
    /// Schema shared by all rows
    #[inline]
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// Number of rows
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Start a fresh pass over the rows
    #[inline]
    pub fn iter(&self) -> RowIter<'a> {
        RowIter {
            inner: self.rows.iter(),
        }
    }
}

impl<'a> IntoIterator for FinalizedRows<'a> {
    type Item = &'a Row;
    type IntoIter = RowIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over finalized rows
#[derive(Debug, Clone)]
pub struct RowIter<'a> {
    inner: slice::Iter<'a, Row>,
}

impl<'a> Iterator for RowIter<'a> {
    type Item = &'a Row;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RowIter<'_> {}

impl FusedIterator for RowIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, ColumnType, Value};

    fn buffer(max_rows: usize) -> RowBuffer {
        let schema = Schema::new(vec![
            Column::new("id", ColumnType::Int32).not_null(),
            Column::new("name", ColumnType::Text),
        ]);
        RowBuffer::new(schema, max_rows)
    }

    fn row(id: i32) -> Row {
        Row::new(vec![Value::Int32(id), format!("name_{}", id).into()])
    }

    #[test]
    fn test_append_and_finalize() {
        let mut buf = buffer(10);
        buf.append(row(1)).unwrap();
        buf.append(row(2)).unwrap();
        assert_eq!(buf.len(), 2);

        let rows = buf.finalize();
        assert_eq!(rows.len(), 2);
        let ids: Vec<_> = rows.iter().map(|r| r.get(0).cloned()).collect();
        assert_eq!(ids, vec![Some(Value::Int32(1)), Some(Value::Int32(2))]);
    }

    #[test]
    fn test_iteration_is_restartable() {
        let mut buf = buffer(10);
        for i in 0..5 {
            buf.append(row(i)).unwrap();
        }
        let rows = buf.finalize();

        let mut first = rows.iter();
        first.next();
        first.next();
        assert_eq!(first.len(), 3);

        assert_eq!(rows.iter().count(), 5);
        assert_eq!(rows.into_iter().count(), 5);
    }

    #[test]
    fn test_schema_mismatch_leaves_buffer_unchanged() {
        let mut buf = buffer(10);
        buf.append(row(1)).unwrap();

        let err = buf
            .append(Row::new(vec![Value::String("x".into()), Value::Null]))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));

        let err = buf.append(Row::new(vec![Value::Int32(2)])).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));

        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_capacity_exceeded_leaves_buffer_unchanged() {
        let mut buf = buffer(2);
        buf.append(row(1)).unwrap();
        buf.append(row(2)).unwrap();

        let err = buf.append(row(3)).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { max_rows: 2 }));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_append_after_finalize_is_invalid_state() {
        let mut buf = buffer(10);
        buf.append(row(1)).unwrap();
        buf.finalize();

        let err = buf.append(row(2)).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(buf.len(), 1);
        assert!(buf.is_finalized());
    }

    #[test]
    fn test_rows_requires_finalize() {
        let mut buf = buffer(10);
        assert!(matches!(buf.rows(), Err(Error::InvalidState { .. })));

        buf.finalize();
        assert!(buf.rows().unwrap().is_empty());
        // finalize twice is fine
        assert!(buf.finalize().is_empty());
    }
}
