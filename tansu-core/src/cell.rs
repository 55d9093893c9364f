//! Cell data model.
//!
//! A cell is a (row, column, timestamp) key plus either a value or an
//! erasure marker. Columns are structured as "family:qualifier"; the
//! family is everything up to the first ':' (or the whole column when
//! there is no ':').
//!
//! Canonical cell order is row ascending, column ascending (both
//! byte-lexicographic), then timestamp DESCENDING, so the newest revision
//! of a (row, column) pair sorts first.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;

use crate::error::Result;

/// The (row, column, timestamp) projection of a cell.
///
/// `Bytes` handles let keys share storage with the buffer or fragment
/// block they were decoded from.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct CellKey {
    pub row: Bytes,
    pub column: Bytes,
    pub timestamp: i64,
}

impl CellKey {
    pub fn new(row: impl Into<Bytes>, column: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            row: row.into(),
            column: column.into(),
            timestamp,
        }
    }

    /// Column family: the column prefix up to the first ':'.
    pub fn column_family(&self) -> &[u8] {
        column_family(&self.column)
    }
}

impl Ord for CellKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .cmp(&other.row)
            .then_with(|| self.column.cmp(&other.column))
            // Newest first
            .then_with(|| other.timestamp.cmp(&self.timestamp))
    }
}

impl PartialOrd for CellKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},@{})",
            crate::repr::repr_bytes(&self.row),
            crate::repr::repr_bytes(&self.column),
            self.timestamp
        )
    }
}

/// A full cell: key plus value or erasure.
#[derive(Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: CellKey,
    /// `None` encodes an erasure tombstone.
    pub value: Option<Bytes>,
}

impl Cell {
    pub fn new(
        row: impl Into<Bytes>,
        column: impl Into<Bytes>,
        timestamp: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            key: CellKey::new(row, column, timestamp),
            value: Some(value.into()),
        }
    }

    pub fn erasure(row: impl Into<Bytes>, column: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            key: CellKey::new(row, column, timestamp),
            value: None,
        }
    }

    pub fn row(&self) -> &[u8] {
        &self.key.row
    }

    pub fn column(&self) -> &[u8] {
        &self.key.column
    }

    pub fn timestamp(&self) -> i64 {
        self.key.timestamp
    }

    /// Value bytes; empty for erasures.
    pub fn value(&self) -> &[u8] {
        self.value.as_deref().unwrap_or(&[])
    }

    pub fn is_erasure(&self) -> bool {
        self.value.is_none()
    }

    pub fn column_family(&self) -> &[u8] {
        self.key.column_family()
    }

    pub fn column_qualifier(&self) -> &[u8] {
        match memchr_colon(&self.key.column) {
            Some(i) => &self.key.column[i + 1..],
            None => &[],
        }
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(
                f,
                "({},{},{},{})",
                crate::repr::repr_bytes(self.row()),
                crate::repr::repr_bytes(self.column()),
                self.timestamp(),
                crate::repr::repr_bytes(v)
            ),
            None => write!(
                f,
                "({},{},{},ERASED)",
                crate::repr::repr_bytes(self.row()),
                crate::repr::repr_bytes(self.column()),
                self.timestamp()
            ),
        }
    }
}

/// Column family of an arbitrary column name.
pub fn column_family(column: &[u8]) -> &[u8] {
    match memchr_colon(column) {
        Some(i) => &column[..i],
        None => column,
    }
}

fn memchr_colon(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == b':')
}

/// Pull-style stream of cells in canonical order.
pub trait CellStream: Send {
    /// Produce the next cell, or `None` at end of stream.
    fn next_cell(&mut self) -> Result<Option<Cell>>;
}

/// Boxed stream handle, the common currency between scanners and mergers.
pub type CellStreamHandle = Box<dyn CellStream>;

impl CellStream for std::vec::IntoIter<Cell> {
    fn next_cell(&mut self) -> Result<Option<Cell>> {
        Ok(self.next())
    }
}

/// Push-style sink for cells, used by fragment writers, block readers and
/// test collectors.
pub trait CellOutput {
    fn emit_cell(&mut self, row: &[u8], column: &[u8], timestamp: i64, value: &[u8]) -> Result<()>;
    fn emit_erasure(&mut self, row: &[u8], column: &[u8], timestamp: i64) -> Result<()>;

    fn emit(&mut self, cell: &Cell) -> Result<()> {
        match &cell.value {
            Some(v) => self.emit_cell(cell.row(), cell.column(), cell.timestamp(), v),
            None => self.emit_erasure(cell.row(), cell.column(), cell.timestamp()),
        }
    }
}

impl CellOutput for Vec<Cell> {
    fn emit_cell(&mut self, row: &[u8], column: &[u8], timestamp: i64, value: &[u8]) -> Result<()> {
        self.push(Cell::new(
            Bytes::copy_from_slice(row),
            Bytes::copy_from_slice(column),
            timestamp,
            Bytes::copy_from_slice(value),
        ));
        Ok(())
    }

    fn emit_erasure(&mut self, row: &[u8], column: &[u8], timestamp: i64) -> Result<()> {
        self.push(Cell::erasure(
            Bytes::copy_from_slice(row),
            Bytes::copy_from_slice(column),
            timestamp,
        ));
        Ok(())
    }
}
