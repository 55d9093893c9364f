//! In-memory ordered cell buffer.
//!
//! The mem table is the write buffer of a tablet and the input to
//! serialization. Cells are kept in canonical order on a lock-free skip
//! list; writers are serialized a level up, readers iterate concurrently
//! without blocking them. A key conflict keeps the latest caller-supplied
//! cell (commit ordering is decided by the tablet server).

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use tansu_core::cell::{Cell, CellKey, CellStream};
use tansu_core::error::Result;
use tansu_core::predicate::ScanPredicate;

/// Fixed per-entry overhead used for size accounting
const ENTRY_OVERHEAD: usize = 64;

pub struct MemTable {
    map: SkipMap<CellKey, Option<Bytes>>,
    approx_size: AtomicUsize,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            approx_size: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, row: &[u8], column: &[u8], timestamp: i64, value: &[u8]) {
        self.insert(Cell::new(
            Bytes::copy_from_slice(row),
            Bytes::copy_from_slice(column),
            timestamp,
            Bytes::copy_from_slice(value),
        ));
    }

    pub fn erase(&self, row: &[u8], column: &[u8], timestamp: i64) {
        self.insert(Cell::erasure(
            Bytes::copy_from_slice(row),
            Bytes::copy_from_slice(column),
            timestamp,
        ));
    }

    pub fn insert(&self, cell: Cell) {
        let size = ENTRY_OVERHEAD
            + cell.key.row.len()
            + cell.key.column.len()
            + cell.value.as_ref().map_or(0, |v| v.len());
        self.map.insert(cell.key, cell.value);
        self.approx_size.fetch_add(size, Ordering::Relaxed);
    }

    pub fn cell_count(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate bytes held, including replaced revisions until the
    /// table is dropped.
    pub fn approx_size(&self) -> usize {
        self.approx_size.load(Ordering::Relaxed)
    }

    /// Stream cells (including erasures) matching the predicate in
    /// canonical order. The scanner owns a handle to the table and sees
    /// an evolving but always-ordered view.
    pub fn scan(self: &Arc<Self>, pred: ScanPredicate) -> MemScanner {
        MemScanner {
            table: Arc::clone(self),
            pred,
            last: None,
        }
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemScanner {
    table: Arc<MemTable>,
    pred: ScanPredicate,
    last: Option<CellKey>,
}

impl CellStream for MemScanner {
    fn next_cell(&mut self) -> Result<Option<Cell>> {
        loop {
            let entry = match &self.last {
                None => self.table.map.front(),
                Some(key) => self.table.map.lower_bound(Bound::Excluded(key)),
            };
            let entry = match entry {
                Some(e) => e,
                None => return Ok(None),
            };
            let key = entry.key().clone();
            let value = entry.value().clone();
            self.last = Some(key.clone());
            if self.pred.matches_key(&key) {
                return Ok(Some(Cell { key, value }));
            }
        }
    }
}

/// A standalone in-memory table: a [`MemTable`] behind the client
/// [`Table`] interface. Backs the meta table in small deployments and
/// tests.
///
/// [`Table`]: tansu_core::table::Table
pub struct MemoryTable {
    mem: Arc<MemTable>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self {
            mem: Arc::new(MemTable::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl tansu_core::table::Table for MemoryTable {
    fn set(&self, row: &[u8], column: &[u8], timestamp: i64, value: &[u8]) -> Result<()> {
        self.mem.set(row, column, timestamp, value);
        Ok(())
    }

    fn erase(&self, row: &[u8], column: &[u8], timestamp: i64) -> Result<()> {
        self.mem.erase(row, column, timestamp);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn scan(&self, pred: &ScanPredicate) -> Result<tansu_core::cell::CellStreamHandle> {
        // Suppress erased cells and honor history, like a server scan
        let source: tansu_core::cell::CellStreamHandle = Box::new(self.mem.scan(pred.clone()));
        let opts = crate::merge::MergeOptions {
            keep_erasures: false,
            history: pred.history(),
        };
        Ok(Box::new(crate::merge::CellMerge::new(vec![source], opts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(table: &Arc<MemTable>, pred: &str) -> Vec<Cell> {
        let mut scan = table.scan(ScanPredicate::parse(pred).unwrap());
        let mut out = Vec::new();
        while let Some(cell) = scan.next_cell().unwrap() {
            out.push(cell);
        }
        out
    }

    #[test]
    fn test_canonical_iteration_order() {
        let table = Arc::new(MemTable::new());
        table.set(b"row2", b"col1", 42, b"val4");
        table.set(b"row1", b"col2", 23, b"val3");
        table.set(b"row1", b"col1", 42, b"val1");
        table.set(b"row1", b"col2", 42, b"val2");
        table.erase(b"row1", b"col3", 23);

        let cells = collect(&table, "");
        let keys: Vec<_> = cells
            .iter()
            .map(|c| (c.row().to_vec(), c.column().to_vec(), c.timestamp()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (b"row1".to_vec(), b"col1".to_vec(), 42),
                (b"row1".to_vec(), b"col2".to_vec(), 42),
                (b"row1".to_vec(), b"col2".to_vec(), 23),
                (b"row1".to_vec(), b"col3".to_vec(), 23),
                (b"row2".to_vec(), b"col1".to_vec(), 42),
            ]
        );
        assert!(cells[3].is_erasure());
    }

    #[test]
    fn test_conflict_keeps_replacement() {
        let table = Arc::new(MemTable::new());
        table.set(b"r", b"c", 5, b"old");
        table.set(b"r", b"c", 5, b"new");
        let cells = collect(&table, "");
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].value(), b"new");

        // An erasure replaces a value at the same key outright
        table.erase(b"r", b"c", 5);
        let cells = collect(&table, "");
        assert!(cells[0].is_erasure());
    }

    #[test]
    fn test_scan_filters() {
        let table = Arc::new(MemTable::new());
        table.set(b"a", b"f:x", 1, b"v1");
        table.set(b"b", b"f:y", 2, b"v2");
        table.set(b"c", b"g:z", 3, b"v3");

        let cells = collect(&table, "row >= 'b'");
        assert_eq!(cells.len(), 2);

        let cells = collect(&table, "column ~= 'f:'");
        assert_eq!(cells.len(), 2);

        let cells = collect(&table, "time >= @2 and time <= @2");
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].value(), b"v2");
    }

    #[test]
    fn test_size_accounting_grows() {
        let table = Arc::new(MemTable::new());
        assert_eq!(table.approx_size(), 0);
        table.set(b"row", b"col", 1, b"0123456789");
        assert!(table.approx_size() >= 10);
    }
}
