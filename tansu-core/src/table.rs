//! Client-side table interface.
//!
//! Everything that can be written to and scanned like a table implements
//! this trait: a tablet server handle, the meta-routing client, and the
//! in-memory tables used by tests. Implementations are internally
//! synchronized; mutation batches are not atomic across calls.

use crate::cell::CellStreamHandle;
use crate::error::Result;
use crate::predicate::ScanPredicate;

pub trait Table: Send + Sync {
    /// Set a cell value.
    fn set(&self, row: &[u8], column: &[u8], timestamp: i64, value: &[u8]) -> Result<()>;

    /// Write an erasure for the cell and everything older at that key.
    fn erase(&self, row: &[u8], column: &[u8], timestamp: i64) -> Result<()>;

    /// Block until previous mutations through this handle are durable.
    fn sync(&self) -> Result<()>;

    /// Stream cells matching the predicate in canonical order.
    fn scan(&self, pred: &ScanPredicate) -> Result<CellStreamHandle>;
}
