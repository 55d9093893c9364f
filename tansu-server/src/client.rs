//! In-process client handle.
//!
//! Adapts one table of a [`TabletServer`] to the client [`Table`]
//! interface: single-cell mutations pack into one-cell apply batches,
//! `sync` waits on the last assigned commit.

use std::sync::Arc;

use tansu_core::buffer::CellBuffer;
use tansu_core::cell::{Cell, CellStreamHandle};
use tansu_core::error::Result;
use tansu_core::predicate::ScanPredicate;
use tansu_core::table::Table;
use tansu_core::MAX_TXN;

use crate::server::TabletServer;

pub struct TabletServerClient {
    server: Arc<TabletServer>,
    table: String,
}

impl TabletServerClient {
    pub fn new(server: Arc<TabletServer>, table: impl Into<String>) -> Self {
        Self {
            server,
            table: table.into(),
        }
    }

    fn apply_one(&self, cell: Cell) -> Result<()> {
        let packed = CellBuffer::pack(&[cell]);
        self.server
            .apply(&self.table, packed.data(), MAX_TXN)
            .map(|_| ())
    }
}

impl Table for TabletServerClient {
    fn set(&self, row: &[u8], column: &[u8], timestamp: i64, value: &[u8]) -> Result<()> {
        self.apply_one(Cell::new(
            row.to_vec(),
            column.to_vec(),
            timestamp,
            value.to_vec(),
        ))
    }

    fn erase(&self, row: &[u8], column: &[u8], timestamp: i64) -> Result<()> {
        self.apply_one(Cell::erasure(row.to_vec(), column.to_vec(), timestamp))
    }

    fn sync(&self) -> Result<()> {
        self.server.sync(MAX_TXN).map(|_| ())
    }

    fn scan(&self, pred: &ScanPredicate) -> Result<CellStreamHandle> {
        self.server.scan(&self.table, pred)
    }
}
