//! Meta-table routing: cached lookups, the last-range fast path, touched
//! handle flushing, and cross-tablet scans.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use tansu_core::cell::{CellStream, CellStreamHandle};
use tansu_core::error::{Error, Result};
use tansu_core::interval::{Interval, LowerBound, UpperBound};
use tansu_core::predicate::ScanPredicate;
use tansu_core::table::Table;
use tansu_core::tablet_name::TabletName;
use tansu_server::meta::{MetaCache, MetaTable};
use tansu_server::TableOpener;
use tansu_storage::config::{ConfigWriter, LOCATION_COLUMN};
use tansu_storage::{MemoryTable, MetaConfigAdapter, TabletConfig};

/// Table wrapper counting sync calls, to observe touched-handle flushing.
struct CountingTable {
    inner: Arc<MemoryTable>,
    syncs: AtomicUsize,
}

impl CountingTable {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryTable::shared(),
            syncs: AtomicUsize::new(0),
        })
    }
}

impl Table for CountingTable {
    fn set(&self, row: &[u8], column: &[u8], timestamp: i64, value: &[u8]) -> Result<()> {
        self.inner.set(row, column, timestamp, value)
    }

    fn erase(&self, row: &[u8], column: &[u8], timestamp: i64) -> Result<()> {
        self.inner.erase(row, column, timestamp)
    }

    fn sync(&self) -> Result<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        self.inner.sync()
    }

    fn scan(&self, pred: &ScanPredicate) -> Result<CellStreamHandle> {
        self.inner.scan(pred)
    }
}

/// Opens pre-registered locations, counting opens.
struct MockOpener {
    tables: HashMap<String, Arc<CountingTable>>,
    opens: AtomicUsize,
}

impl MockOpener {
    fn new(locations: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tables: locations
                .iter()
                .map(|loc| (loc.to_string(), CountingTable::new()))
                .collect(),
            opens: AtomicUsize::new(0),
        })
    }

    fn backing(&self, location: &str) -> Arc<CountingTable> {
        Arc::clone(&self.tables[location])
    }
}

impl TableOpener for MockOpener {
    fn open(&self, location: &str) -> Result<Arc<dyn Table>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.tables
            .get(location)
            .map(|t| Arc::clone(t) as Arc<dyn Table>)
            .ok_or_else(|| Error::runtime(format!("unknown location {}", location)))
    }
}

fn rows(lower: Option<&str>, upper: Option<&str>) -> Interval<Vec<u8>> {
    Interval::new(
        match lower {
            Some(v) => LowerBound::Exclusive(v.as_bytes().to_vec()),
            None => LowerBound::Unbounded,
        },
        match upper {
            Some(v) => UpperBound::Inclusive(v.as_bytes().to_vec()),
            None => UpperBound::Unbounded,
        },
    )
}

/// Register a tablet in the meta table: a config cell plus a location
/// cell.
fn register_tablet(
    meta: &Arc<MemoryTable>,
    root: &TempDir,
    table: &str,
    tablet_rows: Interval<Vec<u8>>,
    location: &str,
) {
    let adapter = MetaConfigAdapter::new(meta.clone() as Arc<dyn Table>, root.path());
    let name = TabletName::new(table, tablet_rows.upper.clone());
    adapter
        .save(table, &TabletConfig::new(tablet_rows, vec![]))
        .unwrap();
    meta.set(&name.encode(), LOCATION_COLUMN, 0, location.as_bytes())
        .unwrap();
}

fn fixture() -> (TempDir, Arc<MemoryTable>, Arc<MockOpener>, MetaTable) {
    let dir = TempDir::new().unwrap();
    let meta = MemoryTable::shared();
    let opener = MockOpener::new(&["server-a", "server-b"]);

    register_tablet(&meta, &dir, "web", rows(None, Some("m")), "server-a");
    register_tablet(&meta, &dir, "web", rows(Some("m"), None), "server-b");

    let table = MetaTable::new(
        meta.clone() as Arc<dyn Table>,
        "web",
        opener.clone() as Arc<dyn TableOpener>,
    );
    (dir, meta, opener, table)
}

fn scan_rows(table: &dyn Table, expr: &str) -> Vec<Vec<u8>> {
    let pred = ScanPredicate::parse(expr).unwrap();
    let mut stream = table.scan(&pred).unwrap();
    let mut out = Vec::new();
    while let Some(cell) = stream.next_cell().unwrap() {
        out.push(cell.row().to_vec());
    }
    out
}

#[test]
fn test_writes_route_by_row() {
    let (_dir, _meta, opener, table) = fixture();

    table.set(b"apple", b"c", 1, b"low").unwrap();
    table.set(b"zebra", b"c", 1, b"high").unwrap();
    table.set(b"m", b"c", 1, b"edge-low").unwrap();

    // Rows at or below "m" land on server-a, the rest on server-b
    let a = opener.backing("server-a");
    let b = opener.backing("server-b");
    assert_eq!(scan_rows(a.as_ref(), ""), vec![b"apple".to_vec(), b"m".to_vec()]);
    assert_eq!(scan_rows(b.as_ref(), ""), vec![b"zebra".to_vec()]);
}

#[test]
fn test_last_range_fast_path_avoids_reopens() {
    let (_dir, _meta, opener, table) = fixture();

    table.set(b"aaa", b"c", 1, b"v").unwrap();
    let opens_after_first = opener.opens.load(Ordering::SeqCst);
    assert_eq!(opens_after_first, 1);

    // More rows in the same range: no further opens
    table.set(b"abb", b"c", 1, b"v").unwrap();
    table.set(b"acc", b"c", 1, b"v").unwrap();
    assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

    // Crossing into the other range opens its location once
    table.set(b"zzz", b"c", 1, b"v").unwrap();
    table.set(b"zza", b"c", 1, b"v").unwrap();
    assert_eq!(opener.opens.load(Ordering::SeqCst), 2);

    // Bouncing back reuses the cached handle
    table.set(b"abc", b"c", 1, b"v").unwrap();
    assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
}

#[test]
fn test_sync_flushes_only_touched_handles() {
    let (_dir, _meta, opener, table) = fixture();

    table.set(b"apple", b"c", 1, b"v").unwrap();
    table.sync().unwrap();

    let a = opener.backing("server-a");
    let b = opener.backing("server-b");
    assert_eq!(a.syncs.load(Ordering::SeqCst), 1);
    assert_eq!(b.syncs.load(Ordering::SeqCst), 0);

    // Untouched since last sync: nothing flushes again
    table.sync().unwrap();
    assert_eq!(a.syncs.load(Ordering::SeqCst), 1);

    table.set(b"zebra", b"c", 1, b"v").unwrap();
    table.sync().unwrap();
    assert_eq!(a.syncs.load(Ordering::SeqCst), 1);
    assert_eq!(b.syncs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_scan_crosses_tablets_in_order() {
    let (_dir, _meta, _opener, table) = fixture();

    table.set(b"zebra", b"c", 1, b"4").unwrap();
    table.set(b"apple", b"c", 1, b"1").unwrap();
    table.set(b"mango", b"c", 1, b"3").unwrap();
    table.set(b"lemon", b"c", 1, b"2").unwrap();

    assert_eq!(
        scan_rows(&table, ""),
        vec![
            b"apple".to_vec(),
            b"lemon".to_vec(),
            b"mango".to_vec(),
            b"zebra".to_vec()
        ]
    );

    // A row-constrained scan only touches the matching range
    assert_eq!(scan_rows(&table, "row >= 'n'"), vec![b"zebra".to_vec()]);
}

#[test]
fn test_unknown_row_range_reports_not_loaded() {
    let dir = TempDir::new().unwrap();
    let meta = MemoryTable::shared();
    let opener = MockOpener::new(&["server-a"]);
    // Only rows up to "m" are registered; beyond is uncovered
    register_tablet(&meta, &dir, "web", rows(None, Some("m")), "server-a");

    let table = MetaTable::new(
        meta as Arc<dyn Table>,
        "web",
        opener as Arc<dyn TableOpener>,
    );
    table.set(b"apple", b"c", 1, b"v").unwrap();
    assert!(matches!(
        table.set(b"zebra", b"c", 1, b"v"),
        Err(Error::TabletNotLoaded { .. })
    ));
}

#[test]
fn test_cache_lookup_and_invalidation() {
    let (dir, meta, _opener, _table) = fixture();

    let mut cache = MetaCache::new(meta.clone() as Arc<dyn Table>);
    let entry = cache.lookup("web", b"apple").unwrap();
    assert_eq!(entry.location, "server-a");
    assert_eq!(cache.len(), 1);

    // A cached hit doesn't grow the cache
    cache.lookup("web", b"banana").unwrap();
    assert_eq!(cache.len(), 1);

    let entry = cache.lookup("web", b"zebra").unwrap();
    assert_eq!(entry.location, "server-b");
    assert_eq!(cache.len(), 2);

    // Rewriting meta moves the low range; a fresh overlapping lookup
    // displaces the stale entry
    register_tablet(&meta, &dir, "web", rows(None, Some("m")), "server-b");
    cache.invalidate("web", b"apple");
    let entry = cache.lookup("web", b"apple").unwrap();
    assert_eq!(entry.location, "server-b");

    // A row in no registered table misses outright
    assert!(matches!(
        cache.lookup("other", b"apple"),
        Err(Error::TabletNotLoaded { .. })
    ));
}
