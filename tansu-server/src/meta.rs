//! Meta-table routing client.
//!
//! A [`MetaTable`] presents one user table while routing every mutation
//! and scan to the tablet server currently hosting the touched row. The
//! route comes from config cells in the meta table, cached as a sparse
//! interval map; stale cache entries are displaced whenever a fresh
//! lookup overlaps them. A last-range fast path skips the cache for runs
//! of nearby rows, and `sync` flushes exactly the tablet handles touched
//! since the previous sync.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use tansu_core::cell::{Cell, CellStream, CellStreamHandle};
use tansu_core::error::{Error, Result};
use tansu_core::interval::{Interval, LowerBound, UpperBound};
use tansu_core::predicate::ScanPredicate;
use tansu_core::repr;
use tansu_core::table::Table;
use tansu_core::tablet_name::TabletName;
use tansu_storage::config::{tablet_rows_from_cell, CONFIG_COLUMN, LOCATION_COLUMN};

use crate::ports::TableOpener;

/// One cached route: a row range and the location hosting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaEntry {
    pub rows: Interval<Vec<u8>>,
    pub location: String,
}

/// Sparse cache of meta lookups, keyed by encoded tablet name.
pub struct MetaCache {
    meta: Arc<dyn Table>,
    entries: BTreeMap<Vec<u8>, MetaEntry>,
}

impl MetaCache {
    pub fn new(meta: Arc<dyn Table>) -> Self {
        Self {
            meta,
            entries: BTreeMap::new(),
        }
    }

    /// Route a row of a table, consulting the meta table on a miss.
    pub fn lookup(&mut self, table: &str, row: &[u8]) -> Result<MetaEntry> {
        let probe = TabletName::finite(table, row).encode();
        let prefix = TabletName::table_prefix(table);

        // The covering tablet, if cached, is the first entry at or after
        // the probe point
        if let Some((key, entry)) = self.entries.range(probe.clone()..).next() {
            if key.starts_with(&prefix) && entry.rows.contains(&row.to_vec()) {
                return Ok(entry.clone());
            }
        }

        let (name, entry) = self.fetch(table, row, probe)?;
        debug!(tablet = %name, location = %entry.location, "meta lookup");

        // Displace anything the fresh range overlaps; the meta table is
        // the authority
        let rows = entry.rows.clone();
        self.entries
            .retain(|key, cached| !(key.starts_with(&prefix) && cached.rows.overlaps(&rows)));
        self.entries.insert(name.encode(), entry.clone());
        Ok(entry)
    }

    /// Forget the entry covering `row`, typically after a routing error.
    pub fn invalidate(&mut self, table: &str, row: &[u8]) {
        let prefix = TabletName::table_prefix(table);
        self.entries
            .retain(|key, cached| !(key.starts_with(&prefix) && cached.rows.contains(&row.to_vec())));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read the first config and location cells at or after the probe
    /// point.
    fn fetch(&self, table: &str, row: &[u8], probe: Vec<u8>) -> Result<(TabletName, MetaEntry)> {
        let pred = ScanPredicate::all()
            .with_row_interval(Interval::new(
                LowerBound::Inclusive(probe),
                UpperBound::Unbounded,
            ))
            .with_history(1);
        let mut stream = self.meta.scan(&pred)?;

        let mut meta_row: Option<Cell> = None;
        let mut config_cell: Option<Cell> = None;
        let mut location: Option<String> = None;
        while let Some(cell) = stream.next_cell()? {
            match &meta_row {
                None => meta_row = Some(cell.clone()),
                Some(first) if first.key.row != cell.key.row => break,
                _ => {}
            }
            if cell.column() == CONFIG_COLUMN {
                config_cell = Some(cell);
            } else if cell.column() == LOCATION_COLUMN {
                location = Some(String::from_utf8_lossy(cell.value()).into_owned());
            }
        }

        let not_loaded = || Error::TabletNotLoaded {
            name: format!("{}[{}]", table, repr::repr_bytes(row)),
        };
        let cell = config_cell.ok_or_else(not_loaded)?;
        let (name, rows) = tablet_rows_from_cell(cell.row(), cell.value())?;
        if name.table() != table || !rows.contains(&row.to_vec()) {
            return Err(not_loaded());
        }
        let location =
            location.ok_or_else(|| Error::runtime(format!("meta entry {} has no location", name)))?;
        Ok((name, MetaEntry { rows, location }))
    }
}

struct TabletHandle {
    table: Arc<dyn Table>,
    touched: bool,
}

struct MetaInner {
    cache: MetaCache,
    /// Open server handles by location ("locmap")
    tablet_cache: HashMap<String, TabletHandle>,
    /// Fast path: range and location of the last route
    last_rows: Interval<Vec<u8>>,
    last_location: Option<String>,
}

/// Routing view of one user table.
#[derive(Clone)]
pub struct MetaTable {
    shared: Arc<MetaShared>,
}

struct MetaShared {
    table_name: String,
    opener: Arc<dyn TableOpener>,
    inner: Mutex<MetaInner>,
}

impl MetaTable {
    pub fn new(
        meta: Arc<dyn Table>,
        table_name: impl Into<String>,
        opener: Arc<dyn TableOpener>,
    ) -> Self {
        Self {
            shared: Arc::new(MetaShared {
                table_name: table_name.into(),
                opener,
                inner: Mutex::new(MetaInner {
                    cache: MetaCache::new(meta),
                    tablet_cache: HashMap::new(),
                    // Empty: the first access always consults the cache
                    last_rows: Interval::new(
                        LowerBound::Exclusive(Vec::new()),
                        UpperBound::Exclusive(Vec::new()),
                    ),
                    last_location: None,
                }),
            }),
        }
    }

    /// Drop a cached route, forcing the next access to re-consult meta.
    pub fn invalidate(&self, row: &[u8]) {
        let mut inner = self.shared.inner.lock();
        inner.cache.invalidate(&self.shared.table_name, row);
        inner.last_location = None;
        inner.last_rows = Interval::new(
            LowerBound::Exclusive(Vec::new()),
            UpperBound::Exclusive(Vec::new()),
        );
    }
}

impl MetaShared {
    /// The tablet handle hosting `row`, via the last-range fast path,
    /// the meta cache, or a fresh lookup.
    fn tablet_for(&self, row: &[u8]) -> Result<Arc<dyn Table>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        if inner.last_location.is_none() || !inner.last_rows.contains(&row.to_vec()) {
            let entry = inner.cache.lookup(&self.table_name, row)?;
            if !inner.tablet_cache.contains_key(&entry.location) {
                let table = self.opener.open(&entry.location)?;
                inner.tablet_cache.insert(
                    entry.location.clone(),
                    TabletHandle {
                        table,
                        touched: false,
                    },
                );
            }
            inner.last_rows = entry.rows;
            inner.last_location = Some(entry.location);
        }

        let location = inner.last_location.as_ref().expect("route resolved above");
        let handle = inner
            .tablet_cache
            .get_mut(location)
            .expect("handle opened above");
        handle.touched = true;
        Ok(Arc::clone(&handle.table))
    }

    /// Route for scanning: the entry covering `row`, if any.
    fn route(&self, row: &[u8]) -> Result<Option<(MetaEntry, Arc<dyn Table>)>> {
        let mut inner = self.inner.lock();
        let entry = match inner.cache.lookup(&self.table_name, row) {
            Ok(entry) => entry,
            Err(Error::TabletNotLoaded { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if !inner.tablet_cache.contains_key(&entry.location) {
            let table = self.opener.open(&entry.location)?;
            inner.tablet_cache.insert(
                entry.location.clone(),
                TabletHandle {
                    table,
                    touched: false,
                },
            );
        }
        let handle = inner
            .tablet_cache
            .get_mut(&entry.location)
            .expect("handle opened above");
        handle.touched = true;
        let table = Arc::clone(&handle.table);
        Ok(Some((entry, table)))
    }
}

impl Table for MetaTable {
    fn set(&self, row: &[u8], column: &[u8], timestamp: i64, value: &[u8]) -> Result<()> {
        self.shared.tablet_for(row)?.set(row, column, timestamp, value)
    }

    fn erase(&self, row: &[u8], column: &[u8], timestamp: i64) -> Result<()> {
        self.shared.tablet_for(row)?.erase(row, column, timestamp)
    }

    /// Flush every tablet handle touched since the last sync.
    fn sync(&self) -> Result<()> {
        let touched: Vec<Arc<dyn Table>> = {
            let mut inner = self.shared.inner.lock();
            inner
                .tablet_cache
                .values_mut()
                .filter(|h| h.touched)
                .map(|h| {
                    h.touched = false;
                    Arc::clone(&h.table)
                })
                .collect()
        };
        for table in touched {
            table.sync()?;
        }
        Ok(())
    }

    fn scan(&self, pred: &ScanPredicate) -> Result<CellStreamHandle> {
        Ok(Box::new(MetaScanner {
            shared: Arc::clone(&self.shared),
            pred: pred.clone(),
            current: None,
            next_row: Some(Vec::new()),
        }))
    }
}

/// Scans tablet by tablet in row order, clipping the predicate to each
/// tablet's range.
struct MetaScanner {
    shared: Arc<MetaShared>,
    pred: ScanPredicate,
    current: Option<CellStreamHandle>,
    /// Lowest row of the space not yet covered; `None` when exhausted
    next_row: Option<Vec<u8>>,
}

impl CellStream for MetaScanner {
    fn next_cell(&mut self) -> Result<Option<Cell>> {
        loop {
            if let Some(stream) = &mut self.current {
                if let Some(cell) = stream.next_cell()? {
                    return Ok(Some(cell));
                }
                self.current = None;
            }

            let probe = match self.next_row.take() {
                Some(row) => row,
                None => return Ok(None),
            };
            let (entry, tablet) = match self.shared.route(&probe)? {
                Some(found) => found,
                None => return Ok(None),
            };

            // Where the next tablet starts
            self.next_row = match entry.rows.upper.adjacent_complement() {
                Some(LowerBound::Inclusive(v)) => Some(v),
                Some(LowerBound::Exclusive(v)) => {
                    // The least row after v
                    let mut succ = v;
                    succ.push(0x00);
                    Some(succ)
                }
                _ => None,
            };

            if self.pred.rows_overlap(&entry.rows) {
                let clipped = self.pred.clip_rows(&entry.rows);
                self.current = Some(tablet.scan(&clipped)?);
            }
        }
    }
}
