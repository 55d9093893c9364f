//! Tablet config persistence.
//!
//! A tablet's durable state is its row range plus the ordered fragment
//! URIs backing it. Configs live either as cells in the meta table
//! (row = encoded tablet name, column `config`) or, for fixed tables, as
//! a local `<root>/<table>/state` file written with a temp-file-then-
//! rename discipline. Both share one JSON serialization with fragment
//! URIs stored relative to the data root.
//!
//! The meta reader also repairs the meta index while scanning: a tablet
//! overlapping its predecessor is the leftover of a mid-split crash (the
//! stale predecessor cell is deleted), and a gap before a tablet is
//! closed by expanding that tablet's lower bound.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tansu_core::cell::{Cell, CellStream};
use tansu_core::error::{Error, Result};
use tansu_core::interval::{Interval, IntervalSet, LowerBound, UpperBound};
use tansu_core::predicate::{prefix_interval, ScanPredicate};
use tansu_core::repr;
use tansu_core::table::Table;
use tansu_core::tablet_name::TabletName;

pub const CONFIG_COLUMN: &[u8] = b"config";
pub const LOCATION_COLUMN: &[u8] = b"location";

/// Persisted per-tablet state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletConfig {
    pub rows: Interval<Vec<u8>>,
    /// Fragment URIs, newest first
    pub fragment_uris: Vec<String>,
}

impl TabletConfig {
    pub fn new(rows: Interval<Vec<u8>>, fragment_uris: Vec<String>) -> Self {
        Self {
            rows,
            fragment_uris,
        }
    }

    pub fn empty() -> Self {
        Self {
            rows: Interval::all(),
            fragment_uris: Vec::new(),
        }
    }
}

/// Loads tablet configs through a port; the meta and fixed adapters below
/// are the two implementations.
pub trait ConfigReader: Send + Sync {
    /// Load every config for a table, in row order, repairing damage
    /// where the backend supports it.
    fn load_configs(&self, table: &str) -> Result<Vec<(TabletName, TabletConfig)>>;

    /// Load the config for one tablet.
    fn load(&self, name: &TabletName) -> Result<TabletConfig>;
}

/// Persists tablet configs.
pub trait ConfigWriter: Send + Sync {
    fn save(&self, table: &str, config: &TabletConfig) -> Result<()>;

    /// Block until previous saves are durable.
    fn sync(&self) -> Result<()>;
}

//----------------------------------------------------------------------------
// Serialization
//----------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigState {
    fragments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_row: Option<String>,
}

/// Serialize a config with URIs made relative to the root.
fn config_to_json(config: &TabletConfig, root: &Path) -> Result<String> {
    let fragments = config
        .fragment_uris
        .iter()
        .map(|uri| unroot_uri(root, uri))
        .collect::<Result<Vec<_>>>()?;

    let min_row = match &config.rows.lower {
        LowerBound::Unbounded => None,
        LowerBound::Exclusive(v) => Some(repr::repr_bytes(v)),
        LowerBound::Inclusive(_) => {
            return Err(Error::value("config has invalid lower bound"));
        }
    };

    serde_json::to_string(&ConfigState { fragments, min_row })
        .map_err(|e| Error::value(format!("failed to serialize config: {}", e)))
}

/// Parse a config cell: the row carries the tablet name (and upper
/// bound), the value the rest.
fn config_from_cell(row: &[u8], value: &[u8], root: &Path) -> Result<(TabletName, TabletConfig)> {
    let name = TabletName::decode(row)?;
    let state: ConfigState = serde_json::from_slice(value)
        .map_err(|e| Error::value(format!("bad config cell for {}: {}", name, e)))?;

    let fragment_uris = state
        .fragments
        .iter()
        .map(|uri| resolve_uri(root, uri))
        .collect();

    let lower = match &state.min_row {
        None => LowerBound::Unbounded,
        Some(s) => LowerBound::Exclusive(repr::parse_repr(s)?),
    };
    let rows = Interval::new(lower, name.last_row().clone());

    Ok((name, TabletConfig::new(rows, fragment_uris)))
}

/// Decode just the name and row range of a config cell. Fragment URIs
/// are left unresolved; routing callers don't need them.
pub fn tablet_rows_from_cell(row: &[u8], value: &[u8]) -> Result<(TabletName, Interval<Vec<u8>>)> {
    let (name, config) = config_from_cell(row, value, Path::new(""))?;
    Ok((name, config.rows))
}

/// Resolve a root-relative URI to an absolute one.
pub fn resolve_uri(root: &Path, uri: &str) -> String {
    root.join(uri).to_string_lossy().into_owned()
}

/// Make a URI relative to the root; a URI outside the root is an error.
pub fn unroot_uri(root: &Path, uri: &str) -> Result<String> {
    let rel = Path::new(uri)
        .strip_prefix(root)
        .map_err(|_| Error::value(format!("fragment URI not under root {:?}: {}", root, uri)))?;
    if rel.as_os_str().is_empty() {
        return Err(Error::value(format!(
            "fragment URI invalid after removing root {:?}: {}",
            root, uri
        )));
    }
    Ok(rel.to_string_lossy().into_owned())
}

//----------------------------------------------------------------------------
// Meta adapter
//----------------------------------------------------------------------------

/// Reads and writes configs as cells of the meta table.
pub struct MetaConfigAdapter {
    meta: Arc<dyn Table>,
    root: PathBuf,
}

impl MetaConfigAdapter {
    pub fn new(meta: Arc<dyn Table>, root: impl AsRef<Path>) -> Self {
        Self {
            meta,
            root: root.as_ref().to_path_buf(),
        }
    }

    fn config_scan(&self, rows: Interval<Vec<u8>>) -> Result<Vec<Cell>> {
        let pred = ScanPredicate::all()
            .with_rows(IntervalSet::from_interval(rows))
            .with_columns(IntervalSet::from_interval(Interval::point(
                CONFIG_COLUMN.to_vec(),
            )))
            .with_history(1);
        let mut stream = self.meta.scan(&pred)?;
        let mut cells = Vec::new();
        while let Some(cell) = stream.next_cell()? {
            cells.push(cell);
        }
        Ok(cells)
    }
}

impl ConfigReader for MetaConfigAdapter {
    fn load_configs(&self, table: &str) -> Result<Vec<(TabletName, TabletConfig)>> {
        info!(table, "scanning meta for tablet configs");

        let prefix = TabletName::table_prefix(table);
        let cells = self.config_scan(prefix_interval(&prefix))?;

        let mut configs: Vec<(TabletName, TabletConfig)> = Vec::new();
        let mut changed_meta = false;
        let mut prev: Option<Cell> = None;
        let mut prev_rows: Option<Interval<Vec<u8>>> = None;

        for cell in cells {
            let (name, mut config) = config_from_cell(cell.row(), cell.value(), &self.root)?;
            if name.table() != table {
                break;
            }

            // The lower bound this tablet should have: adjacent to the
            // previous tablet's upper bound, or unbounded for the first.
            // `None` means the previous tablet already covered the rest
            // of the row space, so anything after it overlaps.
            let expected: Option<LowerBound<Vec<u8>>> = match &prev_rows {
                None => Some(LowerBound::Unbounded),
                Some(rows) => rows.upper.adjacent_complement(),
            };

            let overlap = match &expected {
                Some(bound) => config.rows.lower.cmp_lower(bound).is_lt(),
                None => true,
            };

            if overlap {
                let prev_cell = prev.as_ref().expect("overlap requires a previous cell");
                warn!(cur = %name, "meta overlap detected");

                // Only the half-finished split case is correctable: both
                // cells describe ranges starting at the same point.
                let prev_lower = &prev_rows.as_ref().unwrap().lower;
                if config.rows.lower.cmp_lower(prev_lower).is_ne() {
                    return Err(Error::runtime(format!(
                        "uncorrectable overlap in meta table at {}",
                        name
                    )));
                }

                self.meta.erase(
                    prev_cell.row(),
                    prev_cell.column(),
                    prev_cell.timestamp(),
                )?;
                changed_meta = true;
                configs.pop();
            } else if let Some(bound) = expected {
                if bound.cmp_lower(&config.rows.lower).is_lt() {
                    warn!(cur = %name, "meta gap detected");

                    // Expand this tablet down to close the gap
                    config.rows = Interval::new(bound, config.rows.upper.clone());
                    self.meta.set(
                        cell.row(),
                        cell.column(),
                        cell.timestamp(),
                        config_to_json(&config, &self.root)?.as_bytes(),
                    )?;
                    changed_meta = true;
                }
            }

            prev_rows = Some(config.rows.clone());
            prev = Some(cell);
            configs.push((name, config));
        }

        if changed_meta {
            info!(table, "syncing meta corrections");
            self.meta.sync()?;
        }

        Ok(configs)
    }

    fn load(&self, name: &TabletName) -> Result<TabletConfig> {
        let cells = self.config_scan(Interval::point(name.encode()))?;
        match cells.first() {
            Some(cell) => {
                let (_, config) = config_from_cell(cell.row(), cell.value(), &self.root)?;
                Ok(config)
            }
            None => Err(Error::TabletNotLoaded {
                name: name.to_string(),
            }),
        }
    }
}

impl ConfigWriter for MetaConfigAdapter {
    fn save(&self, table: &str, config: &TabletConfig) -> Result<()> {
        let name = TabletName::new(table, config.rows.upper.clone());
        info!(tablet = %name, "saving meta config");

        self.meta.set(
            &name.encode(),
            CONFIG_COLUMN,
            0,
            config_to_json(config, &self.root)?.as_bytes(),
        )?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.meta.sync()
    }
}

//----------------------------------------------------------------------------
// Fixed adapter
//----------------------------------------------------------------------------

/// Persists the config of fixed (non-split) tables as
/// `<root>/<table>/state`.
pub struct FixedConfigAdapter {
    root: PathBuf,
}

impl FixedConfigAdapter {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn state_path(&self, table: &str) -> PathBuf {
        self.root.join(table).join("state")
    }
}

impl ConfigReader for FixedConfigAdapter {
    fn load_configs(&self, table: &str) -> Result<Vec<(TabletName, TabletConfig)>> {
        let name = TabletName::last(table);
        let path = self.state_path(table);
        let value = match std::fs::read(&path) {
            Ok(value) => value,
            // A table that has never been saved is a single empty tablet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(vec![(name, TabletConfig::empty())]);
            }
            Err(e) => {
                return Err(Error::io(format!("failed to read state {:?}", path), e));
            }
        };
        let (_, config) = config_from_cell(&name.encode(), &value, &self.root)?;
        Ok(vec![(name, config)])
    }

    fn load(&self, name: &TabletName) -> Result<TabletConfig> {
        if name.last_row() != &UpperBound::Unbounded {
            return Err(Error::TabletNotLoaded {
                name: name.to_string(),
            });
        }
        Ok(self.load_configs(name.table())?.remove(0).1)
    }
}

impl ConfigWriter for FixedConfigAdapter {
    fn save(&self, table: &str, config: &TabletConfig) -> Result<()> {
        if !config.rows.is_infinite() {
            return Err(Error::value(
                "fixed tablet config shouldn't have a restricted row range",
            ));
        }
        info!(table, "saving fixed config");

        let value = config_to_json(config, &self.root)?;
        let dir = self.root.join(table);
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("failed to create table dir {:?}", dir), e))?;

        // Write to a temp file, then rename over the old state
        let tmp = dir.join("state.tmp");
        std::fs::write(&tmp, value.as_bytes())
            .map_err(|e| Error::io(format!("failed to write temp config {:?}", tmp), e))?;
        if let Err(e) = std::fs::rename(&tmp, self.state_path(table)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(Error::io("failed to replace state file".to_string(), e));
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
