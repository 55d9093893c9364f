//! Tablet config persistence: fixed state files and meta-table cells,
//! including repair of overlaps and gaps.

use std::sync::Arc;

use tempfile::TempDir;

use tansu_core::cell::CellStream;
use tansu_core::error::Error;
use tansu_core::interval::{Interval, LowerBound, UpperBound};
use tansu_core::table::Table;
use tansu_core::tablet_name::TabletName;
use tansu_storage::config::{ConfigReader, ConfigWriter};
use tansu_storage::{FixedConfigAdapter, MemoryTable, MetaConfigAdapter, TabletConfig};

fn rows(
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
) -> Interval<Vec<u8>> {
    Interval::new(
        match lower {
            Some(v) => LowerBound::Exclusive(v.to_vec()),
            None => LowerBound::Unbounded,
        },
        match upper {
            Some(v) => UpperBound::Inclusive(v.to_vec()),
            None => UpperBound::Unbounded,
        },
    )
}

//----------------------------------------------------------------------------
// Fixed adapter
//----------------------------------------------------------------------------

#[test]
fn test_fixed_save_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let adapter = FixedConfigAdapter::new(dir.path());

    let uris = vec![
        dir.path().join("web/frag-1").to_string_lossy().into_owned(),
        dir.path().join("web/frag-0").to_string_lossy().into_owned(),
    ];
    let config = TabletConfig::new(Interval::all(), uris.clone());
    adapter.save("web", &config).unwrap();

    let configs = adapter.load_configs("web").unwrap();
    assert_eq!(configs.len(), 1);
    let (name, loaded) = &configs[0];
    assert_eq!(name, &TabletName::last("web"));
    assert!(loaded.rows.is_infinite());
    assert_eq!(loaded.fragment_uris, uris);

    // No temp file is left behind
    assert!(!dir.path().join("web").join("state.tmp").exists());

    // load() by name agrees
    let loaded = adapter.load(&TabletName::last("web")).unwrap();
    assert_eq!(loaded.fragment_uris, uris);
}

#[test]
fn test_fixed_missing_table_is_empty_config() {
    let dir = TempDir::new().unwrap();
    let adapter = FixedConfigAdapter::new(dir.path());
    let configs = adapter.load_configs("never-saved").unwrap();
    assert_eq!(configs.len(), 1);
    assert!(configs[0].1.fragment_uris.is_empty());
    assert!(configs[0].1.rows.is_infinite());
}

#[test]
fn test_fixed_rejects_restricted_rows() {
    let dir = TempDir::new().unwrap();
    let adapter = FixedConfigAdapter::new(dir.path());
    let config = TabletConfig::new(rows(Some(b"a"), None), vec![]);
    assert!(matches!(
        adapter.save("web", &config),
        Err(Error::Value { .. })
    ));
}

#[test]
fn test_uri_outside_root_is_rejected() {
    let dir = TempDir::new().unwrap();
    let adapter = FixedConfigAdapter::new(dir.path());
    let config = TabletConfig::new(Interval::all(), vec!["/elsewhere/frag".to_string()]);
    assert!(matches!(
        adapter.save("web", &config),
        Err(Error::Value { .. })
    ));
}

//----------------------------------------------------------------------------
// Meta adapter
//----------------------------------------------------------------------------

fn meta_fixture() -> (TempDir, Arc<MemoryTable>, MetaConfigAdapter) {
    let dir = TempDir::new().unwrap();
    let meta = MemoryTable::shared();
    let adapter = MetaConfigAdapter::new(meta.clone(), dir.path());
    (dir, meta, adapter)
}

fn uri_in(dir: &TempDir, name: &str) -> String {
    dir.path().join("web").join(name).to_string_lossy().into_owned()
}

#[test]
fn test_meta_save_load_round_trip() {
    let (dir, _meta, adapter) = meta_fixture();

    let low = TabletConfig::new(rows(None, Some(b"m")), vec![uri_in(&dir, "frag-low")]);
    let high = TabletConfig::new(rows(Some(b"m"), None), vec![uri_in(&dir, "frag-high")]);
    adapter.save("web", &low).unwrap();
    adapter.save("web", &high).unwrap();
    adapter.sync().unwrap();

    let configs = adapter.load_configs("web").unwrap();
    assert_eq!(configs.len(), 2);
    assert_eq!(configs[0].1, low);
    assert_eq!(configs[1].1, high);
    assert_eq!(configs[0].0, TabletName::finite("web", "m"));
    assert_eq!(configs[1].0, TabletName::last("web"));

    // Another table's cells don't leak into this one
    assert!(adapter.load_configs("other").unwrap().is_empty());

    // Point lookup by tablet name
    let loaded = adapter.load(&TabletName::finite("web", "m")).unwrap();
    assert_eq!(loaded, low);
    assert!(matches!(
        adapter.load(&TabletName::finite("web", "zz")),
        Err(Error::TabletNotLoaded { .. })
    ));
}

#[test]
fn test_meta_gap_repair() {
    let (dir, _meta, adapter) = meta_fixture();

    // Tablet boundaries leave (g, m] uncovered
    adapter
        .save("web", &TabletConfig::new(rows(None, Some(b"g")), vec![uri_in(&dir, "a")]))
        .unwrap();
    adapter
        .save("web", &TabletConfig::new(rows(Some(b"m"), None), vec![uri_in(&dir, "b")]))
        .unwrap();

    let configs = adapter.load_configs("web").unwrap();
    assert_eq!(configs.len(), 2);
    // The second tablet was expanded down to close the gap
    assert_eq!(configs[1].1.rows, rows(Some(b"g"), None));

    // The repair was written back: a second scan is already clean
    let configs = adapter.load_configs("web").unwrap();
    assert_eq!(configs[1].1.rows, rows(Some(b"g"), None));
}

#[test]
fn test_meta_overlap_repair_drops_partial_split() {
    let (dir, _meta, adapter) = meta_fixture();

    // A crash mid-split leaves the low child plus the unsplit parent
    adapter
        .save("web", &TabletConfig::new(rows(None, Some(b"m")), vec![uri_in(&dir, "child")]))
        .unwrap();
    adapter
        .save("web", &TabletConfig::new(rows(None, None), vec![uri_in(&dir, "parent")]))
        .unwrap();

    let configs = adapter.load_configs("web").unwrap();
    assert_eq!(configs.len(), 1);
    assert!(configs[0].1.rows.is_infinite());
    assert_eq!(configs[0].1.fragment_uris, vec![uri_in(&dir, "parent")]);

    // The stale child cell was erased from meta
    let configs = adapter.load_configs("web").unwrap();
    assert_eq!(configs.len(), 1);
}

#[test]
fn test_meta_uncorrectable_overlap() {
    let (dir, _meta, adapter) = meta_fixture();

    // Overlapping tablets with different lower bounds are not a split
    adapter
        .save("web", &TabletConfig::new(rows(None, Some(b"m")), vec![uri_in(&dir, "a")]))
        .unwrap();
    adapter
        .save("web", &TabletConfig::new(rows(Some(b"c"), None), vec![uri_in(&dir, "b")]))
        .unwrap();

    assert!(matches!(
        adapter.load_configs("web"),
        Err(Error::Runtime { .. })
    ));
}

#[test]
fn test_meta_uris_stored_relative() {
    let (dir, meta, adapter) = meta_fixture();

    adapter
        .save("web", &TabletConfig::new(rows(None, None), vec![uri_in(&dir, "frag-9")]))
        .unwrap();

    // The raw cell value holds the root-relative URI
    let pred = tansu_core::ScanPredicate::parse("column = 'config'").unwrap();
    let mut stream = meta.scan(&pred).unwrap();
    let cell = stream.next_cell().unwrap().unwrap();
    let value = String::from_utf8(cell.value().to_vec()).unwrap();
    assert!(value.contains("web/frag-9"));
    assert!(!value.contains(dir.path().to_string_lossy().as_ref()));

    // And resolves back to an absolute URI on load
    let configs = adapter.load_configs("web").unwrap();
    assert_eq!(configs[0].1.fragment_uris, vec![uri_in(&dir, "frag-9")]);
}
