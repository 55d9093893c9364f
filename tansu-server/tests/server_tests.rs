//! Tablet server write path: apply, optimistic concurrency, sync
//! durability, serialization, unload, and restart recovery.

use std::sync::Arc;

use tempfile::TempDir;

use tansu_core::buffer::CellBuffer;
use tansu_core::cell::{Cell, CellStream, CellStreamHandle};
use tansu_core::config::{CompactionConfig, FragmentConfig, ServerConfig};
use tansu_core::error::Error;
use tansu_core::predicate::ScanPredicate;
use tansu_core::tablet_name::TabletName;
use tansu_core::MAX_TXN;
use tansu_server::{
    DiskFragmentFactory, DiskFragmentLoader, ServerBits, StaticSchemaReader, TabletServer,
};
use tansu_storage::FixedConfigAdapter;

fn server_config(dir: &TempDir) -> ServerConfig {
    ServerConfig {
        root_dir: dir.path().to_path_buf(),
        location: "test-server".to_string(),
        // Serialization is driven explicitly through flush()
        mem_flush_size: usize::MAX,
        max_buffer_size: 64 * 1024,
        compaction: CompactionConfig {
            max_chain_length: 2,
            // Neutralize the size-ratio trigger; tests drive the
            // chain-length one
            size_ratio: 0,
            ..CompactionConfig::default()
        },
        ..ServerConfig::default()
    }
}

fn start_server(dir: &TempDir) -> TabletServer {
    let root = dir.path().to_path_buf();
    let config = server_config(dir);
    let fixed = Arc::new(FixedConfigAdapter::new(&root));
    let bits = ServerBits {
        schema_reader: Arc::new(StaticSchemaReader),
        config_reader: fixed.clone(),
        config_writer: fixed,
        fragment_loader: Arc::new(DiskFragmentLoader),
        fragment_factory: Arc::new(DiskFragmentFactory::new(
            &root,
            FragmentConfig { block_size: 512 },
        )),
        log_dir: root.join("log"),
        config,
    };
    TabletServer::start(bits).unwrap()
}

fn start_with_table(dir: &TempDir, table: &str) -> TabletServer {
    let server = start_server(dir);
    server
        .load_async(vec![TabletName::last(table)])
        .wait()
        .unwrap();
    server
}

fn pack(cells: &[Cell]) -> Vec<u8> {
    CellBuffer::pack(cells).data().to_vec()
}

fn collect(mut stream: CellStreamHandle) -> Vec<Cell> {
    let mut cells = Vec::new();
    while let Some(cell) = stream.next_cell().unwrap() {
        cells.push(cell);
    }
    cells
}

fn scan_all(server: &TabletServer, table: &str) -> Vec<Cell> {
    collect(server.scan(table, &ScanPredicate::all()).unwrap())
}

#[test]
fn test_apply_and_scan_round_trip() {
    let dir = TempDir::new().unwrap();
    let server = start_with_table(&dir, "web");

    let batch = pack(&[
        Cell::new("row2", "col1", 42, "val4"),
        Cell::new("row1", "col2", 42, "val2"),
        Cell::new("row1", "col1", 42, "val1"),
        Cell::new("row1", "col2", 23, "val3"),
    ]);
    let txn = server.apply("web", &batch, MAX_TXN).unwrap();
    assert!(txn > 0);

    let cells = scan_all(&server, "web");
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
            (b"row2".to_vec(), b"col1".to_vec(), 42),
        ]
    );
}

#[test]
fn test_apply_unknown_table() {
    let dir = TempDir::new().unwrap();
    let server = start_server(&dir);
    let batch = pack(&[Cell::new("r", "c", 1, "v")]);
    assert!(matches!(
        server.apply("nope", &batch, MAX_TXN),
        Err(Error::TableNotLoaded { .. })
    ));
}

#[test]
fn test_apply_rejects_oversize_buffer() {
    let dir = TempDir::new().unwrap();
    let server = start_with_table(&dir, "web");
    let batch = pack(&[Cell::new("r", "c", 1, vec![0u8; 2048])]);

    let big = vec![0u8; server_config(&dir).max_buffer_size + 1];
    assert!(matches!(
        server.apply("web", &big, MAX_TXN),
        Err(Error::Value { .. })
    ));

    // A valid batch of ordinary size is fine
    server.apply("web", &batch, MAX_TXN).unwrap();
}

#[test]
fn test_optimistic_concurrency() {
    let dir = TempDir::new().unwrap();
    let server = start_with_table(&dir, "web");
    let batch1 = pack(&[Cell::new("shared-row", "c", 1, "first")]);
    let batch2 = pack(&[Cell::new("shared-row", "c", 2, "second")]);
    let batch3 = pack(&[Cell::new("shared-row", "c", 3, "third")]);

    // Unconditional applies both succeed
    let t1 = server.apply("web", &batch1, MAX_TXN).unwrap();
    let t2 = server.apply("web", &batch2, MAX_TXN).unwrap();
    assert!(t2 > t1);

    // Both observable after sync
    server.sync(t2).unwrap();
    let cells = scan_all(&server, "web");
    assert_eq!(cells.len(), 2);

    // Conditional on the pre-t2 state fails
    match server.apply("web", &batch3, t1) {
        Err(Error::MutationConflict { max_txn }) => assert_eq!(max_txn, t1),
        other => panic!("expected conflict, got {:?}", other.map(|_| ())),
    }
    assert_eq!(server.metrics().snapshot().mutation_conflicts, 1);

    // Conditional on the current state succeeds
    server.apply("web", &batch3, t2).unwrap();

    // An untouched row is never in conflict
    let other = pack(&[Cell::new("other-row", "c", 1, "v")]);
    server.apply("web", &other, t1).unwrap();
}

#[test]
fn test_conflict_applies_nothing() {
    let dir = TempDir::new().unwrap();
    let server = start_with_table(&dir, "web");

    let t1 = server
        .apply("web", &pack(&[Cell::new("r1", "c", 1, "v1")]), MAX_TXN)
        .unwrap();
    server
        .apply("web", &pack(&[Cell::new("r1", "c", 2, "v2")]), MAX_TXN)
        .unwrap();

    // A batch touching a fresh row and the conflicted row is atomic:
    // nothing lands
    let mixed = pack(&[
        Cell::new("fresh", "c", 9, "x"),
        Cell::new("r1", "c", 9, "x"),
    ]);
    assert!(server.apply("web", &mixed, t1).is_err());
    let cells = scan_all(&server, "web");
    assert!(cells.iter().all(|c| c.row() != b"fresh"));
}

#[test]
fn test_sync_waits_for_durability() {
    let dir = TempDir::new().unwrap();
    let server = start_with_table(&dir, "web");

    let ticket = server.apply_async(
        "web",
        &pack(&[Cell::new("r", "c", 1, "v")]),
        MAX_TXN,
        true,
    );
    let txn = ticket.wait().unwrap();
    assert!(server.last_durable_txn() >= txn);

    // sync past the last commit clamps to it
    let synced = server.sync(MAX_TXN).unwrap();
    assert_eq!(synced, txn);
}

#[test]
fn test_erasure_suppression_in_scan() {
    let dir = TempDir::new().unwrap();
    let server = start_with_table(&dir, "web");

    server
        .apply(
            "web",
            &pack(&[
                Cell::new("r", "c", 10, "old"),
                Cell::new("r", "c", 20, "mid"),
                Cell::new("r", "c", 30, "new"),
                Cell::new("r", "d", 15, "other"),
            ]),
            MAX_TXN,
        )
        .unwrap();
    // Erase everything at (r, c) up to ts 20
    server
        .apply("web", &pack(&[Cell::erasure("r", "c", 20)]), MAX_TXN)
        .unwrap();

    let cells = scan_all(&server, "web");
    let reprs: Vec<String> = cells.iter().map(|c| format!("{:?}", c)).collect();
    assert_eq!(reprs, vec!["(r,c,30,new)", "(r,d,15,other)"]);
}

#[test]
fn test_history_limits_scan() {
    let dir = TempDir::new().unwrap();
    let server = start_with_table(&dir, "web");
    server
        .apply(
            "web",
            &pack(&[
                Cell::new("r", "c", 1, "v1"),
                Cell::new("r", "c", 2, "v2"),
                Cell::new("r", "c", 3, "v3"),
            ]),
            MAX_TXN,
        )
        .unwrap();

    let pred = ScanPredicate::parse("history = 1").unwrap();
    let cells = collect(server.scan("web", &pred).unwrap());
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].value(), b"v3");
}

#[test]
fn test_flush_serializes_mem_to_fragment() {
    let dir = TempDir::new().unwrap();
    let server = start_with_table(&dir, "web");

    server
        .apply("web", &pack(&[Cell::new("a", "c", 1, "v1")]), MAX_TXN)
        .unwrap();
    server.flush("web").unwrap();

    // The config now carries one fragment
    let fixed = FixedConfigAdapter::new(dir.path());
    use tansu_storage::config::ConfigReader;
    let configs = fixed.load_configs("web").unwrap();
    assert_eq!(configs[0].1.fragment_uris.len(), 1);

    // Mem and fragment data merge in scans
    server
        .apply("web", &pack(&[Cell::new("b", "c", 1, "v2")]), MAX_TXN)
        .unwrap();
    let cells = scan_all(&server, "web");
    assert_eq!(cells.len(), 2);

    server.flush("web").unwrap();
    let configs = fixed.load_configs("web").unwrap();
    assert_eq!(configs[0].1.fragment_uris.len(), 2);

    // Newest fragment first: an overwrite in a newer fragment wins
    server
        .apply("web", &pack(&[Cell::new("a", "c", 1, "v1-newer")]), MAX_TXN)
        .unwrap();
    server.flush("web").unwrap();
    let cells = scan_all(&server, "web");
    assert_eq!(cells[0].value(), b"v1-newer");
}

#[test]
fn test_unload_persists_and_reload_restores() {
    let dir = TempDir::new().unwrap();
    let server = start_with_table(&dir, "web");

    server
        .apply(
            "web",
            &pack(&[
                Cell::new("r1", "c", 1, "v1"),
                Cell::erasure("r2", "c", 5),
            ]),
            MAX_TXN,
        )
        .unwrap();
    server.unload_async(vec![TabletName::last("web")]).wait().unwrap();

    // The table is gone from the server
    assert!(matches!(
        server.scan("web", &ScanPredicate::all()),
        Err(Error::TableNotLoaded { .. })
    ));

    // Loading it back serves the flushed fragment
    server.load_async(vec![TabletName::last("web")]).wait().unwrap();
    let cells = scan_all(&server, "web");
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].value(), b"v1");

    // The erasure survived serialization: an older shadowed write stays
    // suppressed
    server
        .apply("web", &pack(&[Cell::new("r2", "c", 3, "shadowed")]), MAX_TXN)
        .unwrap();
    let cells = scan_all(&server, "web");
    assert_eq!(cells.len(), 1, "erasure in fragment must suppress older mem cell");
}

#[test]
fn test_restart_replays_log() {
    let dir = TempDir::new().unwrap();
    let (t2, conflict_row_txn);
    {
        let server = start_with_table(&dir, "web");
        server
            .apply("web", &pack(&[Cell::new("r1", "c", 1, "v1")]), MAX_TXN)
            .unwrap();
        t2 = server
            .apply("web", &pack(&[Cell::new("r2", "c", 2, "v2")]), MAX_TXN)
            .unwrap();
        conflict_row_txn = t2;
        server.sync(t2).unwrap();
        // Dropped without flushing: mem contents live only in the log
    }

    let server = start_with_table(&dir, "web");
    let cells = scan_all(&server, "web");
    assert_eq!(cells.len(), 2);
    assert_eq!(cells[0].value(), b"v1");
    assert_eq!(cells[1].value(), b"v2");

    // Replay restored the txn high-water mark and per-row history
    assert!(server.last_durable_txn() >= t2);
    let stale = pack(&[Cell::new("r2", "c", 9, "stale")]);
    assert!(matches!(
        server.apply("web", &stale, conflict_row_txn - 1),
        Err(Error::MutationConflict { .. })
    ));

    // New commits pick up after the replayed ones
    let t3 = server
        .apply("web", &pack(&[Cell::new("r3", "c", 3, "v3")]), MAX_TXN)
        .unwrap();
    assert!(t3 > t2);
}

#[test]
fn test_restart_after_flush_does_not_duplicate() {
    let dir = TempDir::new().unwrap();
    {
        let server = start_with_table(&dir, "web");
        server
            .apply("web", &pack(&[Cell::new("r1", "c", 1, "v1")]), MAX_TXN)
            .unwrap();
        server.flush("web").unwrap();
        server
            .apply("web", &pack(&[Cell::new("r2", "c", 2, "v2")]), MAX_TXN)
            .unwrap();
        server.sync(MAX_TXN).unwrap();
    }

    // The first cell is both in a fragment and in the log; replay plus
    // fragment merge must still yield exactly one copy
    let server = start_with_table(&dir, "web");
    let cells = scan_all(&server, "web");
    assert_eq!(cells.len(), 2);
}

#[test]
fn test_client_table_interface() {
    use tansu_core::table::Table;
    use tansu_server::TabletServerClient;

    let dir = TempDir::new().unwrap();
    let server = Arc::new(start_with_table(&dir, "web"));
    let client = TabletServerClient::new(Arc::clone(&server), "web");

    client.set(b"r", b"c", 5, b"v").unwrap();
    client.set(b"r", b"d", 5, b"gone").unwrap();
    client.erase(b"r", b"d", 5).unwrap();
    client.sync().unwrap();

    let cells = collect(client.scan(&ScanPredicate::all()).unwrap());
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].value(), b"v");
}

#[test]
fn test_schema_visible_for_loaded_table() {
    let dir = TempDir::new().unwrap();
    let server = start_with_table(&dir, "web");
    assert_eq!(server.schema("web").unwrap().name, "web");
    assert!(server.schema("nope").is_err());
}
