//! Tablet server.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Write Path                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ apply ──► decode + size gate                                 │
//! │       ──► [server lock] conflict check ► txn ► mem buffers   │
//! │       ──► log queue ──► log thread: append + fsync           │
//! │                          ──► durable: wake sync waiters      │
//! │ mem past threshold ──► freeze ──► serializer thread          │
//! │                          ──► fragment ──► chain head         │
//! │                          ──► config save ──► wake compactor  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One mutex guards the table map, per-row commit history, pending
//! transactions, and sync waiters. Commits enter the log queue while it
//! is held, so log order equals transaction order. The log thread,
//! serializer thread, compactor thread, and worker pool never hold it
//! across I/O.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use tansu_core::buffer::CellBuffer;
use tansu_core::cell::CellStreamHandle;
use tansu_core::config::ServerConfig;
use tansu_core::error::{Error, Result};
use tansu_core::metrics::Metrics;
use tansu_core::predicate::ScanPredicate;
use tansu_core::tablet_name::TabletName;
use tansu_core::MAX_TXN;
use tansu_storage::config::{ConfigReader, ConfigWriter};
use tansu_storage::{LogCommit, LogPlayer, LogWriter, MemTable};

use crate::compactor::{CompactionHost, CompactionJob, SharedCompactor, TabletChainInfo};
use crate::gc::{FragmentHandle, LocalFragmentGc};
use crate::ports::{FragmentFactory, FragmentLoader, SchemaReader, TableSchema};
use crate::scanner::{tablet_stream, ConcatStream};
use crate::tablet::{Tablet, TabletState};
use crate::txn::TransactionCounter;
use crate::worker::WorkerPool;

/// External collaborators and configuration wired into a server.
pub struct ServerBits {
    pub schema_reader: Arc<dyn SchemaReader>,
    pub config_reader: Arc<dyn ConfigReader>,
    pub config_writer: Arc<dyn ConfigWriter>,
    pub fragment_loader: Arc<dyn FragmentLoader>,
    pub fragment_factory: Arc<dyn FragmentFactory>,
    pub log_dir: PathBuf,
    pub config: ServerConfig,
}

/// Completion handle for an asynchronous server operation.
pub struct Ticket<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Ticket<T> {
    fn new() -> (Sender<Result<T>>, Ticket<T>) {
        let (tx, rx) = channel();
        (tx, Ticket { rx })
    }

    /// Block until the operation completes.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| Error::runtime("server dropped the operation"))?
    }
}

pub type ApplyTicket = Ticket<i64>;
pub type SyncTicket = Ticket<i64>;
pub type OpTicket = Ticket<()>;

struct Commit {
    table: String,
    txn: i64,
    cells: Bytes,
}

struct SerializeJob {
    table: String,
    name: TabletName,
    mem: Arc<MemTable>,
    last_commit: i64,
}

struct SyncWaiter {
    target: i64,
    tx: Sender<Result<i64>>,
}

struct TableState {
    schema: TableSchema,
    /// Sorted by row range upper bound
    tablets: Vec<Tablet>,
    /// Last commit txn per modified row, for optimistic checks
    row_commits: HashMap<Vec<u8>, i64>,
}

impl TableState {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            tablets: Vec::new(),
            row_commits: HashMap::new(),
        }
    }

    fn insert_tablet(&mut self, tablet: Tablet) {
        self.tablets.push(tablet);
        self.tablets
            .sort_by(|a, b| a.rows.upper.cmp_upper(&b.rows.upper));
    }

    fn tablet_for_row(&self, row: &[u8]) -> Option<&Tablet> {
        self.tablets.iter().find(|t| t.rows.contains(&row.to_vec()))
    }

    fn tablet_for_row_mut(&mut self, row: &[u8]) -> Option<&mut Tablet> {
        self.tablets
            .iter_mut()
            .find(|t| t.rows.contains(&row.to_vec()))
    }

    fn tablet_by_name(&self, name: &TabletName) -> Option<&Tablet> {
        self.tablets.iter().find(|t| &t.name == name)
    }

    fn tablet_by_name_mut(&mut self, name: &TabletName) -> Option<&mut Tablet> {
        self.tablets.iter_mut().find(|t| &t.name == name)
    }
}

struct ServerState {
    tables: HashMap<String, TableState>,
    /// Commits assigned but not yet durable
    pending_txns: BTreeSet<i64>,
    sync_waiters: Vec<SyncWaiter>,
    shutdown: bool,
}

struct Shared {
    bits: ServerBits,
    state: Mutex<ServerState>,
    txn: TransactionCounter,
    log_tx: Mutex<Option<Sender<Commit>>>,
    serialize_tx: Mutex<Option<Sender<SerializeJob>>>,
    /// Signaled whenever a serialization finishes (or fails)
    serialize_cv: Condvar,
    compactor: SharedCompactor,
    gc: LocalFragmentGc,
    metrics: Metrics,
}

pub struct TabletServer {
    shared: Arc<Shared>,
    worker: WorkerPool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TabletServer {
    pub fn start(bits: ServerBits) -> Result<TabletServer> {
        let log_writer = LogWriter::open(&bits.log_dir, bits.config.log.clone())?;
        let metrics = Metrics::new();

        let compactor = SharedCompactor::new(
            Arc::clone(&bits.fragment_loader),
            Arc::clone(&bits.fragment_factory),
            bits.config.compaction.clone(),
            metrics.clone(),
        );

        let (log_tx, log_rx) = channel::<Commit>();
        let (serialize_tx, serialize_rx) = channel::<SerializeJob>();

        let shared = Arc::new(Shared {
            bits,
            state: Mutex::new(ServerState {
                tables: HashMap::new(),
                pending_txns: BTreeSet::new(),
                sync_waiters: Vec::new(),
                shutdown: false,
            }),
            txn: TransactionCounter::new(),
            log_tx: Mutex::new(Some(log_tx)),
            serialize_tx: Mutex::new(Some(serialize_tx)),
            serialize_cv: Condvar::new(),
            compactor,
            gc: LocalFragmentGc::new(),
            metrics,
        });

        let shared_dyn: Arc<dyn CompactionHost> = Arc::clone(&shared) as Arc<dyn CompactionHost>;
        let host: Weak<dyn CompactionHost> = Arc::downgrade(&shared_dyn);
        shared.compactor.set_host(host);

        let mut threads = Vec::new();
        {
            let shared = Arc::clone(&shared);
            threads.push(
                std::thread::Builder::new()
                    .name("log-writer".to_string())
                    .spawn(move || log_loop(shared, log_rx, log_writer))
                    .expect("failed to spawn log thread"),
            );
        }
        {
            let shared = Arc::clone(&shared);
            threads.push(
                std::thread::Builder::new()
                    .name("serializer".to_string())
                    .spawn(move || serialize_loop(shared, serialize_rx))
                    .expect("failed to spawn serializer thread"),
            );
        }
        threads.push(shared.compactor.start());

        info!(location = %shared.bits.config.location, "tablet server started");

        Ok(TabletServer {
            shared,
            worker: WorkerPool::new(4, "tablet-worker"),
            threads: Mutex::new(threads),
        })
    }

    pub fn location(&self) -> &str {
        &self.shared.bits.config.location
    }

    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    pub fn compactor(&self) -> &SharedCompactor {
        &self.shared.compactor
    }

    pub fn last_durable_txn(&self) -> i64 {
        self.shared.txn.last_durable()
    }

    /// Schema of a loaded table.
    pub fn schema(&self, table: &str) -> Result<TableSchema> {
        let state = self.shared.state.lock();
        state
            .tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| Error::TableNotLoaded {
                name: table.to_string(),
            })
    }

    /// Apply a packed cell batch to a table.
    ///
    /// The batch commits only if no row it touches was modified after
    /// `commit_max_txn` (`MAX_TXN` disables the check). The whole batch
    /// is atomic. With `wait_for_sync` the ticket completes after the
    /// commit is durable; otherwise as soon as it is assigned.
    pub fn apply_async(
        &self,
        table: &str,
        packed: &[u8],
        commit_max_txn: i64,
        wait_for_sync: bool,
    ) -> ApplyTicket {
        let (tx, ticket) = Ticket::new();
        if let Err(e) = self
            .shared
            .apply_inner(table, packed, commit_max_txn, wait_for_sync, &tx)
        {
            if matches!(e, Error::MutationConflict { .. }) {
                self.shared.metrics.record_conflict();
            }
            let _ = tx.send(Err(e));
        }
        ticket
    }

    pub fn apply(&self, table: &str, packed: &[u8], commit_max_txn: i64) -> Result<i64> {
        self.apply_async(table, packed, commit_max_txn, false).wait()
    }

    /// Wait until `wait_for_txn` is durable; a target past the last
    /// assigned commit waits for the last assigned commit instead.
    pub fn sync_async(&self, wait_for_txn: i64) -> SyncTicket {
        let (tx, ticket) = Ticket::new();
        let mut state = self.shared.state.lock();
        let target = wait_for_txn.min(self.shared.txn.last_commit());
        if target <= self.shared.txn.last_durable() {
            let _ = tx.send(Ok(target));
        } else {
            state.sync_waiters.push(SyncWaiter { target, tx });
        }
        drop(state);
        ticket
    }

    pub fn sync(&self, wait_for_txn: i64) -> Result<i64> {
        self.sync_async(wait_for_txn).wait()
    }

    /// Load tablets: config and schema through their ports, fragments
    /// through the loader, then log replay, then ACTIVE.
    pub fn load_async(&self, tablets: Vec<TabletName>) -> OpTicket {
        let (tx, ticket) = Ticket::new();
        let shared = Arc::clone(&self.shared);
        self.worker.submit(move || {
            let mut result = Ok(());
            for name in &tablets {
                if let Err(e) = shared.load_one(name) {
                    error!(tablet = %name, error = %e, "tablet load failed");
                    result = Err(e);
                    break;
                }
            }
            let _ = tx.send(result);
        });
        ticket
    }

    /// Unload tablets: refuse new applies, drain pending commits, flush
    /// mem buffers, persist config, drop.
    pub fn unload_async(&self, tablets: Vec<TabletName>) -> OpTicket {
        let (tx, ticket) = Ticket::new();
        let shared = Arc::clone(&self.shared);
        self.worker.submit(move || {
            let mut result = Ok(());
            for name in &tablets {
                if let Err(e) = shared.unload_one(name) {
                    error!(tablet = %name, error = %e, "tablet unload failed");
                    result = Err(e);
                    break;
                }
            }
            let _ = tx.send(result);
        });
        ticket
    }

    /// Stream cells of `table` matching `pred`, merged across mem
    /// buffers and fragment chains in canonical order.
    pub fn scan(&self, table: &str, pred: &ScanPredicate) -> Result<CellStreamHandle> {
        let streams = {
            let state = self.shared.state.lock();
            let table_state = state.tables.get(table).ok_or_else(|| Error::TableNotLoaded {
                name: table.to_string(),
            })?;
            let mut parts: Vec<CellStreamHandle> = Vec::new();
            for tablet in &table_state.tablets {
                if !tablet.accepts_scans() || !pred.rows_overlap(&tablet.rows) {
                    continue;
                }
                let clipped = pred.clip_rows(&tablet.rows);
                parts.push(tablet_stream(&clipped, tablet.mem_sources(), &tablet.chain));
            }
            parts
        };
        self.shared.metrics.record_scan();
        Ok(Box::new(ConcatStream::new(streams)))
    }

    /// Force serialization of every non-empty mem buffer of a table and
    /// wait for it to finish.
    pub fn flush(&self, table: &str) -> Result<()> {
        let jobs = {
            let mut state = self.shared.state.lock();
            let table_state = state.tables.get_mut(table).ok_or_else(|| Error::TableNotLoaded {
                name: table.to_string(),
            })?;
            let mut jobs = Vec::new();
            for tablet in &mut table_state.tablets {
                if tablet.serializing || tablet.mem.is_empty() {
                    continue;
                }
                tablet.serializing = true;
                let mem = tablet.freeze_mem();
                jobs.push(SerializeJob {
                    table: table.to_string(),
                    name: tablet.name.clone(),
                    mem,
                    last_commit: tablet.last_commit,
                });
            }
            jobs
        };
        for job in jobs {
            self.shared.send_serialize(job)?;
        }

        // Wait for the serializer to drain this table
        let mut state = self.shared.state.lock();
        loop {
            let table_state = match state.tables.get(table) {
                Some(t) => t,
                None => return Ok(()),
            };
            if table_state.tablets.iter().any(|t| t.serializing) {
                self.shared.serialize_cv.wait(&mut state);
                continue;
            }
            if table_state.tablets.iter().any(|t| !t.frozen.is_empty()) {
                return Err(Error::runtime("serialization failed; frozen buffers remain"));
            }
            return Ok(());
        }
    }

    /// Stop accepting work and wind down the background threads.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            for waiter in state.sync_waiters.drain(..) {
                let _ = waiter.tx.send(Err(Error::runtime("server shutting down")));
            }
        }
        self.shared.log_tx.lock().take();
        self.shared.serialize_tx.lock().take();
        self.shared.compactor.shutdown();
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
        info!("tablet server stopped");
    }
}

impl Drop for TabletServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn apply_inner(
        &self,
        table: &str,
        packed: &[u8],
        commit_max_txn: i64,
        wait_for_sync: bool,
        tx: &Sender<Result<i64>>,
    ) -> Result<()> {
        // Allocator gate: oversize buffers never enter the server
        if packed.len() > self.bits.config.max_buffer_size {
            return Err(Error::value(format!(
                "cell buffer of {} bytes exceeds limit {}",
                packed.len(),
                self.bits.config.max_buffer_size
            )));
        }
        let buffer = CellBuffer::decode(Bytes::copy_from_slice(packed))?;

        let mut jobs = Vec::new();
        let txn;
        {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(Error::runtime("server is shutting down"));
            }
            let table_state = state.tables.get_mut(table).ok_or_else(|| {
                Error::TableNotLoaded {
                    name: table.to_string(),
                }
            })?;

            // Every row must land in an ACTIVE tablet
            for row in buffer.rows() {
                match table_state.tablet_for_row(row) {
                    Some(t) if t.accepts_applies() => {}
                    _ => {
                        return Err(Error::TabletNotLoaded {
                            name: format!(
                                "{}[{}]",
                                table,
                                tansu_core::repr::repr_bytes(row)
                            ),
                        })
                    }
                }
            }

            // Optimistic concurrency check
            if commit_max_txn != MAX_TXN {
                for row in buffer.rows() {
                    let last = table_state.row_commits.get(row).copied().unwrap_or(0);
                    if last > commit_max_txn {
                        return Err(Error::MutationConflict {
                            max_txn: commit_max_txn,
                        });
                    }
                }
            }

            txn = self.txn.assign_commit();
            for row in buffer.rows() {
                table_state.row_commits.insert(row.to_vec(), txn);
            }
            for cell in buffer.cells() {
                let tablet = table_state
                    .tablet_for_row_mut(cell.row())
                    .expect("tablet checked above");
                tablet.mem.insert(cell.clone());
                tablet.last_commit = txn;
            }

            // Freeze any buffer past the flush threshold
            let flush_size = self.bits.config.mem_flush_size;
            for tablet in &mut table_state.tablets {
                if !tablet.serializing && tablet.mem.approx_size() >= flush_size {
                    tablet.serializing = true;
                    let mem = tablet.freeze_mem();
                    jobs.push(SerializeJob {
                        table: table.to_string(),
                        name: tablet.name.clone(),
                        mem,
                        last_commit: tablet.last_commit,
                    });
                }
            }

            state.pending_txns.insert(txn);
            if wait_for_sync {
                state.sync_waiters.push(SyncWaiter {
                    target: txn,
                    tx: tx.clone(),
                });
            }

            // Enqueue under the lock so log order equals txn order
            let log_tx = self.log_tx.lock();
            log_tx
                .as_ref()
                .ok_or_else(|| Error::runtime("log writer is stopped"))?
                .send(Commit {
                    table: table.to_string(),
                    txn,
                    cells: buffer.data().clone(),
                })
                .map_err(|_| Error::runtime("log writer is stopped"))?;
        }

        for job in jobs {
            self.send_serialize(job)?;
        }
        self.metrics
            .record_apply(buffer.cell_count() as u64, packed.len() as u64);

        if !wait_for_sync {
            let _ = tx.send(Ok(txn));
        }
        Ok(())
    }

    fn send_serialize(&self, job: SerializeJob) -> Result<()> {
        self.serialize_tx
            .lock()
            .as_ref()
            .ok_or_else(|| Error::runtime("serializer is stopped"))?
            .send(job)
            .map_err(|_| Error::runtime("serializer is stopped"))
    }

    fn load_one(&self, name: &TabletName) -> Result<()> {
        // No compactions while chains are under construction
        let _pause = self.compactor.pause();
        info!(tablet = %name, "loading tablet");

        let config = self.bits.config_reader.load(name)?;
        let schema = self.bits.schema_reader.read_schema(name.table())?;

        let mut chain = Vec::new();
        for uri in &config.fragment_uris {
            let fragment = self.bits.fragment_loader.load(uri)?;
            let size = fragment.data_size();
            chain.push(FragmentHandle::new(uri.clone(), fragment, size));
        }

        {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(Error::runtime("server is shutting down"));
            }
            let table_state = state
                .tables
                .entry(name.table().to_string())
                .or_insert_with(|| TableState::new(schema));
            if table_state.tablet_by_name(name).is_some() {
                debug!(tablet = %name, "tablet already loaded");
                return Ok(());
            }
            let mut tablet = Tablet::new(name.clone(), config.rows.clone(), chain);
            tablet.transition(TabletState::LogReplaying)?;
            table_state.insert_tablet(tablet);
        }

        // Replay commits covering this tablet's rows
        let player = LogPlayer::new(&self.bits.log_dir);
        let table = name.table().to_string();
        let max_txn = player.replay(&table, &config.rows, &mut |commit| {
            let mut state = self.state.lock();
            let table_state = state
                .tables
                .get_mut(&table)
                .ok_or_else(|| Error::runtime("table vanished during replay"))?;
            for cell in &commit.cells {
                table_state
                    .row_commits
                    .insert(cell.row().to_vec(), commit.txn);
            }
            let tablet = table_state
                .tablet_by_name_mut(name)
                .ok_or_else(|| Error::runtime("tablet vanished during replay"))?;
            if !tablet.accepts_replay() {
                return Err(Error::runtime("tablet left replay state early"));
            }
            for cell in commit.cells {
                tablet.mem.insert(cell);
            }
            tablet.last_commit = tablet.last_commit.max(commit.txn);
            Ok(())
        })?;
        if max_txn > 0 {
            // Replayed commits are durable by construction
            self.txn.recover_to(max_txn);
        }

        {
            let mut state = self.state.lock();
            let tablet = state
                .tables
                .get_mut(name.table())
                .and_then(|t| t.tablet_by_name_mut(name))
                .ok_or_else(|| Error::runtime("tablet vanished during load"))?;
            tablet.transition(TabletState::Active)?;
        }
        info!(tablet = %name, "tablet active");
        Ok(())
    }

    fn unload_one(&self, name: &TabletName) -> Result<()> {
        info!(tablet = %name, "unloading tablet");
        let table = name.table().to_string();

        let drain_txn = {
            let mut state = self.state.lock();
            let tablet = match state
                .tables
                .get_mut(&table)
                .and_then(|t| t.tablet_by_name_mut(name))
            {
                Some(t) => t,
                // Unloading an unloaded tablet is a no-op ack
                None => return Ok(()),
            };
            tablet.transition(TabletState::Unloading)?;
            tablet.last_commit
        };

        // Drain: no new applies are accepted; wait out the pending ones
        self.txn.wait_durable(drain_txn);

        // Wait for in-flight serializations of this tablet
        {
            let mut state = self.state.lock();
            loop {
                let serializing = state
                    .tables
                    .get(&table)
                    .and_then(|t| t.tablet_by_name(name))
                    .map(|t| t.serializing)
                    .unwrap_or(false);
                if !serializing {
                    break;
                }
                self.serialize_cv.wait(&mut state);
            }
        }

        // Flush whatever is left in mem, as one fragment
        let mems = {
            let mut state = self.state.lock();
            let tablet = state
                .tables
                .get_mut(&table)
                .and_then(|t| t.tablet_by_name_mut(name))
                .ok_or_else(|| Error::runtime("tablet vanished during unload"))?;
            let mut mems = vec![std::mem::take(&mut tablet.mem)];
            mems.extend(tablet.frozen.drain(..).rev());
            mems.retain(|m| !m.is_empty());
            mems
        };
        if !mems.is_empty() {
            let handle = self.write_mems_fragment(&table, &mems)?;
            let mut state = self.state.lock();
            let tablet = state
                .tables
                .get_mut(&table)
                .and_then(|t| t.tablet_by_name_mut(name))
                .ok_or_else(|| Error::runtime("tablet vanished during unload"))?;
            tablet.chain.insert(0, handle);
        }

        // Persist the final chain, then drop the tablet
        let config = {
            let state = self.state.lock();
            state
                .tables
                .get(&table)
                .and_then(|t| t.tablet_by_name(name))
                .map(|t| t.config())
                .ok_or_else(|| Error::runtime("tablet vanished during unload"))?
        };
        self.bits.config_writer.save(&table, &config)?;
        self.bits.config_writer.sync()?;

        {
            let mut state = self.state.lock();
            if let Some(table_state) = state.tables.get_mut(&table) {
                table_state.tablets.retain(|t| &t.name != name);
                if table_state.tablets.is_empty() {
                    state.tables.remove(&table);
                }
            }
        }
        info!(tablet = %name, "tablet unloaded");
        Ok(())
    }

    /// Merge mem buffers (newest first) into a new fragment, erasures
    /// included.
    fn write_mems_fragment(
        &self,
        table: &str,
        mems: &[Arc<MemTable>],
    ) -> Result<Arc<FragmentHandle>> {
        use tansu_core::cell::CellStream;

        let sources: Vec<CellStreamHandle> = mems
            .iter()
            .map(|m| Box::new(m.scan(ScanPredicate::all())) as CellStreamHandle)
            .collect();
        let mut merge = tansu_storage::CellMerge::new(
            sources,
            tansu_storage::MergeOptions {
                keep_erasures: true,
                history: None,
            },
        );

        let (mut writer, uri) = self.bits.fragment_factory.start(table)?;
        while let Some(cell) = merge.next_cell()? {
            match &cell.value {
                Some(v) => writer.emit_cell(cell.row(), cell.column(), cell.timestamp(), v)?,
                None => writer.emit_erasure(cell.row(), cell.column(), cell.timestamp())?,
            }
        }
        let info = writer.finish()?;
        let fragment = self.bits.fragment_loader.load(&uri)?;
        self.metrics.record_fragment_written();
        Ok(FragmentHandle::new(uri, fragment, info.file_size))
    }
}

//----------------------------------------------------------------------------
// Background threads
//----------------------------------------------------------------------------

fn log_loop(shared: Arc<Shared>, rx: Receiver<Commit>, mut writer: LogWriter) {
    info!("log thread started");
    let batch_limit = shared.bits.config.log.group_commit_batch;

    loop {
        let first = match rx.recv() {
            Ok(commit) => commit,
            Err(_) => break,
        };
        let mut batch = vec![first];
        while batch.len() < batch_limit {
            match rx.try_recv() {
                Ok(commit) => batch.push(commit),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let written: Result<()> = (|| {
            for commit in &batch {
                writer.append(&LogCommit {
                    table: commit.table.clone(),
                    txn: commit.txn,
                    cells: commit.cells.clone(),
                })?;
                shared.metrics.record_log_write(commit.cells.len() as u64);
            }
            writer.sync()
        })();

        match written {
            Ok(()) => {
                shared.metrics.record_log_sync();
                let mut state = shared.state.lock();
                for commit in &batch {
                    shared.txn.set_durable(commit.txn);
                    state.pending_txns.remove(&commit.txn);
                }
                let durable = shared.txn.last_durable();
                state.sync_waiters.retain(|waiter| {
                    if waiter.target <= durable {
                        let _ = waiter.tx.send(Ok(waiter.target));
                        false
                    } else {
                        true
                    }
                });
            }
            Err(e) => {
                // A log failure voids the durability promise; fail
                // everything pending and stop the server
                error!(error = %e, "log write failed; shutting down");
                let mut state = shared.state.lock();
                state.shutdown = true;
                state.pending_txns.clear();
                for waiter in state.sync_waiters.drain(..) {
                    let _ = waiter
                        .tx
                        .send(Err(Error::runtime("commit log failed; server stopped")));
                }
                break;
            }
        }
    }
    info!("log thread exiting");
}

fn serialize_loop(shared: Arc<Shared>, rx: Receiver<SerializeJob>) {
    info!("serializer thread started");
    while let Ok(job) = rx.recv() {
        if let Err(e) = serialize_one(&shared, &job) {
            error!(tablet = %job.name, error = %e, "serialization failed");
            let mut state = shared.state.lock();
            if let Some(tablet) = state
                .tables
                .get_mut(&job.table)
                .and_then(|t| t.tablet_by_name_mut(&job.name))
            {
                // The frozen buffer stays scannable; only the flag clears
                tablet.serializing = false;
            }
            shared.serialize_cv.notify_all();
        }
    }
    info!("serializer thread exiting");
}

fn serialize_one(shared: &Arc<Shared>, job: &SerializeJob) -> Result<()> {
    // Never put a commit in a fragment before the log owns it
    shared.txn.wait_durable(job.last_commit);

    if job.mem.is_empty() {
        let mut state = shared.state.lock();
        if let Some(tablet) = state
            .tables
            .get_mut(&job.table)
            .and_then(|t| t.tablet_by_name_mut(&job.name))
        {
            tablet.frozen.retain(|m| !Arc::ptr_eq(m, &job.mem));
            tablet.serializing = false;
        }
        shared.serialize_cv.notify_all();
        return Ok(());
    }

    let handle = shared.write_mems_fragment(&job.table, std::slice::from_ref(&job.mem))?;
    debug!(tablet = %job.name, uri = %handle.uri(), "serialized mem buffer");

    let config = {
        let mut state = shared.state.lock();
        let tablet = state
            .tables
            .get_mut(&job.table)
            .and_then(|t| t.tablet_by_name_mut(&job.name))
            .ok_or_else(|| Error::runtime("tablet vanished during serialization"))?;
        tablet.frozen.retain(|m| !Arc::ptr_eq(m, &job.mem));
        tablet.chain.insert(0, handle);
        tablet.serializing = false;
        let config = tablet.config();
        shared.serialize_cv.notify_all();
        config
    };

    shared.bits.config_writer.save(&job.table, &config)?;
    shared.bits.config_writer.sync()?;
    shared.compactor.wakeup();
    Ok(())
}

//----------------------------------------------------------------------------
// Compaction host
//----------------------------------------------------------------------------

impl CompactionHost for Shared {
    fn snapshot_chains(&self) -> Vec<TabletChainInfo> {
        let state = self.state.lock();
        state
            .tables
            .iter()
            .flat_map(|(table, table_state)| {
                table_state
                    .tablets
                    .iter()
                    .filter(|t| t.state == TabletState::Active)
                    .map(|t| TabletChainInfo {
                        table: table.clone(),
                        name: t.name.clone(),
                        rows: t.rows.clone(),
                        chain: t.chain.clone(),
                    })
            })
            .collect()
    }

    fn splice(&self, job: &CompactionJob, replacement: Option<Arc<FragmentHandle>>) -> Result<()> {
        let in_job =
            |h: &Arc<FragmentHandle>| job.fragments.iter().any(|f| Arc::ptr_eq(f, h));

        let configs = {
            let mut state = self.state.lock();
            let mut configs = Vec::new();
            if let Some(table_state) = state.tables.get_mut(&job.table) {
                for name in &job.tablets {
                    let tablet = match table_state.tablet_by_name_mut(name) {
                        Some(t) => t,
                        None => {
                            warn!(tablet = %name, "tablet gone before splice");
                            continue;
                        }
                    };
                    let before = tablet.chain.len();
                    tablet.chain.retain(|h| !in_job(h));
                    if tablet.chain.len() != before {
                        if let Some(new) = &replacement {
                            // The merged fragments were the chain tail
                            tablet.chain.push(Arc::clone(new));
                        }
                        configs.push(tablet.config());
                    }
                }
            }

            // Retire inputs no chain references anymore; files disappear
            // when the last reader drops its handle
            for frag in &job.fragments {
                let referenced = state.tables.values().any(|t| {
                    t.tablets
                        .iter()
                        .any(|tablet| tablet.chain.iter().any(|h| Arc::ptr_eq(h, frag)))
                });
                if !referenced {
                    self.gc.retire(frag);
                }
            }
            configs
        };

        for config in &configs {
            self.bits.config_writer.save(&job.table, config)?;
        }
        if !configs.is_empty() {
            self.bits.config_writer.sync()?;
        }
        Ok(())
    }
}
