//! Shared compactor.
//!
//! One compaction thread serves every tablet on the server. On each
//! wakeup it snapshots the fragment chains into a [`FragDag`], picks
//! merge candidates (over-long chains, or size-imbalanced neighbors),
//! coalesces candidates that share fragments (tablets of one table share
//! chain suffixes after a split), and runs bounded k-way merges whose
//! results are atomically spliced back through the [`CompactionHost`].
//!
//! Selected sets are always chain suffixes, so a job that is a full
//! suffix for every participant may retire erasures; any other shape
//! must keep them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info};

use tansu_core::cell::CellStream;
use tansu_core::config::CompactionConfig;
use tansu_core::error::Result;
use tansu_core::interval::{Interval, IntervalSet};
use tansu_core::metrics::Metrics;
use tansu_core::predicate::ScanPredicate;
use tansu_core::tablet_name::TabletName;
use tansu_storage::fragment::FragmentScanner;
use tansu_storage::{CellMerge, MergeOptions};

use crate::gc::FragmentHandle;
use crate::ports::{FragmentFactory, FragmentLoader};

/// How often the merge loop polls for cancellation.
const CANCEL_POLL_CELLS: u64 = 1024;

/// A tablet's chain as seen at selection time.
#[derive(Clone)]
pub struct TabletChainInfo {
    pub table: String,
    pub name: TabletName,
    pub rows: Interval<Vec<u8>>,
    pub chain: Vec<Arc<FragmentHandle>>,
}

/// One tablet's merge candidate: the chain suffix starting at `start`.
pub struct CompactionList {
    pub info: TabletChainInfo,
    pub start: usize,
}

/// A coalesced unit of compaction work.
pub struct CompactionJob {
    pub table: String,
    pub tablets: Vec<TabletName>,
    /// Fragments to merge, newest first
    pub fragments: Vec<Arc<FragmentHandle>>,
    /// Union of the participating tablets' row ranges
    pub rows: IntervalSet<Vec<u8>>,
    /// Every participant contributed its entire chain suffix; erasures
    /// may be retired
    pub full_suffix: bool,
}

/// The server's fragment graph: tablets and the chains referencing each
/// fragment, snapshotted for one selection round.
pub struct FragDag {
    chains: Vec<TabletChainInfo>,
}

impl FragDag {
    pub fn new(chains: Vec<TabletChainInfo>) -> Self {
        Self { chains }
    }

    /// Pick and coalesce compaction candidates.
    pub fn choose(&self, config: &CompactionConfig) -> Vec<CompactionJob> {
        let lists: Vec<CompactionList> = self
            .chains
            .iter()
            .filter_map(|info| Self::choose_list(info, config))
            .collect();
        Self::coalesce(lists)
    }

    fn choose_list(info: &TabletChainInfo, config: &CompactionConfig) -> Option<CompactionList> {
        let n = info.chain.len();
        if n < 2 {
            return None;
        }

        // An over-long chain is always merged down, whole
        if n > config.max_chain_length {
            return Some(CompactionList {
                info: info.clone(),
                start: 0,
            });
        }

        // Otherwise merge from the first size-imbalanced neighbor pair
        // (a young fragment grown to the order of its elder) through the
        // tail
        for i in 0..n - 1 {
            let newer = info.chain[i].size();
            let older = info.chain[i + 1].size();
            if newer.saturating_mul(config.size_ratio) >= older {
                return Some(CompactionList {
                    info: info.clone(),
                    start: i,
                });
            }
        }
        None
    }

    /// Group candidate lists that share fragments into single jobs.
    fn coalesce(lists: Vec<CompactionList>) -> Vec<CompactionJob> {
        let mut groups: Vec<Vec<CompactionList>> = Vec::new();
        for list in lists {
            let shares = |other: &CompactionList| {
                other.info.chain[other.start..].iter().any(|a| {
                    list.info.chain[list.start..]
                        .iter()
                        .any(|b| Arc::ptr_eq(a, b))
                })
            };
            match groups.iter_mut().find(|g| g.iter().any(&shares)) {
                Some(group) => group.push(list),
                None => groups.push(vec![list]),
            }
        }

        groups
            .into_iter()
            .map(|group| {
                let table = group[0].info.table.clone();
                let mut fragments: Vec<Arc<FragmentHandle>> = Vec::new();
                let mut tablets = Vec::new();
                let mut rows = Vec::new();
                // Every list is a chain suffix reaching the oldest
                // fragment, so no unmerged elder can shadow the output
                let full_suffix = true;
                for list in &group {
                    debug_assert_eq!(list.info.table, table);
                    tablets.push(list.info.name.clone());
                    rows.push(list.info.rows.clone());
                    for frag in &list.info.chain[list.start..] {
                        if !fragments.iter().any(|f| Arc::ptr_eq(f, frag)) {
                            fragments.push(Arc::clone(frag));
                        }
                    }
                }
                CompactionJob {
                    table,
                    tablets,
                    fragments,
                    rows: IntervalSet::new(rows),
                    full_suffix,
                }
            })
            .collect()
    }
}

/// The server side of a compaction splice.
pub trait CompactionHost: Send + Sync {
    /// Current chains of every loaded tablet.
    fn snapshot_chains(&self) -> Vec<TabletChainInfo>;

    /// Replace each participating tablet's merged suffix with
    /// `replacement` (or nothing, when the merge produced no cells), then
    /// persist the affected configs and retire unreferenced fragments.
    fn splice(&self, job: &CompactionJob, replacement: Option<Arc<FragmentHandle>>) -> Result<()>;
}

struct CompactorState {
    disabled: usize,
    woken: bool,
    shutdown: bool,
}

pub struct SharedCompactor {
    inner: Arc<CompactorInner>,
}

pub struct CompactorInner {
    state: Mutex<CompactorState>,
    wake_cv: Condvar,
    host: RwLock<Weak<dyn CompactionHost>>,
    loader: Arc<dyn FragmentLoader>,
    factory: Arc<dyn FragmentFactory>,
    config: CompactionConfig,
    metrics: Metrics,
    cancel: AtomicBool,
}

impl SharedCompactor {
    pub fn new(
        loader: Arc<dyn FragmentLoader>,
        factory: Arc<dyn FragmentFactory>,
        config: CompactionConfig,
        metrics: Metrics,
    ) -> Self {
        let no_host: Weak<dyn CompactionHost> = Weak::<NullHost>::new();
        Self {
            inner: Arc::new(CompactorInner {
                state: Mutex::new(CompactorState {
                    disabled: 0,
                    woken: false,
                    shutdown: false,
                }),
                wake_cv: Condvar::new(),
                host: RwLock::new(no_host),
                loader,
                factory,
                config,
                metrics,
                cancel: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_host(&self, host: Weak<dyn CompactionHost>) {
        *self.inner.host.write() = host;
    }

    /// Spawn the compaction thread.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name("compactor".to_string())
            .spawn(move || inner.compact_loop())
            .expect("failed to spawn compactor thread")
    }

    pub fn wakeup(&self) {
        let mut state = self.inner.state.lock();
        state.woken = true;
        self.inner.wake_cv.notify_all();
    }

    pub fn shutdown(&self) {
        self.inner.cancel.store(true, Ordering::Release);
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        self.inner.wake_cv.notify_all();
    }

    /// Disable compactions for the guard's lifetime (used around tablet
    /// load and split).
    pub fn pause(&self) -> CompactionPause<'_> {
        let mut state = self.inner.state.lock();
        state.disabled += 1;
        CompactionPause { inner: &*self.inner }
    }

    /// Run one selection and execution round on the caller's thread.
    pub fn run_once(&self) -> Result<usize> {
        self.inner.run_once()
    }
}

impl CompactorInner {
    fn compact_loop(self: Arc<Self>) {
        info!("compactor thread started");
        loop {
            {
                let mut state = self.state.lock();
                while !state.shutdown && (!state.woken || state.disabled > 0) {
                    self.wake_cv.wait(&mut state);
                }
                if state.shutdown {
                    break;
                }
                state.woken = false;
            }

            match self.run_once() {
                Ok(0) => {}
                Ok(n) => debug!(jobs = n, "compaction round complete"),
                // A failed job aborts that job only, never the server
                Err(e) => error!(error = %e, "compaction failed"),
            }
        }
        info!("compactor thread exiting");
    }

    fn run_once(&self) -> Result<usize> {
        let host = match self.host.read().upgrade() {
            Some(host) => host,
            None => return Ok(0),
        };

        let dag = FragDag::new(host.snapshot_chains());
        let jobs = dag.choose(&self.config);
        let count = jobs.len();
        for job in jobs {
            if self.cancel.load(Ordering::Acquire) {
                break;
            }
            self.execute(&host, &job)?;
        }
        Ok(count)
    }

    fn execute(&self, host: &Arc<dyn CompactionHost>, job: &CompactionJob) -> Result<()> {
        info!(
            table = %job.table,
            inputs = job.fragments.len(),
            tablets = job.tablets.len(),
            "starting compaction"
        );

        let pred = ScanPredicate::all().with_rows(job.rows.clone());
        let sources = job
            .fragments
            .iter()
            .map(|h| {
                Box::new(FragmentScanner::new(h.fragment(), pred.clone()))
                    as tansu_core::cell::CellStreamHandle
            })
            .collect();
        let mut merge = CellMerge::new(
            sources,
            MergeOptions {
                keep_erasures: !job.full_suffix,
                history: None,
            },
        );

        let (mut writer, uri) = self.factory.start(&job.table)?;
        let mut emitted = 0u64;
        loop {
            if emitted % CANCEL_POLL_CELLS == 0 && self.cancel.load(Ordering::Acquire) {
                info!(table = %job.table, "compaction cancelled");
                return writer.abort();
            }
            match merge.next_cell()? {
                Some(cell) => {
                    match &cell.value {
                        Some(v) => writer.emit_cell(cell.row(), cell.column(), cell.timestamp(), v)?,
                        None => writer.emit_erasure(cell.row(), cell.column(), cell.timestamp())?,
                    }
                    emitted += 1;
                }
                None => break,
            }
        }

        let replacement = if emitted == 0 {
            // Everything merged away; the suffix just disappears
            writer.abort()?;
            None
        } else {
            let info = writer.finish()?;
            let fragment = self.loader.load(&uri)?;
            Some(FragmentHandle::new(uri, fragment, info.file_size))
        };

        host.splice(job, replacement)?;
        self.metrics.record_compaction();

        info!(table = %job.table, cells = emitted, "compaction complete");
        Ok(())
    }
}

/// Scoped compaction disable; dropping re-enables and re-wakes the loop.
pub struct CompactionPause<'a> {
    inner: &'a CompactorInner,
}

impl Drop for CompactionPause<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.disabled -= 1;
        self.inner.wake_cv.notify_all();
    }
}

/// Placeholder host type for the initial empty weak reference.
struct NullHost;

impl CompactionHost for NullHost {
    fn snapshot_chains(&self) -> Vec<TabletChainInfo> {
        Vec::new()
    }

    fn splice(&self, _: &CompactionJob, _: Option<Arc<FragmentHandle>>) -> Result<()> {
        Ok(())
    }
}
