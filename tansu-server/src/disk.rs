//! Disk-backed implementations of the fragment ports.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tansu_core::config::FragmentConfig;
use tansu_core::error::{Error, Result};
use tansu_storage::fragment::{Fragment, FragmentWriter};
use tansu_storage::DiskFragment;

use crate::ports::{FragmentFactory, FragmentLoader};

/// Opens fragment files by path URI.
pub struct DiskFragmentLoader;

impl FragmentLoader for DiskFragmentLoader {
    fn load(&self, uri: &str) -> Result<Arc<dyn Fragment>> {
        Ok(Arc::new(DiskFragment::open(uri)?))
    }
}

/// Creates uniquely named fragment files under `<root>/<table>/`.
pub struct DiskFragmentFactory {
    root: PathBuf,
    config: FragmentConfig,
    seed: u64,
    counter: AtomicU64,
}

impl DiskFragmentFactory {
    pub fn new(root: impl Into<PathBuf>, config: FragmentConfig) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            root: root.into(),
            config,
            seed,
            counter: AtomicU64::new(0),
        }
    }
}

impl FragmentFactory for DiskFragmentFactory {
    fn start(&self, table: &str) -> Result<(FragmentWriter, String)> {
        let dir = self.root.join(table);
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("failed to create table dir {:?}", dir), e))?;

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("frag-{:016x}-{:04x}", self.seed, n));
        let uri = path.to_string_lossy().into_owned();
        let writer = FragmentWriter::create(&path, &self.config)?;
        Ok((writer, uri))
    }
}
