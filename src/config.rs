use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fault_injection::fallible;

use crate::{BufferPool, Catalog, Result, Wal};

const WAL_FILE: &str = "wal";

/// Configuration for opening a [`BufferPool`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Table files and the write-ahead log will be kept here.
    pub path: PathBuf,
    /// The maximum number of pages resident in memory at
    /// once. Dirty pages pin themselves against eviction, so
    /// a pool whose every page is dirty rejects new faults.
    pub capacity_pages: usize,
    /// The ceiling on the randomized per-acquisition lock
    /// timeout. Each blocked lock request draws a uniform
    /// timeout in `[0, max_lock_timeout]`, which dissolves
    /// symmetric deadlocks without a wait-for graph.
    pub max_lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            path: "".into(),
            capacity_pages: 50,
            max_lock_timeout: Duration::from_millis(1500),
        }
    }
}

impl Config {
    fn validate(&self) -> io::Result<()> {
        if self.capacity_pages == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Config's capacity_pages must be non-zero",
            ));
        }

        Ok(())
    }

    /// Opens a buffer pool over the configured directory,
    /// creating it and an empty write-ahead log if needed.
    pub fn open(&self) -> Result<BufferPool> {
        self.validate()?;

        log::debug!("opening slate buffer pool at {:?}", self.path);

        if let Err(e) = fs::read_dir(&self.path) {
            if e.kind() == io::ErrorKind::NotFound {
                fallible!(fs::create_dir_all(&self.path));
            }
        }

        let wal = Wal::open(self.path.join(WAL_FILE))?;

        Ok(BufferPool::new(
            self.clone(),
            Arc::new(Catalog::default()),
            Arc::new(wal),
        ))
    }
}
