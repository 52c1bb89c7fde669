//! A transactional page cache for people building their own
//! page-oriented databases.
//!
//! `slate` sits between access methods (heap files, b-trees,
//! query operators) and an on-disk page store. It owns three
//! interlocking concerns:
//!
//! * bounded-capacity page caching with LRU eviction
//! * two-phase locking at page granularity, with shared and
//!   exclusive modes, in-place upgrade, and randomized
//!   timeout-based deadlock breaking
//! * commit and abort processing against a write-ahead log:
//!   only clean pages are evicted, and dirty pages are forced
//!   through the log before their data file is written
//!
//! The entry point is [`Config::open`], which returns a
//! [`BufferPool`]. Tables are registered with the pool's
//! [`Catalog`], and all page access flows through
//! [`BufferPool::get_page`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

mod cache;
mod catalog;
mod config;
mod debug_delay;
mod error;
mod heap;
mod heap_page;
mod lock_table;
mod page;
mod pool;
mod tuple;
mod wal;

pub use crate::catalog::Catalog;
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::heap::{DbFile, HeapFile};
pub use crate::lock_table::{LockMode, LockTable};
pub use crate::page::Page;
pub use crate::pool::{BufferPool, CacheStats};
pub use crate::tuple::{Field, FieldType, RecordId, Tuple, TupleDesc, TEXT_LEN};
pub use crate::wal::{Wal, WalRecord};

/// Identifies a table registered in the [`Catalog`].
pub type TableId = u64;

const DEFAULT_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// The number of bytes in a page, including any header.
pub fn page_size() -> usize {
    PAGE_SIZE.load(Ordering::Acquire)
}

/// Overrides the process-wide page size.
///
/// This exists so that tests can exercise multi-page behavior
/// with small files. Changing it while any pool is open leaves
/// previously read pages with their old length.
pub fn set_page_size(size: usize) {
    assert_ne!(size, 0);
    PAGE_SIZE.store(size, Ordering::Release);
}

/// Restores the default page size of 4096 bytes.
pub fn reset_page_size() {
    PAGE_SIZE.store(DEFAULT_PAGE_SIZE, Ordering::Release);
}

/// Identifies a page: a table and an offset within its file.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: u64,
}

/// Opaque identifier of an in-flight transaction.
///
/// Each transaction draws a fresh id from a process-wide
/// counter. Ids are never reused, including across aborts.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TransactionId(u64);

static TID_COUNTER: AtomicU64 = AtomicU64::new(0);

impl TransactionId {
    pub fn new() -> TransactionId {
        TransactionId(TID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }

    // only for rehydrating ids out of the write-ahead log
    pub(crate) fn from_raw(raw: u64) -> TransactionId {
        TransactionId(raw)
    }
}

impl Default for TransactionId {
    fn default() -> TransactionId {
        TransactionId::new()
    }
}

/// The level of access a transaction requests on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

fn _auto_trait_assertions() {
    fn f<T: Send + Sync>() {}

    f::<BufferPool>();
    f::<LockTable>();
    f::<Catalog>();
    f::<Wal>();
    f::<Page>();
}
