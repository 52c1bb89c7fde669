use std::sync::{Arc, Mutex};

use crate::cache::PageCache;
use crate::debug_delay::debug_delay;
use crate::{
    Catalog, Config, Error, LockTable, Page, PageId, Permission, Result, TableId, TransactionId,
    Tuple, Wal,
};

/// A point-in-time view of cache occupancy, for shutdown
/// decisions and tests.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Pages currently resident in memory.
    pub resident_pages: usize,
    /// Resident pages carrying uncommitted changes. These
    /// pin themselves against eviction.
    pub dirty_pages: usize,
    /// The configured residency bound.
    pub capacity: usize,
}

/// The transactional page cache.
///
/// All page access flows through [`BufferPool::get_page`],
/// which takes a page-level lock matching the requested
/// permission before consulting the cache. Locks are held
/// until [`BufferPool::transaction_complete`], which flushes
/// or discards the transaction's pages and then releases
/// every lock at once, giving strict two-phase locking.
///
/// Flushing follows write-ahead discipline: the log record
/// carrying a page's before- and after-images is appended and
/// forced before the data file is written. This is the single
/// inviolable ordering rule in the crate.
pub struct BufferPool {
    config: Config,
    catalog: Arc<Catalog>,
    wal: Arc<Wal>,
    locks: LockTable,
    cache: Mutex<PageCache>,
}

impl BufferPool {
    pub(crate) fn new(config: Config, catalog: Arc<Catalog>, wal: Arc<Wal>) -> BufferPool {
        let cache = Mutex::new(PageCache::new(config.capacity_pages));
        BufferPool {
            config,
            catalog,
            wal,
            locks: LockTable::default(),
            cache,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    /// Retrieves a page on behalf of `tid`, blocking until
    /// the matching page lock is granted.
    ///
    /// The lock is taken before the cache is consulted, so a
    /// returned page is always a view the transaction is
    /// entitled to. A miss faults the page in from its table
    /// file, evicting the least recently used clean page if
    /// the cache is full; if every resident page is dirty the
    /// fault fails with [`Error::CacheFull`].
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> Result<Arc<Page>> {
        self.locks
            .acquire(tid, pid, perm.into(), self.config.max_lock_timeout)?;

        debug_delay();

        let mut cache = self.cache.lock().unwrap();

        if let Some(page) = cache.get(pid) {
            return Ok(page);
        }

        log::trace!("page fault on {:?} for {:?}", pid, tid);

        if cache.len() >= cache.capacity() {
            self.evict(&mut cache)?;
        }

        let file = self.catalog.file(pid.table_id)?;
        let page = Arc::new(file.read_page(pid)?);
        cache.insert(page.clone());

        Ok(page)
    }

    /// Adds a tuple to `table_id` on behalf of `tid`,
    /// assigning its record id.
    ///
    /// The table file fetches every page it touches through
    /// [`BufferPool::get_page`] with `ReadWrite` permission,
    /// acquiring exclusive locks as it goes. Pages the file
    /// reports as changed are marked dirty with `tid` and
    /// re-admitted at the most-recently-used position.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> Result<()> {
        let file = self.catalog.file(table_id)?;
        let dirtied = file.insert_tuple(self, tid, tuple)?;
        self.admit_dirty(tid, dirtied);
        Ok(())
    }

    /// Removes a tuple (located by its record id) on behalf
    /// of `tid`. Same locking and dirtying contract as
    /// [`BufferPool::insert_tuple`].
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(Error::TupleNotFound)?;
        let file = self.catalog.file(rid.pid.table_id)?;
        let dirtied = file.delete_tuple(self, tid, tuple)?;
        self.admit_dirty(tid, dirtied);
        Ok(())
    }

    fn admit_dirty(&self, tid: TransactionId, pages: Vec<Arc<Page>>) {
        let mut cache = self.cache.lock().unwrap();

        for page in pages {
            page.mark_dirty(tid);

            // the page is normally still resident from the
            // access method's own fault; if a concurrent
            // fault evicted it in the window, make room
            // again rather than lose the dirtied version
            if !cache.contains(page.id()) && cache.len() >= cache.capacity() {
                if self.evict(&mut cache).is_err() {
                    log::warn!(
                        "cache transiently exceeds capacity re-admitting dirtied page {:?}",
                        page.id()
                    );
                }
            }

            cache.insert(page);
        }
    }

    /// Commits or aborts `tid`, then releases all of its
    /// locks.
    ///
    /// On commit, each dirty page the transaction holds is
    /// flushed (log append, log force, data write) and its
    /// before-image is re-based on the committed contents. On
    /// abort, dirty pages are discarded from the cache; the
    /// on-disk copy is still the last committed image, so the
    /// next fault observes the pre-transaction state.
    ///
    /// Flushing happens before any lock is released, so no
    /// other transaction can read a committed page while the
    /// committer still appears to hold a stale lock. If a
    /// flush fails mid-iteration the remaining pages are
    /// still processed and every lock is released; the first
    /// error is returned.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        log::debug!("completing {:?}, commit = {}", tid, commit);

        let mut first_err = None;

        // consult the lock table before taking the cache
        // mutex; the two monitors are never held together
        let held = self.locks.pages_held_by(tid);

        {
            let mut cache = self.cache.lock().unwrap();

            for pid in held {
                let page = match cache.peek(pid) {
                    Some(page) => page.clone(),
                    None => continue,
                };

                if commit {
                    if let Err(e) = self.flush_page(&mut cache, pid) {
                        log::error!("failed to flush {:?} during commit: {}", pid, e);
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                        continue;
                    }
                    // the committed contents seed the undo
                    // image of whichever transaction dirties
                    // this page next
                    page.capture_before_image();
                } else if page.dirtier().is_some() {
                    cache.remove(pid);
                }
            }
        }

        self.locks.release_all(tid);

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// `transaction_complete(tid, true)`.
    pub fn commit(&self, tid: TransactionId) -> Result<()> {
        self.transaction_complete(tid, true)
    }

    /// `transaction_complete(tid, false)`.
    pub fn abort(&self, tid: TransactionId) -> Result<()> {
        self.transaction_complete(tid, false)
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.locks.holds(tid, pid)
    }

    /// Releases a single page lock without flushing or
    /// discarding anything.
    ///
    /// This violates two-phase locking, and with it the
    /// isolation story of the whole pool. It exists for
    /// access methods that can prove a page was probed but
    /// never read for its contents, and for tests.
    pub fn unsafe_release_page(&self, tid: TransactionId, pid: PageId) {
        self.locks.release(tid, pid);
    }

    /// Drops a page from the cache without flushing it.
    /// Used to un-cache rolled-back or reclaimed pages.
    pub fn discard_page(&self, pid: PageId) {
        let mut cache = self.cache.lock().unwrap();
        cache.remove(pid);
    }

    /// Flushes every dirty resident page, regardless of which
    /// transactions own them.
    ///
    /// Writing uncommitted changes to disk breaks the
    /// only-clean-pages-evict discipline the rest of the
    /// crate maintains, so this is only safe at shutdown or
    /// from tests that control every live transaction.
    pub fn flush_all_pages(&self) -> Result<()> {
        log::warn!("flushing all dirty pages regardless of transaction boundaries");

        let mut cache = self.cache.lock().unwrap();
        for pid in cache.pids() {
            self.flush_page(&mut cache, pid)?;
        }

        Ok(())
    }

    /// Flushes the dirty pages `tid` holds locks on.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        let held = self.locks.pages_held_by(tid);

        let mut cache = self.cache.lock().unwrap();
        for pid in held {
            self.flush_page(&mut cache, pid)?;
        }

        Ok(())
    }

    /// Resident page ids, least recently used first.
    pub fn resident_pages(&self) -> Vec<PageId> {
        self.cache.lock().unwrap().pids()
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock().unwrap();
        let dirty_pages = cache
            .pids()
            .into_iter()
            .filter(|pid| {
                cache
                    .peek(*pid)
                    .map_or(false, |page| page.dirtier().is_some())
            })
            .count();

        CacheStats {
            resident_pages: cache.len(),
            dirty_pages,
            capacity: cache.capacity(),
        }
    }

    /// Writes one resident dirty page out, in write-ahead
    /// order: append the update record, force the log, write
    /// the data file, clear the dirty marker. A clean or
    /// non-resident page is a no-op.
    fn flush_page(&self, cache: &mut PageCache, pid: PageId) -> Result<()> {
        let page = match cache.peek(pid) {
            Some(page) => page.clone(),
            None => return Ok(()),
        };

        let dirtier = match page.dirtier() {
            Some(dirtier) => dirtier,
            None => return Ok(()),
        };

        let before = page.before_image();
        let after = page.snapshot();

        self.wal.log_write(dirtier, pid, &before, &after)?;
        self.wal.force()?;

        let file = self.catalog.file(pid.table_id)?;
        file.write_page(&page)?;

        page.clear_dirty();

        Ok(())
    }

    /// Discards the least recently used clean page to make
    /// room for an admission. Dirty pages are never victims:
    /// their on-disk images are older than their contents,
    /// and overwriting disk with uncommitted data is exactly
    /// what the write-ahead rule forbids without a log force.
    fn evict(&self, cache: &mut PageCache) -> Result<()> {
        let victim = cache.clean_victim().ok_or(Error::CacheFull)?;

        log::debug!("evicting {:?}", victim);

        // a no-op for a clean victim, but keeps the flush
        // path authoritative if victim selection changes
        self.flush_page(cache, victim)?;
        cache.remove(victim);

        Ok(())
    }
}
