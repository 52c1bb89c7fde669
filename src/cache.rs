use std::sync::Arc;

use hashlink::LinkedHashMap;

use crate::{Page, PageId};

/// Bounded mapping from page id to resident page, ordered by
/// recency of access.
///
/// The linked hash map doubles as the LRU list: iteration
/// runs from least to most recently used, a hit is moved to
/// the back, and admission appends at the back. Structural
/// mutation only ever happens under the buffer pool's mutex.
pub(crate) struct PageCache {
    capacity: usize,
    pages: LinkedHashMap<PageId, Arc<Page>>,
}

impl PageCache {
    pub fn new(capacity: usize) -> PageCache {
        assert_ne!(capacity, 0);
        PageCache {
            capacity,
            pages: LinkedHashMap::with_capacity(capacity),
        }
    }

    /// Looks up a page and, on a hit, promotes it to the
    /// most-recently-used position.
    pub fn get(&mut self, pid: PageId) -> Option<Arc<Page>> {
        let page = self.pages.remove(&pid)?;
        self.pages.insert(pid, page.clone());
        Some(page)
    }

    /// Looks up a page without touching the access order.
    pub fn peek(&self, pid: PageId) -> Option<&Arc<Page>> {
        self.pages.get(&pid)
    }

    /// Admits a page at the most-recently-used end, replacing
    /// (and re-positioning) any prior entry for the same id.
    /// The caller is responsible for making room first.
    pub fn insert(&mut self, page: Arc<Page>) {
        let pid = page.id();
        self.pages.remove(&pid);
        self.pages.insert(pid, page);
    }

    pub fn remove(&mut self, pid: PageId) -> Option<Arc<Page>> {
        self.pages.remove(&pid)
    }

    pub fn contains(&self, pid: PageId) -> bool {
        self.pages.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resident page ids, least recently used first.
    pub fn pids(&self) -> Vec<PageId> {
        self.pages.keys().copied().collect()
    }

    /// The first clean page in access order, if any. Dirty
    /// pages are skipped because evicting them would write
    /// uncommitted data over the last committed image.
    pub fn clean_victim(&self) -> Option<PageId> {
        self.pages
            .iter()
            .find(|(_, page)| page.dirtier().is_none())
            .map(|(pid, _)| *pid)
    }
}
