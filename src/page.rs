use std::sync::RwLock;

use crate::{PageId, TransactionId};

/// A fixed-size block of table data resident in the cache.
///
/// A page is shared between the cache and every transaction
/// currently operating on it, so its contents live behind a
/// `RwLock`. Two-phase locking already serializes writers at
/// a higher level; the inner lock keeps the sharing sound.
///
/// Besides its bytes, a page carries two pieces of
/// transactional state: the id of the transaction that
/// dirtied it (if any), and a before-image snapshot of its
/// contents as of the last commit, which becomes the undo
/// half of the next write-ahead log record for this page.
pub struct Page {
    pid: PageId,
    state: RwLock<PageState>,
}

struct PageState {
    data: Box<[u8]>,
    dirtier: Option<TransactionId>,
    before_image: Box<[u8]>,
}

impl Page {
    /// Wraps bytes freshly read from a table file. The
    /// before-image starts out identical to the contents.
    pub fn new(pid: PageId, data: Box<[u8]>) -> Page {
        let before_image = data.clone();
        Page {
            pid,
            state: RwLock::new(PageState {
                data,
                dirtier: None,
                before_image,
            }),
        }
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    /// Reads the page contents under the inner lock.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let state = self.state.read().unwrap();
        f(&state.data)
    }

    /// Mutates the page contents under the inner lock.
    ///
    /// Callers must hold an exclusive page lock, and the
    /// buffer pool is responsible for marking the page dirty
    /// afterwards.
    pub fn update<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut state = self.state.write().unwrap();
        f(&mut state.data)
    }

    /// A copy of the current contents.
    pub fn snapshot(&self) -> Box<[u8]> {
        self.state.read().unwrap().data.clone()
    }

    /// A copy of the contents as of the last commit.
    pub fn before_image(&self) -> Box<[u8]> {
        self.state.read().unwrap().before_image.clone()
    }

    /// Re-bases the before-image on the current contents.
    /// Called once a transaction's changes to this page have
    /// been committed.
    pub fn capture_before_image(&self) {
        let mut state = self.state.write().unwrap();
        state.before_image = state.data.clone();
    }

    /// The transaction that most recently dirtied this page,
    /// or `None` if the page matches its on-disk image.
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.state.read().unwrap().dirtier
    }

    pub fn mark_dirty(&self, tid: TransactionId) {
        self.state.write().unwrap().dirtier = Some(tid);
    }

    pub(crate) fn clear_dirty(&self) {
        self.state.write().unwrap().dirtier = None;
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap();
        f.debug_struct("Page")
            .field("pid", &self.pid)
            .field("len", &state.data.len())
            .field("dirtier", &state.dirtier)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn before_image_tracks_commits() {
        let pid = PageId {
            table_id: 0,
            page_no: 0,
        };
        let page = Page::new(pid, vec![0; 8].into_boxed_slice());

        page.update(|data| data[0] = 7);
        let tid = TransactionId::new();
        page.mark_dirty(tid);

        assert_eq!(page.dirtier(), Some(tid));
        assert_eq!(page.before_image()[0], 0);
        assert_eq!(page.snapshot()[0], 7);

        page.clear_dirty();
        page.capture_before_image();

        assert_eq!(page.dirtier(), None);
        assert_eq!(page.before_image()[0], 7);
    }
}
