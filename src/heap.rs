use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fault_injection::fallible;

use crate::heap_page::{HeapPage, HeapPageMut};
use crate::{
    page_size, BufferPool, Error, Page, PageId, Permission, RecordId, Result, TableId,
    TransactionId, Tuple, TupleDesc,
};

/// The per-table page store the buffer pool faults from and
/// flushes to. Implementations own the on-disk format; the
/// pool only sees whole pages.
///
/// `insert_tuple` and `delete_tuple` run *through* the pool:
/// every page they touch is fetched with
/// [`BufferPool::get_page`] under `ReadWrite` permission, so
/// exclusive locks are taken as a side effect. They return
/// the pages they dirtied, and the pool re-admits those pages
/// and marks them dirty.
pub trait DbFile: Send + Sync {
    fn table_id(&self) -> TableId;

    fn schema(&self) -> &TupleDesc;

    fn num_pages(&self) -> Result<u64>;

    /// Reads a page from disk. Deterministic: two reads of
    /// the same page with no intervening write see the same
    /// bytes.
    fn read_page(&self, pid: PageId) -> Result<Page>;

    /// Durably writes a page's current contents at its
    /// offset. Idempotent under identical content.
    fn write_page(&self, page: &Page) -> Result<()>;

    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<Arc<Page>>>;

    fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<Arc<Page>>>;

    /// All stored tuples, read under shared locks.
    fn scan(&self, pool: &BufferPool, tid: TransactionId) -> Result<Vec<Tuple>>;
}

/// A table stored as an unordered file of slotted pages.
pub struct HeapFile {
    table_id: TableId,
    schema: TupleDesc,
    file: File,
    path: PathBuf,
    // serializes file growth so two inserters cannot claim
    // the same fresh page number
    append_mu: Mutex<()>,
}

impl HeapFile {
    /// Opens (creating if absent) the backing file for a
    /// table.
    pub fn open<P: AsRef<Path>>(
        path: P,
        table_id: TableId,
        schema: TupleDesc,
    ) -> Result<HeapFile> {
        assert_ne!(
            crate::heap_page::slot_count(page_size(), &schema),
            0,
            "a page must be able to hold at least one tuple of the schema"
        );

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);

        let file = fallible!(options.open(path.as_ref()));

        Ok(HeapFile {
            table_id,
            schema,
            file,
            path: path.as_ref().into(),
            append_mu: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn page_offset(&self, page_no: u64) -> u64 {
        page_no * page_size() as u64
    }
}

impl DbFile for HeapFile {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn schema(&self) -> &TupleDesc {
        &self.schema
    }

    fn num_pages(&self) -> Result<u64> {
        let len = fallible!(self.file.metadata()).len();
        Ok(len / page_size() as u64)
    }

    fn read_page(&self, pid: PageId) -> Result<Page> {
        assert_eq!(pid.table_id, self.table_id);

        if pid.page_no >= self.num_pages()? {
            return Err(Error::PageOutOfBounds(pid));
        }

        let mut buf = vec![0; page_size()];
        fallible!(self.file.read_exact_at(&mut buf, self.page_offset(pid.page_no)));

        Ok(Page::new(pid, buf.into_boxed_slice()))
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        let pid = page.id();
        assert_eq!(pid.table_id, self.table_id);

        let data = page.snapshot();
        fallible!(self.file.write_all_at(&data, self.page_offset(pid.page_no)));

        Ok(())
    }

    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<Arc<Page>>> {
        if tuple.desc() != &self.schema {
            return Err(Error::SchemaMismatch);
        }

        loop {
            let num_pages = self.num_pages()?;

            for page_no in 0..num_pages {
                let pid = PageId {
                    table_id: self.table_id,
                    page_no,
                };

                let held_before = pool.holds_lock(tid, pid);
                let page = pool.get_page(tid, pid, Permission::ReadWrite)?;

                let slot =
                    page.update(|data| HeapPageMut::new(data, &self.schema).insert(&*tuple));

                if let Some(slot) = slot {
                    tuple.set_record_id(RecordId { pid, slot });
                    return Ok(vec![page]);
                }

                // the page was full and this probe left it
                // untouched. handing the lock straight back
                // keeps inserters from serializing behind a
                // page none of them can use, but only if the
                // transaction did not already hold it.
                if !held_before {
                    pool.unsafe_release_page(tid, pid);
                }
            }

            // every page is full: grow the file by one zeroed
            // page (a valid empty slotted page), then go
            // around again and compete for its slots.
            let _append = self.append_mu.lock().unwrap();
            if self.num_pages()? == num_pages {
                log::trace!(
                    "extending table {} to {} pages",
                    self.table_id,
                    num_pages + 1
                );
                let zeroes = vec![0u8; page_size()];
                fallible!(self.file.write_all_at(&zeroes, self.page_offset(num_pages)));
            }
        }
    }

    fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<Arc<Page>>> {
        let rid = tuple.record_id().ok_or(Error::TupleNotFound)?;

        if rid.pid.table_id != self.table_id {
            return Err(Error::TupleNotFound);
        }

        let page = pool.get_page(tid, rid.pid, Permission::ReadWrite)?;

        let deleted =
            page.update(|data| HeapPageMut::new(data, &self.schema).delete(rid.slot));

        if !deleted {
            return Err(Error::TupleNotFound);
        }

        Ok(vec![page])
    }

    fn scan(&self, pool: &BufferPool, tid: TransactionId) -> Result<Vec<Tuple>> {
        let mut out = vec![];

        for page_no in 0..self.num_pages()? {
            let pid = PageId {
                table_id: self.table_id,
                page_no,
            };
            let page = pool.get_page(tid, pid, Permission::ReadOnly)?;

            page.with_data(|data| {
                for (slot, mut tuple) in HeapPage::new(data, &self.schema).tuples() {
                    tuple.set_record_id(RecordId { pid, slot });
                    out.push(tuple);
                }
            });
        }

        Ok(out)
    }
}
