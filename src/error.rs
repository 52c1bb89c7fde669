use std::io;

use crate::{PageId, TableId};

pub type Result<T> = std::result::Result<T, Error>;

/// The ways a buffer pool operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A lock acquisition waited past its randomized timeout.
    /// The transaction is presumed to be party to a deadlock
    /// and must be completed with `commit = false`.
    #[error("transaction aborted after lock wait timed out")]
    TransactionAborted,
    /// Every resident page is dirty, so admitting a new page
    /// could not find an eviction victim.
    #[error("no clean page to evict")]
    CacheFull,
    #[error("no table with id {0} is registered in the catalog")]
    NoSuchTable(TableId),
    #[error("page {0:?} is beyond the end of its table file")]
    PageOutOfBounds(PageId),
    #[error("tuple does not match the table schema")]
    SchemaMismatch,
    #[error("tuple has no record id or its slot is vacant")]
    TupleNotFound,
    #[error(transparent)]
    Io(#[from] io::Error),
}
