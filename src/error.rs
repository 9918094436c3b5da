use std::io;

use crate::{PageId, RecordId, TableId, TransactionId};

pub type DbResult<T> = std::result::Result<T, DbError>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The transaction was chosen as a deadlock victim while waiting for a lock.
    /// The caller must roll it back with `transaction_complete(txn, false)`.
    #[error("transaction {0} aborted: deadlock detected")]
    TransactionAborted(TransactionId),

    /// Every resident frame is dirty or pinned, so nothing can be evicted without
    /// writing uncommitted data.
    #[error("buffer pool exhausted: no evictable page among {capacity} frames")]
    ResourceExhausted { capacity: usize },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("page {0} is past the end of its file")]
    PageOutOfRange(PageId),

    #[error("page {0} has no empty slot")]
    PageFull(PageId),

    #[error("tuple {0} not found")]
    TupleNotFound(RecordId),

    #[error("unknown table {0}")]
    UnknownTable(TableId),

    #[error("corrupt log record at offset {0}")]
    CorruptLog(u64),
}

impl DbError {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        DbError::SchemaViolation(msg.into())
    }

    /// Whether the caller is expected to roll the transaction back and may retry it.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            DbError::TransactionAborted(_) | DbError::ResourceExhausted { .. }
        )
    }
}
