use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
};

use tracing::info;

use crate::{BufferPool, DbResult, HeapFile, HeapFileIterator, RecordId, TableId, Tuple};

/// Opaque identity of a transaction, unique within the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

/// Hands out transaction ids in a monotonically increasing fashion
struct TxIdGenerator {
    next_id: AtomicU64,
}

impl TxIdGenerator {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

static TX_ID_GENERATOR: OnceLock<TxIdGenerator> = OnceLock::new();

impl TransactionId {
    pub fn new() -> Self {
        let generator = TX_ID_GENERATOR.get_or_init(|| TxIdGenerator {
            next_id: AtomicU64::new(1),
        });
        Self(generator.next_id())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A running transaction bound to a buffer pool.
///
/// Dropping a transaction that was neither committed nor aborted rolls it back.
pub struct Transaction {
    id: TransactionId,
    buffer_pool: Arc<BufferPool>,
    finished: bool,
}

impl Transaction {
    pub fn new(buffer_pool: Arc<BufferPool>) -> Self {
        Self {
            id: TransactionId::new(),
            buffer_pool,
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn insert_tuple(&self, table_id: TableId, tuple: Tuple) -> DbResult<RecordId> {
        self.buffer_pool.insert_tuple(self.id, table_id, tuple)
    }

    pub fn delete_tuple(&self, tuple: &Tuple) -> DbResult<()> {
        self.buffer_pool.delete_tuple(self.id, tuple)
    }

    /// Scan every tuple of `file` under shared locks.
    pub fn scan(&self, file: &Arc<HeapFile>) -> HeapFileIterator<'_> {
        file.iterator(&self.buffer_pool, self.id)
    }

    /// Commit this transaction
    /// Every page it dirtied is logged and written to disk, then all of its locks are released
    /// If the commit fails the transaction is rolled back when dropped.
    pub fn commit(mut self) -> DbResult<()> {
        self.buffer_pool.transaction_complete(self.id, true)?;
        self.finished = true;
        info!(txn = %self.id, "committed");
        Ok(())
    }

    /// Abort this transaction
    /// Every page it dirtied is reloaded from disk, then all of its locks are released.
    /// A page that can not be reloaded is dropped from the pool and the error is returned.
    pub fn abort(mut self) -> DbResult<()> {
        self.finished = true;
        self.buffer_pool.transaction_complete(self.id, false)?;
        info!(txn = %self.id, "aborted");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.buffer_pool.transaction_complete(self.id, false) {
                tracing::error!(txn = %self.id, error = %e, "rollback on drop failed");
            }
        }
    }
}
