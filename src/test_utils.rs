use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::{
    wal::{Lsn, WriteAheadLog},
    BufferPool, Catalog, DbConfig, DbResult, HeapFile, LockManager, PageId, ReplacementKind,
    TransactionId, Tuple, TupleDesc, Type,
};

pub const PAGE_SIZE: usize = 4096;

/// A log that accepts everything and keeps nothing
#[derive(Debug, Default)]
pub struct NullLog;

impl WriteAheadLog for NullLog {
    fn log_write(&self, _: TransactionId, _: PageId, _: &[u8], _: &[u8]) -> DbResult<Lsn> {
        Ok(0)
    }

    fn force(&self) -> DbResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Write(TransactionId, PageId),
    Force,
}

/// A log that remembers the order of calls made to it
#[derive(Debug, Default)]
pub struct RecordingLog {
    pub events: Mutex<Vec<LogEvent>>,
}

impl RecordingLog {
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl WriteAheadLog for RecordingLog {
    fn log_write(&self, txn: TransactionId, page_id: PageId, _: &[u8], _: &[u8]) -> DbResult<Lsn> {
        let mut events = self.events.lock().unwrap();
        events.push(LogEvent::Write(txn, page_id));
        Ok(events.len() as Lsn)
    }

    fn force(&self) -> DbResult<()> {
        self.events.lock().unwrap().push(LogEvent::Force);
        Ok(())
    }
}

/// One two-int-column table in a temp directory, served by its own buffer pool.
pub struct TestTable {
    pub dir: TempDir,
    pub file: Arc<HeapFile>,
    pub pool: BufferPool,
}

impl TestTable {
    pub fn new(pool_pages: usize) -> Self {
        Self::with_log(pool_pages, Arc::new(NullLog))
    }

    pub fn with_log(pool_pages: usize, log: Arc<dyn WriteAheadLog>) -> Self {
        Self::build(pool_pages, ReplacementKind::Random, log)
    }

    pub fn with_policy(pool_pages: usize, replacement: ReplacementKind) -> Self {
        Self::build(pool_pages, replacement, Arc::new(NullLog))
    }

    fn build(pool_pages: usize, replacement: ReplacementKind, log: Arc<dyn WriteAheadLog>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(HeapFile::open(dir.path().join("t.dat"), int_desc(), PAGE_SIZE).unwrap());
        let catalog = Arc::new(Catalog::new());
        catalog.add_table("t", Arc::clone(&file));
        let config = DbConfig::default()
            .with_page_size(PAGE_SIZE)
            .with_pool_pages(pool_pages)
            .with_replacement(replacement);
        let pool = BufferPool::new(&config, catalog, Arc::new(LockManager::default()), log);
        Self { dir, file, pool }
    }

    pub fn page(&self, page_no: usize) -> PageId {
        PageId::new(self.file.id(), page_no)
    }
}

pub fn int_desc() -> Arc<TupleDesc> {
    Arc::new(TupleDesc::new(&[Type::Int, Type::Int], &["a", "b"]).unwrap())
}

pub fn row(a: i32, b: i32) -> Tuple {
    Tuple::new(int_desc(), vec![a.into(), b.into()]).unwrap()
}
