use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::info;

use crate::{
    wal::WriteAheadLog,
    BufferPool, Catalog, DbConfig, DbError, DbResult, HeapFile, LockManager, LogFile, Transaction,
    TupleDesc,
};

/// The database struct: one directory holding a heap file per table plus the
/// write-ahead log, served through a single buffer pool.
#[derive(Debug)]
pub struct Database {
    dir: PathBuf,
    config: DbConfig,
    catalog: Arc<Catalog>,
    log: Arc<LogFile>,
    lock_manager: Arc<LockManager>,
    buffer_pool: Arc<BufferPool>,
}

impl Database {
    pub const LOG_FILE: &str = "heapstore.log";
    const TABLE_EXTENSION: &str = "dat";

    pub fn open<P: AsRef<Path>>(dir: P, config: DbConfig) -> DbResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let catalog = Arc::new(Catalog::new());
        let log = Arc::new(LogFile::open(dir.join(Self::LOG_FILE))?);
        let lock_manager = Arc::new(LockManager::new(config.lock_wait));
        let buffer_pool = Arc::new(BufferPool::new(
            &config,
            Arc::clone(&catalog),
            Arc::clone(&lock_manager),
            Arc::clone(&log) as Arc<dyn WriteAheadLog>,
        ));
        info!(
            dir = %dir.display(),
            page_size = config.page_size,
            pool_pages = config.pool_pages,
            replacement = ?config.replacement,
            "opened database"
        );
        Ok(Self {
            dir,
            config,
            catalog,
            log,
            lock_manager,
            buffer_pool,
        })
    }

    /// Open table `name` with schema `desc`, creating its file if needed.
    pub fn create_table(&self, name: &str, desc: TupleDesc) -> DbResult<Arc<HeapFile>> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(DbError::schema(format!("invalid table name {name:?}")));
        }
        let path = self
            .dir
            .join(name)
            .with_extension(Self::TABLE_EXTENSION);
        let file = Arc::new(HeapFile::open(path, Arc::new(desc), self.config.page_size)?);
        self.catalog.add_table(name, Arc::clone(&file));
        Ok(file)
    }

    pub fn table(&self, name: &str) -> DbResult<Arc<HeapFile>> {
        let id = self
            .catalog
            .table_id(name)
            .ok_or_else(|| DbError::schema(format!("no table named {name:?}")))?;
        self.catalog.file(id)
    }

    pub fn begin(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.buffer_pool))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn log(&self) -> &Arc<LogFile> {
        &self.log
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }
}
