//! Buffer pool: a bounded cache of heap pages in front of the heap files.
//!
//! Every page access goes through [`BufferPool::get_page`], which first takes
//! the requested page lock from the [`LockManager`] (blocking if needed) and
//! then returns the resident copy of the page, reading it from its file on a
//! miss. The returned [`PageHandle`] pins the frame until it is dropped.
//!
//! The pool never writes a page that an uncommitted transaction modified
//! (NO-STEAL): dirty frames are not eviction candidates. At commit the dirty
//! pages of the transaction are logged, the log is forced and then the pages
//! are written (FORCE). At abort they are thrown away and re-read from disk.

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use tracing::{debug, info, warn};

use crate::{
    replacement::{new_policy, ReplacementPolicy},
    wal::WriteAheadLog,
    Catalog, DbConfig, DbError, DbResult, HeapPage, LockManager, PageId, Permission, RecordId,
    TableId, TransactionId, Tuple,
};

type SharedPage = Arc<RwLock<HeapPage>>;

#[derive(Debug, Default)]
struct Frame {
    page: Option<SharedPage>,
    pins: usize,
}

impl Frame {
    fn holds(&self, page: &SharedPage) -> bool {
        self.page.as_ref().is_some_and(|p| Arc::ptr_eq(p, page))
    }
}

#[derive(Debug)]
struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, usize>,
    policy: Box<dyn ReplacementPolicy>,
}

// ============================================================================
// BufferStats
// ============================================================================

#[derive(Debug, Default)]
pub struct BufferStats {
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
    pub evictions: AtomicUsize,
}

impl BufferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// (hits, misses)
    pub fn get(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn evictions(&self) -> usize {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let (hits, misses) = self.get();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// PageHandle
// ============================================================================

/// A pinned reference to a resident page. The frame stays pinned, and so can
/// not be evicted, until the handle is dropped.
///
/// The page lock taken by [`BufferPool::get_page`] is not released with the
/// handle; it lives until the transaction completes.
pub struct PageHandle<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame_idx: usize,
    page: SharedPage,
}

impl PageHandle<'_> {
    pub fn id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HeapPage> {
        self.page.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HeapPage> {
        self.page.write().unwrap()
    }
}

impl Debug for PageHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("page_id", &self.page_id)
            .field("frame_idx", &self.frame_idx)
            .finish()
    }
}

impl Drop for PageHandle<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.frame_idx, &self.page);
    }
}

// ============================================================================
// BufferPool
// ============================================================================

#[derive(Debug)]
pub struct BufferPool {
    state: Mutex<PoolState>,
    capacity: usize,
    catalog: Arc<Catalog>,
    lock_manager: Arc<LockManager>,
    log: Arc<dyn WriteAheadLog>,
    stats: BufferStats,
}

impl BufferPool {
    pub fn new(
        config: &DbConfig,
        catalog: Arc<Catalog>,
        lock_manager: Arc<LockManager>,
        log: Arc<dyn WriteAheadLog>,
    ) -> Self {
        let capacity = config.pool_pages;
        let frames = (0..capacity).map(|_| Frame::default()).collect();
        Self {
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::with_capacity(capacity),
                policy: new_policy(config.replacement, capacity),
            }),
            capacity,
            catalog,
            lock_manager,
            log,
            stats: BufferStats::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    /// Number of frames currently holding a page
    pub fn resident_pages(&self) -> usize {
        self.state().page_table.len()
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state().page_table.contains_key(&page_id)
    }

    /// Pin count of the frame holding `page_id`, if it is resident
    pub fn pin_count(&self, page_id: PageId) -> Option<usize> {
        let state = self.state();
        state
            .page_table
            .get(&page_id)
            .map(|&idx| state.frames[idx].pins)
    }

    /// Lock `page_id` for `txn` with `permission`, then return the page.
    ///
    /// Blocks while another transaction holds a conflicting lock. Fails with
    /// [`DbError::TransactionAborted`] if waiting would deadlock, and with
    /// [`DbError::ResourceExhausted`] if the page is not resident and every
    /// frame is pinned or dirty.
    pub fn get_page(
        &self,
        txn: TransactionId,
        page_id: PageId,
        permission: Permission,
    ) -> DbResult<PageHandle<'_>> {
        self.lock_manager.lock(txn, page_id, permission)?;
        let (frame_idx, page) = self.fetch(page_id)?;
        Ok(PageHandle {
            pool: self,
            page_id,
            frame_idx,
            page,
        })
    }

    fn fetch(&self, page_id: PageId) -> DbResult<(usize, SharedPage)> {
        let mut state = self.state();
        loop {
            if let Some(&idx) = state.page_table.get(&page_id) {
                if let Some(page) = state.frames[idx].page.clone() {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    Self::pin(&mut state, idx);
                    return Ok((idx, page));
                }
                state.page_table.remove(&page_id);
            }

            if let Some(idx) = state.frames.iter().position(|f| f.page.is_none()) {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                let page = self.catalog.file(page_id.table_id)?.read_page(page_id)?;
                debug!(%page_id, frame = idx, "page miss, loaded from file");
                let page = Arc::new(RwLock::new(page));
                state.frames[idx] = Frame {
                    page: Some(Arc::clone(&page)),
                    pins: 0,
                };
                state.page_table.insert(page_id, idx);
                Self::pin(&mut state, idx);
                return Ok((idx, page));
            }

            self.evict_page(&mut state)?;
        }
    }

    fn pin(state: &mut PoolState, idx: usize) {
        state.policy.record_access(idx);
        state.frames[idx].pins += 1;
    }

    fn unpin(&self, frame_idx: usize, page: &SharedPage) {
        let mut state = self.state();
        let frame = &mut state.frames[frame_idx];
        //  the frame may have been reloaded or discarded while the handle was out
        if frame.holds(page) {
            frame.pins = frame.pins.saturating_sub(1);
        }
    }

    /// Evict one clean, unpinned frame chosen by the replacement policy.
    fn evict_page(&self, state: &mut PoolState) -> DbResult<()> {
        let evictable: Vec<bool> = state
            .frames
            .iter()
            .map(|frame| match &frame.page {
                Some(page) => frame.pins == 0 && !page.read().unwrap().is_dirty(),
                None => false,
            })
            .collect();
        let victim = state
            .policy
            .choose_victim(&evictable)
            .ok_or(DbError::ResourceExhausted {
                capacity: self.capacity,
            })?;

        let frame = std::mem::take(&mut state.frames[victim]);
        let Some(page) = frame.page else {
            return Ok(());
        };
        let page_id = page.read().unwrap().id();
        state.page_table.remove(&page_id);
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(%page_id, frame = victim, "evicted page");

        let holders = self.lock_manager.holders(page_id);
        if !holders.is_empty() {
            warn!(%page_id, holders = holders.len(), "evicted page was still locked, revoking its locks");
        }
        self.lock_manager.release_all_on_page(page_id);
        Ok(())
    }

    /// Insert `tuple` into table `table_id` on behalf of `txn`, marking the
    /// page it lands on dirty.
    pub fn insert_tuple(&self, txn: TransactionId, table_id: TableId, tuple: Tuple) -> DbResult<RecordId> {
        let file = self.catalog.file(table_id)?;
        let (record_id, pages) = file.insert_tuple(self, txn, tuple)?;
        for page in &pages {
            page.write().mark_dirty(true, txn);
        }
        Ok(record_id)
    }

    /// Delete `tuple` from the table its record id points into, marking the
    /// page dirty.
    pub fn delete_tuple(&self, txn: TransactionId, tuple: &Tuple) -> DbResult<()> {
        let record_id = tuple
            .record_id()
            .ok_or_else(|| DbError::schema("tuple has no record id"))?;
        let file = self.catalog.file(record_id.page_id.table_id)?;
        let pages = file.delete_tuple(self, txn, tuple)?;
        for page in &pages {
            page.write().mark_dirty(true, txn);
        }
        Ok(())
    }

    /// Finish `txn`. On commit every page it dirtied is logged and written;
    /// on abort those pages are dropped and re-read from their files. All of
    /// its locks are released afterwards.
    ///
    /// If a commit fails to write a page the locks are kept, so the pages
    /// `txn` touched stay protected until the call is retried. An abort
    /// always releases them: a page that can not be re-read is dropped from
    /// the pool instead, and the first such error is returned at the end.
    pub fn transaction_complete(&self, txn: TransactionId, commit: bool) -> DbResult<()> {
        let mut touched = 0;
        let mut abort_error = None;
        {
            let mut state = self.state();
            for idx in 0..state.frames.len() {
                let Some(page) = state.frames[idx].page.clone() else {
                    continue;
                };
                let (page_id, dirtied_by) = {
                    let page = page.read().unwrap();
                    (page.id(), page.dirtied_by())
                };
                if dirtied_by != Some(txn) {
                    continue;
                }
                touched += 1;

                if commit {
                    self.flush_page_locked(&page)?;
                    page.write().unwrap().set_before_image();
                } else {
                    match self
                        .catalog
                        .file(page_id.table_id)
                        .and_then(|file| file.read_page(page_id))
                    {
                        Ok(fresh) => {
                            state.frames[idx] = Frame {
                                page: Some(Arc::new(RwLock::new(fresh))),
                                pins: 0,
                            };
                            debug!(%txn, %page_id, "discarded aborted changes");
                        }
                        Err(e) => {
                            warn!(%txn, %page_id, error = %e, "could not re-read aborted page, dropping it");
                            state.frames[idx] = Frame::default();
                            state.page_table.remove(&page_id);
                            abort_error.get_or_insert(e);
                        }
                    }
                }
            }
        }

        self.lock_manager.release_all(txn);
        info!(%txn, committed = commit, pages = touched, "transaction complete");
        match abort_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Write `page` if it is dirty, logging it first.
    fn flush_page_locked(&self, page: &SharedPage) -> DbResult<()> {
        let mut page = page.write().unwrap();
        let Some(dirtier) = page.dirtied_by() else {
            return Ok(());
        };
        let page_id = page.id();
        self.log
            .log_write(dirtier, page_id, page.before_image(), &page.page_data())?;
        self.log.force()?;
        self.catalog.file(page_id.table_id)?.write_page(&page)?;
        page.mark_dirty(false, dirtier);
        debug!(%page_id, txn = %dirtier, "flushed page");
        Ok(())
    }

    /// Write every dirty page to disk.
    ///
    /// This breaks NO-STEAL: pages of transactions that have not committed
    /// reach disk and an abort will no longer undo them. Only meant for tests
    /// and shutdown.
    pub fn flush_all_pages(&self) -> DbResult<()> {
        let state = self.state();
        for page in state.frames.iter().filter_map(|f| f.page.as_ref()) {
            self.flush_page_locked(page)?;
        }
        Ok(())
    }

    /// Write the pages dirtied by `txn` without finishing it. Its locks are
    /// kept.
    pub fn flush_pages(&self, txn: TransactionId) -> DbResult<()> {
        let state = self.state();
        for page in state.frames.iter().filter_map(|f| f.page.as_ref()) {
            if page.read().unwrap().dirtied_by() == Some(txn) {
                self.flush_page_locked(page)?;
            }
        }
        Ok(())
    }

    /// Drop `page_id` from the pool without writing it.
    pub fn discard_page(&self, page_id: PageId) {
        let mut state = self.state();
        if let Some(idx) = state.page_table.remove(&page_id) {
            state.frames[idx] = Frame::default();
            debug!(%page_id, frame = idx, "discarded page");
        }
    }

    /// Release `txn`'s lock on `page_id` before the transaction ends.
    ///
    /// Giving up a lock early breaks two-phase locking; only safe for pages
    /// the transaction has not read anything from that it relies on.
    pub fn unsafe_release_page(&self, txn: TransactionId, page_id: PageId) {
        self.lock_manager.release_page(txn, page_id);
    }

    pub fn holds_lock(&self, txn: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds_lock(txn, page_id)
    }
}
