//! Heap files: an unordered collection of tuples stored as a sequence of
//! fixed-size [`HeapPage`]s in one file.
//!
//! Page `n` lives at byte offset `n * page_size`. Pages are read and written
//! directly here; every other access goes through the [`BufferPool`] so that
//! locking and caching apply.

use std::{
    collections::{hash_map::DefaultHasher, VecDeque},
    fs::{File, OpenOptions},
    hash::{Hash, Hasher},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing::{debug, trace};

use crate::{
    BufferPool, DbError, DbResult, HeapPage, PageHandle, PageId, Permission, RecordId, TableId,
    TransactionId, Tuple, TupleDesc,
};

#[derive(Debug)]
pub struct HeapFile {
    path: PathBuf,
    id: TableId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    file: Mutex<File>,
    /// Serializes appending a fresh page to the end of the file
    extend: Mutex<()>,
}

impl HeapFile {
    /// Open the heap file at `path`, creating an empty one if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P, desc: Arc<TupleDesc>, page_size: usize) -> DbResult<Self> {
        if HeapPage::slots_per_page(page_size, &desc) == 0 {
            return Err(DbError::schema(format!(
                "tuples of {} bytes do not fit in a {page_size} byte page",
                desc.size()
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let path = path.as_ref().canonicalize()?;
        let id = Self::table_id_for(&path);
        debug!(path = %path.display(), table_id = %format_args!("{id:x}"), "opened heap file");
        Ok(Self {
            path,
            id,
            desc,
            page_size,
            file: Mutex::new(file),
            extend: Mutex::new(()),
        })
    }

    /// Table id for the file at `path`: a hash of its absolute path.
    pub fn table_id_for(path: &Path) -> TableId {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        hasher.finish()
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages in the file, counting a partial trailing page as a whole one.
    pub fn num_pages(&self) -> DbResult<usize> {
        let len = self.file.lock().unwrap().metadata()?.len() as usize;
        Ok(len.div_ceil(self.page_size))
    }

    fn check_owned(&self, page_id: PageId) -> DbResult<()> {
        if page_id.table_id != self.id {
            return Err(DbError::UnknownTable(page_id.table_id));
        }
        Ok(())
    }

    /// Read page `page_id` straight from the file. A short trailing page is
    /// padded with zeroes.
    pub fn read_page(&self, page_id: PageId) -> DbResult<HeapPage> {
        self.check_owned(page_id)?;
        let mut data = Vec::with_capacity(self.page_size);
        {
            let mut file = self.file.lock().unwrap();
            let len = file.metadata()?.len();
            let offset = (page_id.page_no * self.page_size) as u64;
            if offset >= len {
                return Err(DbError::PageOutOfRange(page_id));
            }
            file.seek(SeekFrom::Start(offset))?;
            (&mut *file)
                .take(self.page_size as u64)
                .read_to_end(&mut data)?;
        }
        data.resize(self.page_size, 0);
        trace!(%page_id, "read page");
        HeapPage::new(page_id, &data, Arc::clone(&self.desc), self.page_size)
    }

    /// Write the full image of `page` at its offset.
    pub fn write_page(&self, page: &HeapPage) -> DbResult<()> {
        let page_id = page.id();
        self.check_owned(page_id)?;
        let data = page.page_data();
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((page_id.page_no * self.page_size) as u64))?;
        file.write_all(&data)?;
        trace!(%page_id, "wrote page");
        Ok(())
    }

    /// Append an empty page and return its id.
    fn append_empty_page(&self) -> DbResult<PageId> {
        let _extending = self.extend.lock().unwrap();
        let page_id = PageId::new(self.id, self.num_pages()?);
        let page = HeapPage::new(
            page_id,
            &HeapPage::empty_page_data(self.page_size),
            Arc::clone(&self.desc),
            self.page_size,
        )?;
        self.write_page(&page)?;
        debug!(%page_id, "appended empty page");
        Ok(page_id)
    }

    /// Insert `tuple` into the first page with a free slot, appending a new page
    /// when every existing page is full.
    ///
    /// Pages are locked `ReadWrite` while being inspected. A page that had no
    /// room goes back to whatever lock `txn` held on it before this call: none,
    /// shared, or exclusive. Returns the tuple's new record id along with the page
    /// that was modified; the caller is responsible for marking it dirty.
    pub fn insert_tuple<'a>(
        &self,
        pool: &'a BufferPool,
        txn: TransactionId,
        tuple: Tuple,
    ) -> DbResult<(RecordId, Vec<PageHandle<'a>>)> {
        if *tuple.tuple_desc().as_ref() != *self.desc {
            return Err(DbError::schema(format!(
                "tuple schema ({}) does not match table schema ({})",
                tuple.tuple_desc(),
                self.desc
            )));
        }

        let mut scanned = 0;
        loop {
            let num_pages = self.num_pages()?;
            for page_no in scanned..num_pages {
                let page_id = PageId::new(self.id, page_no);
                let held = pool.lock_manager().permission(txn, page_id);
                let handle = pool.get_page(txn, page_id, Permission::ReadWrite)?;
                if handle.read().num_empty_slots() > 0 {
                    let record_id = handle.write().insert_tuple(tuple)?;
                    return Ok((record_id, vec![handle]));
                }
                drop(handle);
                match held {
                    None => pool.unsafe_release_page(txn, page_id),
                    Some(Permission::ReadOnly) => {
                        pool.lock_manager()
                            .acquire_lock(txn, page_id, Permission::ReadOnly);
                    }
                    Some(Permission::ReadWrite) => {}
                }
            }
            scanned = num_pages;

            let page_id = self.append_empty_page()?;
            let handle = pool.get_page(txn, page_id, Permission::ReadWrite)?;
            if handle.read().num_empty_slots() > 0 {
                let record_id = handle.write().insert_tuple(tuple)?;
                return Ok((record_id, vec![handle]));
            }
            //  another inserter filled the fresh page first
            drop(handle);
            pool.unsafe_release_page(txn, page_id);
        }
    }

    /// Remove `tuple` from the page its record id points at.
    pub fn delete_tuple<'a>(
        &self,
        pool: &'a BufferPool,
        txn: TransactionId,
        tuple: &Tuple,
    ) -> DbResult<Vec<PageHandle<'a>>> {
        let record_id = tuple
            .record_id()
            .ok_or_else(|| DbError::schema("tuple has no record id"))?;
        self.check_owned(record_id.page_id)?;
        let handle = pool.get_page(txn, record_id.page_id, Permission::ReadWrite)?;
        handle.write().delete_tuple(tuple)?;
        Ok(vec![handle])
    }

    /// Lazy scan over every tuple in the file on behalf of `txn`.
    pub fn iterator<'a>(self: &Arc<Self>, pool: &'a BufferPool, txn: TransactionId) -> HeapFileIterator<'a> {
        HeapFileIterator {
            pool,
            file: Arc::clone(self),
            txn,
            state: ScanState::Unopened,
            next_page: 0,
            num_pages: 0,
            buffered: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Unopened,
    Open,
    Closed,
}

/// Page-at-a-time scan of a [`HeapFile`].
///
/// Each page is fetched with `ReadOnly` permission when the scan first reaches
/// it, so the shared lock is taken lazily. The page count is fixed when the
/// scan opens; pages appended afterwards are not visited.
pub struct HeapFileIterator<'a> {
    pool: &'a BufferPool,
    file: Arc<HeapFile>,
    txn: TransactionId,
    state: ScanState,
    next_page: usize,
    num_pages: usize,
    buffered: VecDeque<Tuple>,
}

impl HeapFileIterator<'_> {
    pub fn open(&mut self) -> DbResult<()> {
        self.num_pages = self.file.num_pages()?;
        self.next_page = 0;
        self.buffered.clear();
        self.state = ScanState::Open;
        Ok(())
    }

    /// Restart the scan from the first page.
    pub fn rewind(&mut self) -> DbResult<()> {
        self.close();
        self.open()
    }

    pub fn close(&mut self) {
        self.buffered.clear();
        self.state = ScanState::Closed;
    }

    fn load_next_page(&mut self) -> DbResult<()> {
        let page_id = PageId::new(self.file.id(), self.next_page);
        self.next_page += 1;
        let handle = self.pool.get_page(self.txn, page_id, Permission::ReadOnly)?;
        self.buffered.extend(handle.read().tuples().cloned());
        Ok(())
    }
}

impl Iterator for HeapFileIterator<'_> {
    type Item = DbResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            ScanState::Closed => return None,
            ScanState::Unopened => {
                if let Err(e) = self.open() {
                    self.close();
                    return Some(Err(e));
                }
            }
            ScanState::Open => {}
        }

        loop {
            if let Some(tuple) = self.buffered.pop_front() {
                return Some(Ok(tuple));
            }
            if self.next_page >= self.num_pages {
                return None;
            }
            if let Err(e) = self.load_next_page() {
                self.close();
                return Some(Err(e));
            }
        }
    }
}
