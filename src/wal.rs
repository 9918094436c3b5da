//! Write-ahead log collaborator.
//!
//! The buffer pool only needs [`WriteAheadLog::log_write`] and
//! [`WriteAheadLog::force`]; it calls both before any dirty page is written to
//! its file. [`LogFile`] is the append-only implementation used by
//! [`crate::Database`].
//!
//! Each record in a log file is laid out as
//!
//! ```text
//! | len: u32 | txn: u64 | table: u64 | page: u64 | before_len: u32 | before | after_len: u32 | after |
//! ```
//!
//! where `len` counts every byte after itself. All integers are big endian.

use std::{
    fmt::Debug,
    fs::{File, OpenOptions},
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use tracing::{trace, warn};

use crate::{DbError, DbResult, PageId, TransactionId};

pub type Lsn = u64;

pub trait WriteAheadLog: Send + Sync + Debug {
    /// Append an update record holding the before and after image of `page_id`.
    fn log_write(
        &self,
        txn: TransactionId,
        page_id: PageId,
        before_image: &[u8],
        after_image: &[u8],
    ) -> DbResult<Lsn>;

    /// Make every record appended so far durable.
    fn force(&self) -> DbResult<()>;
}

/// One decoded update record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub txn: u64,
    pub page_id: PageId,
    pub before_image: Vec<u8>,
    pub after_image: Vec<u8>,
}

impl LogRecord {
    const HEADER_BYTES: usize = 8 * 3;

    fn encode(&self, out: &mut Vec<u8>) {
        let body_len = Self::HEADER_BYTES + 4 + self.before_image.len() + 4 + self.after_image.len();
        out.extend_from_slice(&(body_len as u32).to_be_bytes());
        out.extend_from_slice(&self.txn.to_be_bytes());
        out.extend_from_slice(&self.page_id.table_id.to_be_bytes());
        out.extend_from_slice(&(self.page_id.page_no as u64).to_be_bytes());
        out.extend_from_slice(&(self.before_image.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.before_image);
        out.extend_from_slice(&(self.after_image.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.after_image);
    }

    fn decode(body: &[u8], offset: u64) -> DbResult<Self> {
        let corrupt = || DbError::CorruptLog(offset);
        let u64_at = |at: usize| -> DbResult<u64> {
            body.get(at..at + 8)
                .and_then(|b| b.try_into().ok())
                .map(u64::from_be_bytes)
                .ok_or_else(corrupt)
        };
        let u32_at = |at: usize| -> DbResult<usize> {
            body.get(at..at + 4)
                .and_then(|b| b.try_into().ok())
                .map(|b| u32::from_be_bytes(b) as usize)
                .ok_or_else(corrupt)
        };

        let txn = u64_at(0)?;
        let table_id = u64_at(8)?;
        let page_no = u64_at(16)? as usize;
        let mut pos = Self::HEADER_BYTES;
        let before_len = u32_at(pos)?;
        pos += 4;
        let before_image = body.get(pos..pos + before_len).ok_or_else(corrupt)?.to_vec();
        pos += before_len;
        let after_len = u32_at(pos)?;
        pos += 4;
        let after_image = body.get(pos..pos + after_len).ok_or_else(corrupt)?.to_vec();

        Ok(Self {
            txn,
            page_id: PageId::new(table_id, page_no),
            before_image,
            after_image,
        })
    }
}

#[derive(Debug)]
struct LogState {
    file: File,
    /// Records appended but not yet written to the file
    pending: Vec<u8>,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
}

/// Append-only log file. Records are buffered in memory until [`WriteAheadLog::force`].
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl LogFile {
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let existing = Self::count_records(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(LogState {
                file,
                pending: Vec::new(),
                latest_lsn: existing,
                last_saved_lsn: existing,
            }),
        })
    }

    /// Number of complete records already in the file. LSNs continue from
    /// there.
    fn count_records(path: &Path) -> DbResult<Lsn> {
        let mut count = 0;
        for record in LogIterator::new(path)? {
            match record {
                Ok(_) => count += 1,
                Err(DbError::CorruptLog(offset)) => {
                    warn!(path = %path.display(), offset, "log ends in a partial record");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// LSN of the last record known to be durable
    pub fn last_saved_lsn(&self) -> Lsn {
        self.state().last_saved_lsn
    }

    /// Force the log, then read back every record in append order.
    pub fn records(&self) -> DbResult<Vec<LogRecord>> {
        self.force()?;
        LogIterator::new(&self.path)?.collect()
    }
}

impl WriteAheadLog for LogFile {
    fn log_write(
        &self,
        txn: TransactionId,
        page_id: PageId,
        before_image: &[u8],
        after_image: &[u8],
    ) -> DbResult<Lsn> {
        let record = LogRecord {
            txn: txn.as_u64(),
            page_id,
            before_image: before_image.to_vec(),
            after_image: after_image.to_vec(),
        };
        let mut state = self.state();
        record.encode(&mut state.pending);
        state.latest_lsn += 1;
        trace!(%txn, %page_id, lsn = state.latest_lsn, "log record appended");
        Ok(state.latest_lsn)
    }

    fn force(&self) -> DbResult<()> {
        let mut state = self.state();
        if state.last_saved_lsn >= state.latest_lsn {
            return Ok(());
        }
        let LogState { file, pending, .. } = &mut *state;
        file.write_all(pending)?;
        file.sync_data()?;
        pending.clear();
        state.last_saved_lsn = state.latest_lsn;
        Ok(())
    }
}

/// Reads the records of a log file from the start.
pub struct LogIterator {
    reader: BufReader<File>,
    offset: u64,
    file_len: u64,
}

impl LogIterator {
    pub fn new(path: &Path) -> DbResult<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            file_len,
        })
    }
}

impl Iterator for LogIterator {
    type Item = DbResult<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut len_bytes = [0u8; 4];
        match self.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }
        let len = u32::from_be_bytes(len_bytes) as usize;
        let remaining = self.file_len.saturating_sub(self.offset + 4);
        if len as u64 > remaining {
            return Some(Err(DbError::CorruptLog(self.offset)));
        }
        let mut body = vec![0; len];
        if let Err(e) = self.reader.read_exact(&mut body) {
            return Some(Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                DbError::CorruptLog(self.offset)
            } else {
                e.into()
            }));
        }
        let record = LogRecord::decode(&body, self.offset);
        self.offset += 4 + len as u64;
        Some(record)
    }
}
