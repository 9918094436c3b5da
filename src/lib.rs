//! heapstore: the storage core of a teaching database.
//!
//! Tables are heap files of fixed-size slotted pages. All page access goes
//! through a [`BufferPool`] that enforces strict two-phase locking at page
//! granularity via the [`LockManager`], never writes uncommitted data
//! (NO-STEAL) and writes every page a transaction dirtied at commit (FORCE),
//! after logging it to the [`wal::WriteAheadLog`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use heapstore::{Database, DbConfig, Field, Tuple, TupleDesc, Type};
//!
//! # fn main() -> heapstore::DbResult<()> {
//! let db = Database::open("/tmp/heapstore", DbConfig::default())?;
//! let people = db.create_table("people", TupleDesc::new(&[Type::Int, Type::Str], &["id", "name"])?)?;
//!
//! let txn = db.begin();
//! let row = Tuple::new(Arc::clone(people.tuple_desc()), vec![Field::Int(1), Field::from("ada")])?;
//! txn.insert_tuple(people.id(), row)?;
//! txn.commit()?;
//! # Ok(())
//! # }
//! ```

mod buffer_pool;
mod catalog;
pub mod config;
mod database;
mod error;
mod heap_file;
mod lock_manager;
mod page;
pub mod replacement;
#[cfg(test)]
mod test_utils;
mod transaction;
mod tuple;
pub mod wal;

pub use buffer_pool::{BufferPool, BufferStats, PageHandle};
pub use catalog::Catalog;
pub use config::{DbConfig, LockWaitConfig, ReplacementKind};
pub use database::Database;
pub use error::{DbError, DbResult};
pub use heap_file::{HeapFile, HeapFileIterator};
pub use lock_manager::{LockManager, Permission};
pub use page::{HeapPage, PageId, TableId};
pub use transaction::{Transaction, TransactionId};
pub use tuple::{Field, RecordId, TDItem, Tuple, TupleDesc, Type};
pub use wal::{LogFile, LogRecord, WriteAheadLog};
