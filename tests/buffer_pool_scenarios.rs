use std::sync::{Arc, Mutex};

use heapstore::{
    BufferPool, Catalog, Database, DbConfig, DbError, DbResult, Field, HeapFile, HeapPage,
    LockManager, PageId, Permission, ReplacementKind, TransactionId, Tuple, TupleDesc, Type,
    WriteAheadLog,
};
use tempfile::TempDir;

const PAGE_SIZE: usize = 4096;

fn two_int_table(db: &Database) -> Arc<HeapFile> {
    db.create_table("t", TupleDesc::new(&[Type::Int, Type::Int], &["a", "b"]).unwrap())
        .unwrap()
}

fn row(file: &HeapFile, a: i32) -> Tuple {
    Tuple::new(Arc::clone(file.tuple_desc()), vec![Field::Int(a), Field::Int(a)]).unwrap()
}

fn open(pool_pages: usize, replacement: ReplacementKind) -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let config = DbConfig::default()
        .with_page_size(PAGE_SIZE)
        .with_pool_pages(pool_pages)
        .with_replacement(replacement);
    let db = Database::open(dir.path(), config).unwrap();
    (dir, db)
}

#[test]
fn two_frame_pool_grows_file_past_capacity() {
    let (_dir, db) = open(2, ReplacementKind::Random);
    let file = two_int_table(&db);
    let per_page = HeapPage::slots_per_page(PAGE_SIZE, file.tuple_desc());

    let txn = db.begin();
    for n in 0..2 * per_page {
        txn.insert_tuple(file.id(), row(&file, n as i32)).unwrap();
        assert!(db.buffer_pool().resident_pages() <= 2);
    }
    txn.commit().unwrap();
    assert_eq!(file.num_pages().unwrap(), 2);

    let txn = db.begin();
    txn.insert_tuple(file.id(), row(&file, -1)).unwrap();
    txn.commit().unwrap();
    assert_eq!(file.num_pages().unwrap(), 3);
    assert!(db.buffer_pool().resident_pages() <= 2);

    let txn = db.begin();
    assert_eq!(txn.scan(&file).count(), 2 * per_page + 1);
    assert!(db.buffer_pool().resident_pages() <= 2);
}

#[test]
fn full_pool_of_dirty_pages_cannot_make_room() {
    let (_dir, db) = open(2, ReplacementKind::Lru);
    let file = two_int_table(&db);
    let per_page = HeapPage::slots_per_page(PAGE_SIZE, file.tuple_desc());

    let txn = db.begin();
    for n in 0..2 * per_page {
        txn.insert_tuple(file.id(), row(&file, n as i32)).unwrap();
    }
    let err = txn.insert_tuple(file.id(), row(&file, -1)).unwrap_err();
    assert!(matches!(err, DbError::ResourceExhausted { capacity: 2 }));
    assert!(err.is_abort());
    txn.abort().unwrap();

    //  nothing from the aborted transaction is visible
    let txn = db.begin();
    assert_eq!(txn.scan(&file).count(), 0);
}

#[test]
fn insert_scan_delete_scan() {
    let (_dir, db) = open(8, ReplacementKind::Clock);
    let file = two_int_table(&db);

    let txn = db.begin();
    let rid = txn.insert_tuple(file.id(), row(&file, 42)).unwrap();
    txn.commit().unwrap();

    let txn = db.begin();
    let rows: Vec<Tuple> = txn.scan(&file).collect::<DbResult<_>>().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record_id(), Some(rid));
    assert_eq!(rows[0].fields(), &[Field::Int(42), Field::Int(42)]);
    txn.delete_tuple(&rows[0]).unwrap();
    txn.commit().unwrap();

    let txn = db.begin();
    assert_eq!(txn.scan(&file).count(), 0);

    //  deleting the same row twice fails
    let again = txn.delete_tuple(&rows[0]);
    assert!(matches!(again, Err(DbError::TupleNotFound(_))));
}

#[test]
fn abort_restores_pre_transaction_content() {
    let (_dir, db) = open(4, ReplacementKind::Random);
    let file = two_int_table(&db);

    let txn = db.begin();
    txn.insert_tuple(file.id(), row(&file, 1)).unwrap();
    txn.insert_tuple(file.id(), row(&file, 2)).unwrap();
    txn.commit().unwrap();

    let txn = db.begin();
    let first = txn.scan(&file).next().unwrap().unwrap();
    txn.delete_tuple(&first).unwrap();
    txn.insert_tuple(file.id(), row(&file, 3)).unwrap();
    txn.abort().unwrap();

    let txn = db.begin();
    let values: Vec<Field> = txn
        .scan(&file)
        .map(|t| t.unwrap().field(0).unwrap().clone())
        .collect();
    assert_eq!(values, vec![Field::Int(1), Field::Int(2)]);
}

#[test]
fn page_bytes_round_trip_through_the_file() {
    let (_dir, db) = open(4, ReplacementKind::Random);
    let file = two_int_table(&db);
    let txn = db.begin();
    for n in 0..10 {
        txn.insert_tuple(file.id(), row(&file, n)).unwrap();
    }
    txn.commit().unwrap();

    let page_id = PageId::new(file.id(), 0);
    let page = file.read_page(page_id).unwrap();
    file.write_page(&page).unwrap();
    let again = file.read_page(page_id).unwrap();
    assert_eq!(again.page_data(), page.page_data());
    assert_eq!(again.page_data().len(), PAGE_SIZE);
}

#[derive(Debug, Default)]
struct OrderingLog {
    forced: Mutex<Vec<PageId>>,
    pending: Mutex<Vec<PageId>>,
}

impl WriteAheadLog for OrderingLog {
    fn log_write(&self, _: TransactionId, page_id: PageId, before: &[u8], after: &[u8]) -> DbResult<u64> {
        assert_eq!(before.len(), after.len());
        self.pending.lock().unwrap().push(page_id);
        Ok(0)
    }

    fn force(&self) -> DbResult<()> {
        let mut pending = self.pending.lock().unwrap();
        self.forced.lock().unwrap().append(&mut pending);
        Ok(())
    }
}

#[test]
fn log_is_forced_before_pages_are_written() {
    let dir = TempDir::new().unwrap();
    let desc = Arc::new(TupleDesc::from_types(&[Type::Int]).unwrap());
    let file = Arc::new(HeapFile::open(dir.path().join("t.dat"), desc, PAGE_SIZE).unwrap());
    let catalog = Arc::new(Catalog::new());
    catalog.add_table("t", Arc::clone(&file));
    let log = Arc::new(OrderingLog::default());
    let config = DbConfig::default().with_page_size(PAGE_SIZE).with_pool_pages(4);
    let pool = BufferPool::new(
        &config,
        catalog,
        Arc::new(LockManager::default()),
        Arc::clone(&log) as Arc<dyn WriteAheadLog>,
    );

    let txn = TransactionId::new();
    let tuple = Tuple::new(Arc::clone(file.tuple_desc()), vec![Field::Int(9)]).unwrap();
    pool.insert_tuple(txn, file.id(), tuple).unwrap();
    assert!(log.forced.lock().unwrap().is_empty());

    pool.transaction_complete(txn, true).unwrap();
    let page_id = PageId::new(file.id(), 0);
    assert_eq!(*log.forced.lock().unwrap(), vec![page_id]);
    assert!(log.pending.lock().unwrap().is_empty());

    let on_disk = file.read_page(page_id).unwrap();
    assert_eq!(on_disk.tuples().count(), 1);
    assert!(!pool.holds_lock(txn, page_id));

    //  a clean page is not logged again
    let reader = TransactionId::new();
    drop(pool.get_page(reader, page_id, Permission::ReadOnly).unwrap());
    pool.transaction_complete(reader, true).unwrap();
    assert_eq!(log.forced.lock().unwrap().len(), 1);
}
