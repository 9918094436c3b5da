use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use heapstore::{
    Database, DbConfig, DbError, Field, HeapFile, LockWaitConfig, PageId, Permission, Tuple,
    TupleDesc, Type,
};
use tempfile::TempDir;

fn open() -> (TempDir, Arc<Database>, Arc<HeapFile>) {
    let dir = TempDir::new().unwrap();
    let config = DbConfig::default().with_pool_pages(16).with_lock_wait(LockWaitConfig {
        min_wait: Duration::from_millis(1),
        max_wait: Duration::from_millis(5),
        max_probe_budget: 4,
    });
    let db = Arc::new(Database::open(dir.path(), config).unwrap());
    let file = db
        .create_table("t", TupleDesc::from_types(&[Type::Int]).unwrap())
        .unwrap();
    (dir, db, file)
}

fn int_row(file: &HeapFile, v: i32) -> Tuple {
    Tuple::new(Arc::clone(file.tuple_desc()), vec![Field::Int(v)]).unwrap()
}

#[test]
fn concurrent_inserters_all_land() {
    let (_dir, db, file) = open();
    let threads = 4;
    let per_thread = 300;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let file = Arc::clone(&file);
            thread::spawn(move || {
                let mut retries = 0;
                loop {
                    let txn = db.begin();
                    let result = (0..per_thread)
                        .try_for_each(|i| txn.insert_tuple(file.id(), int_row(&file, t * 1000 + i)).map(drop));
                    match result {
                        Ok(()) => {
                            txn.commit().unwrap();
                            return retries;
                        }
                        Err(e) if e.is_abort() => {
                            txn.abort().unwrap();
                            retries += 1;
                        }
                        Err(e) => panic!("insert failed: {e}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let txn = db.begin();
    let mut values: Vec<i32> = txn
        .scan(&file)
        .map(|t| match t.unwrap().field(0).unwrap() {
            Field::Int(v) => *v,
            other => panic!("unexpected field {other}"),
        })
        .collect();
    values.sort();
    let mut expected: Vec<i32> = (0..threads)
        .flat_map(|t| (0..per_thread).map(move |i| t * 1000 + i))
        .collect();
    expected.sort();
    assert_eq!(values, expected);
}

#[test]
fn crossed_writers_deadlock_and_one_survives() {
    let (_dir, db, file) = open();
    let setup = db.begin();
    //  one row per page is enough to make both pages exist
    let per_page = heapstore::HeapPage::slots_per_page(file.page_size(), file.tuple_desc());
    for i in 0..=per_page as i32 {
        setup.insert_tuple(file.id(), int_row(&file, i)).unwrap();
    }
    setup.commit().unwrap();
    assert_eq!(file.num_pages().unwrap(), 2);

    let barrier = Arc::new(Barrier::new(2));
    let run = |first: usize, second: usize| {
        let db = Arc::clone(&db);
        let file = Arc::clone(&file);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let txn = db.begin();
            let pool = db.buffer_pool();
            drop(
                pool.get_page(txn.id(), PageId::new(file.id(), first), Permission::ReadWrite)
                    .unwrap(),
            );
            barrier.wait();
            match pool.get_page(txn.id(), PageId::new(file.id(), second), Permission::ReadWrite) {
                Ok(page) => {
                    drop(page);
                    txn.commit().unwrap();
                    false
                }
                Err(DbError::TransactionAborted(id)) => {
                    assert_eq!(id, txn.id());
                    txn.abort().unwrap();
                    true
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        })
    };

    let a = run(0, 1);
    let b = run(1, 0);
    let outcomes = [a.join().unwrap(), b.join().unwrap()];
    assert!(outcomes.contains(&true), "no transaction was chosen as deadlock victim");
}

#[test]
fn readers_share_and_writer_waits() {
    let (_dir, db, file) = open();
    let setup = db.begin();
    setup.insert_tuple(file.id(), int_row(&file, 1)).unwrap();
    setup.commit().unwrap();
    let page_id = PageId::new(file.id(), 0);

    let r1 = db.begin();
    let r2 = db.begin();
    drop(db.buffer_pool().get_page(r1.id(), page_id, Permission::ReadOnly).unwrap());
    drop(db.buffer_pool().get_page(r2.id(), page_id, Permission::ReadOnly).unwrap());
    assert_eq!(db.lock_manager().holders(page_id).len(), 2);

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            let txn = db.begin();
            drop(db.buffer_pool().get_page(txn.id(), page_id, Permission::ReadWrite).unwrap());
            let holders = db.lock_manager().holders(page_id);
            txn.commit().unwrap();
            holders
        })
    };

    thread::sleep(Duration::from_millis(30));
    assert!(!writer.is_finished());
    r1.commit().unwrap();
    thread::sleep(Duration::from_millis(10));
    assert!(!writer.is_finished());
    r2.commit().unwrap();

    let holders = writer.join().unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].1, Permission::ReadWrite);
}
