use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use heapstore::{
    Database, DbConfig, Field, HeapFile, PageId, Permission, ReplacementKind, Tuple, TupleDesc,
    Type,
};
use tempfile::TempDir;

const ROWS: i32 = 5_000;
const BATCH: usize = 250;

fn setup(pool_pages: usize, replacement: ReplacementKind) -> (TempDir, Database, Arc<HeapFile>) {
    let dir = TempDir::new().unwrap();
    let config = DbConfig::default()
        .with_pool_pages(pool_pages)
        .with_replacement(replacement);
    let db = Database::open(dir.path(), config).unwrap();
    let table = db
        .create_table(
            "bench",
            TupleDesc::new(&[Type::Int, Type::Int], &["id", "value"]).unwrap(),
        )
        .unwrap();

    //  commit in batches so a small pool never fills with dirty pages
    for batch in (0..ROWS).collect::<Vec<_>>().chunks(BATCH) {
        let txn = db.begin();
        for &i in batch {
            let tuple = Tuple::new(
                Arc::clone(table.tuple_desc()),
                vec![Field::Int(i), Field::Int(i * 10)],
            )
            .unwrap();
            txn.insert_tuple(table.id(), tuple).unwrap();
        }
        txn.commit().unwrap();
    }
    (dir, db, table)
}

fn bench_get_page_hit(c: &mut Criterion) {
    let (_dir, db, table) = setup(64, ReplacementKind::Random);
    let page_id = PageId::new(table.id(), 0);
    let txn = db.begin();

    c.bench_function("get_page (hit)", |b| {
        b.iter(|| {
            let page = db
                .buffer_pool()
                .get_page(txn.id(), black_box(page_id), Permission::ReadOnly)
                .unwrap();
            black_box(page.read().num_empty_slots());
        })
    });
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    for policy in [ReplacementKind::Random, ReplacementKind::Lru, ReplacementKind::Clock] {
        //  a pool smaller than the table forces evictions on every pass
        let (_dir, db, table) = setup(8, policy);
        group.bench_with_input(BenchmarkId::new("policy", format!("{policy:?}")), &policy, |b, _| {
            b.iter(|| {
                let txn = db.begin();
                let rows = txn.scan(&table).map(|t| t.unwrap()).count();
                txn.commit().unwrap();
                black_box(rows)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_get_page_hit, bench_scan);
criterion_main!(benches);
