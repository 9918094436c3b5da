use std::{error::Error, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use heapstore::{
    Database, DbConfig, Field, HeapFile, HeapPage, PageId, RecordId, ReplacementKind, Tuple,
    TupleDesc,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "heapstore", version, about = "Inspect and edit heapstore tables")]
struct CommandLine {
    /// Directory holding the table files and the log
    #[arg(long, default_value = "./heapstore-data")]
    dir: PathBuf,

    #[arg(long, default_value_t = heapstore::config::DEFAULT_PAGE_SIZE)]
    page_size: usize,

    #[arg(long, default_value_t = heapstore::config::DEFAULT_POOL_PAGES)]
    pool_pages: usize,

    /// Replacement policy: random, lru or clock
    #[arg(long, default_value = "random")]
    policy: ReplacementKind,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Insert one row and commit
    Insert {
        table: String,
        /// Schema as `name:type,...`, e.g. `id:int,name:string`
        #[arg(long)]
        schema: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Print every row of a table
    Scan {
        table: String,
        #[arg(long)]
        schema: String,
    },
    /// Delete the row stored at a page and slot, then commit
    Delete {
        table: String,
        #[arg(long)]
        schema: String,
        #[arg(long)]
        page: usize,
        #[arg(long)]
        slot: usize,
    },
    /// Show the layout of a table file and buffer pool counters
    Info {
        table: String,
        #[arg(long)]
        schema: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = CommandLine::parse();
    let config = DbConfig::default()
        .with_page_size(cli.page_size)
        .with_pool_pages(cli.pool_pages)
        .with_replacement(cli.policy);
    let db = Database::open(&cli.dir, config)?;

    match cli.command {
        Command::Insert {
            table,
            schema,
            values,
        } => insert(&db, &table, &schema, &values),
        Command::Scan { table, schema } => scan(&db, &table, &schema),
        Command::Delete {
            table,
            schema,
            page,
            slot,
        } => delete(&db, &table, &schema, page, slot),
        Command::Info { table, schema } => info(&db, &table, &schema),
    }
}

fn open_table(db: &Database, table: &str, schema: &str) -> Result<Arc<HeapFile>, Box<dyn Error>> {
    Ok(db.create_table(table, TupleDesc::parse(schema)?)?)
}

fn insert(db: &Database, table: &str, schema: &str, values: &[String]) -> Result<(), Box<dyn Error>> {
    let file = open_table(db, table, schema)?;
    let desc = Arc::clone(file.tuple_desc());
    if values.len() != desc.num_fields() {
        return Err(format!(
            "{table} has {} columns, got {} values",
            desc.num_fields(),
            values.len()
        )
        .into());
    }
    let fields = values
        .iter()
        .enumerate()
        .map(|(i, text)| Field::parse_as(desc.field_type(i)?, text))
        .collect::<Result<Vec<_>, _>>()?;

    let txn = db.begin();
    let record_id = txn.insert_tuple(file.id(), Tuple::new(desc, fields)?)?;
    txn.commit()?;
    println!("inserted {record_id}");
    Ok(())
}

fn scan(db: &Database, table: &str, schema: &str) -> Result<(), Box<dyn Error>> {
    let file = open_table(db, table, schema)?;
    println!("{}", file.tuple_desc());

    let txn = db.begin();
    let mut rows = 0;
    for tuple in txn.scan(&file) {
        let tuple = tuple?;
        let rid = tuple
            .record_id()
            .map_or_else(|| "-".to_string(), |rid| rid.to_string());
        println!("{rid:>24}  {tuple}");
        rows += 1;
    }
    txn.commit()?;
    println!("({rows} rows)");
    Ok(())
}

fn delete(db: &Database, table: &str, schema: &str, page: usize, slot: usize) -> Result<(), Box<dyn Error>> {
    let file = open_table(db, table, schema)?;
    let target = RecordId::new(PageId::new(file.id(), page), slot);

    let txn = db.begin();
    let mut found = None;
    for tuple in txn.scan(&file) {
        let tuple = tuple?;
        if tuple.record_id() == Some(target) {
            found = Some(tuple);
            break;
        }
    }
    let Some(tuple) = found else {
        txn.abort()?;
        return Err(format!("no row at page {page} slot {slot}").into());
    };
    txn.delete_tuple(&tuple)?;
    txn.commit()?;
    println!("deleted {target}: {tuple}");
    Ok(())
}

fn info(db: &Database, table: &str, schema: &str) -> Result<(), Box<dyn Error>> {
    let file = open_table(db, table, schema)?;
    let desc = file.tuple_desc();
    let num_pages = file.num_pages()?;

    let txn = db.begin();
    let rows = txn.scan(&file).collect::<Result<Vec<_>, _>>()?.len();
    txn.commit()?;

    let (hits, misses) = db.buffer_pool().stats().get();
    println!("table:          {table}");
    println!("file:           {}", file.path().display());
    println!("table id:       {:x}", file.id());
    println!("schema:         {desc}");
    println!("tuple size:     {} bytes", desc.size());
    println!("page size:      {} bytes", file.page_size());
    println!("slots per page: {}", HeapPage::slots_per_page(file.page_size(), desc));
    println!("pages:          {num_pages}");
    println!("rows:           {rows}");
    println!("pool:           {} / {} frames resident", db.buffer_pool().resident_pages(), db.buffer_pool().capacity());
    println!("pool hits:      {hits}, misses: {misses}");
    Ok(())
}
