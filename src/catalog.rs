//! Minimal table registry: maps table ids and names to their heap files.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{DbError, DbResult, HeapFile, TableId};

#[derive(Debug)]
struct TableEntry {
    name: String,
    file: Arc<HeapFile>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<HashMap<TableId, TableEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `file` under `name`. A table previously registered under the
    /// same name is replaced.
    pub fn add_table(&self, name: &str, file: Arc<HeapFile>) -> TableId {
        let id = file.id();
        let mut tables = self.tables.write().unwrap();
        tables.retain(|_, entry| entry.name != name);
        tables.insert(
            id,
            TableEntry {
                name: name.to_string(),
                file,
            },
        );
        id
    }

    pub fn file(&self, table_id: TableId) -> DbResult<Arc<HeapFile>> {
        self.tables
            .read()
            .unwrap()
            .get(&table_id)
            .map(|entry| Arc::clone(&entry.file))
            .ok_or(DbError::UnknownTable(table_id))
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables
            .read()
            .unwrap()
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
    }

    pub fn table_name(&self, table_id: TableId) -> Option<String> {
        self.tables
            .read()
            .unwrap()
            .get(&table_id)
            .map(|entry| entry.name.clone())
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .unwrap()
            .values()
            .map(|entry| entry.name.clone())
            .collect();
        names.sort();
        names
    }
}
