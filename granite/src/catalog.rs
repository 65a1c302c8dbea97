//! A non-persistent catalog for the executors: tables by name and oid,
//! indexes per table. Index creation bulk-loads existing rows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use basalt::btree::{BPlusTree, RecordIndex};
use basalt::btree_page::{internal_capacity, leaf_capacity};
use basalt::buffer_pool::BufferPoolManager;
use basalt::log_manager::LogManager;
use basalt::table_heap::TableHeap;
use basalt::transaction::Transaction;
use basalt::Rid;
use log::info;

use crate::errors::ExecutionError;
use crate::types::Schema;

pub type TableOid = u32;
pub type IndexOid = u32;

pub struct TableInfo {
    pub name: String,
    pub oid: TableOid,
    pub schema: Schema,
    pub table: Arc<TableHeap>,
}

pub struct IndexInfo {
    pub name: String,
    pub oid: IndexOid,
    pub table_name: String,
    /// Which column of the table schema the index keys on.
    pub key_attr: usize,
    pub index: Arc<RecordIndex>,
}

pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    log_manager: Arc<LogManager>,
    tables: Mutex<HashMap<TableOid, Arc<TableInfo>>>,
    table_names: Mutex<HashMap<String, TableOid>>,
    indexes: Mutex<HashMap<IndexOid, Arc<IndexInfo>>>,
    index_names: Mutex<HashMap<String, HashMap<String, IndexOid>>>,
    next_table_oid: AtomicU32,
    next_index_oid: AtomicU32,
}

impl Catalog {
    pub fn new(bpm: Arc<BufferPoolManager>, log_manager: Arc<LogManager>) -> Self {
        Self {
            bpm,
            log_manager,
            tables: Mutex::new(HashMap::new()),
            table_names: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
            index_names: Mutex::new(HashMap::new()),
            next_table_oid: AtomicU32::new(0),
            next_index_oid: AtomicU32::new(0),
        }
    }

    pub fn create_table(
        &self,
        txn: &Transaction,
        name: impl Into<String>,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, ExecutionError> {
        let name = name.into();
        let mut names = self.table_names.lock().unwrap();
        if names.contains_key(&name) {
            return Err(ExecutionError::TableAlreadyExists(name));
        }

        let heap = TableHeap::new(
            Arc::clone(&self.bpm),
            Arc::clone(&self.log_manager),
            txn,
        )?;
        let oid = self.next_table_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(TableInfo {
            name: name.clone(),
            oid,
            schema,
            table: heap,
        });
        names.insert(name.clone(), oid);
        self.tables.lock().unwrap().insert(oid, Arc::clone(&info));
        info!("created table '{name}' (oid {oid})");
        Ok(info)
    }

    pub fn get_table(&self, name: &str) -> Result<Arc<TableInfo>, ExecutionError> {
        let oid = *self
            .table_names
            .lock()
            .unwrap()
            .get(name)
            .ok_or_else(|| ExecutionError::TableNotFound(name.to_string()))?;
        self.get_table_by_oid(oid)
    }

    pub fn get_table_by_oid(&self, oid: TableOid) -> Result<Arc<TableInfo>, ExecutionError> {
        self.tables
            .lock()
            .unwrap()
            .get(&oid)
            .cloned()
            .ok_or_else(|| ExecutionError::TableNotFound(format!("oid {oid}")))
    }

    /// Creates an index over one integer column and populates it from the
    /// table's existing rows.
    pub fn create_index(
        &self,
        _txn: &Transaction,
        index_name: impl Into<String>,
        table_name: &str,
        key_attr: usize,
    ) -> Result<Arc<IndexInfo>, ExecutionError> {
        let index_name = index_name.into();
        let table_info = self.get_table(table_name)?;

        let mut index_names = self.index_names.lock().unwrap();
        let per_table = index_names.entry(table_name.to_string()).or_default();
        if per_table.contains_key(&index_name) {
            return Err(ExecutionError::IndexAlreadyExists(index_name));
        }

        let tree = Arc::new(BPlusTree::new(
            index_name.clone(),
            Arc::clone(&self.bpm),
            leaf_capacity::<i32, Rid>(),
            internal_capacity::<i32>(),
        )?);

        for entry in table_info.table.iter() {
            let (rid, tuple) = entry?;
            let row = table_info.schema.decode(&tuple)?;
            let key = table_info.schema.key_from_row(&row, key_attr)?;
            tree.insert(key, rid)?;
        }

        let oid = self.next_index_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(IndexInfo {
            name: index_name.clone(),
            oid,
            table_name: table_name.to_string(),
            key_attr,
            index: tree,
        });
        per_table.insert(index_name.clone(), oid);
        self.indexes.lock().unwrap().insert(oid, Arc::clone(&info));
        info!("created index '{index_name}' on '{table_name}' (oid {oid})");
        Ok(info)
    }

    pub fn get_index(
        &self,
        table_name: &str,
        index_name: &str,
    ) -> Result<Arc<IndexInfo>, ExecutionError> {
        let oid = self
            .index_names
            .lock()
            .unwrap()
            .get(table_name)
            .and_then(|per_table| per_table.get(index_name))
            .copied()
            .ok_or_else(|| ExecutionError::IndexNotFound(index_name.to_string()))?;
        self.indexes
            .lock()
            .unwrap()
            .get(&oid)
            .cloned()
            .ok_or_else(|| ExecutionError::IndexNotFound(index_name.to_string()))
    }

    /// Every index on `table_name`, for write-path maintenance.
    pub fn get_table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let oids: Vec<IndexOid> = self
            .index_names
            .lock()
            .unwrap()
            .get(table_name)
            .map(|per_table| per_table.values().copied().collect())
            .unwrap_or_default();
        let indexes = self.indexes.lock().unwrap();
        oids.iter().filter_map(|oid| indexes.get(oid).cloned()).collect()
    }
}
