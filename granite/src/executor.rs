//! Volcano-style executors.
//!
//! Each executor exposes `init` and `next`; `next` hands back one row and
//! its record id. Executors take the record locks their isolation level
//! calls for: shared locks on reads (released immediately under
//! `READ_COMMITTED`), exclusive locks on writes, and an upgrade when a
//! transaction writes a record it already read.

use std::collections::HashMap;
use std::sync::Arc;

use basalt::btree::TreeIterator;
use basalt::lock_manager::LockManager;
use basalt::transaction::{
    IndexWriteRecord, IsolationLevel, Transaction, WriteType,
};
use basalt::Rid;
use log::debug;

use crate::catalog::{Catalog, IndexInfo, TableInfo};
use crate::errors::ExecutionError;
use crate::types::{Row, Value};

/// Everything an executor needs to run.
pub struct ExecutorContext {
    pub catalog: Arc<Catalog>,
    pub txn: Arc<Transaction>,
    pub lock_manager: Arc<LockManager>,
}

impl ExecutorContext {
    pub fn new(
        catalog: Arc<Catalog>,
        txn: Arc<Transaction>,
        lock_manager: Arc<LockManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            txn,
            lock_manager,
        })
    }

    /// Shared lock for a read. Returns whether a lock was actually taken
    /// so `READ_COMMITTED` can drop it right after the read.
    fn lock_for_read(&self, rid: Rid) -> Result<bool, ExecutionError> {
        if self.txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Ok(false);
        }
        if self.txn.is_shared_locked(&rid) || self.txn.is_exclusive_locked(&rid) {
            return Ok(false);
        }
        self.lock_manager.lock_shared(&self.txn, rid)?;
        Ok(true)
    }

    fn unlock_after_read(&self, rid: Rid, locked_here: bool) {
        if locked_here && self.txn.isolation_level() == IsolationLevel::ReadCommitted {
            self.lock_manager.unlock(&self.txn, rid);
        }
    }

    /// Exclusive lock for a write, upgrading an existing shared lock.
    fn lock_for_write(&self, rid: Rid) -> Result<(), ExecutionError> {
        if self.txn.is_exclusive_locked(&rid) {
            return Ok(());
        }
        if self.txn.is_shared_locked(&rid) {
            self.lock_manager.lock_upgrade(&self.txn, rid)?;
        } else {
            self.lock_manager.lock_exclusive(&self.txn, rid)?;
        }
        Ok(())
    }
}

pub trait Executor {
    fn init(&mut self) -> Result<(), ExecutionError>;
    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// A scan predicate over one column.
#[derive(Debug, Clone)]
pub enum Predicate {
    True,
    Compare {
        column: usize,
        op: CompareOp,
        value: Value,
    },
}

impl Predicate {
    fn evaluate(&self, row: &Row) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Compare { column, op, value } => {
                let Some(actual) = row.get(*column) else {
                    return false;
                };
                match op {
                    CompareOp::Eq => actual == value,
                    CompareOp::NotEq => actual != value,
                    CompareOp::Lt => actual < value,
                    CompareOp::LtEq => actual <= value,
                    CompareOp::Gt => actual > value,
                    CompareOp::GtEq => actual >= value,
                }
            }
        }
    }
}

/// Full scan of a table's heap file.
pub struct SeqScanExecutor {
    ctx: Arc<ExecutorContext>,
    table_name: String,
    predicate: Predicate,
    table: Option<Arc<TableInfo>>,
    iter: Option<basalt::table_heap::TableIterator>,
}

impl SeqScanExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, table_name: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            predicate,
            table: None,
            iter: None,
        }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        let table = self.ctx.catalog.get_table(&self.table_name)?;
        self.iter = Some(table.table.iter());
        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        let table = self.table.as_ref().expect("init not called");
        let iter = self.iter.as_mut().expect("init not called");

        for entry in iter.by_ref() {
            let (rid, _stale) = entry?;
            let locked_here = self.ctx.lock_for_read(rid)?;
            // Re-read under the lock; the pre-lock image may be stale.
            let tuple = table.table.get_tuple(&self.ctx.txn, rid)?;
            let row = match tuple {
                Some(tuple) => table.schema.decode(&tuple)?,
                None => {
                    self.ctx.unlock_after_read(rid, locked_here);
                    continue;
                }
            };
            self.ctx.unlock_after_read(rid, locked_here);
            if self.predicate.evaluate(&row) {
                return Ok(Some((row, rid)));
            }
        }
        Ok(None)
    }
}

/// Range scan over a B+ tree index, resolving record ids back through the
/// heap.
pub struct IndexScanExecutor {
    ctx: Arc<ExecutorContext>,
    table_name: String,
    index_name: String,
    start_key: Option<i32>,
    end_key: Option<i32>,
    predicate: Predicate,
    table: Option<Arc<TableInfo>>,
    iter: Option<TreeIterator<i32, Rid>>,
}

impl IndexScanExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_name: impl Into<String>,
        index_name: impl Into<String>,
        start_key: Option<i32>,
        end_key: Option<i32>,
        predicate: Predicate,
    ) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            index_name: index_name.into(),
            start_key,
            end_key,
            predicate,
            table: None,
            iter: None,
        }
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        let table = self.ctx.catalog.get_table(&self.table_name)?;
        let index = self
            .ctx
            .catalog
            .get_index(&self.table_name, &self.index_name)?;
        self.iter = Some(match self.start_key {
            Some(start) => index.index.iter_from(&start)?,
            None => index.index.iter()?,
        });
        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        let table = self.table.as_ref().expect("init not called");
        let iter = self.iter.as_mut().expect("init not called");

        for (key, rid) in iter.by_ref() {
            if let Some(end) = self.end_key {
                if key > end {
                    return Ok(None);
                }
            }
            let locked_here = self.ctx.lock_for_read(rid)?;
            let tuple = table.table.get_tuple(&self.ctx.txn, rid)?;
            let row = match tuple {
                Some(tuple) => table.schema.decode(&tuple)?,
                None => {
                    self.ctx.unlock_after_read(rid, locked_here);
                    continue;
                }
            };
            self.ctx.unlock_after_read(rid, locked_here);
            if self.predicate.evaluate(&row) {
                return Ok(Some((row, rid)));
            }
        }
        Ok(None)
    }
}

/// Inserts raw rows or the rows produced by a child executor, maintaining
/// every index on the table.
pub struct InsertExecutor {
    ctx: Arc<ExecutorContext>,
    table_name: String,
    rows: std::vec::IntoIter<Row>,
    child: Option<Box<dyn Executor>>,
    table: Option<Arc<TableInfo>>,
    indexes: Vec<Arc<IndexInfo>>,
}

impl InsertExecutor {
    pub fn from_rows(
        ctx: Arc<ExecutorContext>,
        table_name: impl Into<String>,
        rows: Vec<Row>,
    ) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            rows: rows.into_iter(),
            child: None,
            table: None,
            indexes: Vec::new(),
        }
    }

    pub fn from_child(
        ctx: Arc<ExecutorContext>,
        table_name: impl Into<String>,
        child: Box<dyn Executor>,
    ) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            rows: Vec::new().into_iter(),
            child: Some(child),
            table: None,
            indexes: Vec::new(),
        }
    }

    fn insert_row(&self, row: &Row) -> Result<Rid, ExecutionError> {
        let table = self.table.as_ref().expect("init not called");
        let txn = &self.ctx.txn;

        let tuple = table.schema.encode(row)?;
        let rid = table.table.insert_tuple(txn, &tuple)?;
        // The record exists only after the insert, so the lock follows it.
        self.ctx.lock_for_write(rid)?;

        for index_info in &self.indexes {
            let key = table.schema.key_from_row(row, index_info.key_attr)?;
            index_info.index.insert(key, rid)?;
            txn.append_index_write(IndexWriteRecord {
                rid,
                wtype: WriteType::Insert,
                key,
                old_key: key,
                index: Arc::clone(&index_info.index),
            });
        }
        debug!("inserted {rid} into '{}'", table.name);
        Ok(rid)
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.table = Some(self.ctx.catalog.get_table(&self.table_name)?);
        self.indexes = self.ctx.catalog.get_table_indexes(&self.table_name);
        if let Some(child) = self.child.as_mut() {
            child.init()?;
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        let row = match self.child.as_mut() {
            Some(child) => match child.next()? {
                Some((row, _)) => Some(row),
                None => None,
            },
            None => self.rows.next(),
        };
        let Some(row) = row else {
            return Ok(None);
        };
        let rid = self.insert_row(&row)?;
        Ok(Some((row, rid)))
    }
}

/// Mark-deletes the rows produced by its child; the physical delete runs
/// at commit.
pub struct DeleteExecutor {
    ctx: Arc<ExecutorContext>,
    table_name: String,
    child: Box<dyn Executor>,
    table: Option<Arc<TableInfo>>,
    indexes: Vec<Arc<IndexInfo>>,
}

impl DeleteExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_name: impl Into<String>,
        child: Box<dyn Executor>,
    ) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            child,
            table: None,
            indexes: Vec::new(),
        }
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.table = Some(self.ctx.catalog.get_table(&self.table_name)?);
        self.indexes = self.ctx.catalog.get_table_indexes(&self.table_name);
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        let Some((row, rid)) = self.child.next()? else {
            return Ok(None);
        };
        let table = self.table.as_ref().expect("init not called");
        let txn = &self.ctx.txn;

        self.ctx.lock_for_write(rid)?;
        if !table.table.mark_delete(txn, rid)? {
            return Ok(Some((row, rid)));
        }

        for index_info in &self.indexes {
            let key = table.schema.key_from_row(&row, index_info.key_attr)?;
            index_info.index.remove(&key)?;
            txn.append_index_write(IndexWriteRecord {
                rid,
                wtype: WriteType::Delete,
                key,
                old_key: key,
                index: Arc::clone(&index_info.index),
            });
        }
        debug!("marked {rid} deleted in '{}'", table.name);
        Ok(Some((row, rid)))
    }
}

/// Rewrites chosen columns of the rows produced by its child.
pub struct UpdateExecutor {
    ctx: Arc<ExecutorContext>,
    table_name: String,
    child: Box<dyn Executor>,
    /// `(column index, new value)` assignments.
    assignments: Vec<(usize, Value)>,
    table: Option<Arc<TableInfo>>,
    indexes: Vec<Arc<IndexInfo>>,
}

impl UpdateExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_name: impl Into<String>,
        child: Box<dyn Executor>,
        assignments: Vec<(usize, Value)>,
    ) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            child,
            assignments,
            table: None,
            indexes: Vec::new(),
        }
    }
}

impl Executor for UpdateExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.table = Some(self.ctx.catalog.get_table(&self.table_name)?);
        self.indexes = self.ctx.catalog.get_table_indexes(&self.table_name);
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        let Some((row, rid)) = self.child.next()? else {
            return Ok(None);
        };
        let table = self.table.as_ref().expect("init not called");
        let txn = &self.ctx.txn;

        let mut new_row = row.clone();
        for (column, value) in &self.assignments {
            new_row[*column] = value.clone();
        }

        self.ctx.lock_for_write(rid)?;
        let tuple = table.schema.encode(&new_row)?;
        if !table.table.update_tuple(txn, rid, &tuple)? {
            return Ok(Some((row, rid)));
        }

        for index_info in &self.indexes {
            let old_key = table.schema.key_from_row(&row, index_info.key_attr)?;
            let new_key = table.schema.key_from_row(&new_row, index_info.key_attr)?;
            if old_key != new_key {
                index_info.index.remove(&old_key)?;
                index_info.index.insert(new_key, rid)?;
                txn.append_index_write(IndexWriteRecord {
                    rid,
                    wtype: WriteType::Update,
                    key: new_key,
                    old_key,
                    index: Arc::clone(&index_info.index),
                });
            }
        }
        Ok(Some((new_row, rid)))
    }
}

/// Equijoin of two child executors; the right side is materialized once.
pub struct NestedLoopJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_column: usize,
    right_column: usize,
    right_rows: Vec<Row>,
    current_left: Option<Row>,
    right_cursor: usize,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        left_column: usize,
        right_column: usize,
    ) -> Self {
        Self {
            left,
            right,
            left_column,
            right_column,
            right_rows: Vec::new(),
            current_left: None,
            right_cursor: 0,
        }
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.left.init()?;
        self.right.init()?;
        while let Some((row, _)) = self.right.next()? {
            self.right_rows.push(row);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        loop {
            if self.current_left.is_none() {
                match self.left.next()? {
                    Some((row, _)) => {
                        self.current_left = Some(row);
                        self.right_cursor = 0;
                    }
                    None => return Ok(None),
                }
            }

            let left_row = self.current_left.as_ref().unwrap();
            while self.right_cursor < self.right_rows.len() {
                let right_row = &self.right_rows[self.right_cursor];
                self.right_cursor += 1;
                if left_row.get(self.left_column) == right_row.get(self.right_column) {
                    let mut joined = left_row.clone();
                    joined.extend(right_row.iter().cloned());
                    return Ok(Some((joined, Rid::default())));
                }
            }
            self.current_left = None;
        }
    }
}

/// Index-nested-loop join: each outer row's join key probes the inner
/// table's index, so the inner relation is never scanned or materialized.
/// Keys are unique, so an outer row joins with at most one inner row;
/// outer rows with no index match are dropped.
pub struct NestedIndexJoinExecutor {
    ctx: Arc<ExecutorContext>,
    outer: Box<dyn Executor>,
    inner_table_name: String,
    inner_index_name: String,
    /// Column of the outer row holding the join key.
    outer_column: usize,
    inner_table: Option<Arc<TableInfo>>,
    inner_index: Option<Arc<IndexInfo>>,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        outer: Box<dyn Executor>,
        inner_table_name: impl Into<String>,
        inner_index_name: impl Into<String>,
        outer_column: usize,
    ) -> Self {
        Self {
            ctx,
            outer,
            inner_table_name: inner_table_name.into(),
            inner_index_name: inner_index_name.into(),
            outer_column,
            inner_table: None,
            inner_index: None,
        }
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.inner_table = Some(self.ctx.catalog.get_table(&self.inner_table_name)?);
        self.inner_index = Some(
            self.ctx
                .catalog
                .get_index(&self.inner_table_name, &self.inner_index_name)?,
        );
        self.outer.init()
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        while let Some((outer_row, _)) = self.outer.next()? {
            let table = self.inner_table.as_ref().expect("init not called");
            let index = self.inner_index.as_ref().expect("init not called");

            let key = outer_row
                .get(self.outer_column)
                .and_then(Value::as_int)
                .ok_or_else(|| {
                    ExecutionError::TypeMismatch(format!(
                        "join column {} is not an integer",
                        self.outer_column
                    ))
                })?;
            let Some(rid) = index.index.get_value(&key)? else {
                continue;
            };

            let locked_here = self.ctx.lock_for_read(rid)?;
            let tuple = table.table.get_tuple(&self.ctx.txn, rid)?;
            let inner_row = match tuple {
                Some(tuple) => table.schema.decode(&tuple)?,
                None => {
                    self.ctx.unlock_after_read(rid, locked_here);
                    continue;
                }
            };
            self.ctx.unlock_after_read(rid, locked_here);

            let mut joined = outer_row;
            joined.extend(inner_row);
            return Ok(Some((joined, rid)));
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    Count,
    Sum,
    Min,
    Max,
}

/// Hash aggregation with optional grouping. The child is drained in
/// `init`; `next` streams the group rows.
pub struct AggregationExecutor {
    child: Box<dyn Executor>,
    group_by: Vec<usize>,
    /// `(aggregate, column index)` pairs; the column is ignored for COUNT.
    aggregates: Vec<(AggregationType, usize)>,
    results: std::vec::IntoIter<Row>,
}

impl AggregationExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        group_by: Vec<usize>,
        aggregates: Vec<(AggregationType, usize)>,
    ) -> Self {
        Self {
            child,
            group_by,
            aggregates,
            results: Vec::new().into_iter(),
        }
    }

    fn apply(
        &self,
        states: &mut [Option<i64>],
        row: &Row,
    ) -> Result<(), ExecutionError> {
        for (state, (agg, column)) in states.iter_mut().zip(&self.aggregates) {
            match agg {
                AggregationType::Count => {
                    *state = Some(state.unwrap_or(0) + 1);
                }
                AggregationType::Sum | AggregationType::Min | AggregationType::Max => {
                    let value = row
                        .get(*column)
                        .and_then(Value::as_int)
                        .ok_or_else(|| {
                            ExecutionError::TypeMismatch(format!(
                                "aggregate over non-integer column {column}"
                            ))
                        })? as i64;
                    *state = Some(match (*state, agg) {
                        (None, _) => value,
                        (Some(acc), AggregationType::Sum) => acc + value,
                        (Some(acc), AggregationType::Min) => acc.min(value),
                        (Some(acc), AggregationType::Max) => acc.max(value),
                        (Some(_), AggregationType::Count) => unreachable!(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;

        let mut groups: HashMap<Vec<Value>, Vec<Option<i64>>> = HashMap::new();
        let mut order: Vec<Vec<Value>> = Vec::new();
        while let Some((row, _)) = self.child.next()? {
            let key: Vec<Value> = self
                .group_by
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Int(0)))
                .collect();
            if !groups.contains_key(&key) {
                order.push(key.clone());
                let initial: Vec<Option<i64>> = self
                    .aggregates
                    .iter()
                    .map(|(agg, _)| match agg {
                        AggregationType::Count => Some(0),
                        _ => None,
                    })
                    .collect();
                groups.insert(key.clone(), initial);
            }
            let states = groups.get_mut(&key).unwrap();
            self.apply(states, &row)?;
        }

        let mut results = Vec::with_capacity(order.len());
        for key in order {
            let states = &groups[&key];
            let mut out = key;
            for state in states {
                out.push(Value::Int(state.unwrap_or(0) as i32));
            }
            results.push(out);
        }
        self.results = results.into_iter();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        Ok(self.results.next().map(|row| (row, Rid::default())))
    }
}
