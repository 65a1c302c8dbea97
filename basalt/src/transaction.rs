use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::btree::RecordIndex;
use crate::table_heap::TableHeap;
use crate::tuple::Tuple;
use crate::{Lsn, Rid, TxnId, INVALID_LSN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase-locking state machine:
/// `GROWING → SHRINKING → (COMMITTED | ABORTED)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
    Update,
}

/// One undo entry for tuple storage. For updates, `tuple` is the old image;
/// for deletes it is the deleted tuple.
pub struct TableWriteRecord {
    pub rid: Rid,
    pub wtype: WriteType,
    pub tuple: Tuple,
    pub table: Arc<TableHeap>,
}

/// One undo entry for an index. `old_key` is only meaningful for updates.
pub struct IndexWriteRecord {
    pub rid: Rid,
    pub wtype: WriteType,
    pub key: i32,
    pub old_key: i32,
    pub index: Arc<RecordIndex>,
}

/// A transaction handle. Shared across the lock manager, the heap and the
/// deadlock detector; all fields use interior mutability.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    prev_lsn: AtomicI32,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    table_write_set: Mutex<Vec<TableWriteRecord>>,
    index_write_set: Mutex<Vec<IndexWriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            prev_lsn: AtomicI32::new(INVALID_LSN),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            table_write_set: Mutex::new(Vec::new()),
            index_write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock().unwrap() = state;
    }

    /// The LSN of the last log record written by this transaction.
    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn is_shared_locked(&self, rid: &Rid) -> bool {
        self.shared_lock_set.lock().unwrap().contains(rid)
    }

    pub fn is_exclusive_locked(&self, rid: &Rid) -> bool {
        self.exclusive_lock_set.lock().unwrap().contains(rid)
    }

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().unwrap().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().unwrap().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: &Rid) {
        self.shared_lock_set.lock().unwrap().remove(rid);
    }

    pub fn remove_exclusive_lock(&self, rid: &Rid) {
        self.exclusive_lock_set.lock().unwrap().remove(rid);
    }

    /// Every record this transaction currently holds a lock on.
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self
            .shared_lock_set
            .lock()
            .unwrap()
            .iter()
            .copied()
            .collect();
        rids.extend(self.exclusive_lock_set.lock().unwrap().iter().copied());
        rids
    }

    /// Records a table mutation for undo. Mutations replayed by the abort
    /// path itself arrive with a finished state and are not re-recorded.
    pub fn append_table_write(&self, record: TableWriteRecord) {
        if self.is_finished() {
            return;
        }
        self.table_write_set.lock().unwrap().push(record);
    }

    pub fn append_index_write(&self, record: IndexWriteRecord) {
        if self.is_finished() {
            return;
        }
        self.index_write_set.lock().unwrap().push(record);
    }

    pub fn take_table_write_set(&self) -> Vec<TableWriteRecord> {
        std::mem::take(&mut self.table_write_set.lock().unwrap())
    }

    pub fn take_index_write_set(&self) -> Vec<IndexWriteRecord> {
        std::mem::take(&mut self.index_write_set.lock().unwrap())
    }

    fn is_finished(&self) -> bool {
        matches!(
            self.state(),
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("isolation_level", &self.isolation_level)
            .field("state", &self.state())
            .finish()
    }
}

/// The process-wide transaction table. Initialized when the database opens;
/// the deadlock detector resolves victims through it.
#[derive(Default)]
pub struct TransactionRegistry {
    map: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, txn: Arc<Transaction>) {
        self.map.lock().unwrap().insert(txn.id(), txn);
    }

    pub fn get(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.map.lock().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: TxnId) {
        self.map.lock().unwrap().remove(&id);
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().unwrap().is_empty()
    }
}
