//! Transaction lifecycle: begin, commit, abort, and the global gate used
//! to quiesce the system for checkpointing.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use log::debug;

use crate::error::EngineResult;
use crate::failpoint;
use crate::lock_manager::LockManager;
use crate::log_manager::LogManager;
use crate::log_record::LogRecord;
use crate::transaction::{
    IsolationLevel, Transaction, TransactionRegistry, TransactionState, WriteType,
};
use crate::TxnId;

/// An explicit reader-writer gate. `begin`/`commit`/`abort` hold it in
/// shared mode for the transaction's lifetime; `block_all_transactions`
/// takes it exclusively so a checkpointer can see a quiescent system.
#[derive(Default)]
struct TxnGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

#[derive(Default)]
struct GateState {
    active: usize,
    blocked: bool,
}

impl TxnGate {
    fn enter(&self) {
        let mut state = self.state.lock().unwrap();
        while state.blocked {
            state = self.cv.wait(state).unwrap();
        }
        state.active += 1;
    }

    fn exit(&self) {
        let mut state = self.state.lock().unwrap();
        state.active -= 1;
        self.cv.notify_all();
    }

    fn block(&self) {
        let mut state = self.state.lock().unwrap();
        state.blocked = true;
        while state.active > 0 {
            state = self.cv.wait(state).unwrap();
        }
    }

    fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        state.blocked = false;
        self.cv.notify_all();
    }
}

pub struct TransactionManager {
    registry: Arc<TransactionRegistry>,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    next_txn_id: AtomicI32,
    gate: TxnGate,
}

impl TransactionManager {
    pub fn new(
        registry: Arc<TransactionRegistry>,
        lock_manager: Arc<LockManager>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self {
            registry,
            lock_manager,
            log_manager,
            next_txn_id: AtomicI32::new(0),
            gate: TxnGate::default(),
        }
    }

    /// Recovery advances the counter past every id found in the log.
    pub fn set_next_txn_id(&self, next: TxnId) {
        self.next_txn_id.store(next, Ordering::SeqCst);
    }

    /// Starts a transaction and writes its BEGIN record.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        self.gate.enter();
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id, isolation_level));

        let mut record = LogRecord::new_begin(id);
        let lsn = self.log_manager.append(&mut record);
        txn.set_prev_lsn(lsn);

        self.registry.insert(Arc::clone(&txn));
        debug!("txn {id} began at {isolation_level:?}");
        txn
    }

    /// Commits: applies deferred deletes, makes the COMMIT record durable,
    /// then releases every lock.
    pub fn commit(&self, txn: &Arc<Transaction>) -> EngineResult<()> {
        let result = self.commit_inner(txn);
        self.lock_manager.release_all(txn);
        self.registry.remove(txn.id());
        self.gate.exit();
        result
    }

    fn commit_inner(&self, txn: &Arc<Transaction>) -> EngineResult<()> {
        failpoint::check("txn.commit.before_log")?;
        txn.set_state(TransactionState::Committed);

        // Marked deletes become physical deletes only once the transaction
        // is sure to commit.
        let write_set = txn.take_table_write_set();
        for record in write_set.iter().rev() {
            if record.wtype == WriteType::Delete {
                record.table.apply_delete(txn, record.rid)?;
            }
        }
        txn.take_index_write_set();

        let mut record = LogRecord::new_commit(txn.id(), txn.prev_lsn());
        let lsn = self.log_manager.append(&mut record);
        txn.set_prev_lsn(lsn);
        self.log_manager.flush(lsn);
        debug!("txn {} committed at lsn {lsn}", txn.id());
        Ok(())
    }

    /// Aborts: replays both write sets in reverse, writes the ABORT
    /// record, then releases every lock. The state flips to `ABORTED`
    /// before any lock work so the deadlock detector stays consistent.
    pub fn abort(&self, txn: &Arc<Transaction>) -> EngineResult<()> {
        txn.set_state(TransactionState::Aborted);
        let result = self.abort_inner(txn);
        self.lock_manager.release_all(txn);
        self.registry.remove(txn.id());
        self.gate.exit();
        result
    }

    fn abort_inner(&self, txn: &Arc<Transaction>) -> EngineResult<()> {
        failpoint::check("txn.abort.before_rollback")?;

        let table_writes = txn.take_table_write_set();
        for record in table_writes.iter().rev() {
            match record.wtype {
                WriteType::Insert => {
                    record.table.apply_delete(txn, record.rid)?;
                }
                WriteType::Delete => {
                    record.table.rollback_delete(txn, record.rid)?;
                }
                WriteType::Update => {
                    record.table.update_tuple(txn, record.rid, &record.tuple)?;
                }
            }
        }

        let index_writes = txn.take_index_write_set();
        for record in index_writes.iter().rev() {
            match record.wtype {
                WriteType::Insert => {
                    record.index.remove(&record.key)?;
                }
                WriteType::Delete => {
                    record.index.insert(record.key, record.rid)?;
                }
                WriteType::Update => {
                    record.index.remove(&record.key)?;
                    record.index.insert(record.old_key, record.rid)?;
                }
            }
        }

        let mut record = LogRecord::new_abort(txn.id(), txn.prev_lsn());
        let lsn = self.log_manager.append(&mut record);
        txn.set_prev_lsn(lsn);
        debug!("txn {} aborted", txn.id());
        Ok(())
    }

    /// Blocks new and waits out running transactions; the checkpoint hook.
    pub fn block_all_transactions(&self) {
        self.gate.block();
    }

    pub fn resume_transactions(&self) {
        self.gate.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use crate::transaction::TransactionRegistry;
    use serial_test::serial;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Arc<TransactionManager>) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::open(dir.path().join("tm.db"), dir.path().join("tm.log")).unwrap(),
        );
        let log_manager = Arc::new(LogManager::new(disk));
        let registry = Arc::new(TransactionRegistry::new());
        let lock_manager = Arc::new(LockManager::new(Arc::clone(&registry)));
        let tm = Arc::new(TransactionManager::new(registry, lock_manager, log_manager));
        (dir, tm)
    }

    #[test]
    #[serial]
    fn transaction_ids_are_sequential() {
        let (_dir, tm) = setup();
        let t1 = tm.begin(IsolationLevel::RepeatableRead);
        let t2 = tm.begin(IsolationLevel::ReadCommitted);
        assert_eq!(t1.id(), 0);
        assert_eq!(t2.id(), 1);
        tm.commit(&t1).unwrap();
        tm.commit(&t2).unwrap();
    }

    #[test]
    #[serial]
    fn commit_failpoint_leaves_transaction_uncommitted() {
        let (_dir, tm) = setup();
        let txn = tm.begin(IsolationLevel::RepeatableRead);

        crate::failpoint::disarm_all();
        crate::failpoint::arm("txn.commit.before_log");
        let result = tm.commit(&txn);
        crate::failpoint::disarm_all();

        assert!(result.is_err());
        assert_ne!(txn.state(), TransactionState::Committed);
    }

    #[test]
    #[serial]
    fn abort_failpoint_surfaces_the_error() {
        let (_dir, tm) = setup();
        let txn = tm.begin(IsolationLevel::RepeatableRead);

        crate::failpoint::disarm_all();
        crate::failpoint::arm("txn.abort.before_rollback");
        let result = tm.abort(&txn);
        crate::failpoint::disarm_all();

        assert!(result.is_err());
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    #[serial]
    fn block_all_waits_for_active_transactions() {
        let (_dir, tm) = setup();
        let txn = tm.begin(IsolationLevel::RepeatableRead);

        let tm_clone = Arc::clone(&tm);
        let blocker = thread::spawn(move || {
            tm_clone.block_all_transactions();
            tm_clone.resume_transactions();
        });

        // The blocker cannot finish while a transaction is open.
        thread::sleep(Duration::from_millis(100));
        assert!(!blocker.is_finished());

        tm.commit(&txn).unwrap();
        blocker.join().unwrap();

        // New transactions run again once resumed.
        let after = tm.begin(IsolationLevel::RepeatableRead);
        tm.commit(&after).unwrap();
    }
}
