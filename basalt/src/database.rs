//! Database bootstrap.
//!
//! Wires the engine components together in dependency order, starts the
//! two background threads once their dependencies exist, and stops them
//! before anything is torn down.

use std::path::Path;
use std::sync::Arc;

use log::info;

use crate::buffer_pool::BufferPoolManager;
use crate::disk::DiskManager;
use crate::error::EngineResult;
use crate::lock_manager::LockManager;
use crate::log_manager::LogManager;
use crate::recovery::LogRecovery;
use crate::transaction::{IsolationLevel, Transaction, TransactionRegistry};
use crate::transaction_manager::TransactionManager;
use crate::{BUFFER_POOL_SIZE, INVALID_LSN};

pub struct Database {
    disk: Arc<DiskManager>,
    log_manager: Arc<LogManager>,
    bpm: Arc<BufferPoolManager>,
    registry: Arc<TransactionRegistry>,
    lock_manager: Arc<LockManager>,
    txn_manager: Arc<TransactionManager>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(db_path: P, log_path: P) -> EngineResult<Self> {
        Self::open_with_pool_size(db_path, log_path, BUFFER_POOL_SIZE)
    }

    pub fn open_with_pool_size<P: AsRef<Path>>(
        db_path: P,
        log_path: P,
        pool_size: usize,
    ) -> EngineResult<Self> {
        let disk = Arc::new(DiskManager::open(db_path, log_path)?);
        let log_manager = Arc::new(LogManager::new(Arc::clone(&disk)));
        let bpm = Arc::new(BufferPoolManager::new(
            pool_size,
            Arc::clone(&disk),
            Some(Arc::clone(&log_manager)),
        ));
        let registry = Arc::new(TransactionRegistry::new());
        let lock_manager = Arc::new(LockManager::new(Arc::clone(&registry)));
        let txn_manager = Arc::new(TransactionManager::new(
            Arc::clone(&registry),
            Arc::clone(&lock_manager),
            Arc::clone(&log_manager),
        ));

        log_manager.run_flush_thread();
        lock_manager.run_cycle_detection();
        info!("database open");

        Ok(Self {
            disk,
            log_manager,
            bpm,
            registry,
            lock_manager,
            txn_manager,
        })
    }

    /// Replays the log (redo then undo), pushes the recovered pages to
    /// disk and advances the LSN and transaction-id counters past
    /// everything the log contained.
    pub fn recover(&self) -> EngineResult<()> {
        let mut recovery = LogRecovery::new(Arc::clone(&self.disk), Arc::clone(&self.bpm));
        recovery.redo()?;
        recovery.undo()?;

        if recovery.max_lsn() != INVALID_LSN {
            self.log_manager.reset_lsn(recovery.max_lsn() + 1);
        }
        if recovery.max_txn_id() >= 0 {
            self.txn_manager.set_next_txn_id(recovery.max_txn_id() + 1);
        }
        self.bpm.flush_all_pages()?;
        info!("recovery finished");
        Ok(())
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        self.txn_manager.begin(isolation_level)
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> EngineResult<()> {
        self.txn_manager.commit(txn)
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> EngineResult<()> {
        self.txn_manager.abort(txn)
    }

    /// Stops both background threads; optionally flushes the buffer pool.
    /// Crash tests shut down with `flush_pages == false` so the data file
    /// holds only what eviction wrote.
    pub fn shutdown(&self, flush_pages: bool) -> EngineResult<()> {
        self.lock_manager.stop_cycle_detection();
        self.log_manager.stop_flush_thread();
        if flush_pages {
            self.bpm.flush_all_pages()?;
        }
        info!("database shut down");
        Ok(())
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }
}
