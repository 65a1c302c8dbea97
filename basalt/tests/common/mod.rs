#![allow(dead_code)]

use std::sync::Arc;

use basalt::buffer_pool::BufferPoolManager;
use basalt::disk::DiskManager;
use basalt::lock_manager::LockManager;
use basalt::log_manager::LogManager;
use basalt::transaction::TransactionRegistry;
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A storage stack for tests that do not need the full database wiring.
pub struct TestEngine {
    pub dir: TempDir,
    pub disk: Arc<DiskManager>,
    pub log_manager: Arc<LogManager>,
    pub bpm: Arc<BufferPoolManager>,
}

pub fn engine(pool_size: usize) -> TestEngine {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let disk = Arc::new(
        DiskManager::open(dir.path().join("test.db"), dir.path().join("test.log")).unwrap(),
    );
    let log_manager = Arc::new(LogManager::new(Arc::clone(&disk)));
    let bpm = Arc::new(BufferPoolManager::new(
        pool_size,
        Arc::clone(&disk),
        Some(Arc::clone(&log_manager)),
    ));
    TestEngine {
        dir,
        disk,
        log_manager,
        bpm,
    }
}

/// A lock manager with its registry, for concurrency tests.
pub fn lock_stack(
    interval: std::time::Duration,
) -> (Arc<TransactionRegistry>, Arc<LockManager>) {
    init_logging();
    let registry = Arc::new(TransactionRegistry::new());
    let lock_manager = Arc::new(LockManager::with_interval(Arc::clone(&registry), interval));
    (registry, lock_manager)
}
