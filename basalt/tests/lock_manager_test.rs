use std::sync::Arc;
use std::thread;
use std::time::Duration;

use basalt::error::AbortReason;
use basalt::transaction::{IsolationLevel, Transaction, TransactionState};
use basalt::Rid;
use serial_test::serial;

mod common;

fn repeatable_read(id: i32) -> Arc<Transaction> {
    Arc::new(Transaction::new(id, IsolationLevel::RepeatableRead))
}

#[test]
fn shared_locks_are_compatible() {
    let (registry, lm) = common::lock_stack(Duration::from_millis(50));
    let rid = Rid::new(1, 0);

    let t1 = repeatable_read(0);
    let t2 = repeatable_read(1);
    registry.insert(t1.clone());
    registry.insert(t2.clone());

    lm.lock_shared(&t1, rid).unwrap();
    lm.lock_shared(&t2, rid).unwrap();
    assert!(t1.is_shared_locked(&rid));
    assert!(t2.is_shared_locked(&rid));

    // Re-acquiring a held lock is idempotent.
    lm.lock_shared(&t1, rid).unwrap();

    assert!(lm.unlock(&t1, rid));
    assert!(lm.unlock(&t2, rid));
}

#[test]
fn exclusive_waits_for_shared_release() {
    let (registry, lm) = common::lock_stack(Duration::from_millis(50));
    let rid = Rid::new(1, 0);

    let reader = repeatable_read(0);
    let writer = repeatable_read(1);
    registry.insert(reader.clone());
    registry.insert(writer.clone());

    lm.lock_shared(&reader, rid).unwrap();

    let lm_clone = Arc::clone(&lm);
    let writer_clone = Arc::clone(&writer);
    let handle = thread::spawn(move || lm_clone.lock_exclusive(&writer_clone, rid));

    thread::sleep(Duration::from_millis(100));
    assert!(!writer.is_exclusive_locked(&rid));

    lm.unlock(&reader, rid);
    handle.join().unwrap().unwrap();
    assert!(writer.is_exclusive_locked(&rid));
}

#[test]
fn shared_lock_forbidden_at_read_uncommitted() {
    let (registry, lm) = common::lock_stack(Duration::from_millis(50));
    let txn = Arc::new(Transaction::new(0, IsolationLevel::ReadUncommitted));
    registry.insert(txn.clone());

    let err = lm.lock_shared(&txn, Rid::new(1, 0)).unwrap_err();
    assert_eq!(
        err.abort_reason(),
        Some(AbortReason::SharedOnReadUncommitted)
    );
    assert_eq!(txn.state(), TransactionState::Aborted);

    // Exclusive locks are always allowed at this level.
    let writer = Arc::new(Transaction::new(1, IsolationLevel::ReadUncommitted));
    registry.insert(writer.clone());
    lm.lock_exclusive(&writer, Rid::new(1, 0)).unwrap();
}

#[test]
fn repeatable_read_enforces_two_phases() {
    let (registry, lm) = common::lock_stack(Duration::from_millis(50));
    let txn = repeatable_read(0);
    registry.insert(txn.clone());

    let r1 = Rid::new(1, 0);
    let r2 = Rid::new(1, 1);
    lm.lock_shared(&txn, r1).unwrap();
    assert_eq!(txn.state(), TransactionState::Growing);

    lm.unlock(&txn, r1);
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lm.lock_shared(&txn, r2).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn read_committed_release_keeps_growing() {
    let (registry, lm) = common::lock_stack(Duration::from_millis(50));
    let txn = Arc::new(Transaction::new(0, IsolationLevel::ReadCommitted));
    registry.insert(txn.clone());

    let rid = Rid::new(2, 0);
    lm.lock_shared(&txn, rid).unwrap();
    lm.unlock(&txn, rid);
    assert_eq!(txn.state(), TransactionState::Growing);

    // Locking after a release stays legal at this level.
    lm.lock_shared(&txn, rid).unwrap();
}

#[test]
fn concurrent_upgrade_aborts_the_newcomer() {
    let (registry, lm) = common::lock_stack(Duration::from_millis(50));
    let rid = Rid::new(3, 0);

    let t1 = repeatable_read(0);
    let t2 = repeatable_read(1);
    registry.insert(t1.clone());
    registry.insert(t2.clone());

    lm.lock_shared(&t1, rid).unwrap();
    lm.lock_shared(&t2, rid).unwrap();

    // T1's upgrade blocks behind T2's shared lock.
    let lm_clone = Arc::clone(&lm);
    let t1_clone = Arc::clone(&t1);
    let upgrader = thread::spawn(move || lm_clone.lock_upgrade(&t1_clone, rid));
    thread::sleep(Duration::from_millis(100));

    // T2 arriving second is aborted outright.
    let err = lm.lock_upgrade(&t2, rid).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::UpgradeConflict));
    assert_eq!(t2.state(), TransactionState::Aborted);

    // Once T2's locks cascade away, T1 holds exclusive.
    lm.release_all(&t2);
    upgrader.join().unwrap().unwrap();
    assert!(t1.is_exclusive_locked(&rid));
    assert!(!t1.is_shared_locked(&rid));
}

#[test]
#[serial]
fn deadlock_detector_aborts_the_youngest() {
    let (registry, lm) = common::lock_stack(Duration::from_millis(20));
    lm.run_cycle_detection();

    let r1 = Rid::new(4, 0);
    let r2 = Rid::new(4, 1);
    let t1 = repeatable_read(0);
    let t2 = repeatable_read(1);
    registry.insert(t1.clone());
    registry.insert(t2.clone());

    lm.lock_exclusive(&t1, r1).unwrap();
    lm.lock_exclusive(&t2, r2).unwrap();

    let lm_older = Arc::clone(&lm);
    let t1_clone = Arc::clone(&t1);
    let older = thread::spawn(move || lm_older.lock_exclusive(&t1_clone, r2));

    thread::sleep(Duration::from_millis(50));

    // Closing the cycle: the detector must pick T2, the younger.
    let result = lm.lock_exclusive(&t2, r1);
    let err = result.unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::Deadlock));
    assert_eq!(t2.state(), TransactionState::Aborted);

    lm.release_all(&t2);
    older.join().unwrap().unwrap();
    assert!(t1.is_exclusive_locked(&r1));
    assert!(t1.is_exclusive_locked(&r2));
    assert_eq!(t1.state(), TransactionState::Growing);

    lm.stop_cycle_detection();
}

#[test]
#[serial]
fn upgrade_participates_in_deadlock_detection() {
    let (registry, lm) = common::lock_stack(Duration::from_millis(20));
    lm.run_cycle_detection();

    let r1 = Rid::new(5, 0);
    let r2 = Rid::new(5, 1);
    let t1 = repeatable_read(0);
    let t2 = repeatable_read(1);
    registry.insert(t1.clone());
    registry.insert(t2.clone());

    // Both transactions share r1; T1 also holds r2 exclusively.
    lm.lock_shared(&t1, r1).unwrap();
    lm.lock_shared(&t2, r1).unwrap();
    lm.lock_exclusive(&t1, r2).unwrap();

    // T1's upgrade of r1 waits on T2's shared lock.
    let lm_clone = Arc::clone(&lm);
    let t1_clone = Arc::clone(&t1);
    let upgrader = thread::spawn(move || lm_clone.lock_upgrade(&t1_clone, r1));
    thread::sleep(Duration::from_millis(50));

    // T2 then waits on r2, closing a cycle that only the upgrade edge
    // makes visible. The detector aborts T2, the younger.
    let err = lm.lock_exclusive(&t2, r2).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::Deadlock));
    assert_eq!(t2.state(), TransactionState::Aborted);

    lm.release_all(&t2);
    upgrader.join().unwrap().unwrap();
    assert!(t1.is_exclusive_locked(&r1));

    lm.stop_cycle_detection();
}
