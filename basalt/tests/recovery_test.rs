use std::sync::Arc;

use basalt::database::Database;
use basalt::recovery::LogRecovery;
use basalt::table_heap::TableHeap;
use basalt::transaction::IsolationLevel;
use basalt::{PageId, Rid, Tuple};
use tempfile::TempDir;

mod common;

struct CrashSite {
    dir: TempDir,
    heap_page: PageId,
    committed_rid: Rid,
    lost_rid: Rid,
}

/// T1 inserts and commits; T2 inserts and the process "crashes" before T2
/// commits: background threads stop (draining the log) but no data page is
/// flushed.
fn run_until_crash() -> CrashSite {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db =
        Database::open_with_pool_size(dir.path().join("crash.db"), dir.path().join("crash.log"), 16)
            .unwrap();

    let t1 = db.begin(IsolationLevel::RepeatableRead);
    let heap = TableHeap::new(
        Arc::clone(db.buffer_pool()),
        Arc::clone(db.log_manager()),
        &t1,
    )
    .unwrap();
    let heap_page = heap.first_page_id();
    let committed_rid = heap
        .insert_tuple(&t1, &Tuple::from(&b"committed-row"[..]))
        .unwrap();
    db.commit(&t1).unwrap();

    let t2 = db.begin(IsolationLevel::RepeatableRead);
    let lost_rid = heap
        .insert_tuple(&t2, &Tuple::from(&b"uncommitted-row"[..]))
        .unwrap();

    db.shutdown(false).unwrap();
    CrashSite {
        dir,
        heap_page,
        committed_rid,
        lost_rid,
    }
}

#[test]
fn committed_work_survives_and_losers_are_undone() {
    let site = run_until_crash();

    let db = Database::open_with_pool_size(
        site.dir.path().join("crash.db"),
        site.dir.path().join("crash.log"),
        16,
    )
    .unwrap();

    // Before recovery the data file knows nothing: no page was flushed.
    {
        let frame = db.buffer_pool().fetch_page(site.heap_page).unwrap();
        assert_eq!(frame.read().tuple_count(), 0);
        db.buffer_pool().unpin_page(site.heap_page, false);
    }

    db.recover().unwrap();

    let frame = db.buffer_pool().fetch_page(site.heap_page).unwrap();
    {
        let page = frame.read();
        let committed = page.get_tuple(site.committed_rid.slot).unwrap();
        assert_eq!(committed.data(), b"committed-row");
        assert!(page.get_tuple(site.lost_rid.slot).is_none());
    }
    db.buffer_pool().unpin_page(site.heap_page, false);
    assert!(db.registry().is_empty());
    db.shutdown(true).unwrap();
}

#[test]
fn redo_then_undo_twice_is_idempotent() {
    let site = run_until_crash();
    let engine = {
        common::init_logging();
        let disk = Arc::new(
            basalt::disk::DiskManager::open(
                site.dir.path().join("crash.db"),
                site.dir.path().join("crash.log"),
            )
            .unwrap(),
        );
        let bpm = Arc::new(basalt::buffer_pool::BufferPoolManager::new(16, disk.clone(), None));
        (disk, bpm)
    };
    let (disk, bpm) = engine;

    let mut first = LogRecovery::new(disk.clone(), bpm.clone());
    first.redo().unwrap();
    assert_eq!(first.active_txn().len(), 1);
    first.undo().unwrap();
    assert!(first.active_txn().is_empty());
    bpm.flush_all_pages().unwrap();

    let snapshot = {
        let frame = bpm.fetch_page(site.heap_page).unwrap();
        let data = frame.read().data;
        bpm.unpin_page(site.heap_page, false);
        data
    };

    let mut second = LogRecovery::new(disk.clone(), bpm.clone());
    second.redo().unwrap();
    second.undo().unwrap();
    bpm.flush_all_pages().unwrap();

    let frame = bpm.fetch_page(site.heap_page).unwrap();
    assert_eq!(frame.read().data[..], snapshot[..]);
    bpm.unpin_page(site.heap_page, false);
}

#[test]
fn uncommitted_updates_and_deletes_roll_back() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("rollback.db");
    let log_path = dir.path().join("rollback.log");
    let (heap_page, updated_rid, deleted_rid) = {
        let db = Database::open_with_pool_size(&db_path, &log_path, 16).unwrap();

        let setup = db.begin(IsolationLevel::RepeatableRead);
        let heap = TableHeap::new(
            Arc::clone(db.buffer_pool()),
            Arc::clone(db.log_manager()),
            &setup,
        )
        .unwrap();
        let updated_rid = heap.insert_tuple(&setup, &Tuple::from(&b"original"[..])).unwrap();
        let deleted_rid = heap.insert_tuple(&setup, &Tuple::from(&b"keep-me"[..])).unwrap();
        db.commit(&setup).unwrap();

        let loser = db.begin(IsolationLevel::RepeatableRead);
        heap.update_tuple(&loser, updated_rid, &Tuple::from(&b"clobbered"[..]))
            .unwrap();
        heap.mark_delete(&loser, deleted_rid).unwrap();

        db.shutdown(false).unwrap();
        (heap.first_page_id(), updated_rid, deleted_rid)
    };

    let db = Database::open_with_pool_size(&db_path, &log_path, 16).unwrap();
    db.recover().unwrap();

    let frame = db.buffer_pool().fetch_page(heap_page).unwrap();
    {
        let page = frame.read();
        assert_eq!(page.get_tuple(updated_rid.slot).unwrap().data(), b"original");
        assert_eq!(page.get_tuple(deleted_rid.slot).unwrap().data(), b"keep-me");
    }
    db.buffer_pool().unpin_page(heap_page, false);
    db.shutdown(true).unwrap();
}

#[test]
fn recovery_restores_counters_for_new_transactions() {
    let site = run_until_crash();

    let db = Database::open_with_pool_size(
        site.dir.path().join("crash.db"),
        site.dir.path().join("crash.log"),
        16,
    )
    .unwrap();
    db.recover().unwrap();

    // New work lands after the recovered history.
    let txn = db.begin(IsolationLevel::RepeatableRead);
    assert!(txn.id() >= 2);
    let heap = TableHeap::open(
        Arc::clone(db.buffer_pool()),
        Arc::clone(db.log_manager()),
        site.heap_page,
    );
    let rid = heap.insert_tuple(&txn, &Tuple::from(&b"post-crash"[..])).unwrap();
    db.commit(&txn).unwrap();

    let stored = heap.get_tuple(&txn, rid).unwrap().unwrap();
    assert_eq!(stored.data(), b"post-crash");
    db.shutdown(true).unwrap();
}
