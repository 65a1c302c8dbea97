use basalt::error::EngineError;
use basalt::PAGE_SIZE;

mod common;

#[test]
fn pinned_pages_are_never_evicted() {
    let engine = common::engine(4);
    let bpm = &engine.bpm;

    for page_id in 1..=4 {
        let frame = bpm.fetch_page(page_id).unwrap();
        assert_eq!(frame.page_id(), page_id);
    }

    // Every frame is pinned: no victim exists.
    assert!(matches!(
        bpm.fetch_page(5),
        Err(EngineError::BufferPoolExhausted)
    ));

    assert!(bpm.unpin_page(1, false));
    let frame = bpm.fetch_page(5).unwrap();
    assert_eq!(frame.page_id(), 5);
    assert_eq!(bpm.pin_count(5), Some(1));
    assert!(!bpm.is_resident(1));
}

#[test]
fn dirty_pages_survive_eviction() {
    let engine = common::engine(4);
    let bpm = &engine.bpm;

    {
        let frame = bpm.fetch_page(1).unwrap();
        let mut page = frame.write();
        let offset = PAGE_SIZE - 16;
        page.bytes_mut(offset, 5).copy_from_slice(b"hello");
    }
    assert!(bpm.unpin_page(1, true));

    // Exhaust the pool with distinct pages so page 1 gets evicted.
    for page_id in 2..=6 {
        bpm.fetch_page(page_id).unwrap();
        bpm.unpin_page(page_id, false);
    }
    assert!(!bpm.is_resident(1));

    let frame = bpm.fetch_page(1).unwrap();
    let page = frame.read();
    assert_eq!(page.bytes(PAGE_SIZE - 16, 5), b"hello");
}

#[test]
fn unpin_tracks_pin_counts() {
    let engine = common::engine(4);
    let bpm = &engine.bpm;

    bpm.fetch_page(1).unwrap();
    bpm.fetch_page(1).unwrap();
    assert_eq!(bpm.pin_count(1), Some(2));

    assert!(bpm.unpin_page(1, false));
    assert_eq!(bpm.pin_count(1), Some(1));
    assert!(bpm.unpin_page(1, true));
    assert_eq!(bpm.pin_count(1), Some(0));

    // A third unpin underflows and is rejected.
    assert!(!bpm.unpin_page(1, false));
    // Unpinning something that was never fetched is rejected too.
    assert!(!bpm.unpin_page(99, false));
}

#[test]
fn new_page_allocates_zeroed_frames() {
    let engine = common::engine(4);
    let bpm = &engine.bpm;

    let frame = bpm.new_page().unwrap();
    let page_id = frame.page_id();
    // Page 0 is the reserved header page.
    assert!(page_id >= 1);
    assert!(frame.read().data.iter().all(|&b| b == 0));
    assert_eq!(bpm.pin_count(page_id), Some(1));
}

#[test]
fn delete_page_refuses_pinned_pages() {
    let engine = common::engine(4);
    let bpm = &engine.bpm;

    let frame = bpm.new_page().unwrap();
    let page_id = frame.page_id();
    assert!(!bpm.delete_page(page_id).unwrap());

    bpm.unpin_page(page_id, false);
    assert!(bpm.delete_page(page_id).unwrap());
    assert!(!bpm.is_resident(page_id));

    // Deleting a page that is not resident succeeds trivially.
    assert!(bpm.delete_page(1234).unwrap());
}

#[test]
fn flush_page_clears_dirty_state() {
    let engine = common::engine(4);
    let bpm = &engine.bpm;

    {
        let frame = bpm.fetch_page(3).unwrap();
        frame.write().bytes_mut(64, 3).copy_from_slice(b"abc");
    }
    bpm.unpin_page(3, true);
    assert!(bpm.flush_page(3).unwrap());

    let mut raw = [0u8; PAGE_SIZE];
    engine.disk.read_page(3, &mut raw).unwrap();
    assert_eq!(&raw[64..67], b"abc");

    // Flushing a non-resident page or the invalid sentinel is a no-op.
    assert!(!bpm.flush_page(77).unwrap());
    assert!(!bpm.flush_page(basalt::INVALID_PAGE_ID).unwrap());
}
