use basalt::btree::BPlusTree;
use basalt::Rid;
use rand::seq::SliceRandom;
use rand::SeedableRng;

mod common;

fn rid_for(key: i32) -> Rid {
    Rid::new(key, key as u32)
}

#[test]
fn sequential_insert_scan_delete() {
    let engine = common::engine(64);
    let tree: BPlusTree<i32, Rid> =
        BPlusTree::new("seq_index", engine.bpm.clone(), 4, 4).unwrap();

    for key in 1..=1000 {
        assert!(tree.insert(key, rid_for(key)).unwrap());
    }
    tree.check_integrity().unwrap();

    let scanned: Vec<i32> = tree.iter().unwrap().map(|(k, _)| k).collect();
    let expected: Vec<i32> = (1..=1000).collect();
    assert_eq!(scanned, expected);

    for key in 1..=500 {
        tree.remove(&key).unwrap();
    }
    tree.check_integrity().unwrap();

    let scanned: Vec<i32> = tree.iter().unwrap().map(|(k, _)| k).collect();
    let expected: Vec<i32> = (501..=1000).collect();
    assert_eq!(scanned, expected);

    for key in 501..=1000 {
        assert_eq!(tree.get_value(&key).unwrap(), Some(rid_for(key)));
    }
    assert_eq!(tree.get_value(&250).unwrap(), None);
}

#[test]
fn duplicate_keys_are_rejected() {
    let engine = common::engine(16);
    let tree: BPlusTree<i32, Rid> =
        BPlusTree::new("dup_index", engine.bpm.clone(), 4, 4).unwrap();

    assert!(tree.insert(42, rid_for(42)).unwrap());
    assert!(!tree.insert(42, rid_for(43)).unwrap());
    assert_eq!(tree.get_value(&42).unwrap(), Some(rid_for(42)));
}

#[test]
fn delete_to_empty_and_reinsert() {
    let engine = common::engine(32);
    let tree: BPlusTree<i32, Rid> =
        BPlusTree::new("shrink_index", engine.bpm.clone(), 4, 4).unwrap();

    for key in 1..=64 {
        tree.insert(key, rid_for(key)).unwrap();
    }
    for key in 1..=64 {
        tree.remove(&key).unwrap();
    }
    assert!(tree.is_empty());
    // Removing from an empty tree is a no-op.
    tree.remove(&1).unwrap();

    for key in (1..=16).rev() {
        tree.insert(key, rid_for(key)).unwrap();
    }
    tree.check_integrity().unwrap();
    let scanned: Vec<i32> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (1..=16).collect::<Vec<_>>());
}

#[test]
fn range_scan_from_key() {
    let engine = common::engine(64);
    let tree: BPlusTree<i32, Rid> =
        BPlusTree::new("range_index", engine.bpm.clone(), 4, 4).unwrap();

    for key in (2..=400).step_by(2) {
        tree.insert(key, rid_for(key)).unwrap();
    }

    // Start key present.
    let scanned: Vec<i32> = tree.iter_from(&100).unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (100..=400).step_by(2).collect::<Vec<_>>());

    // Start key absent: the cursor lands on the next larger key.
    let scanned: Vec<i32> = tree.iter_from(&101).unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (102..=400).step_by(2).collect::<Vec<_>>());

    // Start past the largest key yields nothing.
    assert_eq!(tree.iter_from(&401).unwrap().count(), 0);
}

#[test]
fn randomized_inserts_and_deletes() {
    let engine = common::engine(64);
    let tree: BPlusTree<i32, Rid> =
        BPlusTree::new("random_index", engine.bpm.clone(), 4, 5).unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xb1a5);

    let mut keys: Vec<i32> = (1..=600).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        assert!(tree.insert(key, rid_for(key)).unwrap());
    }
    tree.check_integrity().unwrap();

    let (to_delete, to_keep) = keys.split_at(300);
    let mut to_delete = to_delete.to_vec();
    to_delete.shuffle(&mut rng);
    for &key in &to_delete {
        tree.remove(&key).unwrap();
    }
    tree.check_integrity().unwrap();

    for &key in to_keep {
        assert_eq!(tree.get_value(&key).unwrap(), Some(rid_for(key)));
    }
    for &key in &to_delete {
        assert_eq!(tree.get_value(&key).unwrap(), None);
    }

    let mut expected: Vec<i32> = to_keep.to_vec();
    expected.sort_unstable();
    let scanned: Vec<i32> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, expected);
}

#[test]
fn root_pointer_survives_in_header_page() {
    let engine = common::engine(32);
    {
        let tree: BPlusTree<i32, Rid> =
            BPlusTree::new("persistent_index", engine.bpm.clone(), 4, 4).unwrap();
        for key in 1..=100 {
            tree.insert(key, rid_for(key)).unwrap();
        }
    }
    // A second handle on the same name sees the same tree.
    let tree: BPlusTree<i32, Rid> =
        BPlusTree::new("persistent_index", engine.bpm.clone(), 4, 4).unwrap();
    assert_eq!(tree.get_value(&77).unwrap(), Some(rid_for(77)));
    assert_eq!(tree.iter().unwrap().count(), 100);
}
