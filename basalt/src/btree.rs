//! A disk-resident B+ tree with unique keys.
//!
//! Nodes live in buffer pool pages and reference each other by page id
//! only; every access resolves ids through the buffer pool and no pointer
//! survives an unpin. Structure modifications run under one tree-wide
//! latch, which doubles as the guard on the root page id. The current root
//! is persisted on the catalog header page under the tree's name.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::btree_page::{
    internal_capacity, leaf_capacity, BTreeNodeKind, InternalNode, LeafNode,
};
use crate::buffer_pool::{BufferPoolManager, Frame};
use crate::error::{EngineError, EngineResult};
use crate::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};

/// Key bound: `Ord` stands in for the comparator object.
pub trait IndexKey: Copy + Ord + Default + std::fmt::Debug + Send + Sync + 'static {}
impl<T: Copy + Ord + Default + std::fmt::Debug + Send + Sync + 'static> IndexKey for T {}

pub trait IndexValue: Copy + PartialEq + Default + std::fmt::Debug + Send + Sync + 'static {}
impl<T: Copy + PartialEq + Default + std::fmt::Debug + Send + Sync + 'static> IndexValue for T {}

/// The index shape used for table indexes throughout the engine.
pub type RecordIndex = BPlusTree<i32, Rid>;

pub struct BPlusTree<K, V> {
    name: String,
    bpm: Arc<BufferPoolManager>,
    /// Root page id; its mutex is also the tree-wide latch.
    root: Mutex<PageId>,
    leaf_max_size: i32,
    internal_max_size: i32,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: IndexKey, V: IndexValue> BPlusTree<K, V> {
    /// Opens (or registers) the tree named `name` on the header page.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: i32,
        internal_max_size: i32,
    ) -> EngineResult<Self> {
        let name = name.into();
        assert!(leaf_max_size >= 2 && leaf_max_size <= leaf_capacity::<K, V>());
        assert!(internal_max_size >= 3 && internal_max_size <= internal_capacity::<K>());

        let frame = bpm.fetch_page(HEADER_PAGE_ID)?;
        let root = {
            let mut page = frame.write();
            match page.get_root_id(&name) {
                Some(root) => root,
                None => {
                    page.insert_record(&name, INVALID_PAGE_ID);
                    INVALID_PAGE_ID
                }
            }
        };
        bpm.unpin_page(HEADER_PAGE_ID, true);

        Ok(Self {
            name,
            bpm,
            root: Mutex::new(root),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        *self.root.lock().unwrap() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.lock().unwrap()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> EngineResult<Option<V>> {
        let root = self.root.lock().unwrap();
        if *root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let frame = self.find_leaf(*root, key)?;
        let page_id = frame.page_id();
        let result = {
            let mut page = frame.write();
            LeafNode::<K, V>::attach(&mut page).lookup(key)
        };
        self.bpm.unpin_page(page_id, false);
        Ok(result)
    }

    /// Inserts a unique key. Returns `false` when the key already exists.
    pub fn insert(&self, key: K, value: V) -> EngineResult<bool> {
        let mut root = self.root.lock().unwrap();
        if *root == INVALID_PAGE_ID {
            self.start_new_tree(&mut root, key, value)?;
            return Ok(true);
        }

        let frame = self.find_leaf(*root, &key)?;
        let leaf_id = frame.page_id();
        let mut page = frame.write();
        let mut leaf = LeafNode::<K, V>::attach(&mut page);

        if leaf.lookup(&key).is_some() {
            drop(page);
            self.bpm.unpin_page(leaf_id, false);
            return Ok(false);
        }

        leaf.insert(key, value);
        if leaf.size() <= leaf.max_size() {
            drop(page);
            self.bpm.unpin_page(leaf_id, true);
            return Ok(true);
        }

        // Overflow: split into a fresh right sibling.
        let parent_id = page.btree_parent_page_id();
        let new_frame = match self.bpm.new_page() {
            Ok(frame) => frame,
            Err(e) => {
                drop(page);
                self.bpm.unpin_page(leaf_id, true);
                return Err(e);
            }
        };
        let sibling_id = new_frame.page_id();
        let separator = {
            let mut new_page = new_frame.write();
            let mut sibling = LeafNode::<K, V>::init(
                &mut new_page,
                sibling_id,
                INVALID_PAGE_ID,
                self.leaf_max_size,
            );
            let mut leaf = LeafNode::<K, V>::attach(&mut page);
            leaf.move_half_to(&mut sibling);
            sibling.key_at(0)
        };
        drop(page);
        self.bpm.unpin_page(leaf_id, true);
        self.bpm.unpin_page(sibling_id, true);

        self.insert_into_parent(&mut root, leaf_id, parent_id, separator, sibling_id)?;
        Ok(true)
    }

    /// Deletes `key`; deleting a missing key is a no-op.
    pub fn remove(&self, key: &K) -> EngineResult<()> {
        let mut root = self.root.lock().unwrap();
        if *root == INVALID_PAGE_ID {
            return Ok(());
        }

        let frame = self.find_leaf(*root, key)?;
        let leaf_id = frame.page_id();
        let mut page = frame.write();
        let mut leaf = LeafNode::<K, V>::attach(&mut page);

        if !leaf.remove(key) {
            drop(page);
            self.bpm.unpin_page(leaf_id, false);
            return Ok(());
        }

        let size = leaf.size();
        let min_size = leaf.min_size();
        let parent_id = page.btree_parent_page_id();
        drop(page);
        self.bpm.unpin_page(leaf_id, true);

        if parent_id == INVALID_PAGE_ID {
            // A leaf root may underflow freely; it dies at size zero.
            if size == 0 {
                self.update_root(&mut root, INVALID_PAGE_ID)?;
                self.bpm.delete_page(leaf_id)?;
                debug!("b+ tree '{}' is now empty", self.name);
            }
            return Ok(());
        }
        if size < min_size {
            self.coalesce_or_redistribute(&mut root, leaf_id)?;
        }
        Ok(())
    }

    /// Cursor at the smallest key.
    pub fn iter(&self) -> EngineResult<TreeIterator<K, V>> {
        let root = self.root.lock().unwrap();
        if *root == INVALID_PAGE_ID {
            return Ok(TreeIterator::finished(self.bpm.clone()));
        }
        let frame = self.find_leaf_edge(*root)?;
        Ok(TreeIterator {
            bpm: self.bpm.clone(),
            frame: Some(frame),
            index: 0,
            _marker: PhantomData,
        })
    }

    /// Cursor at the first key ≥ `key`.
    pub fn iter_from(&self, key: &K) -> EngineResult<TreeIterator<K, V>> {
        let root = self.root.lock().unwrap();
        if *root == INVALID_PAGE_ID {
            return Ok(TreeIterator::finished(self.bpm.clone()));
        }
        let frame = self.find_leaf(*root, key)?;
        let index = {
            let mut page = frame.write();
            LeafNode::<K, V>::attach(&mut page).key_index(key)
        };
        Ok(TreeIterator {
            bpm: self.bpm.clone(),
            frame: Some(frame),
            index,
            _marker: PhantomData,
        })
    }

    fn start_new_tree(&self, root: &mut PageId, key: K, value: V) -> EngineResult<()> {
        let frame = self.bpm.new_page()?;
        let page_id = frame.page_id();
        {
            let mut page = frame.write();
            let mut leaf =
                LeafNode::<K, V>::init(&mut page, page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value);
        }
        self.bpm.unpin_page(page_id, true);
        self.update_root(root, page_id)?;
        debug!("b+ tree '{}' rooted at page {page_id}", self.name);
        Ok(())
    }

    /// Walks from `root` down to the leaf that owns `key`; the returned
    /// frame is pinned.
    fn find_leaf(&self, root: PageId, key: &K) -> EngineResult<Arc<Frame>> {
        let mut page_id = root;
        loop {
            let frame = self.bpm.fetch_page(page_id)?;
            let next = {
                let mut page = frame.write();
                match page.btree_kind() {
                    Some(BTreeNodeKind::Leaf) => Ok(None),
                    Some(BTreeNodeKind::Internal) => {
                        Ok(Some(InternalNode::<K>::attach(&mut page).lookup(key)))
                    }
                    None => Err(EngineError::Corrupted(format!(
                        "page {page_id} is not a b+ tree node"
                    ))),
                }
            };
            match next {
                Ok(None) => return Ok(frame),
                Ok(Some(child)) => {
                    self.bpm.unpin_page(page_id, false);
                    page_id = child;
                }
                Err(e) => {
                    self.bpm.unpin_page(page_id, false);
                    return Err(e);
                }
            }
        }
    }

    /// Descends the leftmost spine to the first leaf.
    fn find_leaf_edge(&self, root: PageId) -> EngineResult<Arc<Frame>> {
        let mut page_id = root;
        loop {
            let frame = self.bpm.fetch_page(page_id)?;
            let next = {
                let mut page = frame.write();
                match page.btree_kind() {
                    Some(BTreeNodeKind::Leaf) => Ok(None),
                    Some(BTreeNodeKind::Internal) => {
                        Ok(Some(InternalNode::<K>::attach(&mut page).child_at(0)))
                    }
                    None => Err(EngineError::Corrupted(format!(
                        "page {page_id} is not a b+ tree node"
                    ))),
                }
            };
            match next {
                Ok(None) => return Ok(frame),
                Ok(Some(child)) => {
                    self.bpm.unpin_page(page_id, false);
                    page_id = child;
                }
                Err(e) => {
                    self.bpm.unpin_page(page_id, false);
                    return Err(e);
                }
            }
        }
    }

    /// Inserts the separator produced by a split into the parent level,
    /// splitting upwards as needed.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        left_id: PageId,
        parent_id: PageId,
        key: K,
        right_id: PageId,
    ) -> EngineResult<()> {
        if parent_id == INVALID_PAGE_ID {
            // The old root split: grow the tree by one level.
            let root_frame = self.bpm.new_page()?;
            let new_root_id = root_frame.page_id();
            {
                let mut page = root_frame.write();
                let mut new_root = InternalNode::<K>::init(
                    &mut page,
                    new_root_id,
                    INVALID_PAGE_ID,
                    self.internal_max_size,
                );
                new_root.populate_new_root(left_id, key, right_id);
            }
            self.bpm.unpin_page(new_root_id, true);
            self.reparent(left_id, new_root_id)?;
            self.reparent(right_id, new_root_id)?;
            self.update_root(root, new_root_id)?;
            return Ok(());
        }

        let parent_frame = self.bpm.fetch_page(parent_id)?;
        let mut page = parent_frame.write();
        let mut parent = InternalNode::<K>::attach(&mut page);
        parent.insert_node_after(left_id, key, right_id);
        drop(page);
        self.bpm.unpin_page(parent_id, true);
        self.reparent(right_id, parent_id)?;

        let parent_frame = self.bpm.fetch_page(parent_id)?;
        let mut page = parent_frame.write();
        let parent = InternalNode::<K>::attach(&mut page);
        if parent.size() <= parent.max_size() {
            drop(page);
            self.bpm.unpin_page(parent_id, false);
            return Ok(());
        }

        // The parent overflowed in turn.
        let grandparent_id = page.btree_parent_page_id();
        let new_frame = match self.bpm.new_page() {
            Ok(frame) => frame,
            Err(e) => {
                drop(page);
                self.bpm.unpin_page(parent_id, true);
                return Err(e);
            }
        };
        let sibling_id = new_frame.page_id();
        let (middle_key, moved_children) = {
            let mut new_page = new_frame.write();
            let mut sibling = InternalNode::<K>::init(
                &mut new_page,
                sibling_id,
                INVALID_PAGE_ID,
                self.internal_max_size,
            );
            let mut parent = InternalNode::<K>::attach(&mut page);
            let middle_key = parent.move_half_to(&mut sibling);
            (middle_key, sibling.children())
        };
        drop(page);
        self.bpm.unpin_page(parent_id, true);
        self.bpm.unpin_page(sibling_id, true);

        for child in moved_children {
            self.reparent(child, sibling_id)?;
        }
        self.insert_into_parent(root, parent_id, grandparent_id, middle_key, sibling_id)
    }

    /// Brings an underflowing node back within bounds by borrowing from a
    /// sibling or merging with one, recursing up when the parent in turn
    /// underflows.
    fn coalesce_or_redistribute(&self, root: &mut PageId, page_id: PageId) -> EngineResult<()> {
        let node_frame = self.bpm.fetch_page(page_id)?;
        let (parent_id, kind) = {
            let page = node_frame.read();
            (page.btree_parent_page_id(), page.btree_kind())
        };
        let Some(kind) = kind else {
            self.bpm.unpin_page(page_id, false);
            return Err(EngineError::Corrupted(format!(
                "page {page_id} is not a b+ tree node"
            )));
        };

        let parent_frame = self.bpm.fetch_page(parent_id)?;
        let mut parent_page = parent_frame.write();
        let mut parent = InternalNode::<K>::attach(&mut parent_page);
        let index = parent
            .child_index(page_id)
            .ok_or_else(|| EngineError::Corrupted(format!("page {page_id} missing from parent")))?;

        // Both siblings considered for borrowing share this parent.
        let left_id = (index > 0).then(|| parent.child_at(index - 1));
        let right_id = (index + 1 < parent.size()).then(|| parent.child_at(index + 1));

        // Redistribution from the left sibling first, then the right.
        if let Some(left_id) = left_id {
            let left_frame = self.bpm.fetch_page(left_id)?;
            let can_spare = {
                let left = left_frame.read();
                left.btree_size() > left.btree_min_size()
            };
            if can_spare {
                let mut node_page = node_frame.write();
                let mut left_page = left_frame.write();
                match kind {
                    BTreeNodeKind::Leaf => {
                        let mut node = LeafNode::<K, V>::attach(&mut node_page);
                        let mut left = LeafNode::<K, V>::attach(&mut left_page);
                        left.move_last_to_front_of(&mut node);
                        parent.set_key_at(index, node.key_at(0));
                        drop(node_page);
                        drop(left_page);
                    }
                    BTreeNodeKind::Internal => {
                        let mut node = InternalNode::<K>::attach(&mut node_page);
                        let mut left = InternalNode::<K>::attach(&mut left_page);
                        let middle_key = parent.key_at(index);
                        let new_separator = left.move_last_to_front_of(&mut node, middle_key);
                        parent.set_key_at(index, new_separator);
                        let adopted = node.child_at(0);
                        drop(node_page);
                        drop(left_page);
                        self.reparent(adopted, page_id)?;
                    }
                }
                drop(parent_page);
                self.bpm.unpin_page(left_id, true);
                self.bpm.unpin_page(page_id, true);
                self.bpm.unpin_page(parent_id, true);
                return Ok(());
            }
            self.bpm.unpin_page(left_id, false);
        }

        if let Some(right_id) = right_id {
            let right_frame = self.bpm.fetch_page(right_id)?;
            let can_spare = {
                let right = right_frame.read();
                right.btree_size() > right.btree_min_size()
            };
            if can_spare {
                let mut node_page = node_frame.write();
                let mut right_page = right_frame.write();
                match kind {
                    BTreeNodeKind::Leaf => {
                        let mut node = LeafNode::<K, V>::attach(&mut node_page);
                        let mut right = LeafNode::<K, V>::attach(&mut right_page);
                        right.move_first_to_end_of(&mut node);
                        parent.set_key_at(index + 1, right.key_at(0));
                        drop(node_page);
                        drop(right_page);
                    }
                    BTreeNodeKind::Internal => {
                        let mut node = InternalNode::<K>::attach(&mut node_page);
                        let mut right = InternalNode::<K>::attach(&mut right_page);
                        let middle_key = parent.key_at(index + 1);
                        let new_separator = right.move_first_to_end_of(&mut node, middle_key);
                        parent.set_key_at(index + 1, new_separator);
                        let adopted = node.child_at(node.size() - 1);
                        drop(node_page);
                        drop(right_page);
                        self.reparent(adopted, page_id)?;
                    }
                }
                drop(parent_page);
                self.bpm.unpin_page(right_id, true);
                self.bpm.unpin_page(page_id, true);
                self.bpm.unpin_page(parent_id, true);
                return Ok(());
            }
            self.bpm.unpin_page(right_id, false);
        }

        // Neither sibling can spare an entry: merge. Into the left sibling
        // when one exists, otherwise absorb the right sibling so the leaf
        // chain stays intact.
        let (survivor_id, deleted_id, separator_index) = match left_id {
            Some(left_id) => (left_id, page_id, index),
            None => {
                let right_id = right_id.ok_or_else(|| {
                    EngineError::Corrupted(format!("page {page_id} has no siblings"))
                })?;
                (page_id, right_id, index + 1)
            }
        };

        let survivor_frame = self.bpm.fetch_page(survivor_id)?;
        let deleted_frame = self.bpm.fetch_page(deleted_id)?;
        let adopted = {
            let mut survivor_page = survivor_frame.write();
            let mut deleted_page = deleted_frame.write();
            match kind {
                BTreeNodeKind::Leaf => {
                    let mut survivor = LeafNode::<K, V>::attach(&mut survivor_page);
                    let mut deleted = LeafNode::<K, V>::attach(&mut deleted_page);
                    deleted.move_all_to(&mut survivor);
                    Vec::new()
                }
                BTreeNodeKind::Internal => {
                    let mut survivor = InternalNode::<K>::attach(&mut survivor_page);
                    let mut deleted = InternalNode::<K>::attach(&mut deleted_page);
                    let adopted = deleted.children();
                    let middle_key = parent.key_at(separator_index);
                    deleted.move_all_to(&mut survivor, middle_key);
                    adopted
                }
            }
        };
        parent.remove_at(separator_index);
        let parent_size = parent.size();
        let parent_min = parent.min_size();
        let parent_is_root = parent_page.btree_is_root();
        drop(parent_page);

        self.bpm.unpin_page(survivor_id, true);
        self.bpm.unpin_page(deleted_id, true);
        self.bpm.unpin_page(parent_id, true);
        // The pin taken on entry; `node_frame` is one of the two above.
        self.bpm.unpin_page(page_id, false);
        self.bpm.delete_page(deleted_id)?;

        for child in adopted {
            self.reparent(child, survivor_id)?;
        }

        if parent_is_root {
            if parent_size == 1 {
                // An internal root with a single child collapses into it.
                let only_child = {
                    let parent_frame = self.bpm.fetch_page(parent_id)?;
                    let mut page = parent_frame.write();
                    let child = InternalNode::<K>::attach(&mut page).child_at(0);
                    drop(page);
                    self.bpm.unpin_page(parent_id, false);
                    child
                };
                self.reparent_to_root(only_child)?;
                self.update_root(root, only_child)?;
                self.bpm.delete_page(parent_id)?;
                debug!("b+ tree '{}' height shrank, new root {only_child}", self.name);
            }
            return Ok(());
        }
        if parent_size < parent_min {
            return self.coalesce_or_redistribute(root, parent_id);
        }
        Ok(())
    }

    fn reparent(&self, child_id: PageId, parent_id: PageId) -> EngineResult<()> {
        let frame = self.bpm.fetch_page(child_id)?;
        frame.write().set_btree_parent_page_id(parent_id);
        self.bpm.unpin_page(child_id, true);
        Ok(())
    }

    fn reparent_to_root(&self, child_id: PageId) -> EngineResult<()> {
        self.reparent(child_id, INVALID_PAGE_ID)
    }

    /// Changes the root pointer and persists it on the header page.
    fn update_root(&self, root: &mut PageId, new_root: PageId) -> EngineResult<()> {
        *root = new_root;
        let frame = self.bpm.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut page = frame.write();
            if !page.update_record(&self.name, new_root) {
                page.insert_record(&self.name, new_root);
            }
        }
        self.bpm.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }

    /// Structural self-check: equal leaf depth, size bounds on non-root
    /// nodes, separator ordering and an ascending leaf chain.
    pub fn check_integrity(&self) -> EngineResult<()> {
        let root = self.root.lock().unwrap();
        if *root == INVALID_PAGE_ID {
            return Ok(());
        }
        let mut leaf_depth = None;
        self.check_node(*root, 0, true, &mut leaf_depth)?;

        // The leaf chain must be globally ascending.
        let frame = self.find_leaf_edge(*root)?;
        let mut frame = Some(frame);
        let mut last: Option<K> = None;
        while let Some(current) = frame.take() {
            let page_id = current.page_id();
            let next = {
                let mut page = current.write();
                let leaf = LeafNode::<K, V>::attach(&mut page);
                for i in 0..leaf.size() {
                    let key = leaf.key_at(i);
                    if let Some(last) = last {
                        if last >= key {
                            return Err(EngineError::Corrupted(format!(
                                "leaf chain out of order at page {page_id}"
                            )));
                        }
                    }
                    last = Some(key);
                }
                leaf.next_page_id()
            };
            self.bpm.unpin_page(page_id, false);
            if next != INVALID_PAGE_ID {
                frame = Some(self.bpm.fetch_page(next)?);
            }
        }
        Ok(())
    }

    fn check_node(
        &self,
        page_id: PageId,
        depth: usize,
        is_root: bool,
        leaf_depth: &mut Option<usize>,
    ) -> EngineResult<()> {
        let frame = self.bpm.fetch_page(page_id)?;
        let mut page = frame.write();
        let result = match page.btree_kind() {
            Some(BTreeNodeKind::Leaf) => {
                let leaf = LeafNode::<K, V>::attach(&mut page);
                if let Some(expected) = *leaf_depth {
                    if expected != depth {
                        return Err(EngineError::Corrupted(format!(
                            "leaf {page_id} at depth {depth}, expected {expected}"
                        )));
                    }
                } else {
                    *leaf_depth = Some(depth);
                }
                if !is_root && (leaf.size() < leaf.min_size() || leaf.size() > leaf.max_size()) {
                    return Err(EngineError::Corrupted(format!(
                        "leaf {page_id} size {} out of bounds",
                        leaf.size()
                    )));
                }
                Vec::new()
            }
            Some(BTreeNodeKind::Internal) => {
                let node = InternalNode::<K>::attach(&mut page);
                if !is_root && (node.size() < node.min_size() || node.size() > node.max_size()) {
                    return Err(EngineError::Corrupted(format!(
                        "internal {page_id} size {} out of bounds",
                        node.size()
                    )));
                }
                if is_root && node.size() < 2 {
                    return Err(EngineError::Corrupted(format!(
                        "internal root {page_id} has {} pointers",
                        node.size()
                    )));
                }
                for i in 2..node.size() {
                    if node.key_at(i - 1) >= node.key_at(i) {
                        return Err(EngineError::Corrupted(format!(
                            "separators out of order in page {page_id}"
                        )));
                    }
                }
                node.children()
            }
            None => {
                return Err(EngineError::Corrupted(format!(
                    "page {page_id} is not a b+ tree node"
                )))
            }
        };
        drop(page);
        self.bpm.unpin_page(page_id, false);
        for child in result {
            self.check_node(child, depth + 1, false, leaf_depth)?;
        }
        Ok(())
    }
}

/// A cursor over leaf entries in ascending key order. Advancing past the
/// last entry of a leaf follows the sibling link; the current leaf stays
/// pinned between steps.
pub struct TreeIterator<K, V> {
    bpm: Arc<BufferPoolManager>,
    frame: Option<Arc<Frame>>,
    index: i32,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: IndexKey, V: IndexValue> TreeIterator<K, V> {
    fn finished(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            frame: None,
            index: 0,
            _marker: PhantomData,
        }
    }
}

impl<K: IndexKey, V: IndexValue> Iterator for TreeIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.frame.as_ref()?;
            let page_id = frame.page_id();
            let step = {
                let mut page = frame.write();
                let leaf = LeafNode::<K, V>::attach(&mut page);
                if self.index < leaf.size() {
                    Ok((leaf.key_at(self.index), leaf.value_at(self.index)))
                } else {
                    Err(leaf.next_page_id())
                }
            };
            match step {
                Ok(entry) => {
                    self.index += 1;
                    return Some(entry);
                }
                Err(next_page_id) => {
                    self.frame = None;
                    self.bpm.unpin_page(page_id, false);
                    if next_page_id == INVALID_PAGE_ID {
                        return None;
                    }
                    self.frame = self.bpm.fetch_page(next_page_id).ok();
                    self.index = 0;
                }
            }
        }
    }
}

impl<K, V> Drop for TreeIterator<K, V> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.bpm.unpin_page(frame.page_id(), false);
        }
    }
}
