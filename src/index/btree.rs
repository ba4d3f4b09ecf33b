use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{PageId, RecordId, Result, StrataError, HEADER_PAGE_ID};
use crate::concurrency::{LatchEntry, Transaction};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_page::{BTreeNode, BTreeNodeRef, MAX_INTERNAL_SIZE, MAX_LEAF_SIZE};
use super::index_iterator::IndexIterator;
use super::key_comparator::{GenericKey, KeyComparator};

/// Traversal mode, deciding latch kinds and the "safe node" predicate used
/// to release ancestors early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Search,
    Insert,
    Delete,
}

/// A disk-backed B+ tree index mapping fixed-width keys to record ids.
///
/// Keys are unique; ordering comes from the comparator. Readers descend
/// with shared latches, hand-over-hand. Writers descend with exclusive
/// latches, parking ancestors in the transaction's latch queue and
/// draining it at the first node that cannot be split (insert) or merged
/// (delete). The root page id itself sits behind its own reader-writer
/// latch, which writers hold as the queue's sentinel entry.
pub struct BPlusTree<C: KeyComparator> {
    index_name: String,
    root_id: Arc<RwLock<PageId>>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Opens (or prepares to create) the named index. If the header page
    /// already records a root for this name, the tree adopts it.
    pub fn new(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(
            (2..=MAX_LEAF_SIZE).contains(&leaf_max_size),
            "leaf max size out of range"
        );
        assert!(
            (3..=MAX_INTERNAL_SIZE).contains(&internal_max_size),
            "internal max size out of range"
        );

        let root_id = {
            let guard = bpm
                .checked_read_page(HEADER_PAGE_ID)?
                .ok_or(StrataError::PageNotFound(HEADER_PAGE_ID))?;
            HeaderPageRef::new(guard.data())
                .get_root_id(name)
                .unwrap_or(PageId::INVALID)
        };

        log::debug!(
            "opening b+ tree '{}': root={}, leaf_max={}, internal_max={}",
            name,
            root_id,
            leaf_max_size,
            internal_max_size
        );

        Ok(Self {
            index_name: name.to_string(),
            root_id: Arc::new(RwLock::new(root_id)),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_id.read() == PageId::INVALID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_id.read()
    }

    /// Point lookup.
    pub fn get(&self, key: &GenericKey) -> Result<Option<RecordId>> {
        let Some(leaf) = self.find_leaf_shared(key)? else {
            return Ok(None);
        };
        let node = BTreeNodeRef::new(leaf.data());
        Ok(node
            .leaf_find_exact(key, &self.comparator)
            .map(|index| node.leaf_record_at(index)))
    }

    /// Inserts a unique key. Returns false (tree unchanged) when the key
    /// already exists.
    pub fn insert(
        &self,
        key: &GenericKey,
        record: RecordId,
        transaction: &mut Transaction,
    ) -> Result<bool> {
        let result = self.insert_inner(key, record, transaction);
        if result.is_err() {
            transaction.release_all();
        }
        self.reclaim_pages(transaction);
        result
    }

    fn insert_inner(
        &self,
        key: &GenericKey,
        record: RecordId,
        transaction: &mut Transaction,
    ) -> Result<bool> {
        let mut leaf_guard = loop {
            {
                let mut root_guard = self.root_id.write();
                if *root_guard == PageId::INVALID {
                    let root_page_id = self.start_new_tree(key, record)?;
                    *root_guard = root_page_id;
                    return Ok(true);
                }
            }
            // The root latch was released between the check and the
            // descent; a concurrent remove may have emptied the tree.
            match self.find_leaf_exclusive(key, Operation::Insert, transaction)? {
                Some(guard) => break guard,
                None => continue,
            }
        };

        let duplicate = BTreeNodeRef::new(leaf_guard.data())
            .leaf_find_exact(key, &self.comparator)
            .is_some();
        if duplicate {
            transaction.release_all();
            return Ok(false);
        }

        {
            let mut leaf = BTreeNode::new(leaf_guard.data_mut());
            leaf.leaf_insert(key, record, &self.comparator);
        }

        if BTreeNodeRef::new(leaf_guard.data()).size() >= self.leaf_max_size {
            self.split_leaf(leaf_guard, transaction)?;
        } else {
            transaction.release_all();
        }
        Ok(true)
    }

    /// Removes a key; absent keys are a no-op.
    pub fn remove(&self, key: &GenericKey, transaction: &mut Transaction) -> Result<()> {
        let result = self.remove_inner(key, transaction);
        if result.is_err() {
            transaction.release_all();
        }
        self.reclaim_pages(transaction);
        result
    }

    fn remove_inner(&self, key: &GenericKey, transaction: &mut Transaction) -> Result<()> {
        let Some(mut leaf_guard) = self.find_leaf_exclusive(key, Operation::Delete, transaction)?
        else {
            return Ok(());
        };

        let Some(index) =
            BTreeNodeRef::new(leaf_guard.data()).leaf_find_exact(key, &self.comparator)
        else {
            transaction.release_all();
            return Ok(());
        };

        {
            let mut leaf = BTreeNode::new(leaf_guard.data_mut());
            leaf.leaf_remove_at(index);
        }

        let node = BTreeNodeRef::new(leaf_guard.data());
        let (is_root, size, leaf_id) = (node.is_root(), node.size(), node.page_id());

        if is_root {
            if size == 0 {
                // The descent kept the root latch for exactly this case.
                let Some(LatchEntry::RootId(mut root_guard)) = transaction.pop_latch() else {
                    return Err(StrataError::IndexCorrupted(
                        "root latch missing while emptying the tree".into(),
                    ));
                };
                *root_guard = PageId::INVALID;
                self.update_header_root(PageId::INVALID)?;
                drop(leaf_guard);
                transaction.add_deleted_page(leaf_id);
                drop(root_guard);
                log::debug!("b+ tree '{}' is now empty", self.index_name);
            } else {
                transaction.release_all();
            }
            return Ok(());
        }

        if size < self.min_leaf_size() {
            self.handle_leaf_underflow(leaf_guard, transaction)
        } else {
            transaction.release_all();
            Ok(())
        }
    }

    /// Forward iterator from the smallest key.
    pub fn iter(&self) -> Result<IndexIterator> {
        let Some(mut guard) = self.fetch_root_shared()? else {
            return Ok(IndexIterator::new(Arc::clone(&self.bpm), None, 0));
        };
        loop {
            let child_id = {
                let node = BTreeNodeRef::new(guard.data());
                if node.is_leaf() {
                    return Ok(IndexIterator::new(Arc::clone(&self.bpm), Some(guard), 0));
                }
                node.child_at(0)
            };
            let child = self
                .bpm
                .checked_read_page(child_id)?
                .ok_or(StrataError::PageNotFound(child_id))?;
            guard = child;
        }
    }

    /// Forward iterator positioned at the first key >= `key`.
    pub fn iter_from(&self, key: &GenericKey) -> Result<IndexIterator> {
        let Some(guard) = self.find_leaf_shared(key)? else {
            return Ok(IndexIterator::new(Arc::clone(&self.bpm), None, 0));
        };
        let index = BTreeNodeRef::new(guard.data()).leaf_lower_bound(key, &self.comparator);
        let mut iterator = IndexIterator::new(Arc::clone(&self.bpm), Some(guard), index);
        iterator.skip_exhausted_leaf()?;
        Ok(iterator)
    }

    /// Iterator already at the end position (rightmost leaf, one past the
    /// last entry).
    pub fn end(&self) -> Result<IndexIterator> {
        let Some(mut guard) = self.fetch_root_shared()? else {
            return Ok(IndexIterator::new(Arc::clone(&self.bpm), None, 0));
        };
        loop {
            let child_id = {
                let node = BTreeNodeRef::new(guard.data());
                if node.is_leaf() {
                    let size = node.size();
                    return Ok(IndexIterator::new(Arc::clone(&self.bpm), Some(guard), size));
                }
                node.child_at(node.size() - 1)
            };
            let child = self
                .bpm
                .checked_read_page(child_id)?
                .ok_or(StrataError::PageNotFound(child_id))?;
            guard = child;
        }
    }

    fn min_leaf_size(&self) -> usize {
        self.leaf_max_size / 2
    }

    fn min_internal_size(&self) -> usize {
        self.internal_max_size / 2
    }

    /// Fetches the root page with a shared latch, or None when the tree is
    /// empty. The root-id latch is held only across the fetch.
    fn fetch_root_shared(&self) -> Result<Option<ReadPageGuard>> {
        let root_guard = self.root_id.read();
        let root_page_id = *root_guard;
        if root_page_id == PageId::INVALID {
            return Ok(None);
        }
        let guard = self
            .bpm
            .checked_read_page(root_page_id)?
            .ok_or(StrataError::PageNotFound(root_page_id))?;
        Ok(Some(guard))
    }

    /// Shared-latch descent to the leaf covering `key`, releasing each
    /// parent as soon as the child latch is held.
    fn find_leaf_shared(&self, key: &GenericKey) -> Result<Option<ReadPageGuard>> {
        let Some(mut guard) = self.fetch_root_shared()? else {
            return Ok(None);
        };
        loop {
            let child_id = {
                let node = BTreeNodeRef::new(guard.data());
                if node.is_leaf() {
                    return Ok(Some(guard));
                }
                node.child_at(node.child_index(key, &self.comparator))
            };
            let child = self
                .bpm
                .checked_read_page(child_id)?
                .ok_or(StrataError::PageNotFound(child_id))?;
            guard = child;
        }
    }

    /// Exclusive-latch descent for insert/delete. Ancestors are parked in
    /// the transaction queue behind the root-id sentinel and the queue is
    /// drained whenever the current node is safe for the operation.
    /// Returns None when the tree is empty.
    fn find_leaf_exclusive(
        &self,
        key: &GenericKey,
        operation: Operation,
        transaction: &mut Transaction,
    ) -> Result<Option<WritePageGuard>> {
        let root_guard = RwLock::write_arc(&self.root_id);
        let root_page_id = *root_guard;
        if root_page_id == PageId::INVALID {
            return Ok(None);
        }
        transaction.push_latch(LatchEntry::RootId(root_guard));

        let mut guard = self
            .bpm
            .checked_write_page(root_page_id)?
            .ok_or(StrataError::PageNotFound(root_page_id))?;

        loop {
            let (is_leaf, is_safe, child_id) = {
                let node = BTreeNodeRef::new(guard.data());
                let is_safe = self.is_safe(&node, operation);
                if node.is_leaf() {
                    (true, is_safe, PageId::INVALID)
                } else {
                    let index = node.child_index(key, &self.comparator);
                    (false, is_safe, node.child_at(index))
                }
            };

            if is_safe {
                transaction.release_all();
            }
            if is_leaf {
                return Ok(Some(guard));
            }

            let child = self
                .bpm
                .checked_write_page(child_id)?
                .ok_or(StrataError::PageNotFound(child_id))?;
            transaction.push_latch(LatchEntry::Page(guard));
            guard = child;
        }
    }

    /// A node is safe when the operation on the subtree below it cannot
    /// propagate back up through it.
    fn is_safe(&self, node: &BTreeNodeRef<'_>, operation: Operation) -> bool {
        match operation {
            Operation::Search => true,
            // A leaf splits when an insert fills it to max_size, so only
            // max_size - 1 occupancy is split-proof; an internal node
            // absorbs one separator while below max_size.
            Operation::Insert => {
                if node.is_leaf() {
                    node.size() < node.max_size() - 1
                } else {
                    node.size() < node.max_size()
                }
            }
            Operation::Delete => {
                let min = if node.is_root() {
                    if node.is_leaf() {
                        1
                    } else {
                        2
                    }
                } else {
                    node.min_size()
                };
                node.size() > min
            }
        }
    }

    /// Creates the first leaf. Caller holds the root-id latch exclusively
    /// and stores the returned page id.
    fn start_new_tree(&self, key: &GenericKey, record: RecordId) -> Result<PageId> {
        let page_id = self.bpm.new_page()?;
        let mut guard = match self.bpm.checked_write_page(page_id) {
            Ok(Some(guard)) => guard,
            Ok(None) => return Err(StrataError::PageNotFound(page_id)),
            Err(e) => {
                let _ = self.bpm.delete_page(page_id);
                return Err(e);
            }
        };
        {
            let mut root = BTreeNode::new(guard.data_mut());
            root.init_leaf(page_id, None, self.leaf_max_size);
            root.leaf_insert(key, record, &self.comparator);
        }
        drop(guard);
        self.update_header_root(page_id)?;
        log::debug!("b+ tree '{}' created root {}", self.index_name, page_id);
        Ok(page_id)
    }

    /// Splits a full leaf: the upper half moves to a fresh right sibling,
    /// the leaf chain is relinked, and the separator goes to the parent.
    fn split_leaf(
        &self,
        mut left_guard: WritePageGuard,
        transaction: &mut Transaction,
    ) -> Result<()> {
        let new_page_id = self.bpm.new_page()?;
        let mut right_guard = self
            .bpm
            .checked_write_page(new_page_id)?
            .ok_or(StrataError::PageNotFound(new_page_id))?;

        let (separator, left_id) = {
            let mut left = BTreeNode::new(left_guard.data_mut());
            let entries = left.leaf_entries();
            let split_at = left.min_size();
            let old_next = left.next_page_id();
            let parent = left.parent_page_id();
            let left_id = left.page_id();

            left.leaf_set_entries(&entries[..split_at]);
            left.set_next_page_id(Some(new_page_id));

            let mut right = BTreeNode::new(right_guard.data_mut());
            right.init_leaf(new_page_id, parent, self.leaf_max_size);
            right.leaf_set_entries(&entries[split_at..]);
            right.set_next_page_id(old_next);

            (entries[split_at].0, left_id)
        };

        drop(left_guard);
        drop(right_guard);
        self.insert_into_parent(left_id, separator, new_page_id, transaction)
    }

    /// Wires a freshly split-off right sibling into the tree. The direct
    /// parent is the deepest entry of the latch queue (or the root
    /// sentinel, when `left_id` was the root).
    fn insert_into_parent(
        &self,
        left_id: PageId,
        key: GenericKey,
        right_id: PageId,
        transaction: &mut Transaction,
    ) -> Result<()> {
        match transaction.pop_latch() {
            None => Err(StrataError::IndexCorrupted(
                "split reached an unlatched ancestor".into(),
            )),
            Some(LatchEntry::RootId(mut root_guard)) => {
                let new_root_id = self.bpm.new_page()?;
                let mut guard = self
                    .bpm
                    .checked_write_page(new_root_id)?
                    .ok_or(StrataError::PageNotFound(new_root_id))?;
                {
                    let mut root = BTreeNode::new(guard.data_mut());
                    root.init_internal(new_root_id, None, self.internal_max_size);
                    root.internal_set_entries(&[
                        (GenericKey::default(), left_id),
                        (key, right_id),
                    ]);
                }
                drop(guard);

                self.set_parent(left_id, Some(new_root_id))?;
                self.set_parent(right_id, Some(new_root_id))?;

                *root_guard = new_root_id;
                self.update_header_root(new_root_id)?;
                drop(root_guard);
                transaction.release_all();
                log::debug!(
                    "b+ tree '{}' grew a new root {}",
                    self.index_name,
                    new_root_id
                );
                Ok(())
            }
            Some(LatchEntry::Page(mut parent_guard)) => {
                let size = BTreeNodeRef::new(parent_guard.data()).size();
                if size < self.internal_max_size {
                    // The right sibling inherited the left's parent pointer
                    // at split time, so only the separator goes in here.
                    let mut parent = BTreeNode::new(parent_guard.data_mut());
                    parent.internal_insert(&key, right_id, &self.comparator);
                    drop(parent_guard);
                    transaction.release_all();
                    Ok(())
                } else {
                    self.split_internal(parent_guard, key, right_id, transaction)
                }
            }
        }
    }

    /// Splits a full internal node around a new (key, child) entry. The
    /// middle key is promoted rather than kept, and the children moved to
    /// the new right node are reparented.
    fn split_internal(
        &self,
        mut node_guard: WritePageGuard,
        key: GenericKey,
        right_id: PageId,
        transaction: &mut Transaction,
    ) -> Result<()> {
        let new_page_id = self.bpm.new_page()?;
        let mut new_guard = self
            .bpm
            .checked_write_page(new_page_id)?
            .ok_or(StrataError::PageNotFound(new_page_id))?;

        let (promoted, node_id, moved_children) = {
            let mut node = BTreeNode::new(node_guard.data_mut());
            let mut entries = node.internal_entries();
            let index = node.child_index(&key, &self.comparator) + 1;
            entries.insert(index, (key, right_id));

            let split_at = node.min_size();
            let node_id = node.page_id();
            let parent = node.parent_page_id();
            node.internal_set_entries(&entries[..split_at]);

            let mut new_node = BTreeNode::new(new_guard.data_mut());
            new_node.init_internal(new_page_id, parent, self.internal_max_size);
            new_node.internal_set_entries(&entries[split_at..]);

            let moved: Vec<PageId> = entries[split_at..].iter().map(|(_, c)| *c).collect();
            (entries[split_at].0, node_id, moved)
        };

        drop(node_guard);
        drop(new_guard);

        for child in moved_children {
            self.set_parent(child, Some(new_page_id))?;
        }
        self.insert_into_parent(node_id, promoted, new_page_id, transaction)
    }

    /// Rebalances an underflowing, non-root leaf through its parent:
    /// steal from the richer sibling, otherwise merge into the left of
    /// the pair. Leaf latches are re-acquired strictly left-to-right so
    /// chain readers cannot deadlock against this path.
    fn handle_leaf_underflow(
        &self,
        leaf_guard: WritePageGuard,
        transaction: &mut Transaction,
    ) -> Result<()> {
        let leaf_id = leaf_guard.page_id();
        let Some(LatchEntry::Page(mut parent_guard)) = transaction.pop_latch() else {
            return Err(StrataError::IndexCorrupted(
                "underflowing leaf has no latched parent".into(),
            ));
        };
        drop(leaf_guard);

        let (index, left_id, right_id) = {
            let parent = BTreeNodeRef::new(parent_guard.data());
            let index = parent.child_index_of(leaf_id).ok_or_else(|| {
                StrataError::IndexCorrupted("leaf not found in its parent".into())
            })?;
            let left_id = (index > 0).then(|| parent.child_at(index - 1));
            let right_id = (index + 1 < parent.size()).then(|| parent.child_at(index + 1));
            (index, left_id, right_id)
        };

        let mut left_sibling = match left_id {
            Some(id) => Some(
                self.bpm
                    .checked_write_page(id)?
                    .ok_or(StrataError::PageNotFound(id))?,
            ),
            None => None,
        };
        let mut leaf_guard = self
            .bpm
            .checked_write_page(leaf_id)?
            .ok_or(StrataError::PageNotFound(leaf_id))?;
        let mut right_sibling = match right_id {
            Some(id) => Some(
                self.bpm
                    .checked_write_page(id)?
                    .ok_or(StrataError::PageNotFound(id))?,
            ),
            None => None,
        };

        // Steal from the left sibling's tail.
        if let Some(sibling_guard) = left_sibling.as_mut() {
            if BTreeNodeRef::new(sibling_guard.data()).size() > self.min_leaf_size() {
                let (stolen_key, stolen_record) = {
                    let mut sibling = BTreeNode::new(sibling_guard.data_mut());
                    let last = sibling.size() - 1;
                    let entry = (sibling.leaf_key_at(last), sibling.leaf_record_at(last));
                    sibling.leaf_remove_at(last);
                    entry
                };
                BTreeNode::new(leaf_guard.data_mut()).leaf_insert(
                    &stolen_key,
                    stolen_record,
                    &self.comparator,
                );
                BTreeNode::new(parent_guard.data_mut())
                    .set_internal_key_at(index, &stolen_key);
                transaction.release_all();
                return Ok(());
            }
        }

        // Steal from the right sibling's head.
        if let Some(sibling_guard) = right_sibling.as_mut() {
            if BTreeNodeRef::new(sibling_guard.data()).size() > self.min_leaf_size() {
                let (stolen_key, stolen_record, new_separator) = {
                    let mut sibling = BTreeNode::new(sibling_guard.data_mut());
                    let entry = (sibling.leaf_key_at(0), sibling.leaf_record_at(0));
                    sibling.leaf_remove_at(0);
                    (entry.0, entry.1, sibling.leaf_key_at(0))
                };
                BTreeNode::new(leaf_guard.data_mut()).leaf_insert(
                    &stolen_key,
                    stolen_record,
                    &self.comparator,
                );
                BTreeNode::new(parent_guard.data_mut())
                    .set_internal_key_at(index + 1, &new_separator);
                transaction.release_all();
                return Ok(());
            }
        }

        // Merge: the left node of the adjacent pair survives.
        if let Some(mut sibling_guard) = left_sibling {
            let (entries, leaf_next) = {
                let leaf = BTreeNodeRef::new(leaf_guard.data());
                (leaf.leaf_entries(), leaf.next_page_id())
            };
            {
                let mut sibling = BTreeNode::new(sibling_guard.data_mut());
                let mut merged = sibling.leaf_entries();
                merged.extend(entries);
                sibling.leaf_set_entries(&merged);
                sibling.set_next_page_id(leaf_next);
            }
            drop(sibling_guard);
            drop(leaf_guard);
            drop(right_sibling);
            transaction.add_deleted_page(leaf_id);
            self.remove_from_internal(parent_guard, index, transaction)
        } else if let Some(sibling_guard) = right_sibling {
            let dead_id = sibling_guard.page_id();
            let (entries, sibling_next) = {
                let sibling = BTreeNodeRef::new(sibling_guard.data());
                (sibling.leaf_entries(), sibling.next_page_id())
            };
            {
                let mut leaf = BTreeNode::new(leaf_guard.data_mut());
                let mut merged = leaf.leaf_entries();
                merged.extend(entries);
                leaf.leaf_set_entries(&merged);
                leaf.set_next_page_id(sibling_next);
            }
            drop(sibling_guard);
            drop(leaf_guard);
            transaction.add_deleted_page(dead_id);
            self.remove_from_internal(parent_guard, index + 1, transaction)
        } else {
            Err(StrataError::IndexCorrupted(
                "non-root leaf has no siblings".into(),
            ))
        }
    }

    /// Removes the separator/child pair at `index` from an internal node,
    /// then rebalances it the same way: root collapse, steal with
    /// separator rotation, or merge with the separator pulled down.
    fn remove_from_internal(
        &self,
        mut node_guard: WritePageGuard,
        index: usize,
        transaction: &mut Transaction,
    ) -> Result<()> {
        {
            let mut node = BTreeNode::new(node_guard.data_mut());
            node.internal_remove_at(index);
        }

        let node_ref = BTreeNodeRef::new(node_guard.data());
        let (is_root, size, node_id) = (node_ref.is_root(), node_ref.size(), node_ref.page_id());

        if is_root {
            if size == 1 {
                // The root is down to a single child: promote it.
                let only_child = BTreeNodeRef::new(node_guard.data()).child_at(0);
                let Some(LatchEntry::RootId(mut root_guard)) = transaction.pop_latch() else {
                    return Err(StrataError::IndexCorrupted(
                        "root latch missing while collapsing the root".into(),
                    ));
                };
                drop(node_guard);
                self.set_parent(only_child, None)?;
                *root_guard = only_child;
                self.update_header_root(only_child)?;
                drop(root_guard);
                transaction.add_deleted_page(node_id);
                transaction.release_all();
                log::debug!(
                    "b+ tree '{}' collapsed its root into {}",
                    self.index_name,
                    only_child
                );
            } else {
                drop(node_guard);
                transaction.release_all();
            }
            return Ok(());
        }

        if size >= self.min_internal_size() {
            drop(node_guard);
            transaction.release_all();
            return Ok(());
        }

        let Some(LatchEntry::Page(mut parent_guard)) = transaction.pop_latch() else {
            return Err(StrataError::IndexCorrupted(
                "underflowing internal node has no latched parent".into(),
            ));
        };

        let (node_index, left_id, right_id) = {
            let parent = BTreeNodeRef::new(parent_guard.data());
            let node_index = parent.child_index_of(node_id).ok_or_else(|| {
                StrataError::IndexCorrupted("internal node not found in its parent".into())
            })?;
            let left_id = (node_index > 0).then(|| parent.child_at(node_index - 1));
            let right_id =
                (node_index + 1 < parent.size()).then(|| parent.child_at(node_index + 1));
            (node_index, left_id, right_id)
        };

        // No readers reach internal siblings while the parent is held
        // exclusively, so these latches are uncontended.
        let mut left_sibling = match left_id {
            Some(id) => Some(
                self.bpm
                    .checked_write_page(id)?
                    .ok_or(StrataError::PageNotFound(id))?,
            ),
            None => None,
        };
        let mut right_sibling = match right_id {
            Some(id) => Some(
                self.bpm
                    .checked_write_page(id)?
                    .ok_or(StrataError::PageNotFound(id))?,
            ),
            None => None,
        };

        // Steal from the left sibling: its last child moves to our front,
        // rotating the separator through the parent.
        if let Some(sibling_guard) = left_sibling.as_mut() {
            if BTreeNodeRef::new(sibling_guard.data()).size() > self.min_internal_size() {
                let old_separator = BTreeNodeRef::new(parent_guard.data())
                    .internal_key_at(node_index);
                let (stolen_key, stolen_child) = {
                    let mut sibling = BTreeNode::new(sibling_guard.data_mut());
                    let mut entries = sibling.internal_entries();
                    let entry = entries.pop().unwrap();
                    sibling.internal_set_entries(&entries);
                    entry
                };
                {
                    let mut node = BTreeNode::new(node_guard.data_mut());
                    let mut entries = node.internal_entries();
                    entries[0].0 = old_separator;
                    entries.insert(0, (GenericKey::default(), stolen_child));
                    node.internal_set_entries(&entries);
                }
                BTreeNode::new(parent_guard.data_mut())
                    .set_internal_key_at(node_index, &stolen_key);
                self.set_parent(stolen_child, Some(node_id))?;
                transaction.release_all();
                return Ok(());
            }
        }

        // Steal from the right sibling: its first child moves to our back.
        if let Some(sibling_guard) = right_sibling.as_mut() {
            if BTreeNodeRef::new(sibling_guard.data()).size() > self.min_internal_size() {
                let old_separator = BTreeNodeRef::new(parent_guard.data())
                    .internal_key_at(node_index + 1);
                let (stolen_child, new_separator) = {
                    let mut sibling = BTreeNode::new(sibling_guard.data_mut());
                    let mut entries = sibling.internal_entries();
                    let stolen_child = entries[0].1;
                    let new_separator = entries[1].0;
                    entries.remove(0);
                    entries[0].0 = GenericKey::default();
                    sibling.internal_set_entries(&entries);
                    (stolen_child, new_separator)
                };
                {
                    let mut node = BTreeNode::new(node_guard.data_mut());
                    let mut entries = node.internal_entries();
                    entries.push((old_separator, stolen_child));
                    node.internal_set_entries(&entries);
                }
                BTreeNode::new(parent_guard.data_mut())
                    .set_internal_key_at(node_index + 1, &new_separator);
                self.set_parent(stolen_child, Some(node_id))?;
                transaction.release_all();
                return Ok(());
            }
        }

        // Merge into the left of the pair, pulling the separator down in
        // front of the right side's children.
        if let Some(mut sibling_guard) = left_sibling {
            let sibling_id = sibling_guard.page_id();
            let separator = BTreeNodeRef::new(parent_guard.data()).internal_key_at(node_index);
            let moved = {
                let mut entries = BTreeNodeRef::new(node_guard.data()).internal_entries();
                entries[0].0 = separator;
                entries
            };
            {
                let mut sibling = BTreeNode::new(sibling_guard.data_mut());
                let mut merged = sibling.internal_entries();
                merged.extend(moved.iter().copied());
                sibling.internal_set_entries(&merged);
            }
            drop(sibling_guard);
            drop(node_guard);
            drop(right_sibling);
            for (_, child) in &moved {
                self.set_parent(*child, Some(sibling_id))?;
            }
            transaction.add_deleted_page(node_id);
            self.remove_from_internal(parent_guard, node_index, transaction)
        } else if let Some(sibling_guard) = right_sibling {
            let dead_id = sibling_guard.page_id();
            let separator =
                BTreeNodeRef::new(parent_guard.data()).internal_key_at(node_index + 1);
            let moved = {
                let mut entries = BTreeNodeRef::new(sibling_guard.data()).internal_entries();
                entries[0].0 = separator;
                entries
            };
            {
                let mut node = BTreeNode::new(node_guard.data_mut());
                let mut merged = node.internal_entries();
                merged.extend(moved.iter().copied());
                node.internal_set_entries(&merged);
            }
            drop(sibling_guard);
            drop(node_guard);
            for (_, child) in &moved {
                self.set_parent(*child, Some(node_id))?;
            }
            transaction.add_deleted_page(dead_id);
            self.remove_from_internal(parent_guard, node_index + 1, transaction)
        } else {
            Err(StrataError::IndexCorrupted(
                "non-root internal node has no siblings".into(),
            ))
        }
    }

    /// Rewrites a child's parent pointer through a short-lived latch.
    fn set_parent(&self, page_id: PageId, parent: Option<PageId>) -> Result<()> {
        let mut guard = self
            .bpm
            .checked_write_page(page_id)?
            .ok_or(StrataError::PageNotFound(page_id))?;
        BTreeNode::new(guard.data_mut()).set_parent_page_id(parent);
        Ok(())
    }

    /// Records the current root in the header page, creating the record
    /// on first use.
    fn update_header_root(&self, root_id: PageId) -> Result<()> {
        let mut guard = self
            .bpm
            .checked_write_page(HEADER_PAGE_ID)?
            .ok_or(StrataError::PageNotFound(HEADER_PAGE_ID))?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root_id)
            && !header.insert_record(&self.index_name, root_id)
        {
            return Err(StrataError::HeaderFull);
        }
        Ok(())
    }

    /// Releases pages that structural changes unlinked, after all latches
    /// are gone. A page still pinned by a slow reader is skipped; it stays
    /// allocated but unreachable.
    fn reclaim_pages(&self, transaction: &mut Transaction) {
        for page_id in transaction.take_deleted_pages() {
            let _ = self.bpm.delete_page(page_id);
        }
    }
}
