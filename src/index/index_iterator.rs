use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{RecordId, Result, StrataError};

use super::btree_page::BTreeNodeRef;
use super::key_comparator::GenericKey;

/// Forward iterator over a B+ tree's leaf chain.
///
/// The iterator keeps a shared latch and a pin on its current leaf;
/// advancing to the next leaf latches it before the current one is
/// released, always moving left to right. Dropping the iterator releases
/// the latch and pin.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    guard: Option<ReadPageGuard>,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, guard: Option<ReadPageGuard>, index: usize) -> Self {
        Self { bpm, guard, index }
    }

    /// True once the iterator has run off the last entry of the rightmost
    /// leaf (or the tree was empty).
    pub fn is_end(&self) -> bool {
        match &self.guard {
            None => true,
            Some(guard) => {
                let node = BTreeNodeRef::new(guard.data());
                self.index == node.size() && node.next_page_id().is_none()
            }
        }
    }

    /// The entry under the cursor, or None at the end.
    pub fn current(&self) -> Option<(GenericKey, RecordId)> {
        let guard = self.guard.as_ref()?;
        let node = BTreeNodeRef::new(guard.data());
        (self.index < node.size())
            .then(|| (node.leaf_key_at(self.index), node.leaf_record_at(self.index)))
    }

    /// Moves the cursor one entry to the right, hopping to the next leaf
    /// when the current one is exhausted.
    pub fn advance(&mut self) -> Result<()> {
        let Some(guard) = self.guard.as_ref() else {
            return Ok(());
        };
        let node = BTreeNodeRef::new(guard.data());
        if self.index + 1 < node.size() {
            self.index += 1;
            return Ok(());
        }
        match node.next_page_id() {
            Some(next_id) => {
                let next_guard = self
                    .bpm
                    .checked_read_page(next_id)?
                    .ok_or(StrataError::PageNotFound(next_id))?;
                self.guard = Some(next_guard);
                self.index = 0;
                self.skip_exhausted_leaf()
            }
            None => {
                self.index = node.size();
                Ok(())
            }
        }
    }

    /// Hops forward while the cursor sits past the last entry of a leaf
    /// that has a right sibling. Entry points positioned by a key search
    /// can start one past the end of a leaf.
    pub(crate) fn skip_exhausted_leaf(&mut self) -> Result<()> {
        loop {
            let Some(guard) = self.guard.as_ref() else {
                return Ok(());
            };
            let node = BTreeNodeRef::new(guard.data());
            if self.index < node.size() {
                return Ok(());
            }
            match node.next_page_id() {
                Some(next_id) => {
                    let next_guard = self
                        .bpm
                        .checked_read_page(next_id)?
                        .ok_or(StrataError::PageNotFound(next_id))?;
                    self.guard = Some(next_guard);
                    self.index = 0;
                }
                None => {
                    self.index = node.size();
                    return Ok(());
                }
            }
        }
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(GenericKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.current()?;
        match self.advance() {
            Ok(()) => Some(Ok(item)),
            Err(e) => {
                self.guard = None;
                Some(Err(e))
            }
        }
    }
}
