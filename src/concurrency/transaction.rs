use std::collections::VecDeque;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::RawRwLock;

use crate::buffer::WritePageGuard;
use crate::common::PageId;

/// Exclusive guard on a tree's root page id, parked in the latch queue as
/// the sentinel entry of a crabbing descent.
pub type RootIdWriteGuard = ArcRwLockWriteGuard<RawRwLock, PageId>;

/// One held latch. Page guards carry their pin along with the latch, so
/// dropping an entry both unlatches and unpins.
pub enum LatchEntry {
    RootId(RootIdWriteGuard),
    Page(WritePageGuard),
}

/// Per-operation handle the B+ tree threads its crabbing state through.
///
/// The latch queue is ordered root-first. During a descent the tree pushes
/// every exclusively-latched ancestor here and drains the queue as soon as
/// a safe node proves the ancestors cannot be touched; structural changes
/// pop from the back to walk upward. Pages scheduled for deletion are
/// collected and only released after the queue has drained.
#[derive(Default)]
pub struct Transaction {
    latch_queue: VecDeque<LatchEntry>,
    deleted_pages: Vec<PageId>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_latch(&mut self, entry: LatchEntry) {
        self.latch_queue.push_back(entry);
    }

    /// Hands back the most recently pushed latch (the deepest held
    /// ancestor).
    pub fn pop_latch(&mut self) -> Option<LatchEntry> {
        self.latch_queue.pop_back()
    }

    /// Releases every held latch, oldest (root side) first. Dropping a
    /// page entry unlatches and unpins it; an untouched page is unpinned
    /// clean.
    pub fn release_all(&mut self) {
        while self.latch_queue.pop_front().is_some() {}
    }

    pub fn is_queue_empty(&self) -> bool {
        self.latch_queue.is_empty()
    }

    /// Schedules a page for deletion once all latches are released.
    pub fn add_deleted_page(&mut self, page_id: PageId) {
        self.deleted_pages.push(page_id);
    }

    pub fn take_deleted_pages(&mut self) -> Vec<PageId> {
        std::mem::take(&mut self.deleted_pages)
    }
}
