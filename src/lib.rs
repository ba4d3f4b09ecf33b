//! Strata - the core of a disk-oriented database storage engine
//!
//! This crate provides the index layer of a page-based DBMS: a buffer pool
//! with LRU-K replacement, a concurrent extendible hash table, and a
//! disk-backed B+ tree index with latch-crabbing concurrency.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O and reserved-page formats
//!   - `DiskManager`: reads and writes pages to/from a database file
//!   - `DiskScheduler`: background-thread disk I/O scheduling
//!   - `HeaderPage`: maps index names to root page ids on page 0
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: caches pages in frames, hands out RAII guards
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `ReadPageGuard`/`WritePageGuard`: latch + pin bundled together
//!
//! - **Containers** (`container`): in-memory index primitives
//!   - `ExtendibleHashTable`: concurrent dynamically-growing hash
//!     directory, also used as the buffer pool's page table
//!
//! - **Index** (`index`): ordered disk-backed indexes
//!   - `BPlusTree`: unique-key B+ tree with splits, steals and merges
//!   - `IndexIterator`: forward range scans over the leaf chain
//!
//! - **Concurrency** (`concurrency`): per-operation latch bookkeeping
//!   - `Transaction`: the latch/pin queue driving latch crabbing
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::buffer::BufferPoolManager;
//! use strata::concurrency::Transaction;
//! use strata::index::{BPlusTree, GenericKey, Int64Comparator};
//! use strata::storage::disk::DiskManager;
//! use strata::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new("orders_pk", bpm, Int64Comparator, 64, 64).unwrap();
//! let mut txn = Transaction::new();
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//! tree.insert(&GenericKey::from_i64(42), rid, &mut txn).unwrap();
//! assert_eq!(tree.get(&GenericKey::from_i64(42)).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FrameId, PageId, RecordId, Result, SlotId, StrataError};
