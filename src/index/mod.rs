pub mod btree;
pub mod btree_page;
pub mod index_iterator;
pub mod key_comparator;

pub use btree::BPlusTree;
pub use btree_page::{BTreeNode, BTreeNodeRef, MAX_INTERNAL_SIZE, MAX_LEAF_SIZE};
pub use index_iterator::IndexIterator;
pub use key_comparator::{
    BytewiseComparator, GenericKey, Int64Comparator, KeyComparator, KEY_SIZE,
};
