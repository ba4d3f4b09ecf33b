use super::types::PageId;

/// Bytes per page. Every on-disk structure is laid out within this unit.
pub const PAGE_SIZE: usize = 4096;

/// Page 0 is reserved for the index-name to root-page-id records.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Bucket capacity used for the buffer pool's page table.
pub const DEFAULT_HASH_BUCKET_SIZE: usize = 8;
