use std::collections::LinkedList;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{FrameId, PageId, Result, StrataError, DEFAULT_HASH_BUCKET_SIZE, PAGE_SIZE};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Internal state shared with the guard release callbacks.
struct BufferPoolState {
    frames: Vec<Arc<FrameHeader>>,
    /// Page table mapping resident page ids to frames.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Frames not currently holding any page.
    free_list: Mutex<LinkedList<FrameId>>,
    /// Serializes page-table misses so one page is never loaded twice.
    miss_latch: Mutex<()>,
    replacer: LruKReplacer,
}

/// BufferPoolManager caches disk pages in a fixed set of frames.
///
/// Callers address pages through RAII guards: `checked_read_page` /
/// `checked_write_page` pin the page and take its latch; dropping the guard
/// unpins it, and a page whose pin count reaches zero becomes a candidate
/// for LRU-K eviction.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<BufferPoolState>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = LinkedList::new();
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            page_table: ExtendibleHashTable::new(DEFAULT_HASH_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            miss_latch: Mutex::new(()),
            replacer: LruKReplacer::new(pool_size, k),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a new page on disk and places it in a frame. The page is
    /// not pinned until a guard is taken on it.
    pub fn new_page(&self) -> Result<PageId> {
        let frame_id = self.acquire_frame()?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let page_id = self.disk_scheduler.disk_manager().allocate_page()?;

        frame.reset();
        frame.set_page_id(page_id);
        self.state.page_table.insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, true);

        Ok(page_id)
    }

    /// Deletes an unpinned page from the pool and the disk.
    /// Returns false when the page is not resident.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let Some(frame_id) = self.state.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Err(StrataError::PageStillPinned(page_id));
        }

        self.state.page_table.remove(&page_id);
        frame.reset();
        self.state.replacer.remove(frame_id);
        self.state.free_list.lock().push_back(frame_id);
        self.disk_scheduler.disk_manager().deallocate_page(page_id)?;

        Ok(true)
    }

    /// Pins `page_id` and takes its read latch.
    pub fn checked_read_page(&self, page_id: PageId) -> Result<Option<ReadPageGuard>> {
        if page_id == PageId::INVALID {
            return Err(StrataError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_page(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let state = Arc::clone(&self.state);

        let guard = unsafe {
            ReadPageGuard::new(page_id, frame, Box::new(move |pid, dirty| {
                Self::release_page(&state, pid, dirty);
            }))
        };
        Ok(Some(guard))
    }

    /// Pins `page_id` and takes its write latch.
    pub fn checked_write_page(&self, page_id: PageId) -> Result<Option<WritePageGuard>> {
        if page_id == PageId::INVALID {
            return Err(StrataError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_page(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let state = Arc::clone(&self.state);

        let guard = unsafe {
            WritePageGuard::new(page_id, frame, Box::new(move |pid, dirty| {
                Self::release_page(&state, pid, dirty);
            }))
        };
        Ok(Some(guard))
    }

    fn release_page(state: &BufferPoolState, page_id: PageId, dirty: bool) {
        if let Some(frame_id) = state.page_table.find(&page_id) {
            let frame = &state.frames[frame_id.as_usize()];
            if dirty {
                frame.set_dirty(true);
            }
            if let Some(0) = frame.unpin() {
                state.replacer.set_evictable(frame_id, true);
            }
        }
    }

    /// Writes one resident page back to disk and clears its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == PageId::INVALID {
            return Err(StrataError::InvalidPageId(page_id));
        }

        let Some(frame_id) = self.state.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.disk_scheduler.write_sync(page_id, &data)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Writes every dirty resident page back to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        for frame in &self.state.frames {
            let page_id = frame.page_id();
            if page_id != PageId::INVALID && frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.copy_to(&mut data);
                self.disk_scheduler.write_sync(page_id, &data)?;
                frame.set_dirty(false);
            }
        }
        Ok(())
    }

    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.free_list.lock().len()
    }

    /// Brings a page into a frame (if not already resident) and pins it.
    fn fetch_page(&self, page_id: PageId) -> Result<FrameId> {
        if let Some(frame_id) = self.pin_resident(page_id) {
            return Ok(frame_id);
        }

        let _miss_guard = self.state.miss_latch.lock();
        if let Some(frame_id) = self.pin_resident(page_id) {
            return Ok(frame_id);
        }

        let frame_id = self.acquire_frame()?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        self.disk_scheduler.read_sync(page_id, &mut data)?;

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();

        self.state.page_table.insert(page_id, frame_id);
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    /// Pins a page that is already resident, if it is.
    fn pin_resident(&self, page_id: PageId) -> Option<FrameId> {
        let frame_id = self.state.page_table.find(&page_id)?;
        let frame = &self.state.frames[frame_id.as_usize()];
        frame.pin();
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);
        Some(frame_id)
    }

    /// Takes a frame from the free list, or evicts the LRU-K victim,
    /// flushing it first when dirty.
    fn acquire_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.state.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.state.replacer.evict() else {
            return Err(StrataError::BufferPoolFull);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.write_sync(old_page_id, &data)?;
        }

        self.state.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (BufferPoolManager::new(pool_size, 2, dm), temp_file)
    }

    #[test]
    fn test_buffer_pool_new() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        // Page 0 is the header, so the first allocation is page 1.
        assert_eq!(page_id, PageId::new(1));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        assert_eq!(bpm.free_frame_count(), 9);
    }

    #[test]
    fn test_buffer_pool_read_write() {
        let (bpm, _temp) = create_bpm(10);
        let page_id = bpm.new_page().unwrap();

        {
            let mut guard = bpm.checked_write_page(page_id).unwrap().unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
        }
        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        let guard = bpm.checked_read_page(page_id).unwrap().unwrap();
        assert_eq!(guard.data()[0], 42);
        assert_eq!(guard.data()[100], 255);
    }

    #[test]
    fn test_buffer_pool_flush_persists() {
        let (bpm, temp) = create_bpm(10);
        let page_id = bpm.new_page().unwrap();

        {
            let mut guard = bpm.checked_write_page(page_id).unwrap().unwrap();
            guard.data_mut()[0] = 42;
        }
        bpm.flush_page(page_id).unwrap();
        drop(bpm);

        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, 2, dm);
        let guard = bpm2.checked_read_page(page_id).unwrap().unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_buffer_pool_evicts_when_full() {
        let (bpm, _temp) = create_bpm(3);

        let page_ids: Vec<_> = (0..3).map(|_| bpm.new_page().unwrap()).collect();
        for &pid in &page_ids {
            let mut guard = bpm.checked_write_page(pid).unwrap().unwrap();
            guard.data_mut()[0] = pid.as_u32() as u8;
        }
        assert_eq!(bpm.free_frame_count(), 0);

        // A fourth page forces an eviction.
        let new_page_id = bpm.new_page().unwrap();
        assert_eq!(new_page_id, PageId::new(4));

        // Evicted data must survive the round trip through disk.
        for &pid in &page_ids {
            let guard = bpm.checked_read_page(pid).unwrap().unwrap();
            assert_eq!(guard.data()[0], pid.as_u32() as u8);
        }
    }

    #[test]
    fn test_buffer_pool_delete_page() {
        let (bpm, _temp) = create_bpm(10);
        let page_id = bpm.new_page().unwrap();

        {
            let _guard = bpm.checked_read_page(page_id).unwrap().unwrap();
            assert!(matches!(
                bpm.delete_page(page_id),
                Err(StrataError::PageStillPinned(_))
            ));
        }

        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert!(!bpm.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_buffer_pool_full() {
        let (bpm, _temp) = create_bpm(2);

        let page_id1 = bpm.new_page().unwrap();
        let page_id2 = bpm.new_page().unwrap();

        let _guard1 = bpm.checked_read_page(page_id1).unwrap().unwrap();
        let _guard2 = bpm.checked_read_page(page_id2).unwrap().unwrap();

        assert!(matches!(bpm.new_page(), Err(StrataError::BufferPoolFull)));
    }

    #[test]
    fn test_buffer_pool_pin_counting() {
        let (bpm, _temp) = create_bpm(10);
        let page_id = bpm.new_page().unwrap();

        let g1 = bpm.checked_read_page(page_id).unwrap().unwrap();
        let g2 = bpm.checked_read_page(page_id).unwrap().unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(2));

        drop(g1);
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        drop(g2);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }
}
