use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::common::{FrameId, PageId, PAGE_SIZE};

/// FrameHeader is one slot of the buffer pool: metadata plus the page
/// bytes. The data `RwLock` doubles as the page latch handed out through
/// the page guards; the pin count is orthogonal to it.
pub struct FrameHeader {
    frame_id: FrameId,
    page_id: Mutex<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    pub(crate) data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: Mutex::new(PageId::INVALID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        *self.page_id.lock()
    }

    pub fn set_page_id(&self, page_id: PageId) {
        *self.page_id.lock() = page_id;
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value, or `None` if it
    /// was already zero.
    pub fn unpin(&self) -> Option<u32> {
        loop {
            let current = self.pin_count.load(Ordering::Acquire);
            if current == 0 {
                return None;
            }
            if self
                .pin_count
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current - 1);
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Copies data from the given slice into the frame.
    pub fn copy_from(&self, data: &[u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        self.data.write().copy_from_slice(data);
    }

    /// Copies data from the frame into the given slice.
    pub fn copy_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.copy_from_slice(&**self.data.read());
    }

    /// Resets the frame for reuse by a different page.
    pub fn reset(&self) {
        *self.page_id.lock() = PageId::INVALID;
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_new() {
        let frame = FrameHeader::new(FrameId::new(0));
        assert_eq!(frame.frame_id(), FrameId::new(0));
        assert_eq!(frame.page_id(), PageId::INVALID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_header_pin_unpin() {
        let frame = FrameHeader::new(FrameId::new(0));

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), Some(1));
        assert_eq!(frame.unpin(), Some(0));
        assert_eq!(frame.unpin(), None);
    }

    #[test]
    fn test_frame_header_data_round_trip() {
        let frame = FrameHeader::new(FrameId::new(0));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        data[4095] = 7;
        frame.copy_from(&data);

        let mut out = [0u8; PAGE_SIZE];
        frame.copy_to(&mut out);
        assert_eq!(out[0], 42);
        assert_eq!(out[4095], 7);
    }

    #[test]
    fn test_frame_header_reset() {
        let frame = FrameHeader::new(FrameId::new(0));
        frame.set_page_id(PageId::new(5));
        frame.pin();
        frame.set_dirty(true);
        frame.copy_from(&[1u8; PAGE_SIZE]);

        frame.reset();

        assert_eq!(frame.page_id(), PageId::INVALID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        let mut out = [1u8; PAGE_SIZE];
        frame.copy_to(&mut out);
        assert_eq!(out[0], 0);
    }
}
