use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::FrameHeader;

/// Callback invoked when a guard releases its page: `(page_id, is_dirty)`.
type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

struct PageGuardBase {
    page_id: PageId,
    /// Keeps the frame alive for the lifetime of the lock guard below.
    _frame: Arc<FrameHeader>,
    release_callback: Option<ReleaseCallback>,
    is_dirty: bool,
}

impl PageGuardBase {
    fn new(page_id: PageId, frame: Arc<FrameHeader>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            _frame: frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }

    fn release(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// RAII guard for shared access to a page: holds the page's read latch and
/// a pin, releasing both on drop.
pub struct ReadPageGuard {
    base: PageGuardBase,
    _data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>,
}

impl ReadPageGuard {
    /// # Safety
    /// The lock guard's lifetime is erased to `'static`; the `Arc` held in
    /// `base` keeps the frame (and therefore the lock) alive at least as
    /// long as this guard.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.read();
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            _data_guard: data_guard,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self._data_guard[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.base.release();
    }
}

/// RAII guard for exclusive access to a page: holds the write latch and a
/// pin. The page is marked dirty iff `data_mut` was called.
pub struct WritePageGuard {
    base: PageGuardBase,
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// # Safety
    /// Same contract as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.write();
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // The latch must be gone before the release callback lets another
        // thread reuse the frame.
        self.data_guard.take();
        self.base.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FrameId;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_read_page_guard_releases_on_drop() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        frame.copy_from(&data);

        let released = Arc::new(AtomicBool::new(false));
        let released_flag = released.clone();
        let guard = unsafe {
            ReadPageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, _| released_flag.store(true, Ordering::SeqCst)),
            )
        };

        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(guard.data()[0], 42);
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_page_guard_reports_dirty() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let dirty = Arc::new(AtomicBool::new(false));
        let dirty_flag = dirty.clone();
        let mut guard = unsafe {
            WritePageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, is_dirty| dirty_flag.store(is_dirty, Ordering::SeqCst)),
            )
        };

        guard.data_mut()[0] = 42;
        drop(guard);
        assert!(dirty.load(Ordering::SeqCst));

        let mut out = [0u8; PAGE_SIZE];
        frame.copy_to(&mut out);
        assert_eq!(out[0], 42);
    }

    #[test]
    fn test_write_page_guard_clean_when_untouched() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let dirty = Arc::new(AtomicBool::new(true));
        let dirty_flag = dirty.clone();
        let guard = unsafe {
            WritePageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, is_dirty| dirty_flag.store(is_dirty, Ordering::SeqCst)),
            )
        };

        assert_eq!(guard.data()[0], 0);
        drop(guard);
        assert!(!dirty.load(Ordering::SeqCst));
    }
}
