use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result, StrataError, HEADER_PAGE_ID, PAGE_SIZE};
use crate::storage::page::{HeaderPage, HeaderPageRef};

/// DiskManager reads and writes pages to a single database file.
///
/// Page 0 is reserved for the header page and is initialized when the file
/// is created; reopening an existing file validates it. New pages are
/// allocated linearly at the end of the file; deallocated pages go on an
/// in-memory free list and are handed out again before the file grows.
pub struct DiskManager {
    file: Mutex<File>,
    db_path: PathBuf,
    num_pages: AtomicU32,
    free_pages: Mutex<Vec<PageId>>,
    num_reads: AtomicU32,
    num_writes: AtomicU32,
}

impl DiskManager {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        let dm = Self {
            file: Mutex::new(file),
            db_path,
            num_pages: AtomicU32::new(num_pages.max(1)),
            free_pages: Mutex::new(Vec::new()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        };

        if num_pages == 0 {
            dm.init_header_page()?;
        } else {
            dm.validate_header_page()?;
        }

        Ok(dm)
    }

    fn init_header_page(&self) -> Result<()> {
        let mut data = [0u8; PAGE_SIZE];
        HeaderPage::new(&mut data).init();
        self.write_page(HEADER_PAGE_ID, &data)
    }

    fn validate_header_page(&self) -> Result<()> {
        let mut data = [0u8; PAGE_SIZE];
        self.read_page(HEADER_PAGE_ID, &mut data)?;
        if !HeaderPageRef::new(&data).is_valid() {
            return Err(StrataError::InvalidDatabaseFile);
        }
        Ok(())
    }

    /// Reads a page from disk into the provided buffer. Reading past the
    /// end of the file yields zeroes.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        let offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let bytes_read = file.read(data)?;
        if bytes_read < PAGE_SIZE {
            data[bytes_read..].fill(0);
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        let offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a page, reusing a freed one when available, and zeroes it.
    pub fn allocate_page(&self) -> Result<PageId> {
        let page_id = match self.free_pages.lock().pop() {
            Some(id) => id,
            None => PageId::new(self.num_pages.fetch_add(1, Ordering::SeqCst)),
        };

        let zeros = [0u8; PAGE_SIZE];
        self.write_page(page_id, &zeros)?;
        Ok(page_id)
    }

    /// Returns a page to the free list for reuse.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        assert_ne!(page_id, HEADER_PAGE_ID, "cannot free the header page");
        self.free_pages.lock().push(page_id);
        Ok(())
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Relaxed)
    }

    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.file.get_mut().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_manager_creates_header() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("test.db")).unwrap();
        assert_eq!(dm.num_pages(), 1);

        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(HEADER_PAGE_ID, &mut data).unwrap();
        assert!(HeaderPageRef::new(&data).is_valid());
    }

    #[test]
    fn test_disk_manager_read_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("rw.db")).unwrap();

        let page_id = dm.allocate_page().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        write_data[PAGE_SIZE - 1] = 128;
        dm.write_page(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut read_data).unwrap();
        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
        assert_eq!(read_data[PAGE_SIZE - 1], 128);
    }

    #[test]
    fn test_disk_manager_allocate_skips_header() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("alloc.db")).unwrap();

        let page_id = dm.allocate_page().unwrap();
        assert_eq!(page_id, PageId::new(1));
    }

    #[test]
    fn test_disk_manager_reuses_freed_pages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("free.db")).unwrap();

        let a = dm.allocate_page().unwrap();
        let _b = dm.allocate_page().unwrap();
        dm.deallocate_page(a).unwrap();

        assert_eq!(dm.allocate_page().unwrap(), a);
    }

    #[test]
    fn test_disk_manager_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("persist.db");

        let page_id = {
            let dm = DiskManager::new(&db_path).unwrap();
            let page_id = dm.allocate_page().unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 123;
            dm.write_page(page_id, &data).unwrap();
            page_id
        };

        let dm = DiskManager::new(&db_path).unwrap();
        assert_eq!(dm.num_pages(), 2);

        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert_eq!(data[0], 123);
    }

    #[test]
    fn test_disk_manager_rejects_garbage_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("garbage.db");
        std::fs::write(&db_path, vec![0xabu8; PAGE_SIZE]).unwrap();

        assert!(matches!(
            DiskManager::new(&db_path),
            Err(StrataError::InvalidDatabaseFile)
        ));
    }
}
