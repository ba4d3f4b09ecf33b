use crate::common::{PageId, PAGE_SIZE};

const MAGIC_NUMBER: u32 = 0x53545241; // "STRA"
const VERSION: u32 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const RECORD_COUNT_OFFSET: usize = 8;
const RECORDS_OFFSET: usize = 12;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4; // name + root page id
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Mutable view over the reserved header page (page 0).
///
/// The header page maps index names to root page ids so an index can find
/// its root again after the database is reopened. Names longer than 32
/// bytes are truncated.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self) {
        self.data.fill(0);
        self.set_u32(MAGIC_OFFSET, MAGIC_NUMBER);
        self.set_u32(VERSION_OFFSET, VERSION);
        self.set_u32(RECORD_COUNT_OFFSET, 0);
    }

    pub fn is_valid(&self) -> bool {
        HeaderPageRef::new(self.data).is_valid()
    }

    pub fn record_count(&self) -> usize {
        HeaderPageRef::new(self.data).record_count()
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        HeaderPageRef::new(self.data).get_root_id(name)
    }

    /// Adds a new record. Returns false when the name is already present
    /// or the page is out of room.
    pub fn insert_record(&mut self, name: &str, root_id: PageId) -> bool {
        let count = self.record_count();
        if count == MAX_RECORDS || self.find_record(name).is_some() {
            return false;
        }
        self.write_record(count, name, root_id);
        self.set_u32(RECORD_COUNT_OFFSET, (count + 1) as u32);
        true
    }

    /// Updates an existing record. Returns false when the name is absent.
    pub fn update_record(&mut self, name: &str, root_id: PageId) -> bool {
        match self.find_record(name) {
            Some(index) => {
                let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
                self.set_u32(offset, root_id.as_u32());
                true
            }
            None => false,
        }
    }

    /// Drops a record, compacting the tail over it. Returns false when the
    /// name is absent.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = self.find_record(name) else {
            return false;
        };
        let count = self.record_count();
        let start = RECORDS_OFFSET + index * RECORD_SIZE;
        let end = RECORDS_OFFSET + count * RECORD_SIZE;
        self.data.copy_within(start + RECORD_SIZE..end, start);
        self.set_u32(RECORD_COUNT_OFFSET, (count - 1) as u32);
        true
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        HeaderPageRef::new(self.data).find_record(name)
    }

    fn write_record(&mut self, index: usize, name: &str, root_id: PageId) {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        let mut name_buf = [0u8; NAME_SIZE];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_SIZE);
        name_buf[..len].copy_from_slice(&bytes[..len]);
        self.data[offset..offset + NAME_SIZE].copy_from_slice(&name_buf);
        self.set_u32(offset + NAME_SIZE, root_id.as_u32());
    }

    fn set_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Read-only view over the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn is_valid(&self) -> bool {
        self.get_u32(MAGIC_OFFSET) == MAGIC_NUMBER && self.get_u32(VERSION_OFFSET) == VERSION
    }

    pub fn record_count(&self) -> usize {
        self.get_u32(RECORD_COUNT_OFFSET) as usize
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        let index = self.find_record(name)?;
        let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
        let id = PageId::new(self.get_u32(offset));
        if id == PageId::INVALID {
            None
        } else {
            Some(id)
        }
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        let mut name_buf = [0u8; NAME_SIZE];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_SIZE);
        name_buf[..len].copy_from_slice(&bytes[..len]);

        (0..self.record_count()).find(|&i| {
            let offset = RECORDS_OFFSET + i * RECORD_SIZE;
            self.data[offset..offset + NAME_SIZE] == name_buf
        })
    }

    fn get_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_page_init() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);
        page.init();

        assert!(page.is_valid());
        assert_eq!(page.record_count(), 0);
        assert_eq!(page.get_root_id("missing"), None);
    }

    #[test]
    fn test_insert_and_get_record() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);
        page.init();

        assert!(page.insert_record("orders_pk", PageId::new(7)));
        assert!(page.insert_record("users_pk", PageId::new(9)));
        assert!(!page.insert_record("orders_pk", PageId::new(11)));

        assert_eq!(page.get_root_id("orders_pk"), Some(PageId::new(7)));
        assert_eq!(page.get_root_id("users_pk"), Some(PageId::new(9)));
        assert_eq!(page.record_count(), 2);
    }

    #[test]
    fn test_update_record() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);
        page.init();

        assert!(!page.update_record("orders_pk", PageId::new(3)));
        assert!(page.insert_record("orders_pk", PageId::new(3)));
        assert!(page.update_record("orders_pk", PageId::new(12)));
        assert_eq!(page.get_root_id("orders_pk"), Some(PageId::new(12)));
    }

    #[test]
    fn test_invalid_root_reads_as_absent() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);
        page.init();

        assert!(page.insert_record("empty_index", PageId::INVALID));
        assert_eq!(page.get_root_id("empty_index"), None);
    }

    #[test]
    fn test_delete_record_compacts() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);
        page.init();

        page.insert_record("a", PageId::new(1));
        page.insert_record("b", PageId::new(2));
        page.insert_record("c", PageId::new(3));

        assert!(page.delete_record("b"));
        assert!(!page.delete_record("b"));
        assert_eq!(page.record_count(), 2);
        assert_eq!(page.get_root_id("a"), Some(PageId::new(1)));
        assert_eq!(page.get_root_id("c"), Some(PageId::new(3)));
    }
}
