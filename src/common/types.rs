use std::fmt;

/// Integer-backed identifier newtypes. Each carries an `INVALID` sentinel
/// (the all-ones pattern) so absence can be stored in fixed-width page
/// fields without an option tag.
macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident($repr:ty)) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $repr);

        impl $name {
            /// Sentinel meaning "no such id".
            pub const INVALID: Self = Self(<$repr>::MAX);

            pub fn new(id: $repr) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

id_type! {
    /// Addresses one page slot in the database file.
    PageId(u32)
}

id_type! {
    /// Addresses one frame of the buffer pool.
    FrameId(u32)
}

id_type! {
    /// Position of a tuple within its page.
    SlotId(u16)
}

impl PageId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl FrameId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Frames index arrays in the buffer pool.
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl SlotId {
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

/// Location of a tuple: the value type stored in index leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    /// On-page footprint: page id (4 bytes) followed by slot id (2 bytes),
    /// both little-endian.
    pub const SERIALIZED_SIZE: usize = 6;

    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }

    /// Decodes a record id from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let page_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let slot_id = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        Self::new(PageId::new(page_id), SlotId::new(slot_id))
    }

    /// Encodes this record id into the start of `bytes`.
    pub fn write_to(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.slot_id.0.to_le_bytes());
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id.0, self.slot_id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_sentinels() {
        assert_eq!(PageId::INVALID, PageId::new(u32::MAX));
        assert_eq!(FrameId::INVALID, FrameId::new(u32::MAX));
        assert_ne!(PageId::new(0), PageId::INVALID);
    }

    #[test]
    fn test_record_id_codec_round_trip() {
        let rid = RecordId::new(PageId::new(0x01020304), SlotId::new(0x0506));
        let mut buf = [0u8; RecordId::SERIALIZED_SIZE];
        rid.write_to(&mut buf);
        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01, 0x06, 0x05]);
        assert_eq!(RecordId::from_bytes(&buf), rid);
    }
}
