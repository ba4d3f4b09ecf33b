use std::cmp::Ordering;
use std::fmt;

/// Width of an index key in bytes.
pub const KEY_SIZE: usize = 8;

/// A fixed-width index key. Interpretation is up to the comparator; the
/// tree itself only moves these around.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct GenericKey(pub [u8; KEY_SIZE]);

impl GenericKey {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; KEY_SIZE];
        let len = bytes.len().min(KEY_SIZE);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self(buf)
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value.to_le_bytes())
    }

    pub fn as_i64(&self) -> i64 {
        i64::from_le_bytes(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for GenericKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenericKey({})", self.as_i64())
    }
}

/// Strict total order over index keys.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &GenericKey, b: &GenericKey) -> Ordering;
}

/// Compares keys as little-endian signed 64-bit integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int64Comparator;

impl KeyComparator for Int64Comparator {
    fn compare(&self, a: &GenericKey, b: &GenericKey) -> Ordering {
        a.as_i64().cmp(&b.as_i64())
    }
}

/// Compares keys as raw byte strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &GenericKey, b: &GenericKey) -> Ordering {
        a.0.cmp(&b.0)
    }
}
