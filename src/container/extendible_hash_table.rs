use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

/// A bucket holds up to `capacity` entries plus its local depth. The state
/// lock doubles as the per-bucket latch.
struct Bucket<K, V> {
    capacity: usize,
    state: RwLock<BucketState<K, V>>,
}

struct BucketState<K, V> {
    depth: u32,
    items: Vec<(K, V)>,
}

impl<K: Eq + Clone, V: Clone> Bucket<K, V> {
    fn new(capacity: usize, depth: u32) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            state: RwLock::new(BucketState {
                depth,
                items: Vec::with_capacity(capacity),
            }),
        })
    }
}

impl<K: Eq + Clone, V: Clone> BucketState<K, V> {
    fn find(&self, key: &K) -> Option<V> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.remove(pos);
            true
        } else {
            false
        }
    }

    /// Overwrites an existing key or appends when there is room. Returns
    /// false iff the bucket is full and the key is absent.
    fn insert(&mut self, capacity: usize, key: &K, value: &V) -> bool {
        if let Some(entry) = self.items.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.clone();
            return true;
        }
        if self.items.len() == capacity {
            return false;
        }
        self.items.push((key.clone(), value.clone()));
        true
    }
}

struct Directory<K, V> {
    global_depth: u32,
    num_buckets: usize,
    dir: Vec<Arc<Bucket<K, V>>>,
}

/// A concurrent extendible hash table.
///
/// The directory is a power-of-two sequence of shared bucket references;
/// a key lands in the slot selected by the low `global_depth` bits of its
/// hash. Overflowing a bucket splits it (doubling the directory first when
/// the bucket already consumes every directory bit). Buckets are never
/// merged.
///
/// Lookups and non-splitting writes run under a shared directory latch plus
/// the target bucket's latch; splits re-acquire the directory latch
/// exclusively (upgrade by release-and-reacquire) and re-validate before
/// mutating.
///
/// The hasher is pluggable in the `HashMap::with_hasher` style; tests use a
/// deterministic hasher to pin down directory shapes.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    bucket_size: usize,
    hash_builder: S,
    directory: RwLock<Directory<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> ExtendibleHashTable<K, V, RandomState> {
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size >= 1, "bucket size must be at least 1");
        Self {
            bucket_size,
            hash_builder,
            directory: RwLock::new(Directory {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![Bucket::new(bucket_size, 0)],
            }),
        }
    }

    fn hash(&self, key: &K) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn index_of(hash: u64, global_depth: u32) -> usize {
        (hash as usize) & ((1usize << global_depth) - 1)
    }

    /// Looks up the value stored for `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let hash = self.hash(key);
        let directory = self.directory.read();
        let bucket = &directory.dir[Self::index_of(hash, directory.global_depth)];
        let found = bucket.state.read().find(key);
        found
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let hash = self.hash(key);
        let directory = self.directory.read();
        let bucket = &directory.dir[Self::index_of(hash, directory.global_depth)];
        let removed = bucket.state.write().remove(key);
        removed
    }

    /// Inserts or overwrites `key`. Splits the target bucket (doubling the
    /// directory as needed) until it has room; insertion always succeeds.
    pub fn insert(&self, key: K, value: V) {
        let hash = self.hash(&key);

        // Fast path: shared directory latch, exclusive bucket latch.
        {
            let directory = self.directory.read();
            let bucket = &directory.dir[Self::index_of(hash, directory.global_depth)];
            if bucket.state.write().insert(bucket.capacity, &key, &value) {
                return;
            }
        }

        // The bucket was full: upgrade by release-and-reacquire, then
        // re-validate and split under the exclusive directory latch.
        let mut directory = self.directory.write();
        loop {
            let idx = Self::index_of(hash, directory.global_depth);
            let bucket = Arc::clone(&directory.dir[idx]);
            let mut state = bucket.state.write();
            if state.insert(bucket.capacity, &key, &value) {
                return;
            }

            if state.depth == directory.global_depth {
                Self::double_directory(&mut directory);
            }
            Self::split_bucket(&mut directory, idx, &bucket, &mut state, |k| self.hash(k));
            // Pathological collisions can leave the key's bucket full again;
            // keep splitting until it has room.
        }
    }

    /// Duplicates every directory entry and bumps the global depth.
    fn double_directory(directory: &mut Directory<K, V>) {
        let old_len = directory.dir.len();
        for i in 0..old_len {
            let bucket = Arc::clone(&directory.dir[i]);
            directory.dir.push(bucket);
        }
        directory.global_depth += 1;
        log::debug!(
            "hash directory doubled to global depth {}",
            directory.global_depth
        );
    }

    /// Splits the bucket at directory slot `idx`, redirecting every alias
    /// slot whose new depth bit disagrees with `idx` and redistributing the
    /// entries by that bit. Caller holds the directory exclusively and the
    /// old bucket's latch.
    fn split_bucket(
        directory: &mut Directory<K, V>,
        idx: usize,
        old_bucket: &Arc<Bucket<K, V>>,
        old_state: &mut BucketState<K, V>,
        hash: impl Fn(&K) -> u64,
    ) {
        let bit = 1usize << old_state.depth;
        old_state.depth += 1;

        let new_bucket = Bucket::new(old_bucket.capacity, old_state.depth);
        {
            let mut new_state = new_bucket.state.write();
            let (keep, moved): (Vec<_>, Vec<_>) = std::mem::take(&mut old_state.items)
                .into_iter()
                .partition(|(k, _)| (hash(k) as usize) & bit == idx & bit);
            old_state.items = keep;
            new_state.items = moved;
        }

        for (slot_idx, slot) in directory.dir.iter_mut().enumerate() {
            if Arc::ptr_eq(slot, old_bucket) && (slot_idx & bit) != (idx & bit) {
                *slot = Arc::clone(&new_bucket);
            }
        }
        directory.num_buckets += 1;
    }

    /// Number of hash bits the directory currently consumes.
    pub fn global_depth(&self) -> u32 {
        self.directory.read().global_depth
    }

    /// Local depth of the bucket referenced by the given directory slot.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let directory = self.directory.read();
        let depth = directory.dir[dir_index].state.read().depth;
        depth
    }

    /// Number of distinct buckets reachable from the directory.
    pub fn num_buckets(&self) -> usize {
        self.directory.read().num_buckets
    }
}
