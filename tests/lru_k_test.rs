//! Integration tests for the LRU-K replacer

use strata::buffer::LruKReplacer;
use strata::common::FrameId;

#[test]
fn test_lru_k_eviction_order() {
    let replacer = LruKReplacer::new(10, 2);

    for i in 0..5 {
        replacer.record_access(FrameId::new(i));
    }
    assert_eq!(replacer.size(), 5);

    // All frames have a single access (+inf k-distance), so eviction runs
    // in order of first access.
    for i in 0..5 {
        assert_eq!(replacer.evict(), Some(FrameId::new(i)));
    }
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_infinite_distance_wins() {
    let replacer = LruKReplacer::new(10, 2);

    // Frame 0: one access. Frames 1 and 2: two accesses each.
    replacer.record_access(FrameId::new(0));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(2));
    replacer.record_access(FrameId::new(2));

    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
}

#[test]
fn test_lru_k_spec_scenario() {
    // K=2: insert frames 1..4, access 1 again, make all evictable.
    // Frame 2 has the oldest first access among the single-access frames.
    let replacer = LruKReplacer::new(10, 2);

    for i in 1..=4 {
        replacer.record_access(FrameId::new(i));
    }
    replacer.record_access(FrameId::new(1));

    for i in 1..=4 {
        replacer.set_evictable(FrameId::new(i), true);
    }

    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
}

#[test]
fn test_lru_k_non_evictable_skipped() {
    let replacer = LruKReplacer::new(10, 2);

    replacer.record_access(FrameId::new(0));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(2));
    replacer.set_evictable(FrameId::new(0), false);

    assert_eq!(replacer.size(), 2);
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), None);
    assert_eq!(replacer.size(), 0);
}

#[test]
fn test_lru_k_toggle_evictable_preserves_size() {
    let replacer = LruKReplacer::new(10, 2);

    replacer.record_access(FrameId::new(0));
    assert_eq!(replacer.size(), 1);

    replacer.set_evictable(FrameId::new(0), false);
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);

    replacer.set_evictable(FrameId::new(0), true);
    assert_eq!(replacer.size(), 1);
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
fn test_lru_k_evicted_frame_starts_fresh() {
    let replacer = LruKReplacer::new(10, 2);

    replacer.record_access(FrameId::new(0));
    replacer.record_access(FrameId::new(0));
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));

    // Frame 0's history is gone: one new access puts it back on the
    // history list with +inf distance, ahead of the cached frame 1.
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(0));

    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
}

#[test]
fn test_lru_k_remove() {
    let replacer = LruKReplacer::new(10, 2);

    replacer.record_access(FrameId::new(0));
    replacer.record_access(FrameId::new(1));
    assert_eq!(replacer.size(), 2);

    replacer.remove(FrameId::new(0));
    assert_eq!(replacer.size(), 1);
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_cache_list_recency() {
    let replacer = LruKReplacer::new(10, 2);

    replacer.record_access(FrameId::new(0));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(1)); // frame 1 reaches k
    replacer.record_access(FrameId::new(0)); // frame 0 reaches k, now newest

    // Both frames are on the cache list; frame 1's position is staler.
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
fn test_lru_k_concurrent_access() {
    use std::sync::Arc;
    use std::thread;

    let replacer = Arc::new(LruKReplacer::new(100, 2));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                for i in 0..25 {
                    let frame_id = FrameId::new((t * 25 + i) as u32);
                    replacer.record_access(frame_id);
                    replacer.set_evictable(frame_id, true);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(replacer.size(), 100);
    for _ in 0..100 {
        assert!(replacer.evict().is_some());
    }
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}
