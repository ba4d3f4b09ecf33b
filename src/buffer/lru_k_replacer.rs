use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::FrameId;

/// Which of the two recency lists a frame currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    /// Fewer than k recorded accesses; ordered by first access, newest at front.
    History,
    /// At least k recorded accesses; ordered by last access, newest at front.
    Cache,
}

#[derive(Debug)]
struct FrameEntry {
    access_count: usize,
    is_evictable: bool,
    list: ListKind,
}

#[derive(Debug, Default)]
struct ReplacerState {
    entries: HashMap<FrameId, FrameEntry>,
    /// Frames with fewer than k accesses, newest first access at the front.
    history: VecDeque<FrameId>,
    /// Frames with at least k accesses, most recent access at the front.
    cache: VecDeque<FrameId>,
    /// Number of evictable frames across both lists.
    curr_size: usize,
}

impl ReplacerState {
    fn detach(&mut self, frame_id: FrameId, list: ListKind) {
        let queue = match list {
            ListKind::History => &mut self.history,
            ListKind::Cache => &mut self.cache,
        };
        if let Some(pos) = queue.iter().position(|&f| f == frame_id) {
            queue.remove(pos);
        }
    }
}

/// LRU-K replacement policy.
///
/// The replacer evicts the frame whose backward k-distance is largest.
/// Frames with fewer than k recorded accesses have +inf backward k-distance
/// and are preferred as victims, oldest first access winning ties. Frames
/// with k or more accesses are ranked by their k-th most recent access,
/// least recent first.
pub struct LruKReplacer {
    k: usize,
    replacer_size: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            k,
            replacer_size: num_frames,
            state: Mutex::new(ReplacerState::default()),
        }
    }

    /// Evicts the frame with the largest backward k-distance and erases its
    /// access history. Returns `None` when no frame is evictable.
    ///
    /// The history list is scanned back-to-front (oldest first access), then
    /// the cache list back-to-front (least recent k-th access). Both scans
    /// are O(n); eviction is rare compared to access recording.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        let victim = state
            .history
            .iter()
            .rev()
            .chain(state.cache.iter().rev())
            .copied()
            .find(|f| state.entries[f].is_evictable)?;

        let entry = state.entries.remove(&victim).unwrap();
        state.detach(victim, entry.list);
        state.curr_size -= 1;
        log::debug!("evicting frame {}", victim);
        Some(victim)
    }

    /// Records an access to the given frame at the current logical time.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.replacer_size,
            "frame id {} out of range",
            frame_id
        );

        let mut state = self.state.lock();
        match state.entries.get_mut(&frame_id) {
            None => {
                // New frames always start on the history list, whatever k is.
                state.entries.insert(
                    frame_id,
                    FrameEntry {
                        access_count: 1,
                        is_evictable: true,
                        list: ListKind::History,
                    },
                );
                state.curr_size += 1;
                state.history.push_front(frame_id);
            }
            Some(entry) => {
                if entry.access_count + 1 < self.k {
                    // Still short of k after this access; position in the
                    // history list stays keyed to the first access.
                    entry.access_count += 1;
                } else if entry.list == ListKind::History {
                    // The count has reached k: graduate to the cache list.
                    entry.access_count += 1;
                    entry.list = ListKind::Cache;
                    state.detach(frame_id, ListKind::History);
                    state.cache.push_front(frame_id);
                } else {
                    // Already cached; refresh its position.
                    state.detach(frame_id, ListKind::Cache);
                    state.cache.push_front(frame_id);
                }
            }
        }
    }

    /// Marks a frame evictable or pinned. No-op for untracked frames.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        assert!(
            frame_id.as_usize() < self.replacer_size,
            "frame id {} out of range",
            frame_id
        );

        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&frame_id) else {
            return;
        };
        if entry.is_evictable != evictable {
            entry.is_evictable = evictable;
            if evictable {
                state.curr_size += 1;
            } else {
                state.curr_size -= 1;
            }
        }
    }

    /// Drops a frame from the replacer entirely. The caller only removes
    /// frames it has made evictable; untracked frames are ignored.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.remove(&frame_id) {
            assert!(entry.is_evictable, "removing a non-evictable frame");
            state.detach(frame_id, entry.list);
            state.curr_size -= 1;
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().curr_size
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
