//! TTL Index
//!
//! Leader-local bookkeeping of pending expirations: a FIFO of
//! [`TtlIndexElement`]s drained by the eviction loop, plus a keyed mirror
//! that collapses duplicate enqueues of the same key so the snapshot
//! written back to the store stays compact.
//!
//! The queue and the mirror each have their own lock; neither is ever held
//! across a consensus call. A mirror of `None` means the index was
//! discarded on leadership loss and must be rebuilt from the snapshot
//! before the next eviction pass.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::types::TtlIndexElement;

/// Outcome of a snapshot rebuild attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    Found,
    NotFound,
    NotLeader,
}

#[derive(Default)]
pub struct TtlIndex {
    queue: Mutex<VecDeque<TtlIndexElement>>,
    mirror: Mutex<Option<HashMap<String, TtlIndexElement>>>,
    counter: AtomicU64,
}

impl TtlIndex {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            mirror: Mutex::new(None),
            counter: AtomicU64::new(0),
        }
    }

    /// Enqueues a pending expiration for `key` and records it in the
    /// mirror (when one is live).
    pub fn track(&self, key: &str, expires_at: i64) {
        let element = TtlIndexElement {
            key: key.to_string(),
            expires_at,
            index: self.counter.fetch_add(1, Ordering::Relaxed),
        };
        self.add(element);
    }

    /// Re-enqueues an element at the tail, refreshing its mirror entry.
    pub fn add(&self, element: TtlIndexElement) {
        {
            let mut mirror = self.lock_mirror();
            if let Some(map) = mirror.as_mut() {
                map.insert(element.key.clone(), element.clone());
            }
        }
        self.lock_queue().push_back(element);
    }

    pub fn pop(&self) -> Option<TtlIndexElement> {
        self.lock_queue().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards all index state. Called whenever the node observes it is
    /// not the leader; the next leadership acquisition rebuilds from the
    /// snapshot.
    pub fn clear(&self) {
        self.lock_queue().clear();
        *self.lock_mirror() = None;
    }

    pub fn mirror_is_absent(&self) -> bool {
        self.lock_mirror().is_none()
    }

    /// Installs a freshly rebuilt mirror and enqueues its elements.
    pub fn rebuild_from(&self, elements: Vec<TtlIndexElement>) {
        // Future enqueues must not reuse a rebuilt element's identity.
        if let Some(max_index) = elements.iter().map(|e| e.index).max() {
            self.counter.fetch_max(max_index + 1, Ordering::Relaxed);
        }
        let mut map = HashMap::with_capacity(elements.len());
        for element in &elements {
            map.insert(element.key.clone(), element.clone());
        }
        *self.lock_mirror() = Some(map);
        let mut queue = self.lock_queue();
        queue.clear();
        queue.extend(elements);
    }

    /// Drops elements that left the queue for good (evicted, superseded,
    /// or vanished). Removal matches on element identity, not just key: a
    /// stale superseded copy must not evict the slot a fresher enqueue of
    /// the same key is holding. Re-enqueued elements are not passed here
    /// and stay in the mirror, keeping the snapshot a faithful picture of
    /// the pending set.
    pub fn remove_from_mirror(&self, elements: &[TtlIndexElement]) {
        let mut mirror = self.lock_mirror();
        if let Some(map) = mirror.as_mut() {
            for element in elements {
                if let Some(held) = map.get(&element.key) {
                    if held.index == element.index {
                        map.remove(&element.key);
                    }
                }
            }
        }
    }

    /// A copy of the mirror for snapshot serialization, or `None` when the
    /// index has been discarded.
    pub fn snapshot_copy(&self) -> Option<HashMap<String, TtlIndexElement>> {
        self.lock_mirror().clone()
    }

    /// Keys currently queued, oldest first. Test hook.
    pub fn queued_keys(&self) -> Vec<String> {
        self.lock_queue().iter().map(|e| e.key.clone()).collect()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<TtlIndexElement>> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_mirror(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<HashMap<String, TtlIndexElement>>> {
        self.mirror.lock().unwrap_or_else(|p| p.into_inner())
    }
}
