//! LRU eviction policy
//!
//! Records live in an arena of slots linked by index, ordered from least
//! recently used (front) to most recently used (back). A hash index maps each
//! tracked key to its slot, so add/remove/upvote/downvote are O(1) and a key
//! is tracked exactly when it is present in the index.
//!
//! One mutex serializes every operation, including the whole ejection scan.

use crate::core::error::{BlockSpaceError, Result};
use crate::core::eviction::{Ejection, EvictionPolicy};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotIdx(usize);

/// One tracked entry and its list links
#[derive(Debug)]
pub struct EvictionRecord<K> {
    key: K,
    prev: Option<SlotIdx>,
    next: Option<SlotIdx>,
}

/// Arena-backed doubly linked list
#[derive(Debug)]
struct LruList<K> {
    slots: Vec<Option<EvictionRecord<K>>>,
    free_slots: Vec<usize>,
    index: AHashMap<K, SlotIdx>,
    head: Option<SlotIdx>,
    tail: Option<SlotIdx>,
}

impl<K: Eq + Hash + Clone> LruList<K> {
    fn new() -> Self {
        LruList {
            slots: Vec::new(),
            free_slots: Vec::new(),
            index: AHashMap::new(),
            head: None,
            tail: None,
        }
    }

    fn with_capacity(capacity: usize) -> Self {
        LruList {
            slots: Vec::with_capacity(capacity),
            free_slots: Vec::new(),
            index: AHashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn record(&self, idx: SlotIdx) -> Option<&EvictionRecord<K>> {
        self.slots.get(idx.0).and_then(|s| s.as_ref())
    }

    fn record_mut(&mut self, idx: SlotIdx) -> Option<&mut EvictionRecord<K>> {
        self.slots.get_mut(idx.0).and_then(|s| s.as_mut())
    }

    fn alloc_slot(&mut self, key: K) -> SlotIdx {
        let record = EvictionRecord {
            key,
            prev: None,
            next: None,
        };
        match self.free_slots.pop() {
            Some(free) => {
                self.slots[free] = Some(record);
                SlotIdx(free)
            }
            None => {
                self.slots.push(Some(record));
                SlotIdx(self.slots.len() - 1)
            }
        }
    }

    /// Detach a slot from its neighbours; the slot stays occupied
    fn unlink(&mut self, idx: SlotIdx) {
        let (prev, next) = match self.record(idx) {
            Some(r) => (r.prev, r.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(r) = self.record_mut(p) {
                    r.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(r) = self.record_mut(n) {
                    r.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(r) = self.record_mut(idx) {
            r.prev = None;
            r.next = None;
        }
    }

    fn link_back(&mut self, idx: SlotIdx) {
        let old_tail = self.tail;
        if let Some(r) = self.record_mut(idx) {
            r.prev = old_tail;
            r.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(r) = self.record_mut(t) {
                    r.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn link_front(&mut self, idx: SlotIdx) {
        let old_head = self.head;
        if let Some(r) = self.record_mut(idx) {
            r.prev = None;
            r.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(r) = self.record_mut(h) {
                    r.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn push_back(&mut self, key: K) -> Result<()> {
        if self.index.contains_key(&key) {
            return Err(BlockSpaceError::AlreadyTracked);
        }
        let idx = self.alloc_slot(key.clone());
        self.link_back(idx);
        self.index.insert(key, idx);
        Ok(())
    }

    /// Unlink and free a slot, returning its key
    fn release(&mut self, idx: SlotIdx) -> Option<K> {
        self.unlink(idx);
        let record = self.slots.get_mut(idx.0)?.take()?;
        self.free_slots.push(idx.0);
        self.index.remove(&record.key);
        Some(record.key)
    }

    fn move_to_back(&mut self, idx: SlotIdx) {
        if self.tail == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_back(idx);
    }

    fn move_to_front(&mut self, idx: SlotIdx) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_front(idx);
    }

    fn keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            match self.record(idx) {
                Some(r) => {
                    out.push(r.key.clone());
                    cursor = r.next;
                }
                None => break,
            }
        }
        out
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free_slots.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }
}

/// Least-recently-used eviction policy
pub struct LruEvictionPolicy<K> {
    list: Mutex<LruList<K>>,
}

impl<K: Eq + Hash + Clone + Send> LruEvictionPolicy<K> {
    pub fn new() -> Self {
        LruEvictionPolicy {
            list: Mutex::new(LruList::new()),
        }
    }

    /// Pre-size for an expected number of tracked entries
    pub fn with_capacity(capacity: usize) -> Self {
        LruEvictionPolicy {
            list: Mutex::new(LruList::with_capacity(capacity)),
        }
    }

    /// Tracked keys from least to most recently used
    pub fn snapshot(&self) -> Vec<K> {
        self.list.lock().keys()
    }

    /// Stop tracking everything
    pub fn clear(&self) {
        self.list.lock().clear();
    }
}

impl<K: Eq + Hash + Clone + Send> Default for LruEvictionPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone + Send> EvictionPolicy<K> for LruEvictionPolicy<K> {
    fn add(&self, key: K) -> Result<()> {
        self.list.lock().push_back(key)
    }

    fn remove(&self, key: &K) -> Result<()> {
        let mut list = self.list.lock();
        let idx = *list.index.get(key).ok_or(BlockSpaceError::NotTracked)?;
        list.release(idx);
        Ok(())
    }

    fn upvote(&self, key: &K) {
        let mut list = self.list.lock();
        if let Some(&idx) = list.index.get(key) {
            list.move_to_back(idx);
        }
    }

    fn downvote(&self, key: &K) {
        let mut list = self.list.lock();
        if let Some(&idx) = list.index.get(key) {
            list.move_to_front(idx);
        }
    }

    /// Entries the predicate skips are left exactly where they were, so the
    /// relative order of skipped entries never changes.
    fn eject_next_candidate(&self, is_ejectable: &mut dyn FnMut(&K) -> Ejection) -> Result<Vec<K>> {
        let mut list = self.list.lock();
        let mut ejected = Vec::new();
        let mut skipped = 0usize;

        let mut cursor = list.head;
        while let Some(idx) = cursor {
            let (decision, next) = match list.record(idx) {
                Some(r) => (is_ejectable(&r.key), r.next),
                None => break,
            };
            cursor = next;

            match decision {
                Ejection::Skip => skipped += 1,
                Ejection::Take | Ejection::TakeAndStop => {
                    if let Some(key) = list.release(idx) {
                        ejected.push(key);
                    }
                    if decision == Ejection::TakeAndStop {
                        break;
                    }
                }
            }
        }

        if skipped > 0 {
            debug!(skipped, ejected = ejected.len(), "LRU ejection had to skip entries");
        }

        if ejected.is_empty() {
            return Err(BlockSpaceError::EvictionExhausted);
        }
        Ok(ejected)
    }

    fn is_tracked(&self, key: &K) -> bool {
        self.list.lock().index.contains_key(key)
    }

    fn len(&self) -> usize {
        self.list.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with(keys: &[&'static str]) -> LruEvictionPolicy<&'static str> {
        let policy = LruEvictionPolicy::new();
        for &k in keys {
            policy.add(k).unwrap();
        }
        policy
    }

    fn take_one(policy: &LruEvictionPolicy<&'static str>) -> &'static str {
        policy.eject_next_candidate(&mut |_| Ejection::TakeAndStop).unwrap()[0]
    }

    #[test]
    fn test_add_orders_by_insertion() {
        let policy = policy_with(&["a", "b", "c"]);
        assert_eq!(policy.snapshot(), vec!["a", "b", "c"]);
        assert_eq!(policy.len(), 3);
        assert!(policy.is_tracked(&"b"));
    }

    #[test]
    fn test_add_twice_rejected() {
        let policy = policy_with(&["a"]);
        assert!(matches!(policy.add("a"), Err(BlockSpaceError::AlreadyTracked)));
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn test_remove() {
        let policy = policy_with(&["a", "b", "c"]);
        policy.remove(&"b").unwrap();
        assert_eq!(policy.snapshot(), vec!["a", "c"]);
        assert!(!policy.is_tracked(&"b"));
        assert!(matches!(policy.remove(&"b"), Err(BlockSpaceError::NotTracked)));

        policy.remove(&"a").unwrap();
        policy.remove(&"c").unwrap();
        assert!(policy.is_empty());
        assert_eq!(policy.snapshot(), Vec::<&str>::new());
    }

    #[test]
    fn test_eject_least_recent() {
        let policy = policy_with(&["a", "b", "c"]);
        assert_eq!(take_one(&policy), "a");
        assert_eq!(policy.snapshot(), vec!["b", "c"]);
    }

    #[test]
    fn test_upvote_protects_entry() {
        let policy = policy_with(&["a", "b", "c"]);
        policy.upvote(&"a");
        assert_eq!(policy.snapshot(), vec!["b", "c", "a"]);
        assert_eq!(take_one(&policy), "b");
    }

    #[test]
    fn test_downvote_prioritizes_entry() {
        let policy = policy_with(&["a", "b", "c"]);
        policy.downvote(&"c");
        assert_eq!(policy.snapshot(), vec!["c", "a", "b"]);
        assert_eq!(take_one(&policy), "c");
    }

    #[test]
    fn test_votes_on_untracked_are_noops() {
        let policy = policy_with(&["a", "b"]);
        policy.upvote(&"z");
        policy.downvote(&"z");
        assert_eq!(policy.snapshot(), vec!["a", "b"]);
        assert!(!policy.is_tracked(&"z"));
    }

    #[test]
    fn test_upvote_tail_and_downvote_head() {
        let policy = policy_with(&["a", "b"]);
        policy.upvote(&"b");
        policy.downvote(&"a");
        assert_eq!(policy.snapshot(), vec!["a", "b"]);

        let single = policy_with(&["x"]);
        single.upvote(&"x");
        single.downvote(&"x");
        assert_eq!(single.snapshot(), vec!["x"]);
    }

    #[test]
    fn test_skip_preserves_order() {
        let policy = policy_with(&["a", "b", "c"]);
        let taken = policy
            .eject_next_candidate(&mut |k| Ejection::from_flags(*k == "c", true))
            .unwrap();
        assert_eq!(taken, vec!["c"]);
        assert_eq!(policy.snapshot(), vec!["a", "b"]);
    }

    #[test]
    fn test_skip_in_the_middle() {
        let policy = policy_with(&["a", "b", "c", "d"]);
        let taken = policy
            .eject_next_candidate(&mut |k| {
                if *k == "b" {
                    Ejection::Skip
                } else {
                    Ejection::Take
                }
            })
            .unwrap();
        assert_eq!(taken, vec!["a", "c", "d"]);
        assert_eq!(policy.snapshot(), vec!["b"]);
        assert!(policy.is_tracked(&"b"));
    }

    #[test]
    fn test_take_without_stop_drains() {
        let policy = policy_with(&["a", "b", "c"]);
        let taken = policy.eject_next_candidate(&mut |_| Ejection::Take).unwrap();
        assert_eq!(taken, vec!["a", "b", "c"]);
        assert!(policy.is_empty());
    }

    #[test]
    fn test_exhausted_is_explicit() {
        let policy = policy_with(&["a", "b"]);
        let mut visited = Vec::new();
        let result = policy.eject_next_candidate(&mut |k| {
            visited.push(*k);
            Ejection::Skip
        });
        assert!(matches!(result, Err(BlockSpaceError::EvictionExhausted)));
        assert_eq!(visited, vec!["a", "b"]);
        assert_eq!(policy.snapshot(), vec!["a", "b"]);

        let empty: LruEvictionPolicy<u64> = LruEvictionPolicy::new();
        assert!(matches!(
            empty.eject_next_candidate(&mut |_| Ejection::Take),
            Err(BlockSpaceError::EvictionExhausted)
        ));
    }

    #[test]
    fn test_slots_are_recycled() {
        let policy = LruEvictionPolicy::with_capacity(4);
        for round in 0..10u64 {
            policy.add(round).unwrap();
            policy.add(round + 100).unwrap();
            policy.remove(&round).unwrap();
            policy.eject_next_candidate(&mut |_| Ejection::TakeAndStop).unwrap();
        }
        assert!(policy.is_empty());
        assert!(policy.list.lock().slots.len() <= 2);
    }

    #[test]
    fn test_readd_after_eject() {
        let policy = policy_with(&["a", "b"]);
        assert_eq!(take_one(&policy), "a");
        policy.add("a").unwrap();
        assert_eq!(policy.snapshot(), vec!["b", "a"]);
    }

    #[test]
    fn test_clear() {
        let policy = policy_with(&["a", "b"]);
        policy.clear();
        assert!(policy.is_empty());
        policy.add("a").unwrap();
        assert_eq!(policy.snapshot(), vec!["a"]);
    }
}
