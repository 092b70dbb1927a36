//! Cache eviction policies
//!
//! The buffer cache tracks every resident buffer in a policy and asks it for
//! reclaim candidates under memory pressure:
//! - [`lru`] - least-recently-used ordering

pub mod lru;

pub use lru::LruEvictionPolicy;

use crate::core::error::Result;

/// Answer of an eligibility predicate for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ejection {
    /// Not evictable right now (pinned, dirty, in use); keep it tracked
    Skip,
    /// Evict it and keep scanning for more
    Take,
    /// Evict it and end the scan
    TakeAndStop,
}

impl Ejection {
    /// Build from the `(accepted, stop)` pair; `stop` only matters when accepted
    pub fn from_flags(accepted: bool, stop: bool) -> Self {
        match (accepted, stop) {
            (false, _) => Ejection::Skip,
            (true, false) => Ejection::Take,
            (true, true) => Ejection::TakeAndStop,
        }
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(self, Ejection::Skip)
    }
}

/// Eviction policy trait
///
/// Keys identify cache entries (typically the block id of the buffer). A key
/// is either tracked (present exactly once in the policy's order) or not.
pub trait EvictionPolicy<K>: Send + Sync {
    /// Start tracking `key` as the most recently used entry
    fn add(&self, key: K) -> Result<()>;

    /// Stop tracking `key`
    fn remove(&self, key: &K) -> Result<()>;

    /// Mark `key` as just accessed; no-op if untracked
    fn upvote(&self, key: &K);

    /// Mark `key` as first in line for eviction; no-op if untracked
    fn downvote(&self, key: &K);

    /// Scan candidates in eviction order and untrack those the predicate takes
    ///
    /// Returns the taken keys in scan order, or `EvictionExhausted` when the
    /// predicate accepted nothing.
    ///
    /// The predicate runs while the policy lock is held. It must be quick, must
    /// not block, and must not call back into the policy.
    fn eject_next_candidate(&self, is_ejectable: &mut dyn FnMut(&K) -> Ejection) -> Result<Vec<K>>;

    fn is_tracked(&self, key: &K) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags() {
        assert_eq!(Ejection::from_flags(false, false), Ejection::Skip);
        assert_eq!(Ejection::from_flags(false, true), Ejection::Skip);
        assert_eq!(Ejection::from_flags(true, false), Ejection::Take);
        assert_eq!(Ejection::from_flags(true, true), Ejection::TakeAndStop);
        assert!(Ejection::TakeAndStop.is_accepted());
        assert!(!Ejection::Skip.is_accepted());
    }
}
