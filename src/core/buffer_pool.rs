//! Block buffer pool
//!
//! Holds block-sized buffers in memory keyed by [`BlockId`] and reclaims them
//! through an [`LruEvictionPolicy`]. Pinned buffers are never evicted; when
//! every resident buffer is pinned the pool reports `SpaceFull`.
//!
//! Lock order is buffers map, then policy. The eviction predicate only reads
//! the already-locked map.

use crate::core::allocator::BlockId;
use crate::core::config::CacheConfig;
use crate::core::error::{BlockSpaceError, Result};
use crate::core::eviction::{Ejection, EvictionPolicy, LruEvictionPolicy};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Buffer pool statistics
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Buffers reclaimed under pressure
    pub evictions: u64,
    /// Buffers currently resident
    pub resident: usize,
    /// Resident buffers with a non-zero pin count
    pub pinned: usize,
    /// Total capacity
    pub capacity: usize,
}

impl BufferPoolStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug)]
struct CachedBuffer {
    data: Arc<[u8]>,
    pins: u32,
}

/// Fixed-capacity cache of block buffers
pub struct BufferPool {
    capacity: usize,
    buffers: Mutex<AHashMap<BlockId, CachedBuffer>>,
    policy: LruEvictionPolicy<BlockId>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BufferPool {
    /// Create a pool holding at most `capacity` buffers
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BlockSpaceError::Config(
                "buffer pool capacity must be at least 1".to_string(),
            ));
        }
        Ok(BufferPool {
            capacity,
            buffers: Mutex::new(AHashMap::with_capacity(capacity)),
            policy: LruEvictionPolicy::with_capacity(capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(config.capacity)
    }

    /// Get a buffer, marking it recently used
    pub fn get(&self, blk: BlockId) -> Option<Arc<[u8]>> {
        let buffers = self.buffers.lock();
        match buffers.get(&blk) {
            Some(buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.policy.upvote(&blk);
                Some(Arc::clone(&buf.data))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a buffer
    ///
    /// Returns the ids evicted to make room (at most one).
    pub fn put(&self, blk: BlockId, data: Arc<[u8]>) -> Result<Vec<BlockId>> {
        let mut buffers = self.buffers.lock();

        if let Some(existing) = buffers.get_mut(&blk) {
            existing.data = data;
            self.policy.upvote(&blk);
            return Ok(Vec::new());
        }

        let mut evicted = Vec::new();
        if buffers.len() >= self.capacity {
            evicted = self.reclaim_locked(&mut buffers)?;
        }

        buffers.insert(blk, CachedBuffer { data, pins: 0 });
        self.policy.add(blk)?;
        Ok(evicted)
    }

    /// Evict one unpinned buffer now
    pub fn evict_one(&self) -> Result<BlockId> {
        let mut buffers = self.buffers.lock();
        let evicted = self.reclaim_locked(&mut buffers)?;
        evicted.into_iter().next().ok_or(BlockSpaceError::SpaceFull)
    }

    fn reclaim_locked(&self, buffers: &mut AHashMap<BlockId, CachedBuffer>) -> Result<Vec<BlockId>> {
        let map = &*buffers;
        let taken = self.policy.eject_next_candidate(&mut |blk| {
            let pinned = map.get(blk).map(|b| b.pins > 0).unwrap_or(false);
            if pinned {
                Ejection::Skip
            } else {
                Ejection::TakeAndStop
            }
        });

        let taken = match taken {
            Ok(keys) => keys,
            Err(BlockSpaceError::EvictionExhausted) => {
                trace!(resident = buffers.len(), "Every resident buffer is pinned");
                return Err(BlockSpaceError::SpaceFull);
            }
            Err(e) => return Err(e),
        };

        for blk in &taken {
            buffers.remove(blk);
        }
        self.evictions.fetch_add(taken.len() as u64, Ordering::Relaxed);
        Ok(taken)
    }

    /// Pin a resident buffer so it cannot be evicted
    pub fn pin(&self, blk: BlockId) -> Result<Arc<[u8]>> {
        let mut buffers = self.buffers.lock();
        let buf = buffers.get_mut(&blk).ok_or(BlockSpaceError::NotTracked)?;
        buf.pins += 1;
        self.policy.upvote(&blk);
        Ok(Arc::clone(&buf.data))
    }

    pub fn unpin(&self, blk: BlockId) -> Result<()> {
        let mut buffers = self.buffers.lock();
        let buf = buffers.get_mut(&blk).ok_or(BlockSpaceError::NotTracked)?;
        if buf.pins == 0 {
            return Err(BlockSpaceError::InvalidRequest(format!("{} is not pinned", blk)));
        }
        buf.pins -= 1;
        Ok(())
    }

    /// Put a buffer first in line for eviction
    pub fn demote(&self, blk: BlockId) {
        let _buffers = self.buffers.lock();
        self.policy.downvote(&blk);
    }

    /// Drop a buffer immediately (e.g. after its block was freed)
    pub fn discard(&self, blk: BlockId) -> Result<bool> {
        let mut buffers = self.buffers.lock();
        let pinned = match buffers.get(&blk) {
            None => return Ok(false),
            Some(buf) => buf.pins > 0,
        };
        if pinned {
            return Err(BlockSpaceError::InvalidRequest(format!("{} is pinned", blk)));
        }
        buffers.remove(&blk);
        self.policy.remove(&blk)?;
        Ok(true)
    }

    /// Resident ids from next-to-evict to most recently used
    pub fn eviction_order(&self) -> Vec<BlockId> {
        let _buffers = self.buffers.lock();
        self.policy.snapshot()
    }

    pub fn stats(&self) -> BufferPoolStats {
        let buffers = self.buffers.lock();
        BufferPoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident: buffers.len(),
            pinned: buffers.values().filter(|b| b.pins > 0).count(),
            capacity: self.capacity,
        }
    }

    /// Drop every buffer and reset statistics
    pub fn clear(&self) {
        let mut buffers = self.buffers.lock();
        buffers.clear();
        self.policy.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get current cache size
    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }
}
