//! Block allocation for a single chunk of a device
//!
//! Every policy implements [`BlockAllocator`] on top of [`AllocatorBase`],
//! which owns the geometry, the recovery bitmap handle, the portion table and
//! the running statistics:
//! - [`fixed`] - lock-free free list, exactly one block per request
//!
//! Live allocation state is built once from the [`RecoveryBitmap`] by
//! [`BlockAllocator::init`]. After that, allocation never touches the bitmap;
//! persisting allocation changes belongs to the journal layer.

pub mod bitmap;
pub mod blk_id;
#[cfg(feature = "fault-injection")]
pub mod fault;
pub mod fixed;
pub mod portion;

pub use bitmap::{DiskBitmap, RecoveryBitmap};
pub use blk_id::{BlockId, INVALID_BLK_NUM};
pub use fixed::{FixedBlockAllocator, HeadSnapshot};
pub use portion::{AllocationPortion, PortionGuard};

use crate::core::config::AllocatorConfig;
use crate::core::error::{BlockSpaceError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Best-effort placement preferences
///
/// Policies are free to ignore them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocHints {
    /// Temperature class of the data (hot data prefers faster placement)
    pub desired_temperature: u32,

    /// Preferred device, if any
    pub dev_id_hint: Option<u32>,
}

/// Block allocator trait
///
/// Defines the capability set every allocation policy exposes. `init` must
/// complete on a single thread before any `alloc`/`free` call.
pub trait BlockAllocator: Send + Sync {
    /// Build live allocation state from the recovery bitmap
    fn init(&self) -> Result<()>;

    /// Allocate `num_blocks` blocks
    fn alloc(&self, num_blocks: u8, hints: &AllocHints) -> Result<BlockId>;

    /// Allocate and append the resulting id to `out`
    fn alloc_into(&self, num_blocks: u8, hints: &AllocHints, out: &mut Vec<BlockId>) -> Result<()> {
        let blk = self.alloc(num_blocks, hints)?;
        out.push(blk);
        Ok(())
    }

    /// Return previously allocated blocks
    fn free(&self, blk: BlockId) -> Result<()>;

    /// Whether `blk` is in use
    ///
    /// Before recovery completes every id is reported allocated.
    fn is_allocated(&self, blk: BlockId) -> bool;

    fn is_initialized(&self) -> bool;

    /// Number of blocks currently handed out (recovered in-use blocks included)
    fn allocated_block_count(&self) -> u64;

    /// Get total number of blocks managed
    fn total_blocks(&self) -> u64;

    fn stats(&self) -> AllocatorStats;

    /// Human-readable one-line status for operational tooling
    fn status(&self) -> String;
}

/// Point-in-time allocator statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    pub policy: String,
    pub total_blocks: u64,
    pub allocated_blocks: u64,
    pub free_blocks: u64,
    pub initialized: bool,
    pub chunk_num: u8,
    pub portions: u64,
    pub free_list_head: Option<HeadSnapshot>,
}

impl AllocatorStats {
    /// Percentage of blocks in use
    pub fn utilization(&self) -> f64 {
        if self.total_blocks == 0 {
            0.0
        } else {
            (self.allocated_blocks as f64 / self.total_blocks as f64) * 100.0
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// State shared by every allocation policy
pub struct AllocatorBase {
    config: AllocatorConfig,
    bitmap: Arc<dyn RecoveryBitmap>,
    portions: Vec<AllocationPortion>,
    alloc_blk_cnt: AtomicU64,
    inited: AtomicBool,
}

impl AllocatorBase {
    /// Validate the config against the bitmap and build the portion table
    pub fn new(config: AllocatorConfig, bitmap: Arc<dyn RecoveryBitmap>) -> Result<Self> {
        config.check()?;

        if bitmap.total_bits() < config.total_blocks {
            return Err(BlockSpaceError::InitializationFailure(format!(
                "recovery bitmap covers {} blocks, allocator needs {}",
                bitmap.total_bits(),
                config.total_blocks
            )));
        }

        let portions = AllocationPortion::build_all(&config);
        Ok(AllocatorBase {
            config,
            bitmap,
            portions,
            alloc_blk_cnt: AtomicU64::new(0),
            inited: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn bitmap(&self) -> &dyn RecoveryBitmap {
        self.bitmap.as_ref()
    }

    pub fn portions(&self) -> &[AllocationPortion] {
        &self.portions
    }

    /// Portion that owns `block_num`
    pub fn blknum_to_portion(&self, block_num: u64) -> Result<&AllocationPortion> {
        self.portions
            .get(self.config.portion_of(block_num) as usize)
            .filter(|p| p.contains(block_num))
            .ok_or(BlockSpaceError::InvalidBlockId(block_num))
    }

    /// Lock one portion for bitmap inspection
    pub fn with_portion_lock(&self, portion_index: u64) -> Result<PortionGuard<'_>> {
        let portion = self
            .portions
            .get(portion_index as usize)
            .ok_or_else(|| {
                BlockSpaceError::InvalidRequest(format!("no portion {}", portion_index))
            })?;
        Ok(portion.lock(self.bitmap.as_ref()))
    }

    pub fn is_initialized(&self) -> bool {
        self.inited.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) -> Result<()> {
        if self.inited.swap(true, Ordering::AcqRel) {
            return Err(BlockSpaceError::AlreadyInitialized);
        }
        Ok(())
    }

    pub fn allocated_block_count(&self) -> u64 {
        self.alloc_blk_cnt.load(Ordering::Relaxed)
    }

    pub(crate) fn set_allocated(&self, count: u64) {
        self.alloc_blk_cnt.store(count, Ordering::Relaxed);
    }

    pub(crate) fn add_allocated(&self, count: u64) {
        self.alloc_blk_cnt.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn sub_allocated(&self, count: u64) {
        let _ = self
            .alloc_blk_cnt
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(count))
            });
    }

    /// Reject ids that do not belong to this allocator
    pub fn check_blk(&self, blk: BlockId) -> Result<()> {
        if blk.chunk_num() != self.config.chunk_num {
            return Err(BlockSpaceError::InvalidBlockId(blk.to_u64()));
        }
        let end = blk.block_num() as u64 + blk.num_blocks() as u64;
        if !blk.is_valid() || end > self.config.total_blocks {
            return Err(BlockSpaceError::InvalidBlockId(blk.to_u64()));
        }
        Ok(())
    }

    /// Whether the bitmap of record marks every block of `blk` in use
    pub fn is_allocated_on_disk(&self, blk: BlockId) -> bool {
        self.bitmap
            .is_bits_set(blk.block_num() as u64, blk.num_blocks() as u64)
    }
}
