//! Allocation portions
//!
//! The block address space is cut into fixed-width stripes. Each stripe owns a
//! mutex; holding it makes bitmap inspection and the stripe's free counter
//! consistent with respect to other users of the same stripe. Portion locks
//! are independent and must never be nested.

use crate::core::allocator::bitmap::RecoveryBitmap;
use crate::core::config::AllocatorConfig;
use crate::core::error::{BlockSpaceError, Result};
use parking_lot::{Mutex, MutexGuard};
use std::ops::Range;

/// Mutable per-portion bookkeeping
#[derive(Debug, Default)]
pub struct PortionState {
    free_blocks: u64,
}

/// One lock stripe covering `[start_block, start_block + num_blocks)`
#[derive(Debug)]
pub struct AllocationPortion {
    index: u64,
    start_block: u64,
    num_blocks: u64,
    state: Mutex<PortionState>,
}

impl AllocationPortion {
    pub fn new(index: u64, start_block: u64, num_blocks: u64) -> Self {
        AllocationPortion {
            index,
            start_block,
            num_blocks,
            state: Mutex::new(PortionState::default()),
        }
    }

    /// Build the portion table for a config; the last portion may be short
    pub fn build_all(config: &AllocatorConfig) -> Vec<AllocationPortion> {
        let per = config.blocks_per_portion as u64;
        (0..config.num_portions())
            .map(|index| {
                let start = index * per;
                let len = per.min(config.total_blocks - start);
                AllocationPortion::new(index, start, len)
            })
            .collect()
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn range(&self) -> Range<u64> {
        self.start_block..self.start_block + self.num_blocks
    }

    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    pub fn contains(&self, block_num: u64) -> bool {
        self.range().contains(&block_num)
    }

    /// Take the portion lock for the lifetime of the returned guard
    pub fn lock<'a>(&'a self, bitmap: &'a dyn RecoveryBitmap) -> PortionGuard<'a> {
        PortionGuard {
            portion: self,
            state: self.state.lock(),
            bitmap,
        }
    }

    /// Free counter snapshot (takes the lock briefly)
    pub fn free_blocks(&self) -> u64 {
        self.state.lock().free_blocks
    }
}

/// Scoped access to one portion's bitmap slice and counters
pub struct PortionGuard<'a> {
    portion: &'a AllocationPortion,
    state: MutexGuard<'a, PortionState>,
    bitmap: &'a dyn RecoveryBitmap,
}

impl<'a> PortionGuard<'a> {
    pub fn portion(&self) -> &AllocationPortion {
        self.portion
    }

    /// Whether the recovery bitmap records `block_num` as in use
    ///
    /// Only blocks inside this portion may be queried.
    pub fn is_allocated_on_disk(&self, block_num: u64) -> Result<bool> {
        if !self.portion.contains(block_num) {
            return Err(BlockSpaceError::InvalidBlockId(block_num));
        }
        Ok(self.bitmap.is_bit_set(block_num))
    }

    /// Count in-use blocks of this portion according to the bitmap
    pub fn count_allocated_on_disk(&self) -> u64 {
        self.portion
            .range()
            .filter(|&b| self.bitmap.is_bit_set(b))
            .count() as u64
    }

    pub fn free_blocks(&self) -> u64 {
        self.state.free_blocks
    }

    pub fn set_free_blocks(&mut self, free_blocks: u64) -> Result<()> {
        if free_blocks > self.portion.num_blocks {
            return Err(BlockSpaceError::InvalidRequest(format!(
                "portion {} holds {} blocks, cannot have {} free",
                self.portion.index, self.portion.num_blocks, free_blocks
            )));
        }
        self.state.free_blocks = free_blocks;
        Ok(())
    }

    pub fn add_free(&mut self, count: u64) -> Result<()> {
        let next = self.state.free_blocks.saturating_add(count);
        self.set_free_blocks(next)
    }

    pub fn sub_free(&mut self, count: u64) -> Result<()> {
        let next = self.state.free_blocks.checked_sub(count).ok_or_else(|| {
            BlockSpaceError::InvalidRequest(format!(
                "portion {} has only {} free blocks, cannot take {}",
                self.portion.index, self.state.free_blocks, count
            ))
        })?;
        self.state.free_blocks = next;
        Ok(())
    }
}
