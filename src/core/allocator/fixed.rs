//! Fixed-size block allocator
//!
//! Every request is exactly one block. Free blocks form a singly linked chain
//! threaded through a per-block node array; the chain head lives in a single
//! 64-bit word together with a generation counter:
//!
//! ```text
//! bit  0..32  head block number (INVALID_BLK_NUM when exhausted)
//! bit 32..64  generation, bumped by every successful pop or push
//! ```
//!
//! `alloc` pops and `free` pushes with a compare-and-swap on that word. A CAS
//! built from a stale `(head, generation)` pair fails even when the same block
//! number has since returned to the head, which rules out ABA.
//!
//! # Performance
//! - alloc / free: O(1), lock-free (not wait-free)
//! - init: O(total_blocks), one portion lock at a time

use crate::core::allocator::bitmap::RecoveryBitmap;
use crate::core::allocator::blk_id::{BlockId, INVALID_BLK_NUM};
#[cfg(feature = "fault-injection")]
use crate::core::allocator::fault::FaultInjector;
use crate::core::allocator::{AllocHints, AllocatorBase, AllocatorStats, BlockAllocator};
use crate::core::config::AllocatorConfig;
use crate::core::error::{BlockSpaceError, Result};
use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

const GEN_SHIFT: u32 = 32;
const BLK_MASK: u64 = (1 << GEN_SHIFT) - 1;

/// Decoded head word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TopBlk {
    blk: u32,
    gen: u32,
}

impl TopBlk {
    #[inline]
    fn from_u64(raw: u64) -> Self {
        TopBlk {
            blk: (raw & BLK_MASK) as u32,
            gen: (raw >> GEN_SHIFT) as u32,
        }
    }

    #[inline]
    fn to_u64(self) -> u64 {
        ((self.gen as u64) << GEN_SHIFT) | self.blk as u64
    }

    /// Same word with a new head and the generation bumped
    #[inline]
    fn replace(self, blk: u32) -> Self {
        TopBlk {
            blk,
            gen: self.gen.wrapping_add(1),
        }
    }
}

/// Diagnostic snapshot of the free-list head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadSnapshot {
    /// Head block number, `None` when the chain is exhausted
    pub block_num: Option<u32>,
    pub generation: u32,
}

/// Per-block free-list link
#[derive(Debug)]
struct FreeListNode {
    next_blk: AtomicU32,
    /// Cleared while the block sits on the free chain
    allocated: AtomicBool,
    #[cfg(debug_assertions)]
    this_blk_id: u32,
}

/// Lock-free allocator handing out one block per request
pub struct FixedBlockAllocator {
    base: AllocatorBase,
    nodes: Box<[FreeListNode]>,
    top_blk: CachePadded<AtomicU64>,
    #[cfg(feature = "fault-injection")]
    faults: FaultInjector,
}

impl FixedBlockAllocator {
    /// Create an allocator; call [`BlockAllocator::init`] before use
    pub fn new(config: AllocatorConfig, bitmap: Arc<dyn RecoveryBitmap>) -> Result<Self> {
        let base = AllocatorBase::new(config, bitmap)?;
        let total = base.config().total_blocks;

        let nodes: Box<[FreeListNode]> = (0..total)
            .map(|_i| FreeListNode {
                next_blk: AtomicU32::new(INVALID_BLK_NUM),
                allocated: AtomicBool::new(true),
                #[cfg(debug_assertions)]
                this_blk_id: _i as u32,
            })
            .collect();

        let empty = TopBlk {
            blk: INVALID_BLK_NUM,
            gen: 0,
        };

        Ok(FixedBlockAllocator {
            base,
            nodes,
            top_blk: CachePadded::new(AtomicU64::new(empty.to_u64())),
            #[cfg(feature = "fault-injection")]
            faults: FaultInjector::new(),
        })
    }

    /// Create and immediately recover from the bitmap
    pub fn recover(config: AllocatorConfig, bitmap: Arc<dyn RecoveryBitmap>) -> Result<Self> {
        let allocator = Self::new(config, bitmap)?;
        allocator.init()?;
        Ok(allocator)
    }

    pub fn base(&self) -> &AllocatorBase {
        &self.base
    }

    #[cfg(feature = "fault-injection")]
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Current head and generation
    pub fn head(&self) -> HeadSnapshot {
        let top = TopBlk::from_u64(self.top_blk.load(Ordering::Acquire));
        HeadSnapshot {
            block_num: (top.blk != INVALID_BLK_NUM).then_some(top.blk),
            generation: top.gen,
        }
    }

    /// Walk the free chain from the head
    ///
    /// Only meaningful while no alloc/free is in flight. The walk is bounded by
    /// `total_blocks` so a corrupted chain cannot loop forever.
    pub fn free_chain(&self) -> Vec<u32> {
        let mut chain = Vec::new();
        let mut cur = TopBlk::from_u64(self.top_blk.load(Ordering::Acquire)).blk;
        while cur != INVALID_BLK_NUM && chain.len() < self.nodes.len() {
            chain.push(cur);
            cur = self.nodes[cur as usize].next_blk.load(Ordering::Acquire);
        }
        chain
    }

    fn pop_free(&self) -> Option<u32> {
        let mut prev_val = self.top_blk.load(Ordering::Acquire);
        loop {
            let top = TopBlk::from_u64(prev_val);
            if top.blk == INVALID_BLK_NUM {
                return None;
            }

            // The node may be re-linked concurrently; the CAS below rejects
            // whatever we read if the head moved in between.
            let node = &self.nodes[top.blk as usize];
            let next = node.next_blk.load(Ordering::Acquire);
            let cur_val = top.replace(next).to_u64();

            match self.top_blk.compare_exchange_weak(
                prev_val,
                cur_val,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    #[cfg(debug_assertions)]
                    debug_assert_eq!(node.this_blk_id, top.blk, "free list node mismatch");
                    node.allocated.store(true, Ordering::Release);
                    return Some(top.blk);
                }
                Err(actual) => prev_val = actual,
            }
        }
    }

    fn push_free(&self, id: u32) {
        let node = &self.nodes[id as usize];
        let mut prev_val = self.top_blk.load(Ordering::Acquire);
        loop {
            let top = TopBlk::from_u64(prev_val);
            node.next_blk.store(top.blk, Ordering::Release);
            let cur_val = top.replace(id).to_u64();

            match self.top_blk.compare_exchange_weak(
                prev_val,
                cur_val,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => prev_val = actual,
            }
        }
    }
}

impl BlockAllocator for FixedBlockAllocator {
    fn init(&self) -> Result<()> {
        if self.base.is_initialized() {
            return Err(BlockSpaceError::AlreadyInitialized);
        }

        let mut first_blk = INVALID_BLK_NUM;
        let mut prev_blk = INVALID_BLK_NUM;
        let mut free_count = 0u64;

        // Thread the chain through unset bits in ascending order
        for portion in self.base.portions() {
            let mut guard = portion.lock(self.base.bitmap());
            let mut portion_free = 0u64;

            for blk in portion.range() {
                if guard.is_allocated_on_disk(blk)? {
                    continue;
                }
                let blk = blk as u32;
                self.nodes[blk as usize]
                    .allocated
                    .store(false, Ordering::Relaxed);
                if first_blk == INVALID_BLK_NUM {
                    first_blk = blk;
                }
                if prev_blk != INVALID_BLK_NUM {
                    self.nodes[prev_blk as usize]
                        .next_blk
                        .store(blk, Ordering::Relaxed);
                }
                prev_blk = blk;
                portion_free += 1;
            }

            guard.set_free_blocks(portion_free)?;
            free_count += portion_free;
        }

        if first_blk == INVALID_BLK_NUM {
            return Err(BlockSpaceError::InitializationFailure(format!(
                "no free blocks among {} in chunk {}",
                self.base.config().total_blocks,
                self.base.config().chunk_num
            )));
        }
        self.nodes[prev_blk as usize]
            .next_blk
            .store(INVALID_BLK_NUM, Ordering::Relaxed);

        let total = self.base.config().total_blocks;
        self.base.set_allocated(total - free_count);

        let top = TopBlk {
            blk: first_blk,
            gen: 0,
        };
        self.top_blk.store(top.to_u64(), Ordering::Release);
        self.base.mark_initialized()?;

        info!(
            chunk = self.base.config().chunk_num,
            total_blocks = total,
            free_blocks = free_count,
            portions = self.base.portions().len(),
            "Fixed block allocator recovered"
        );
        Ok(())
    }

    fn alloc(&self, num_blocks: u8, _hints: &AllocHints) -> Result<BlockId> {
        if num_blocks != 1 {
            return Err(BlockSpaceError::InvalidRequest(format!(
                "fixed allocator serves exactly one block per request, got {}",
                num_blocks
            )));
        }

        #[cfg(feature = "fault-injection")]
        if self.faults.take_space_full(num_blocks) {
            return Err(BlockSpaceError::SpaceFull);
        }

        if !self.base.is_initialized() {
            return Err(BlockSpaceError::NotInitialized);
        }

        match self.pop_free() {
            Some(id) => {
                self.base.add_allocated(1);
                Ok(BlockId::single(id, self.base.config().chunk_num))
            }
            None => {
                debug!(chunk = self.base.config().chunk_num, "Fixed allocator is out of blocks");
                Err(BlockSpaceError::SpaceFull)
            }
        }
    }

    fn free(&self, blk: BlockId) -> Result<()> {
        if blk.num_blocks() != 1 {
            return Err(BlockSpaceError::InvalidRequest(format!(
                "multi-block free of {} on the fixed allocator; allocated by a different policy?",
                blk
            )));
        }
        self.base.check_blk(blk)?;

        // Recovery rebuilds the chain from the bitmap, which already reflects this free
        if !self.base.is_initialized() {
            trace!(%blk, "Ignoring free before recovery");
            return Ok(());
        }

        let node = &self.nodes[blk.block_num() as usize];
        if node
            .allocated
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BlockSpaceError::InvalidRequest(format!(
                "double free of {}",
                blk
            )));
        }

        self.push_free(blk.block_num());
        self.base.sub_allocated(1);
        Ok(())
    }

    fn is_allocated(&self, blk: BlockId) -> bool {
        if !self.base.is_initialized() {
            return true;
        }
        self.base.is_allocated_on_disk(blk)
    }

    fn is_initialized(&self) -> bool {
        self.base.is_initialized()
    }

    fn allocated_block_count(&self) -> u64 {
        self.base.allocated_block_count()
    }

    fn total_blocks(&self) -> u64 {
        self.base.config().total_blocks
    }

    fn stats(&self) -> AllocatorStats {
        let allocated = self.allocated_block_count();
        let total = self.total_blocks();
        AllocatorStats {
            policy: "fixed".to_string(),
            total_blocks: total,
            allocated_blocks: allocated,
            free_blocks: total.saturating_sub(allocated),
            initialized: self.is_initialized(),
            chunk_num: self.base.config().chunk_num,
            portions: self.base.portions().len() as u64,
            free_list_head: Some(self.head()),
        }
    }

    fn status(&self) -> String {
        let head = self.head();
        let head_str = match head.block_num {
            Some(blk) => blk.to_string(),
            None => "INVALID".to_string(),
        };
        format!(
            "Total alloc blks = {} top_blk_id={} gen={}",
            self.allocated_block_count(),
            head_str,
            head.generation
        )
    }
}
