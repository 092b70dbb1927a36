//! # Blockspace - Block-Space Management Core
//!
//! `blockspace` hands out fixed-size blocks of a storage device and decides
//! which cached block buffers to reclaim under memory pressure:
//!
//! - **Compact block ids** packed into 48 bits (block number, count, chunk)
//! - **Lock-free fixed-size allocator** with ABA-safe free-list head
//! - **Crash recovery** from a persisted allocation bitmap
//! - **LRU eviction** with caller-controlled candidate acceptance
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blockspace::{AllocHints, AllocatorConfig, BlockAllocator, DiskBitmap, FixedBlockAllocator, Result};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! // Blocks 2 and 5 were in use before the restart
//! let bitmap = Arc::new(DiskBitmap::with_set_bits(10, &[2, 5])?);
//! let allocator = FixedBlockAllocator::recover(AllocatorConfig::new(10), bitmap)?;
//!
//! let blk = allocator.alloc(1, &AllocHints::default())?;
//! assert_eq!(blk.block_num(), 0);
//!
//! allocator.free(blk)?;
//! println!("{}", allocator.status());
//! # Ok(())
//! # }
//! ```
//!
//! ## Eviction
//!
//! ```rust,no_run
//! use blockspace::{Ejection, EvictionPolicy, LruEvictionPolicy, Result};
//!
//! # fn main() -> Result<()> {
//! let lru = LruEvictionPolicy::new();
//! lru.add(1u64)?;
//! lru.add(2u64)?;
//! lru.upvote(&1);
//!
//! let victims = lru.eject_next_candidate(&mut |_| Ejection::TakeAndStop)?;
//! assert_eq!(victims, vec![2]);
//! # Ok(())
//! # }
//! ```

pub mod core;

#[allow(unused_imports)]
pub(crate) use core::{allocator, buffer_pool, config, error, eviction};

pub use crate::core::{
    allocator::{
        AllocHints, AllocationPortion, AllocatorBase, AllocatorStats, BlockAllocator, BlockId,
        DiskBitmap, FixedBlockAllocator, HeadSnapshot, RecoveryBitmap, INVALID_BLK_NUM,
    },
    buffer_pool::{BufferPool, BufferPoolStats},
    config::{AllocatorConfig, BlockSpaceConfig, CacheConfig},
    error::{BlockSpaceError, Result},
    eviction::{Ejection, EvictionPolicy, LruEvictionPolicy},
};

#[cfg(feature = "fault-injection")]
pub use crate::core::allocator::fault::FaultInjector;
