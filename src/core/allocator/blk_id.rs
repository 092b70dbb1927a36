//! Packed block identifiers
//!
//! A [`BlockId`] names a run of `num_blocks` blocks starting at `block_num`
//! inside chunk `chunk_num`. It packs into the low 48 bits of a `u64`:
//!
//! ```text
//! bit  0..32  block_num
//! bit 32..40  num_blocks
//! bit 40..48  chunk_num
//! ```

use crate::core::config::{BLKID_SIZE, BLK_NUM_BITS, CHUNK_NUM_BITS, NBLKS_BITS};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Sentinel block number meaning "no block"
pub const INVALID_BLK_NUM: u32 = u32::MAX;

const NBLKS_SHIFT: u32 = BLK_NUM_BITS;
const CHUNK_SHIFT: u32 = BLK_NUM_BITS + NBLKS_BITS;

const BLK_NUM_MASK: u64 = (1 << BLK_NUM_BITS) - 1;
const NBLKS_MASK: u64 = (1 << NBLKS_BITS) - 1;
const CHUNK_MASK: u64 = (1 << CHUNK_NUM_BITS) - 1;

/// Pack the three fields into one integer
///
/// Field widths are a precondition of the caller, not checked here.
#[inline]
pub const fn encode(block_num: u32, num_blocks: u8, chunk_num: u8) -> u64 {
    (block_num as u64 & BLK_NUM_MASK)
        | ((num_blocks as u64 & NBLKS_MASK) << NBLKS_SHIFT)
        | ((chunk_num as u64 & CHUNK_MASK) << CHUNK_SHIFT)
}

/// Unpack an integer produced by [`encode`]
#[inline]
pub const fn decode(packed: u64) -> (u32, u8, u8) {
    (
        (packed & BLK_NUM_MASK) as u32,
        ((packed >> NBLKS_SHIFT) & NBLKS_MASK) as u8,
        ((packed >> CHUNK_SHIFT) & CHUNK_MASK) as u8,
    )
}

/// Identifier of an allocated run of blocks
///
/// Immutable once handed out. Freeing and reallocating the same block number
/// produces a new value; nothing tracks identity beyond the fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    block_num: u32,
    num_blocks: u8,
    chunk_num: u8,
}

impl BlockId {
    pub const fn new(block_num: u32, num_blocks: u8, chunk_num: u8) -> Self {
        BlockId {
            block_num,
            num_blocks,
            chunk_num,
        }
    }

    /// Single-block id, the only shape the fixed allocator hands out
    pub const fn single(block_num: u32, chunk_num: u8) -> Self {
        Self::new(block_num, 1, chunk_num)
    }

    pub const fn block_num(&self) -> u32 {
        self.block_num
    }

    pub const fn num_blocks(&self) -> u8 {
        self.num_blocks
    }

    pub const fn chunk_num(&self) -> u8 {
        self.chunk_num
    }

    pub const fn is_valid(&self) -> bool {
        self.block_num != INVALID_BLK_NUM && self.num_blocks > 0
    }

    pub const fn to_u64(&self) -> u64 {
        encode(self.block_num, self.num_blocks, self.chunk_num)
    }

    pub const fn from_u64(packed: u64) -> Self {
        let (block_num, num_blocks, chunk_num) = decode(packed);
        Self::new(block_num, num_blocks, chunk_num)
    }

    /// Little-endian on-disk form (6 bytes)
    pub fn to_bytes(&self) -> [u8; BLKID_SIZE] {
        let mut out = [0u8; BLKID_SIZE];
        out.copy_from_slice(&self.to_u64().to_le_bytes()[..BLKID_SIZE]);
        out
    }

    pub fn from_bytes(bytes: [u8; BLKID_SIZE]) -> Self {
        let mut wide = [0u8; 8];
        wide[..BLKID_SIZE].copy_from_slice(&bytes);
        Self::from_u64(u64::from_le_bytes(wide))
    }
}

impl From<BlockId> for u64 {
    fn from(id: BlockId) -> u64 {
        id.to_u64()
    }
}

impl From<u64> for BlockId {
    fn from(packed: u64) -> BlockId {
        BlockId::from_u64(packed)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blk={} nblks={} chunk={}",
            self.block_num, self.num_blocks, self.chunk_num
        )
    }
}

// Serialized as the packed integer.
impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.to_u64())
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        u64::deserialize(deserializer).map(BlockId::from_u64)
    }
}
