//! Geometry constants and configuration for the block-space core
//!
//! The bit budget of a packed [`BlockId`](crate::core::allocator::BlockId) and the
//! portion stripe width are fixed per deployment. Everything else comes from
//! [`BlockSpaceConfig`], usually loaded from a TOML file supplied by the device
//! manager that owns chunk geometry.

use crate::core::error::{BlockSpaceError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Bits used for the device-relative block number
pub const BLK_NUM_BITS: u32 = 32;

/// Bits used for the block count of an allocation
pub const NBLKS_BITS: u32 = 8;

/// Bits used for the owning chunk number
pub const CHUNK_NUM_BITS: u32 = 8;

/// Total bits of a packed block id
pub const BLKID_SIZE_BITS: u32 = BLK_NUM_BITS + NBLKS_BITS + CHUNK_NUM_BITS;

/// Bytes needed to store a packed block id on disk
pub const BLKID_SIZE: usize = ((BLKID_SIZE_BITS / 8) + if BLKID_SIZE_BITS % 8 != 0 { 1 } else { 0 }) as usize;

/// Largest block count a single id can describe
pub const MAX_NBLKS: u64 = (1 << NBLKS_BITS) - 1;

/// Largest usable chunk number (the all-ones value marks an invalid chunk)
pub const MAX_CHUNK_ID: u64 = (1 << CHUNK_NUM_BITS) - 2;

/// Largest usable block number (the all-ones value is the INVALID sentinel)
pub const MAX_BLK_NUM: u64 = (1 << BLK_NUM_BITS) - 2;

/// Blocks per allocation portion
pub const BLKS_PER_PORTION: u32 = 1024;

fn default_blocks_per_portion() -> u32 {
    BLKS_PER_PORTION
}

/// Geometry of one allocator instance (one chunk of a device)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct AllocatorConfig {
    /// Number of blocks managed by the allocator
    #[validate(range(min = 1u64, max = 4294967294u64))]
    pub total_blocks: u64,

    /// Width of one lock stripe of the address space
    #[serde(default = "default_blocks_per_portion")]
    #[validate(range(min = 1))]
    pub blocks_per_portion: u32,

    /// Chunk stamped into every id handed out by this allocator
    #[serde(default)]
    #[validate(range(max = 254))]
    pub chunk_num: u8,
}

impl AllocatorConfig {
    /// Create a config with the default portion width
    pub fn new(total_blocks: u64) -> Self {
        AllocatorConfig {
            total_blocks,
            blocks_per_portion: BLKS_PER_PORTION,
            chunk_num: 0,
        }
    }

    pub fn with_blocks_per_portion(mut self, blocks_per_portion: u32) -> Self {
        self.blocks_per_portion = blocks_per_portion;
        self
    }

    pub fn with_chunk_num(mut self, chunk_num: u8) -> Self {
        self.chunk_num = chunk_num;
        self
    }

    /// Number of portions needed to cover `total_blocks`
    pub fn num_portions(&self) -> u64 {
        let per = self.blocks_per_portion as u64;
        (self.total_blocks + per - 1) / per
    }

    /// Index of the portion that owns `block_num`
    pub fn portion_of(&self, block_num: u64) -> u64 {
        block_num / self.blocks_per_portion as u64
    }

    /// Validate field ranges
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| BlockSpaceError::Config(e.to_string()))
    }
}

/// Buffer cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CacheConfig {
    /// Maximum number of block buffers held in memory
    #[validate(range(min = 1))]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { capacity: 1024 }
    }
}

/// Top-level configuration file layout
///
/// ```toml
/// [allocator]
/// total_blocks = 65536
/// blocks_per_portion = 1024
/// chunk_num = 3
///
/// [cache]
/// capacity = 4096
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpaceConfig {
    pub allocator: AllocatorConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl BlockSpaceConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: BlockSpaceConfig = toml::from_str(input)?;
        config.check()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    pub fn check(&self) -> Result<()> {
        self.allocator.check()?;
        self.cache
            .validate()
            .map_err(|e| BlockSpaceError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_constants() {
        assert_eq!(BLKID_SIZE_BITS, 48);
        assert_eq!(BLKID_SIZE, 6);
        assert_eq!(MAX_NBLKS, 255);
        assert_eq!(MAX_CHUNK_ID, 254);
        assert_eq!(MAX_BLK_NUM, u32::MAX as u64 - 1);
    }

    #[test]
    fn test_num_portions_rounds_up() {
        let cfg = AllocatorConfig::new(2500);
        assert_eq!(cfg.num_portions(), 3);
        assert_eq!(cfg.portion_of(0), 0);
        assert_eq!(cfg.portion_of(1024), 1);
        assert_eq!(cfg.portion_of(2499), 2);

        let exact = AllocatorConfig::new(10).with_blocks_per_portion(5);
        assert_eq!(exact.num_portions(), 2);
    }

    #[test]
    fn test_validation() {
        assert!(AllocatorConfig::new(100).check().is_ok());
        assert!(AllocatorConfig::new(0).check().is_err());
        assert!(AllocatorConfig::new(u32::MAX as u64).check().is_err());
        assert!(AllocatorConfig::new(100)
            .with_blocks_per_portion(0)
            .check()
            .is_err());
        assert!(AllocatorConfig::new(100).with_chunk_num(255).check().is_err());
    }

    #[test]
    fn test_from_toml() {
        let cfg = BlockSpaceConfig::from_toml_str(
            r#"
            [allocator]
            total_blocks = 4096
            chunk_num = 2

            [cache]
            capacity = 64
            "#,
        )
        .unwrap();

        assert_eq!(cfg.allocator.total_blocks, 4096);
        assert_eq!(cfg.allocator.blocks_per_portion, BLKS_PER_PORTION);
        assert_eq!(cfg.allocator.chunk_num, 2);
        assert_eq!(cfg.cache.capacity, 64);
    }

    #[test]
    fn test_from_toml_default_cache() {
        let cfg = BlockSpaceConfig::from_toml_str("[allocator]\ntotal_blocks = 10\n").unwrap();
        assert_eq!(cfg.cache, CacheConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        let result = BlockSpaceConfig::from_toml_str("[allocator]\ntotal_blocks = 0\n");
        assert!(matches!(result, Err(BlockSpaceError::Config(_))));

        let result = BlockSpaceConfig::from_toml_str("[allocator]\ntotal_blocks = \"many\"\n");
        assert!(matches!(result, Err(BlockSpaceError::TomlParse(_))));
    }
}
