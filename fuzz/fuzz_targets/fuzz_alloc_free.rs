#![no_main]
use arbitrary::Arbitrary;
use blockspace::{AllocHints, AllocatorConfig, BlockAllocator, BlockId, DiskBitmap, FixedBlockAllocator};
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Arbitrary, Debug)]
enum Op {
    Alloc,
    FreeNth(u16),
    FreeRaw(u64),
}

#[derive(Arbitrary, Debug)]
struct Input {
    total: u16,
    per_portion: u8,
    used: Vec<u16>,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let total = (input.total as u64 % 512) + 1;
    let per_portion = (input.per_portion as u32).max(1);
    let used: Vec<u64> = input
        .used
        .iter()
        .map(|b| *b as u64 % total)
        .collect();

    let bitmap = match DiskBitmap::with_set_bits(total, &used) {
        Ok(b) => Arc::new(b),
        Err(_) => return,
    };
    let config = AllocatorConfig::new(total).with_blocks_per_portion(per_portion);
    let allocator = match FixedBlockAllocator::recover(config, bitmap) {
        Ok(a) => a,
        Err(_) => return,
    };

    let recovered: HashSet<u64> = used.into_iter().collect();
    let hints = AllocHints::default();
    let mut live: Vec<BlockId> = Vec::new();

    for op in input.ops {
        match op {
            Op::Alloc => {
                if let Ok(blk) = allocator.alloc(1, &hints) {
                    assert!(!recovered.contains(&(blk.block_num() as u64)));
                    assert!(!live.contains(&blk));
                    live.push(blk);
                }
            }
            Op::FreeNth(n) => {
                if !live.is_empty() {
                    let blk = live.swap_remove(n as usize % live.len());
                    allocator.free(blk).unwrap();
                }
            }
            // Arbitrary ids must be rejected or accepted, never panic
            Op::FreeRaw(raw) => {
                let blk = BlockId::from_u64(raw);
                if blk.num_blocks() != 1 || blk.block_num() as u64 >= total {
                    assert!(allocator.free(blk).is_err());
                }
            }
        }
        assert_eq!(
            allocator.allocated_block_count(),
            (recovered.len() + live.len()) as u64
        );
    }
});
