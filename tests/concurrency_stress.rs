//! Concurrent allocate/free and eviction stress tests

use blockspace::{
    AllocHints, AllocatorConfig, BlockAllocator, BlockId, BlockSpaceError, BufferPool, DiskBitmap,
    Ejection, EvictionPolicy, FixedBlockAllocator, LruEvictionPolicy,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn fresh_allocator(total: u64) -> Arc<FixedBlockAllocator> {
    let bitmap = Arc::new(DiskBitmap::new(total));
    Arc::new(
        FixedBlockAllocator::recover(
            AllocatorConfig::new(total).with_blocks_per_portion(64),
            bitmap,
        )
        .unwrap(),
    )
}

#[test]
fn test_8_threads_alloc_free_churn() {
    let allocator = fresh_allocator(256);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let allocator = allocator.clone();
            std::thread::spawn(move || {
                let hints = AllocHints::default();
                let mut held: Vec<BlockId> = Vec::new();
                for _ in 0..5_000 {
                    if rand::random::<bool>() || held.is_empty() {
                        if let Ok(blk) = allocator.alloc(1, &hints) {
                            held.push(blk);
                        }
                    } else {
                        let idx = rand::random::<usize>() % held.len();
                        allocator.free(held.swap_remove(idx)).unwrap();
                    }
                }
                held
            })
        })
        .collect();

    let mut live = HashSet::new();
    for h in handles {
        for blk in h.join().unwrap() {
            assert!(live.insert(blk), "{} held by two threads", blk);
        }
    }

    // Conservation once every thread has quiesced
    assert_eq!(allocator.allocated_block_count(), live.len() as u64);
    assert_eq!(allocator.free_chain().len() as u64, 256 - live.len() as u64);

    let chain: HashSet<u32> = allocator.free_chain().into_iter().collect();
    for blk in &live {
        assert!(!chain.contains(&blk.block_num()));
    }
}

#[test]
fn test_concurrent_exhaustion_hands_out_each_block_once() {
    let total = 1_000u64;
    let allocator = fresh_allocator(total);
    let collected = Arc::new(Mutex::new(Vec::new()));
    let space_full = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let allocator = allocator.clone();
            let collected = collected.clone();
            let space_full = space_full.clone();
            std::thread::spawn(move || {
                let hints = AllocHints::default();
                let mut mine = Vec::new();
                loop {
                    match allocator.alloc(1, &hints) {
                        Ok(blk) => mine.push(blk.block_num()),
                        Err(BlockSpaceError::SpaceFull) => {
                            space_full.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                collected.lock().extend(mine);
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let mut all = collected.lock().clone();
    all.sort_unstable();
    let expected: Vec<u32> = (0..total as u32).collect();
    assert_eq!(all, expected);
    assert_eq!(space_full.load(Ordering::Relaxed), 8);
    assert_eq!(allocator.allocated_block_count(), total);
    assert!(allocator.head().block_num.is_none());
}

#[test]
fn test_lru_concurrent_add_and_upvote() {
    let lru = Arc::new(LruEvictionPolicy::new());

    let handles: Vec<_> = (0..4u64)
        .map(|thread_id| {
            let lru = lru.clone();
            std::thread::spawn(move || {
                for i in 0..500u64 {
                    let key = thread_id * 1_000 + i;
                    lru.add(key).unwrap();
                    lru.upvote(&(thread_id * 1_000 + i / 2));
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(lru.len(), 2_000);
    let order = lru.snapshot();
    let unique: HashSet<u64> = order.iter().copied().collect();
    assert_eq!(unique.len(), 2_000);

    let mut drained = 0;
    while let Ok(taken) = lru.eject_next_candidate(&mut |_| Ejection::Take) {
        drained += taken.len();
    }
    assert_eq!(drained, 2_000);
    assert!(lru.is_empty());
}

#[test]
fn test_buffer_pool_readers_and_writers() {
    let pool = Arc::new(BufferPool::new(64).unwrap());

    let handles: Vec<_> = (0..6u32)
        .map(|thread_id| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                for i in 0..2_000u32 {
                    let blk = BlockId::single((thread_id * 10_000) + (i % 128), 0);
                    if i % 3 == 0 {
                        pool.put(blk, Arc::from(vec![thread_id as u8; 16])).unwrap();
                    } else if let Some(buf) = pool.get(blk) {
                        assert_eq!(buf[0], thread_id as u8);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let stats = pool.stats();
    assert!(stats.resident <= 64);
    assert_eq!(stats.pinned, 0);
    assert_eq!(pool.eviction_order().len(), stats.resident);
}

#[test]
fn test_racing_double_free_accepts_exactly_one() {
    let allocator = fresh_allocator(16);

    for _ in 0..200 {
        let blk = allocator.alloc(1, &AllocHints::default()).unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let allocator = allocator.clone();
                let accepted = accepted.clone();
                std::thread::spawn(move || match allocator.free(blk) {
                    Ok(()) => {
                        accepted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(BlockSpaceError::InvalidRequest(_)) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(accepted.load(Ordering::Relaxed), 1);
    }

    let chain = allocator.free_chain();
    let unique: HashSet<u32> = chain.iter().copied().collect();
    assert_eq!(chain.len(), 16);
    assert_eq!(unique.len(), 16);
    assert_eq!(allocator.allocated_block_count(), 0);
}
