//! LRU eviction ordering tests

use blockspace::{BlockSpaceError, Ejection, EvictionPolicy, LruEvictionPolicy};

fn lru_of(keys: &[u32]) -> LruEvictionPolicy<u32> {
    let lru = LruEvictionPolicy::new();
    for k in keys {
        lru.add(*k).unwrap();
    }
    lru
}

#[test]
fn test_upvote_moves_to_most_recent() {
    let lru = lru_of(&[1, 2, 3]);
    lru.upvote(&1);

    let taken = lru
        .eject_next_candidate(&mut |_| Ejection::TakeAndStop)
        .unwrap();
    assert_eq!(taken, vec![2]);
    assert_eq!(lru.snapshot(), vec![3, 1]);
}

#[test]
fn test_downvote_moves_to_next_victim() {
    let lru = lru_of(&[1, 2, 3]);
    lru.downvote(&3);
    assert_eq!(lru.snapshot(), vec![3, 1, 2]);

    // Untracked keys are ignored
    lru.downvote(&42);
    lru.upvote(&42);
    assert_eq!(lru.len(), 3);
}

#[test]
fn test_skipped_entries_keep_their_order() {
    let lru = lru_of(&[10, 20, 30, 40]);

    let mut visited = Vec::new();
    let taken = lru
        .eject_next_candidate(&mut |k| {
            visited.push(*k);
            Ejection::from_flags(*k == 30, true)
        })
        .unwrap();

    assert_eq!(visited, vec![10, 20, 30]);
    assert_eq!(taken, vec![30]);
    assert_eq!(lru.snapshot(), vec![10, 20, 40]);
}

#[test]
fn test_take_without_stop_collects_many() {
    let lru = lru_of(&[1, 2, 3, 4, 5]);
    let taken = lru
        .eject_next_candidate(&mut |k| Ejection::from_flags(k % 2 == 1, false))
        .unwrap();
    assert_eq!(taken, vec![1, 3, 5]);
    assert_eq!(lru.snapshot(), vec![2, 4]);
}

#[test]
fn test_nothing_accepted_is_exhausted() {
    let lru = lru_of(&[1, 2]);
    let mut calls = 0;
    let result = lru.eject_next_candidate(&mut |_| {
        calls += 1;
        Ejection::Skip
    });

    assert!(matches!(result, Err(BlockSpaceError::EvictionExhausted)));
    assert_eq!(calls, 2);
    assert_eq!(lru.snapshot(), vec![1, 2]);

    let empty: LruEvictionPolicy<u32> = LruEvictionPolicy::new();
    assert!(matches!(
        empty.eject_next_candidate(&mut |_| Ejection::Take),
        Err(BlockSpaceError::EvictionExhausted)
    ));
}

#[test]
fn test_add_remove_tracking_errors() {
    let lru = lru_of(&[7]);
    assert!(matches!(lru.add(7), Err(BlockSpaceError::AlreadyTracked)));
    assert!(lru.is_tracked(&7));

    lru.remove(&7).unwrap();
    assert!(!lru.is_tracked(&7));
    assert!(matches!(lru.remove(&7), Err(BlockSpaceError::NotTracked)));

    // A removed key can be tracked again, as the most recent entry
    lru.add(8).unwrap();
    lru.add(7).unwrap();
    assert_eq!(lru.snapshot(), vec![8, 7]);
}
