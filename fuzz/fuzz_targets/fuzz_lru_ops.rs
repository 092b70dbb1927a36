#![no_main]
use arbitrary::Arbitrary;
use blockspace::{Ejection, EvictionPolicy, LruEvictionPolicy};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Op {
    Add(u8),
    Remove(u8),
    Upvote(u8),
    Downvote(u8),
    Eject { accept_mask: u8, stop: bool },
}

fuzz_target!(|ops: Vec<Op>| {
    let lru = LruEvictionPolicy::new();
    // Reference model: front is the next victim
    let mut model: Vec<u8> = Vec::new();

    for op in ops {
        match op {
            Op::Add(k) => {
                let res = lru.add(k);
                assert_eq!(res.is_ok(), !model.contains(&k));
                if res.is_ok() {
                    model.push(k);
                }
            }
            Op::Remove(k) => {
                let res = lru.remove(&k);
                assert_eq!(res.is_ok(), model.contains(&k));
                model.retain(|m| *m != k);
            }
            Op::Upvote(k) => {
                lru.upvote(&k);
                if let Some(pos) = model.iter().position(|m| *m == k) {
                    model.remove(pos);
                    model.push(k);
                }
            }
            Op::Downvote(k) => {
                lru.downvote(&k);
                if let Some(pos) = model.iter().position(|m| *m == k) {
                    model.remove(pos);
                    model.insert(0, k);
                }
            }
            Op::Eject { accept_mask, stop } => {
                let accepts = |k: &u8| (accept_mask >> (k % 8)) & 1 == 1;
                let mut expected = Vec::new();
                for k in &model {
                    if accepts(k) {
                        expected.push(*k);
                        if stop {
                            break;
                        }
                    }
                }

                let res = lru.eject_next_candidate(&mut |k| Ejection::from_flags(accepts(k), stop));
                match res {
                    Ok(taken) => assert_eq!(taken, expected),
                    Err(_) => assert!(expected.is_empty()),
                }
                model.retain(|m| !expected.contains(m));
            }
        }
        assert_eq!(lru.snapshot(), model);
    }
});
