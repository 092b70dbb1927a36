//! Fault injection for allocation failure paths
//!
//! Compiled only with the `fault-injection` feature. Test harnesses arm a
//! number of forced `SpaceFull` results for a given request size; each armed
//! failure is consumed by one `alloc` call of that size.

use ahash::AHashMap;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct FaultInjector {
    space_full: Mutex<AHashMap<u8, u32>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` allocations of `num_blocks` report space full
    pub fn force_space_full(&self, num_blocks: u8, count: u32) {
        let mut armed = self.space_full.lock();
        let pending = armed.entry(num_blocks).or_insert(0);
        *pending = pending.saturating_add(count);
    }

    /// Disarm every pending fault
    pub fn clear(&self) {
        self.space_full.lock().clear();
    }

    /// Remaining forced failures for `num_blocks`
    pub fn pending(&self, num_blocks: u8) -> u32 {
        self.space_full.lock().get(&num_blocks).copied().unwrap_or(0)
    }

    /// Consume one armed failure for `num_blocks`, if any
    pub(crate) fn take_space_full(&self, num_blocks: u8) -> bool {
        let mut armed = self.space_full.lock();
        match armed.get_mut(&num_blocks) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                if *remaining == 0 {
                    armed.remove(&num_blocks);
                }
                tracing::debug!(num_blocks, "Injected space-full allocation failure");
                true
            }
            _ => false,
        }
    }
}
