//! Clock (Second-Chance) replacement policy.
//!
//! Implements the clock/second-chance algorithm using a circular buffer with
//! reference bits. Approximates LRU with lower overhead than maintaining a list.
//!
//! # Algorithm
//!
//! - On access: Set reference bit
//! - On eviction: Sweep clock hand circularly
//!   - If frame not evictable: skip
//!   - If ref bit set: clear bit and continue
//!   - Otherwise: evict frame
//!
//! The sweep covers the pool twice, so a frame whose bit was cleared on the
//! first lap can still be chosen on the second.

use super::ReplacementPolicy;

#[derive(Debug)]
pub struct ClockPolicy {
    /// Clock hand position (next frame to examine)
    hand: usize,
    ref_bits: Vec<bool>,
}

impl ClockPolicy {
    pub fn new(pool_len: usize) -> Self {
        Self {
            hand: 0,
            ref_bits: vec![false; pool_len],
        }
    }
}

impl ReplacementPolicy for ClockPolicy {
    fn record_access(&mut self, frame_idx: usize) {
        self.ref_bits[frame_idx] = true;
    }

    fn choose_victim(&mut self, evictable: &[bool]) -> Option<usize> {
        let len = evictable.len();
        for _ in 0..len * 2 {
            let idx = self.hand;
            self.hand = (idx + 1) % len;
            if !evictable[idx] {
                continue;
            }
            if self.ref_bits[idx] {
                self.ref_bits[idx] = false;
                continue;
            }
            return Some(idx);
        }
        None
    }
}
