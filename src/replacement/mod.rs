//! Buffer pool replacement policies for cache eviction.
//!
//! Eviction victim selection is a policy, not a correctness requirement, so the
//! buffer pool only talks to a [`ReplacementPolicy`]. The pool decides which
//! frames may be evicted (resident, clean and unpinned); the policy only chooses
//! among them.
//!
//! # Available Policies
//!
//! - **Random** (default): picks a pseudo-random starting frame and scans
//!   forward cyclically for the first evictable frame.
//!
//! - **LRU**: evicts the evictable frame with the oldest access stamp.
//!
//! - **Clock**: second-chance algorithm with a circular hand and reference bits.
//!
//! LRU and Clock are deterministic, which makes them the policies of choice in
//! tests that need to know which frame goes.

use std::fmt::Debug;

use crate::config::ReplacementKind;

mod clock;
mod lru;
mod random;

pub use clock::ClockPolicy;
pub use lru::LruPolicy;
pub use random::RandomPolicy;

pub trait ReplacementPolicy: Send + Debug {
    /// Called on every access to a frame, both cache hits and freshly loaded pages.
    fn record_access(&mut self, frame_idx: usize);

    /// Selects a victim among the frames whose `evictable` entry is true.
    /// Returns None if there is no evictable frame.
    fn choose_victim(&mut self, evictable: &[bool]) -> Option<usize>;
}

/// Builds the policy selected by `kind` for a pool of `pool_len` frames.
pub fn new_policy(kind: ReplacementKind, pool_len: usize) -> Box<dyn ReplacementPolicy> {
    match kind {
        ReplacementKind::Random => Box::new(RandomPolicy::new()),
        ReplacementKind::Lru => Box::new(LruPolicy::new(pool_len)),
        ReplacementKind::Clock => Box::new(ClockPolicy::new(pool_len)),
    }
}
