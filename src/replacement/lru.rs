//! LRU (Least Recently Used) replacement policy.
//!
//! Every access stamps the frame with a monotonically increasing counter; the
//! victim is the evictable frame with the smallest stamp.
//!
//! # Complexity
//!
//! - Hit: O(1)
//! - Eviction: O(n) scan over the pool

use super::ReplacementPolicy;

#[derive(Debug)]
pub struct LruPolicy {
    last_used: Vec<u64>,
    tick: u64,
}

impl LruPolicy {
    pub fn new(pool_len: usize) -> Self {
        Self {
            last_used: vec![0; pool_len],
            tick: 0,
        }
    }
}

impl ReplacementPolicy for LruPolicy {
    fn record_access(&mut self, frame_idx: usize) {
        self.tick += 1;
        self.last_used[frame_idx] = self.tick;
    }

    fn choose_victim(&mut self, evictable: &[bool]) -> Option<usize> {
        evictable
            .iter()
            .enumerate()
            .filter(|(_, &ok)| ok)
            .min_by_key(|(idx, _)| self.last_used[*idx])
            .map(|(idx, _)| idx)
    }
}

#[cfg(test)]
mod lru_policy_tests {
    use super::*;

    #[test]
    fn test_least_recently_used_is_evicted() {
        let mut policy = LruPolicy::new(3);
        policy.record_access(0);
        policy.record_access(1);
        policy.record_access(2);
        policy.record_access(0);

        assert_eq!(policy.choose_victim(&[true, true, true]), Some(1));
        //  skip frames that may not be evicted
        assert_eq!(policy.choose_victim(&[true, false, true]), Some(2));
        assert_eq!(policy.choose_victim(&[false, false, false]), None);
    }
}
