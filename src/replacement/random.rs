use rand::Rng;

use super::ReplacementPolicy;

/// Random replacement: start at a random frame and take the first evictable one
/// going forward, wrapping around.
#[derive(Debug, Default)]
pub struct RandomPolicy;

impl RandomPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl ReplacementPolicy for RandomPolicy {
    fn record_access(&mut self, _frame_idx: usize) {}

    fn choose_victim(&mut self, evictable: &[bool]) -> Option<usize> {
        let len = evictable.len();
        if len == 0 {
            return None;
        }
        let start = rand::rng().random_range(0..len);
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&idx| evictable[idx])
    }
}

#[cfg(test)]
mod random_policy_tests {
    use super::*;

    #[test]
    fn test_only_evictable_frames_are_chosen() {
        let mut policy = RandomPolicy::new();
        let evictable = [false, false, true, false];
        for _ in 0..50 {
            assert_eq!(policy.choose_victim(&evictable), Some(2));
        }
    }

    #[test]
    fn test_no_victim() {
        let mut policy = RandomPolicy::new();
        assert_eq!(policy.choose_victim(&[false, false]), None);
        assert_eq!(policy.choose_victim(&[]), None);
    }
}
