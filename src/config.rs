//! Runtime configuration for a [`crate::Database`].
//!
//! The default page size is selected at compile time through Cargo features,
//! everything else is plain runtime configuration.

use std::time::Duration;

// Compile-time default page size, selected via Cargo features.
// Exactly one of `page-4k` or `page-8k` should be enabled.
#[cfg(feature = "page-4k")]
pub const DEFAULT_PAGE_SIZE: usize = 4096;
#[cfg(all(feature = "page-8k", not(feature = "page-4k")))]
pub const DEFAULT_PAGE_SIZE: usize = 8192;

#[cfg(not(any(feature = "page-4k", feature = "page-8k")))]
compile_error!("One of `page-4k` or `page-8k` features must be enabled to select a page size.");

/// Default number of frames in the buffer pool.
pub const DEFAULT_POOL_PAGES: usize = 50;

/// Which replacement policy the buffer pool uses to pick eviction victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacementKind {
    #[default]
    Random,
    Lru,
    Clock,
}

impl std::str::FromStr for ReplacementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(ReplacementKind::Random),
            "lru" => Ok(ReplacementKind::Lru),
            "clock" => Ok(ReplacementKind::Clock),
            other => Err(format!("unknown replacement policy '{other}'")),
        }
    }
}

/// Tuning for blocking lock acquisition.
///
/// A waiter sleeps on the lock table's condition variable for a random slice
/// between `min_wait` and `max_wait`. Every slice that ends without a grant
/// counts against a randomized budget in `1..=max_probe_budget`; once the
/// budget is spent the waiter runs deadlock detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockWaitConfig {
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub max_probe_budget: u32,
}

impl Default for LockWaitConfig {
    fn default() -> Self {
        Self {
            min_wait: Duration::from_millis(5),
            max_wait: Duration::from_millis(25),
            max_probe_budget: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub page_size: usize,
    pub pool_pages: usize,
    pub replacement: ReplacementKind,
    pub lock_wait: LockWaitConfig,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_pages: DEFAULT_POOL_PAGES,
            replacement: ReplacementKind::default(),
            lock_wait: LockWaitConfig::default(),
        }
    }
}

impl DbConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_pages(mut self, pool_pages: usize) -> Self {
        self.pool_pages = pool_pages;
        self
    }

    pub fn with_replacement(mut self, replacement: ReplacementKind) -> Self {
        self.replacement = replacement;
        self
    }

    pub fn with_lock_wait(mut self, lock_wait: LockWaitConfig) -> Self {
        self.lock_wait = lock_wait;
        self
    }
}
