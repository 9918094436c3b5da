//! Page-level shared/exclusive locking with deadlock detection.
//!
//! All lock state lives in one [`LockTable`] behind one mutex. The table keeps
//! a page→holders view and a transaction→pages view; both are only ever
//! mutated together through [`LockTable::set`] and [`LockTable::remove`].
//!
//! Blocked requests wait on a condition variable that is notified on every
//! release. A waiter whose randomized budget of wait slices runs out probes the
//! wait-for graph and aborts itself if it sits on a cycle.

use std::{
    collections::{HashMap, HashSet},
    sync::{Condvar, Mutex, MutexGuard},
    time::Duration,
};

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::{config::LockWaitConfig, DbError, DbResult, PageId, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Shared lock
    ReadOnly,
    /// Exclusive lock
    ReadWrite,
}

impl Permission {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Permission::ReadWrite)
    }

    fn conflicts_with(&self, other: Permission) -> bool {
        self.is_exclusive() || other.is_exclusive()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    by_page: HashMap<PageId, HashMap<TransactionId, Permission>>,
    by_txn: HashMap<TransactionId, HashMap<PageId, Permission>>,
    /// Requests that are currently blocked, at most one per transaction
    waiting: HashMap<TransactionId, (PageId, Permission)>,
}

impl LockTable {
    fn permission(&self, txn: TransactionId, page: PageId) -> Option<Permission> {
        self.by_txn
            .get(&txn)
            .and_then(|pages| pages.get(&page))
            .copied()
    }

    fn set(&mut self, txn: TransactionId, page: PageId, permission: Permission) {
        self.by_page.entry(page).or_default().insert(txn, permission);
        self.by_txn.entry(txn).or_default().insert(page, permission);
    }

    fn remove(&mut self, txn: TransactionId, page: PageId) -> bool {
        let mut removed = false;
        if let Some(holders) = self.by_page.get_mut(&page) {
            removed |= holders.remove(&txn).is_some();
            if holders.is_empty() {
                self.by_page.remove(&page);
            }
        }
        if let Some(pages) = self.by_txn.get_mut(&txn) {
            removed |= pages.remove(&page).is_some();
            if pages.is_empty() {
                self.by_txn.remove(&txn);
            }
        }
        removed
    }

    /// Grant `permission` on `page` to `txn` if it is compatible with the current holders.
    fn try_grant(&mut self, txn: TransactionId, page: PageId, permission: Permission) -> bool {
        match self.permission(txn, page) {
            Some(held) if held == permission => return true,
            Some(Permission::ReadWrite) => {
                //  degrade in place
                self.set(txn, page, Permission::ReadOnly);
                return true;
            }
            _ => {}
        }

        let Some(holders) = self.by_page.get(&page) else {
            self.set(txn, page, permission);
            return true;
        };

        if holders
            .iter()
            .any(|(holder, held)| *holder != txn && held.is_exclusive())
        {
            return false;
        }

        if permission.is_exclusive() {
            //  upgrade only when this transaction is the sole shared holder
            let sole_holder = holders.len() == 1 && holders.contains_key(&txn);
            if !sole_holder {
                return false;
            }
        }
        self.set(txn, page, permission);
        true
    }

    /// Edges `waiter -> holder` for every blocked request and every holder it conflicts with.
    fn wait_for_graph(&self) -> HashMap<TransactionId, HashSet<TransactionId>> {
        let mut graph: HashMap<TransactionId, HashSet<TransactionId>> = HashMap::new();
        for (waiter, (page, requested)) in &self.waiting {
            let Some(holders) = self.by_page.get(page) else {
                continue;
            };
            for (holder, held) in holders {
                if holder != waiter && requested.conflicts_with(*held) {
                    graph.entry(*waiter).or_default().insert(*holder);
                }
            }
        }
        graph
    }

    /// Probe for a cycle reachable from `txn` as if it were waiting for `permission` on `page`.
    /// The hypothetical request is removed again before returning.
    fn has_deadlock(&mut self, txn: TransactionId, page: PageId, permission: Permission) -> bool {
        let previous = self.waiting.insert(txn, (page, permission));
        let graph = self.wait_for_graph();
        match previous {
            Some(request) => self.waiting.insert(txn, request),
            None => self.waiting.remove(&txn),
        };

        fn has_cycle(
            graph: &HashMap<TransactionId, HashSet<TransactionId>>,
            node: TransactionId,
            visited: &mut HashSet<TransactionId>,
            path: &mut HashSet<TransactionId>,
        ) -> bool {
            if path.contains(&node) {
                return true;
            }
            if !visited.insert(node) {
                return false;
            }
            path.insert(node);
            if let Some(neighbors) = graph.get(&node) {
                for &neighbor in neighbors {
                    if has_cycle(graph, neighbor, visited, path) {
                        return true;
                    }
                }
            }
            path.remove(&node);
            false
        }

        has_cycle(&graph, txn, &mut HashSet::new(), &mut HashSet::new())
    }
}

/// Global lock table shared by every transaction using a buffer pool
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    wait: LockWaitConfig,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockWaitConfig::default())
    }
}

impl LockManager {
    pub fn new(wait: LockWaitConfig) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            wait,
        }
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap()
    }

    /// Try to acquire `permission` on `page` without blocking.
    /// Returns whether the lock was granted.
    pub fn acquire_lock(&self, txn: TransactionId, page: PageId, permission: Permission) -> bool {
        let granted = self.table().try_grant(txn, page, permission);
        trace!(%txn, %page, ?permission, granted, "lock request");
        granted
    }

    /// Acquire `permission` on `page`, blocking until it is granted.
    ///
    /// Fails with [`DbError::TransactionAborted`] if, after the wait budget runs
    /// out, a deadlock probe finds a cycle through `txn`. If no cycle is found
    /// the budget is reset and the wait continues.
    pub fn lock(&self, txn: TransactionId, page: PageId, permission: Permission) -> DbResult<()> {
        let mut table = self.table();
        if table.try_grant(txn, page, permission) {
            trace!(%txn, %page, ?permission, "lock granted");
            return Ok(());
        }
        table.waiting.insert(txn, (page, permission));
        debug!(%txn, %page, ?permission, "waiting for lock");

        let mut rng = rand::rng();
        let mut budget = self.probe_budget(&mut rng);
        let mut attempts = 0;
        loop {
            let slice = self.wait_slice(&mut rng);
            table = self.released.wait_timeout(table, slice).unwrap().0;

            if table.try_grant(txn, page, permission) {
                table.waiting.remove(&txn);
                trace!(%txn, %page, ?permission, attempts, "lock granted after wait");
                return Ok(());
            }

            attempts += 1;
            if attempts < budget {
                continue;
            }
            if table.has_deadlock(txn, page, permission) {
                table.waiting.remove(&txn);
                warn!(%txn, %page, ?permission, "deadlock detected, aborting transaction");
                return Err(DbError::TransactionAborted(txn));
            }
            debug!(%txn, %page, "no deadlock involving this transaction, waiting longer");
            attempts = 0;
            budget = self.probe_budget(&mut rng);
        }
    }

    fn probe_budget(&self, rng: &mut impl Rng) -> u32 {
        rng.random_range(1..=self.wait.max_probe_budget.max(1))
    }

    fn wait_slice(&self, rng: &mut impl Rng) -> Duration {
        let min = self.wait.min_wait.as_micros() as u64;
        let max = (self.wait.max_wait.as_micros() as u64).max(min);
        Duration::from_micros(rng.random_range(min..=max).max(1))
    }

    /// Release the lock `txn` holds on `page`, if any.
    pub fn release_page(&self, txn: TransactionId, page: PageId) {
        if self.table().remove(txn, page) {
            self.released.notify_all();
        }
    }

    /// Release every lock held on `page`, whoever holds it.
    pub fn release_all_on_page(&self, page: PageId) {
        let mut table = self.table();
        let holders: Vec<TransactionId> = table
            .by_page
            .get(&page)
            .map(|holders| holders.keys().copied().collect())
            .unwrap_or_default();
        for txn in &holders {
            table.remove(*txn, page);
        }
        drop(table);
        if !holders.is_empty() {
            self.released.notify_all();
        }
    }

    /// Release every lock held by `txn`.
    pub fn release_all(&self, txn: TransactionId) {
        let mut table = self.table();
        let pages: Vec<PageId> = table
            .by_txn
            .get(&txn)
            .map(|pages| pages.keys().copied().collect())
            .unwrap_or_default();
        for page in &pages {
            table.remove(txn, *page);
        }
        table.waiting.remove(&txn);
        drop(table);
        if !pages.is_empty() {
            self.released.notify_all();
        }
    }

    pub fn holds_lock(&self, txn: TransactionId, page: PageId) -> bool {
        self.table().permission(txn, page).is_some()
    }

    pub fn permission(&self, txn: TransactionId, page: PageId) -> Option<Permission> {
        self.table().permission(txn, page)
    }

    /// Every transaction holding a lock on `page`.
    pub fn holders(&self, page: PageId) -> Vec<(TransactionId, Permission)> {
        self.table()
            .by_page
            .get(&page)
            .map(|holders| holders.iter().map(|(t, p)| (*t, *p)).collect())
            .unwrap_or_default()
    }

    /// Every page `txn` holds a lock on.
    pub fn pages_locked_by(&self, txn: TransactionId) -> Vec<(PageId, Permission)> {
        self.table()
            .by_txn
            .get(&txn)
            .map(|pages| pages.iter().map(|(p, perm)| (*p, *perm)).collect())
            .unwrap_or_default()
    }

    /// Whether `txn` would be part of a wait-for cycle if it waited for `permission` on `page`.
    pub fn check_deadlock(&self, txn: TransactionId, page: PageId, permission: Permission) -> bool {
        self.table().has_deadlock(txn, page, permission)
    }
}
