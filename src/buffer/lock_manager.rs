//! Page-level shared/exclusive locks owned by transactions.
//!
//! Requests never queue: `acquire` either grants immediately or reports a
//! conflict, and callers decide how long to keep retrying. There is no
//! deadlock detection; a stalled transaction is expected to hit its wait
//! deadline, abort, and release everything it holds.

use ahash::{AHashMap, AHashSet};
use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use tracing::trace;

use super::page::PageKey;
use crate::transaction::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Read-only
    Shared,
    /// Read-write
    Exclusive,
}

/// Holders of one page's lock. Either `sharing` is non-empty and there is
/// no exclusive holder, or there is exactly one exclusive holder.
#[derive(Debug, Default)]
struct LockEntry {
    sharing: AHashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl LockEntry {
    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.sharing.is_empty()
    }

    fn mode_of(&self, txn: TransactionId) -> Option<Permission> {
        if self.exclusive == Some(txn) {
            Some(Permission::Exclusive)
        } else if self.sharing.contains(&txn) {
            Some(Permission::Shared)
        } else {
            None
        }
    }

    fn try_grant(&mut self, txn: TransactionId, permission: Permission) -> bool {
        match permission {
            Permission::Shared => match self.exclusive {
                // An exclusive holder already has read access
                Some(holder) => holder == txn,
                None => {
                    self.sharing.insert(txn);
                    true
                }
            },
            Permission::Exclusive => {
                if let Some(holder) = self.exclusive {
                    return holder == txn;
                }
                if self.sharing.iter().any(|&holder| holder != txn) {
                    return false;
                }
                // Sole shared holder (or nobody): upgrade in place
                self.sharing.remove(&txn);
                self.exclusive = Some(txn);
                true
            }
        }
    }

    fn remove(&mut self, txn: TransactionId) -> bool {
        if self.exclusive == Some(txn) {
            self.exclusive = None;
            return true;
        }
        self.sharing.remove(&txn)
    }
}

#[derive(Debug, Default)]
struct LockTable {
    pages: AHashMap<PageKey, LockEntry>,
    /// Reverse index so a transaction's locks can be dropped without a full scan
    held: AHashMap<TransactionId, AHashSet<PageKey>>,
}

impl LockTable {
    fn release(&mut self, key: PageKey, txn: TransactionId) -> bool {
        let Some(entry) = self.pages.get_mut(&key) else {
            return false;
        };
        if !entry.remove(txn) {
            return false;
        }
        if entry.is_free() {
            self.pages.remove(&key);
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    /// Signalled whenever any lock is released
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single non-blocking attempt to lock `key` for `txn`.
    ///
    /// Re-requesting a mode already held (or a weaker one) succeeds without
    /// change. A sole shared holder asking for exclusive is upgraded.
    pub fn acquire(&self, key: PageKey, txn: TransactionId, permission: Permission) -> bool {
        let mut table = self.table.lock();
        let granted = table.pages.entry(key).or_default().try_grant(txn, permission);
        if granted {
            table.held.entry(txn).or_default().insert(key);
            trace!(page = %key, %txn, ?permission, "lock granted");
        } else {
            trace!(page = %key, %txn, ?permission, "lock denied");
        }
        granted
    }

    /// Drop `txn`'s lock on `key` if it holds one
    pub fn release(&self, key: PageKey, txn: TransactionId) {
        let mut table = self.table.lock();
        if !table.release(key, txn) {
            return;
        }
        if let Some(keys) = table.held.get_mut(&txn) {
            keys.remove(&key);
            if keys.is_empty() {
                table.held.remove(&txn);
            }
        }
        drop(table);

        trace!(page = %key, %txn, "lock released");
        self.released.notify_all();
    }

    /// Drop every lock held by `txn`
    pub fn release_all(&self, txn: TransactionId) {
        let mut table = self.table.lock();
        let Some(keys) = table.held.remove(&txn) else {
            return;
        };
        for key in &keys {
            table.release(*key, txn);
        }
        drop(table);

        trace!(%txn, count = keys.len(), "all locks released");
        self.released.notify_all();
    }

    /// Whether `txn` holds any lock on `key`
    pub fn holds(&self, txn: TransactionId, key: PageKey) -> bool {
        self.mode(txn, key).is_some()
    }

    /// The mode in which `txn` holds `key`
    pub fn mode(&self, txn: TransactionId, key: PageKey) -> Option<Permission> {
        self.table
            .lock()
            .pages
            .get(&key)
            .and_then(|entry| entry.mode_of(txn))
    }

    /// Current holders of `key`
    pub fn holders(&self, key: PageKey) -> Vec<(TransactionId, Permission)> {
        let table = self.table.lock();
        let Some(entry) = table.pages.get(&key) else {
            return Vec::new();
        };
        let mut holders: Vec<_> = entry
            .sharing
            .iter()
            .map(|&txn| (txn, Permission::Shared))
            .collect();
        if let Some(txn) = entry.exclusive {
            holders.push((txn, Permission::Exclusive));
        }
        holders
    }

    /// Pages on which `txn` holds a lock
    pub fn locked_pages(&self, txn: TransactionId) -> Vec<PageKey> {
        self.table
            .lock()
            .held
            .get(&txn)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of pages with at least one holder
    pub fn locked_page_count(&self) -> usize {
        self.table.lock().pages.len()
    }

    /// Block until some lock is released or `timeout` passes.
    ///
    /// A release racing with the caller's failed `acquire` can be missed;
    /// the caller then simply retries after `timeout`.
    pub fn wait_for_release(&self, timeout: Duration) {
        let mut table = self.table.lock();
        self.released.wait_for(&mut table, timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn page(n: usize) -> PageKey {
        PageKey::new(1, n)
    }

    #[test]
    fn test_shared_locks_are_compatible() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        assert!(lm.acquire(page(0), t1, Permission::Shared));
        assert!(lm.acquire(page(0), t2, Permission::Shared));
        assert!(lm.holds(t1, page(0)));
        assert!(lm.holds(t2, page(0)));
        assert_eq!(lm.holders(page(0)).len(), 2);
    }

    #[test]
    fn test_exclusive_excludes_everyone_else() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        assert!(lm.acquire(page(0), t1, Permission::Exclusive));
        assert!(!lm.acquire(page(0), t2, Permission::Shared));
        assert!(!lm.acquire(page(0), t2, Permission::Exclusive));
        assert!(!lm.holds(t2, page(0)));

        // Other pages are unaffected
        assert!(lm.acquire(page(1), t2, Permission::Exclusive));
    }

    #[test]
    fn test_shared_blocks_exclusive() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        assert!(lm.acquire(page(0), t1, Permission::Shared));
        assert!(!lm.acquire(page(0), t2, Permission::Exclusive));
    }

    #[test]
    fn test_requests_are_idempotent() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();

        assert!(lm.acquire(page(0), t1, Permission::Exclusive));
        assert!(lm.acquire(page(0), t1, Permission::Exclusive));
        // Weaker request keeps the exclusive lock
        assert!(lm.acquire(page(0), t1, Permission::Shared));
        assert_eq!(lm.mode(t1, page(0)), Some(Permission::Exclusive));
        assert_eq!(lm.holders(page(0)), vec![(t1, Permission::Exclusive)]);
    }

    #[test]
    fn test_sole_shared_holder_upgrades() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();

        assert!(lm.acquire(page(0), t1, Permission::Shared));
        assert!(lm.acquire(page(0), t1, Permission::Exclusive));
        assert_eq!(lm.mode(t1, page(0)), Some(Permission::Exclusive));
        assert_eq!(lm.holders(page(0)), vec![(t1, Permission::Exclusive)]);
    }

    #[test]
    fn test_upgrade_denied_with_other_sharers() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        assert!(lm.acquire(page(0), t1, Permission::Shared));
        assert!(lm.acquire(page(0), t2, Permission::Shared));
        assert!(!lm.acquire(page(0), t1, Permission::Exclusive));
        assert_eq!(lm.mode(t1, page(0)), Some(Permission::Shared));

        lm.release(page(0), t2);
        assert!(lm.acquire(page(0), t1, Permission::Exclusive));
    }

    #[test]
    fn test_release() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        assert!(lm.acquire(page(0), t1, Permission::Exclusive));
        lm.release(page(0), t1);
        assert!(!lm.holds(t1, page(0)));
        assert_eq!(lm.locked_page_count(), 0);

        // Releasing a lock that isn't held is a no-op
        lm.release(page(0), t1);
        lm.release(page(5), t2);

        assert!(lm.acquire(page(0), t2, Permission::Exclusive));
    }

    #[test]
    fn test_release_all() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        for n in 0..5 {
            assert!(lm.acquire(page(n), t1, Permission::Exclusive));
        }
        assert!(lm.acquire(page(9), t1, Permission::Shared));
        assert!(lm.acquire(page(9), t2, Permission::Shared));
        assert_eq!(lm.locked_pages(t1).len(), 6);

        lm.release_all(t1);
        assert!(lm.locked_pages(t1).is_empty());
        for n in 0..5 {
            assert!(!lm.holds(t1, page(n)));
            assert!(lm.acquire(page(n), t2, Permission::Exclusive));
        }
        // t2's shared lock on page 9 survives
        assert_eq!(lm.holders(page(9)), vec![(t2, Permission::Shared)]);
    }

    #[test]
    fn test_wait_for_release_wakes_on_release() {
        let lm = Arc::new(LockManager::new());
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();
        assert!(lm.acquire(page(0), t1, Permission::Exclusive));

        let waiter = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                let start = Instant::now();
                while !lm.acquire(page(0), t2, Permission::Exclusive) {
                    lm.wait_for_release(Duration::from_millis(50));
                    assert!(start.elapsed() < Duration::from_secs(5));
                }
            })
        };

        thread::sleep(Duration::from_millis(20));
        lm.release_all(t1);
        waiter.join().unwrap();
        assert!(lm.holds(t2, page(0)));
    }

    #[test]
    fn test_wait_for_release_times_out() {
        let lm = LockManager::new();
        let start = Instant::now();
        lm.wait_for_release(Duration::from_millis(30));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
