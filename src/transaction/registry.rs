use ahash::AHashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use super::TransactionId;

/// First-request timestamps of running transactions.
///
/// The timestamp is the reference point for the lock-wait deadline. Entries
/// are dropped only when the transaction commits or aborts.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    started: Mutex<AHashMap<TransactionId, Instant>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `txn` as started now unless it is already known.
    /// Returns the transaction's start time.
    pub fn register(&self, txn: TransactionId) -> Instant {
        *self.started.lock().entry(txn).or_insert_with(Instant::now)
    }

    pub fn started_at(&self, txn: TransactionId) -> Option<Instant> {
        self.started.lock().get(&txn).copied()
    }

    /// Time since the transaction's first request
    pub fn elapsed(&self, txn: TransactionId) -> Option<Duration> {
        self.started_at(txn).map(|started| started.elapsed())
    }

    pub fn remove(&self, txn: TransactionId) -> Option<Instant> {
        self.started.lock().remove(&txn)
    }

    pub fn contains(&self, txn: TransactionId) -> bool {
        self.started.lock().contains_key(&txn)
    }

    pub fn len(&self) -> usize {
        self.started.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.started.lock().is_empty()
    }

    /// Ids of all registered transactions, oldest first
    pub fn active(&self) -> Vec<TransactionId> {
        let started = self.started.lock();
        let mut active: Vec<_> = started.iter().map(|(txn, at)| (*at, *txn)).collect();
        active.sort();
        active.into_iter().map(|(_, txn)| txn).collect()
    }
}
