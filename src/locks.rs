// 🔒 Match Locks - mutual exclusion for the merge decision
//
// Two candidates that could resolve to the same business must not both decide
// "create" at the same time. The IMMEDIATE transaction around the decision
// already guarantees that for every writer of the database file, so this
// table is not what keeps the store correct. It orders same-key candidates
// in process: a waiter sleeps on the condvar instead of burning its SQLite
// busy timeout, and disjoint keys never wait here at all.
//
// Each candidate holds its match keys (see `geo::match_keys`) while it reads
// neighbours, decides and writes. All keys are taken at once, so two lockers
// can never each hold half of the other's set.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[derive(Clone, Default)]
pub struct MatchLocks {
    inner: Arc<LockTable>,
}

#[derive(Default)]
struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Held keys; released on drop
pub struct MatchGuard {
    table: Arc<LockTable>,
    keys: Vec<String>,
}

impl MatchLocks {
    pub fn new() -> Self {
        MatchLocks::default()
    }

    /// Block until none of `keys` is held by anyone else, then take them all
    pub fn acquire(&self, keys: &[String]) -> MatchGuard {
        let mut keys: Vec<String> = keys.to_vec();
        keys.sort();
        keys.dedup();

        let mut held = lock_table(&self.inner.held);
        while keys.iter().any(|k| held.contains(k)) {
            held = match self.inner.released.wait(held) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        for key in &keys {
            held.insert(key.clone());
        }

        MatchGuard {
            table: Arc::clone(&self.inner),
            keys,
        }
    }

    pub fn held_count(&self) -> usize {
        lock_table(&self.inner.held).len()
    }
}

impl MatchGuard {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Drop for MatchGuard {
    fn drop(&mut self) {
        let mut held = lock_table(&self.table.held);
        for key in &self.keys {
            held.remove(key);
        }
        self.table.released.notify_all();
    }
}

// A panic while holding the table only ever leaves a consistent set behind
fn lock_table(mutex: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
