//! # Reference Count Table
//!
//! Maps a foreign address to the number of logical references held by
//! auto-releasing wrappers.
//!
//! An address is present iff its count is at least 1. Increments and the
//! compound decrement-check-release step are serialized by one lock, so a
//! release on one thread cannot race past an increment on another thread for
//! the same address.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

/// Address → reference count table.
pub struct RefCountTable {
    counts: Mutex<HashMap<usize, usize>>,
}

impl RefCountTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Add one reference to `address`.
    pub fn increment(&self, address: usize) {
        let mut counts = self.counts.lock();
        *counts.entry(address).or_insert(0) += 1;
    }

    /// Drop one reference to `address` and, if none remain, run `release`
    /// before the lock is released.
    ///
    /// Returns `true` if `release` ran.
    pub fn release_if_unreferenced<F: FnOnce()>(&self, address: usize, release: F) -> bool {
        let mut counts = self.counts.lock();
        decrement(&mut counts, address);
        if counts.contains_key(&address) {
            return false;
        }
        release();
        true
    }

    /// Get the current count for `address` (0 if untracked).
    pub fn count(&self, address: usize) -> usize {
        self.counts.lock().get(&address).copied().unwrap_or(0)
    }

    /// Check if `address` has at least one reference.
    pub fn contains(&self, address: usize) -> bool {
        self.counts.lock().contains_key(&address)
    }

    /// Number of tracked addresses.
    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    /// Check if no address is tracked.
    pub fn is_empty(&self) -> bool {
        self.counts.lock().is_empty()
    }

    /// Tracked addresses in ascending order.
    pub fn addresses(&self) -> Vec<usize> {
        let mut addresses: Vec<usize> = self.counts.lock().keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }
}

/// Remove one reference; prune the entry when it reaches zero.
///
/// Takes the guarded map so it can only run under the table lock.
fn decrement(counts: &mut HashMap<usize, usize>, address: usize) {
    let remaining = counts.get(&address).copied().unwrap_or(0).saturating_sub(1);
    if remaining == 0 {
        counts.remove(&address);
    } else {
        counts.insert(address, remaining);
    }
}

impl Default for RefCountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RefCountTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCountTable")
            .field("tracked", &self.len())
            .finish()
    }
}
