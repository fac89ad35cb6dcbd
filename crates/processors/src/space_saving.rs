// SPDX-License-Identifier: Apache-2.0

//! Space-Saving sketch: bounded-size heavy-hitter summary.
//!
//! Tracks at most `capacity` elements with `(count, error)` counters. When a
//! new element arrives at a full sketch, the element with the smallest count
//! is evicted and the newcomer inherits its count as both seed and error
//! bound. Counts therefore overestimate by at most the inherited error.

use std::collections::HashMap;

/// Counter entry for one tracked element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    /// Estimated weight, including inherited overestimation.
    pub count: f64,
    /// Maximum overestimation of `count`.
    pub error: f64,
}

/// A Space-Saving sketch over `u64` keys with `f64` weights.
#[derive(Debug)]
pub struct SpaceSaving {
    capacity: usize,
    counters: HashMap<u64, Entry>,
    observed_weight: f64,
}

impl SpaceSaving {
    /// Creates a sketch tracking at most `capacity` elements.
    /// A zero capacity is clamped to 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            counters: HashMap::with_capacity(capacity.max(1)),
            observed_weight: 0.0,
        }
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of tracked elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns true when nothing has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Total weight observed since creation (or the last rebuild).
    #[must_use]
    pub const fn observed_weight(&self) -> f64 {
        self.observed_weight
    }

    /// Records `weight` for `key` and returns the element's updated entry.
    pub fn update(&mut self, key: u64, weight: f64) -> Entry {
        self.observed_weight += weight;

        if let Some(entry) = self.counters.get_mut(&key) {
            entry.count += weight;
            return *entry;
        }

        if self.counters.len() < self.capacity {
            let entry = Entry {
                count: weight,
                error: 0.0,
            };
            let _ = self.counters.insert(key, entry);
            return entry;
        }

        // Replace the smallest counter; the newcomer inherits its count.
        let (&victim, &victim_entry) = self
            .counters
            .iter()
            .min_by(|a, b| a.1.count.total_cmp(&b.1.count))
            .expect("sketch at capacity is non-empty");
        let _ = self.counters.remove(&victim);
        let entry = Entry {
            count: victim_entry.count + weight,
            error: victim_entry.count,
        };
        let _ = self.counters.insert(key, entry);
        entry
    }

    /// Returns the entry for `key`, if tracked.
    #[must_use]
    pub fn get(&self, key: u64) -> Option<Entry> {
        self.counters.get(&key).copied()
    }

    /// Returns the `k` heaviest elements, sorted by descending count.
    /// Ties break on the key for determinism.
    #[must_use]
    pub fn top(&self, k: usize) -> Vec<(u64, Entry)> {
        let mut all: Vec<(u64, Entry)> =
            self.counters.iter().map(|(k, e)| (*k, *e)).collect();
        all.sort_by(|a, b| b.1.count.total_cmp(&a.1.count).then(a.0.cmp(&b.0)));
        all.truncate(k);
        all
    }

    /// Sum of the counts of the `k` heaviest elements.
    #[must_use]
    pub fn retained_weight(&self, k: usize) -> f64 {
        self.top(k).iter().map(|(_, e)| e.count).sum()
    }

    /// Largest per-entry error among tracked elements.
    #[must_use]
    pub fn max_error(&self) -> f64 {
        self.counters
            .values()
            .map(|e| e.error)
            .fold(0.0, f64::max)
    }

    /// Rebuilds the sketch with a new capacity, migrating the heaviest
    /// existing counters as seeds. Observed weight carries over.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity == self.capacity {
            return;
        }
        let survivors = self.top(capacity);
        let observed = self.observed_weight;
        *self = Self::new(capacity);
        self.observed_weight = observed;
        for (key, entry) in survivors {
            let _ = self.counters.insert(key, entry);
        }
    }
}
