// SPDX-License-Identifier: Apache-2.0

//! Bounded patch history.
//!
//! An append-only ring of immutable dispatch records. On overflow the oldest
//! record is dropped. The ring is the only persistence patches get; it is
//! flushed to the log on process exit.

use phoenix_config::ConfigPatch;
use std::collections::VecDeque;

/// One dispatch attempt, recorded after the fact.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    /// The dispatched patch, including the captured `prev_value`.
    pub patch: ConfigPatch,
    /// Dispatch time, seconds since the Unix epoch.
    pub applied_at: u64,
    /// Whether the target accepted the value.
    pub success: bool,
    /// The target's rejection, when `success` is false.
    pub error: Option<String>,
    /// True when the extension ran under `advisory` autonomy.
    pub advisory: bool,
}

/// Fixed-capacity ring of [`PatchRecord`]s.
#[derive(Debug)]
pub struct HistoryRing {
    ring: VecDeque<PatchRecord>,
    capacity: usize,
}

impl HistoryRing {
    /// Creates a ring holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Appends a record, dropping the oldest on overflow.
    pub fn push(&mut self, record: PatchRecord) {
        if self.ring.len() == self.capacity {
            let _ = self.ring.pop_front();
        }
        self.ring.push_back(record);
    }

    /// Returns the number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns true when no records are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Returns up to `limit` records, most recent first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<PatchRecord> {
        self.ring.iter().rev().take(limit).cloned().collect()
    }

    /// Adjusts the capacity, dropping the oldest records if shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.ring.len() > self.capacity {
            let _ = self.ring.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_config::{PatchSource, ProcessorId};

    fn record(id: &str) -> PatchRecord {
        PatchRecord {
            patch: ConfigPatch::new(
                id,
                ProcessorId::named("adaptive_topk"),
                "k_value",
                1i64,
                PatchSource::Manual,
            ),
            applied_at: 0,
            success: true,
            error: None,
            advisory: false,
        }
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut ring = HistoryRing::new(2);
        ring.push(record("a"));
        ring.push(record("b"));
        ring.push(record("c"));

        assert_eq!(ring.len(), 2);
        let recent = ring.recent(10);
        assert_eq!(recent[0].patch.patch_id, "c");
        assert_eq!(recent[1].patch.patch_id, "b");
    }

    #[test]
    fn recent_respects_limit() {
        let mut ring = HistoryRing::new(10);
        for id in ["a", "b", "c"] {
            ring.push(record(id));
        }
        let recent = ring.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].patch.patch_id, "c");
    }

    #[test]
    fn shrinking_capacity_drops_oldest() {
        let mut ring = HistoryRing::new(4);
        for id in ["a", "b", "c", "d"] {
            ring.push(record(id));
        }
        ring.set_capacity(2);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.recent(10)[1].patch.patch_id, "c");
    }
}
