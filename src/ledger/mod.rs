//! Dedup ledger: the set of fingerprints that have already been alerted on.
//!
//! Membership is tracked in a `HashSet`, insertion order in a `VecDeque`.
//! The ledger is allowed to grow past its cap between cycles; `compact()`
//! trims it back to the most recently inserted `compact_target` entries.
//! An evicted fingerprint looks novel again, so a long-lived order can
//! re-alert after heavy compaction. That is accepted.

use crate::fingerprint::Fingerprint;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

#[derive(Debug)]
pub struct DedupLedger {
    seen: HashSet<Fingerprint>,
    /// Oldest insertion at the front.
    order: VecDeque<Fingerprint>,
    max_size: usize,
    compact_target: usize,
}

impl DedupLedger {
    /// `compact_target` is clamped below `max_size`.
    pub fn new(max_size: usize, compact_target: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            max_size,
            compact_target: compact_target.min(max_size - 1),
        }
    }

    pub fn is_novel(&self, fp: &Fingerprint) -> bool {
        !self.seen.contains(fp)
    }

    /// Insert `fp`. Re-recording a member keeps its original position.
    pub fn record_seen(&mut self, fp: Fingerprint) {
        if self.seen.insert(fp.clone()) {
            self.order.push_back(fp);
        }
    }

    /// Novelty check and insert in one step. Returns `true` if `fp` was new.
    pub fn check_and_record(&mut self, fp: &Fingerprint) -> bool {
        if self.seen.contains(fp) {
            return false;
        }
        self.record_seen(fp.clone());
        true
    }

    pub fn needs_compaction(&self) -> bool {
        self.seen.len() > self.max_size
    }

    /// Drop all but the `compact_target` most recent insertions once the
    /// ledger is over its cap. Returns the number evicted.
    pub fn compact(&mut self) -> usize {
        if !self.needs_compaction() {
            return 0;
        }
        let before = self.seen.len();
        while self.order.len() > self.compact_target {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        let evicted = before - self.seen.len();
        debug!(
            evicted = evicted,
            remaining = self.seen.len(),
            "dedup ledger compacted"
        );
        evicted
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn compact_target(&self) -> usize {
        self.compact_target
    }
}
