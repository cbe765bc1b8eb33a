//! Ordered timestamp buffer shared by the pending, acknowledged and
//! spot-check sets.
//!
//! Insertion order is significant: for the pending set it is send order, and
//! a match anywhere but the front means an earlier entry is still
//! outstanding. All removals compact in place in a single O(n) pass and keep
//! the relative order of what remains. Positions are not stable across
//! removals.

use chrono::{DateTime, Utc};

/// A timestamp removed by [`EntryBuffer::take_matching`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Matched {
    /// Index the entry occupied before the call.
    pub position: usize,
    /// Retained entries that precede the match. Filled only when
    /// `position != 0`.
    pub earlier: Vec<DateTime<Utc>>,
}

impl Matched {
    pub fn is_out_of_order(&self) -> bool {
        self.position != 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct EntryBuffer {
    entries: Vec<DateTime<Utc>>,
}

impl EntryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ts: DateTime<Utc>) {
        self.entries.push(ts);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.entries.last().copied()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.entries.contains(&ts)
    }

    /// Copy of the current contents, so callers can work without the lock.
    pub fn snapshot(&self) -> Vec<DateTime<Utc>> {
        self.entries.clone()
    }

    /// Remove every entry equal to `ts`.
    ///
    /// Does not stop at the first hit: identical timestamps are
    /// indistinguishable, so all of them are taken in one call.
    pub fn take_matching(&mut self, ts: DateTime<Utc>) -> Vec<Matched> {
        let mut matched = Vec::new();
        let mut k = 0;
        for i in 0..self.entries.len() {
            let e = self.entries[i];
            if e == ts {
                let earlier = if i != 0 {
                    self.entries[..k].to_vec()
                } else {
                    Vec::new()
                };
                matched.push(Matched {
                    position: i,
                    earlier,
                });
            } else {
                if i != k {
                    self.entries[k] = e;
                }
                k += 1;
            }
        }
        self.entries.truncate(k);
        matched
    }

    /// Remove entries strictly older than `cutoff`, returned in buffer order.
    pub fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut evicted = Vec::new();
        self.entries.retain(|e| {
            if *e < cutoff {
                evicted.push(*e);
                false
            } else {
                true
            }
        });
        evicted
    }
}
