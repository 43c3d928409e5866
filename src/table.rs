//! Tracks in-flight probes for the hop currently being traced, keyed by
//! sequence number so a returning response can be matched back to the
//! probe that caused it in constant time. The table holds at most
//! `probes_per_hop` entries at a time, since only one hop is active at
//! a time.

use std::collections::HashMap;
use std::time::Instant;

/// A probe that has been sent but not yet matched or expired.
#[derive(Debug, Clone, Copy)]
pub struct InFlightProbe {
    pub sequence: u16,
    pub hop: u8,
    pub probe_index: usize,
    pub sent_at: Instant,
    pub deadline: Instant,
}

/// In-flight probe storage keyed by sequence number.
#[derive(Debug, Default)]
pub struct ProbeTable {
    entries: HashMap<u16, InFlightProbe>,
    order: Vec<u16>,
}

impl ProbeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Inserts a newly-sent probe. O(1).
    pub fn insert(&mut self, probe: InFlightProbe) {
        self.order.push(probe.sequence);
        self.entries.insert(probe.sequence, probe);
    }

    /// Removes and returns the in-flight probe for `sequence`, if any. O(1).
    pub fn match_probe(&mut self, sequence: u16) -> Option<InFlightProbe> {
        let probe = self.entries.remove(&sequence)?;
        self.order.retain(|&s| s != sequence);
        Some(probe)
    }

    /// Removes and returns every entry whose deadline has elapsed, in
    /// insertion order.
    pub fn expire(&mut self, now: Instant) -> Vec<InFlightProbe> {
        let mut expired = Vec::new();
        let mut remaining = Vec::with_capacity(self.order.len());
        for sequence in self.order.drain(..) {
            let is_expired = self.entries.get(&sequence).is_some_and(|probe| probe.deadline <= now);
            if !is_expired {
                if self.entries.contains_key(&sequence) {
                    remaining.push(sequence);
                }
                continue;
            }
            if let Some(probe) = self.entries.remove(&sequence) {
                expired.push(probe);
            }
        }
        self.order = remaining;
        expired
    }

    /// The earliest deadline among all in-flight probes, used by the Engine
    /// to bound how long it waits in `receive`.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|p| p.deadline).min()
    }

    /// Discards all in-flight probes, e.g. on `stop` or hop completion.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn probe(sequence: u16, deadline_offset_ms: u64, now: Instant) -> InFlightProbe {
        InFlightProbe {
            sequence,
            hop: 1,
            probe_index: 0,
            sent_at: now,
            deadline: now + Duration::from_millis(deadline_offset_ms),
        }
    }

    #[test]
    fn insert_and_match_is_one_shot() {
        let now = Instant::now();
        let mut table = ProbeTable::new();
        table.insert(probe(1, 100, now));
        assert_eq!(table.len(), 1);

        let matched = table.match_probe(1);
        assert!(matched.is_some());
        assert!(table.is_empty());
        assert!(table.match_probe(1).is_none(), "matching twice must not double-fire");
    }

    #[test]
    fn expire_returns_only_elapsed_entries_in_insertion_order() {
        let now = Instant::now();
        let mut table = ProbeTable::new();
        table.insert(probe(1, 10, now));
        table.insert(probe(2, 1000, now));
        table.insert(probe(3, 20, now));

        let expired = table.expire(now + Duration::from_millis(50));
        let sequences: Vec<u16> = expired.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![1, 3]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn next_deadline_is_the_earliest() {
        let now = Instant::now();
        let mut table = ProbeTable::new();
        assert!(table.next_deadline().is_none());

        table.insert(probe(1, 500, now));
        table.insert(probe(2, 100, now));
        assert_eq!(table.next_deadline(), Some(now + Duration::from_millis(100)));
    }

    #[test]
    fn clear_drops_all_entries() {
        let now = Instant::now();
        let mut table = ProbeTable::new();
        table.insert(probe(1, 10, now));
        table.insert(probe(2, 20, now));
        table.clear();
        assert!(table.is_empty());
        assert!(table.next_deadline().is_none());
    }
}
