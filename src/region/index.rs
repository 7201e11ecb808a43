//! Fast-forward index
//!
//! Derived map from sequence number to record location. Rebuilt by the
//! open-time scan and kept current by append/reclaim; never persisted.

use std::collections::BTreeMap;

use super::page::RecordLoc;

/// In-memory sequence → location map
#[derive(Debug, Default)]
pub(crate) struct FastForwardIndex {
    entries: BTreeMap<u64, RecordLoc>,
}

impl FastForwardIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, loc: RecordLoc) {
        self.entries.insert(loc.seq, loc);
    }

    /// Exact lookup
    pub fn get(&self, seq: u64) -> Option<RecordLoc> {
        self.entries.get(&seq).copied()
    }

    /// First record with sequence `>= seq`
    pub fn first_from(&self, seq: u64) -> Option<RecordLoc> {
        self.entries.range(seq..).next().map(|(_, loc)| *loc)
    }

    /// Drop every entry that lives in `page`
    pub fn remove_page(&mut self, page: usize, first: u64, last: u64) {
        let doomed: Vec<u64> = self
            .entries
            .range(first..=last)
            .filter(|(_, loc)| loc.page == page)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in doomed {
            self.entries.remove(&seq);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
