//! Append-only replicated log
//!
//! Indices are 1-based; index 0 with term 0 is the empty-log sentinel that
//! every `AppendEntries` consistency check can match.
//!
//! A committed prefix can be compacted away once the state machine has
//! applied it. The log then remembers only the index and term of the last
//! discarded entry, which takes the sentinel's place in consistency checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::Command;

/// A single log entry. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: Command,
    pub timestamp: DateTime<Utc>,
}

/// Ordered sequence of log entries where
/// `entries[i].index == snapshot_index + i + 1`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusLog {
    #[serde(default)]
    snapshot_index: u64,
    #[serde(default)]
    snapshot_term: u64,
    entries: Vec<LogEntry>,
}

impl ConsensusLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the last entry, 0 when empty
    pub fn last_index(&self) -> u64 {
        self.snapshot_index + self.entries.len() as u64
    }

    /// Term of the last entry, 0 when empty
    pub fn last_term(&self) -> u64 {
        self.entries
            .last()
            .map_or(self.snapshot_term, |entry| entry.term)
    }

    /// Index of the last compacted entry, 0 before any compaction
    pub fn snapshot_index(&self) -> u64 {
        self.snapshot_index
    }

    /// Term of the last compacted entry
    pub fn snapshot_term(&self) -> u64 {
        self.snapshot_term
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are retained
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`, if retained
    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        if index <= self.snapshot_index {
            return None;
        }
        self.entries.get((index - self.snapshot_index - 1) as usize)
    }

    /// Term of the entry at `index`
    ///
    /// Known for retained entries and for the last compacted one (the
    /// sentinel index 0 before any compaction); `None` otherwise.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        self.get(index).map(|entry| entry.term)
    }

    /// Retained entries in index order
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Append a new entry at the tail and return its index
    pub fn append(&mut self, term: u64, command: Command, timestamp: DateTime<Utc>) -> u64 {
        let index = self.last_index() + 1;
        self.entries.push(LogEntry {
            term,
            index,
            command,
            timestamp,
        });
        index
    }

    /// Whether the log holds an entry at `index` with `term`
    ///
    /// Indices below the compaction point always match: only committed
    /// entries are compacted, and committed entries agree on every log.
    pub fn matches(&self, index: u64, term: u64) -> bool {
        index < self.snapshot_index || self.term_at(index) == Some(term)
    }

    /// Merge leader entries that follow `prev_index`
    ///
    /// Entries already present with the same term are kept; the first
    /// conflicting entry truncates the log from that point. Entries at or
    /// below the compaction point are skipped. Returns the index of the last
    /// entry covered by the request.
    pub fn append_from(&mut self, prev_index: u64, incoming: Vec<LogEntry>) -> u64 {
        let mut last_covered = prev_index;

        for (offset, entry) in incoming.into_iter().enumerate() {
            let index = prev_index + offset as u64 + 1;
            last_covered = index;
            if index <= self.snapshot_index {
                continue;
            }

            match self.term_at(index) {
                Some(term) if term == entry.term => continue,
                Some(_) => self
                    .entries
                    .truncate((index - self.snapshot_index - 1) as usize),
                None => {}
            }

            self.entries.push(LogEntry { index, ..entry });
        }

        last_covered
    }

    /// Clone up to `limit` entries starting at `index` (inclusive)
    ///
    /// Empty when `index` falls inside the compacted prefix.
    pub fn entries_from(&self, index: u64, limit: usize) -> Vec<LogEntry> {
        let index = index.max(1);
        if index <= self.snapshot_index {
            return Vec::new();
        }
        let start = (index - self.snapshot_index - 1) as usize;
        self.entries
            .get(start..)
            .map(|tail| tail.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Discard every entry up to and including `upto`
    ///
    /// Returns how many entries were dropped; nothing happens unless `upto`
    /// is a retained index.
    pub fn compact(&mut self, upto: u64) -> usize {
        let Some(term) = self.get(upto).map(|entry| entry.term) else {
            return 0;
        };
        let dropped = (upto - self.snapshot_index) as usize;
        self.entries.drain(..dropped);
        self.snapshot_index = upto;
        self.snapshot_term = term;
        dropped
    }

    /// Adopt a leader snapshot covering everything up to `index`
    ///
    /// A retained entry matching `index` and `term` keeps the suffix after
    /// it; otherwise the whole log is replaced by the snapshot point.
    pub fn install_snapshot(&mut self, index: u64, term: u64) {
        if index > self.snapshot_index && self.term_at(index) == Some(term) {
            self.compact(index);
            return;
        }
        self.entries.clear();
        self.snapshot_index = index;
        self.snapshot_term = term;
    }

    /// Whether indices are sequential and terms never decrease
    pub fn is_well_formed(&self) -> bool {
        self.entries
            .iter()
            .enumerate()
            .all(|(i, entry)| entry.index == self.snapshot_index + i as u64 + 1)
            && self.entries.windows(2).all(|pair| pair[0].term <= pair[1].term)
            && self
                .entries
                .first()
                .is_none_or(|first| first.term >= self.snapshot_term)
    }

    /// Raft's up-to-date check for vote granting
    pub fn is_at_least_as_up_to_date(&self, last_index: u64, last_term: u64) -> bool {
        let own_term = self.last_term();
        last_term > own_term || (last_term == own_term && last_index >= self.last_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: u64, index: u64, key: &str) -> LogEntry {
        LogEntry {
            term,
            index,
            command: Command::set(key, 1),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_append_assigns_sequential_indices() {
        let mut log = ConsensusLog::new();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);

        assert_eq!(log.append(1, Command::set("a", 1), Utc::now()), 1);
        assert_eq!(log.append(2, Command::set("b", 2), Utc::now()), 2);

        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 2);
        assert_eq!(log.get(1).map(|e| e.term), Some(1));
        assert!(log.get(0).is_none());
        assert!(log.get(3).is_none());
    }

    #[test]
    fn test_matches_sentinel_and_entries() {
        let mut log = ConsensusLog::new();
        assert!(log.matches(0, 0));
        assert!(!log.matches(1, 1));

        log.append(3, Command::set("a", 1), Utc::now());
        assert!(log.matches(1, 3));
        assert!(!log.matches(1, 2));
    }

    #[test]
    fn test_append_from_truncates_conflicts() {
        let mut log = ConsensusLog::new();
        log.append(1, Command::set("a", 1), Utc::now());
        log.append(1, Command::set("b", 1), Utc::now());
        log.append(2, Command::set("c", 1), Utc::now());

        let last = log.append_from(1, vec![entry(1, 2, "b"), entry(3, 3, "x")]);

        assert_eq!(last, 3);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.term_at(3), Some(3));
        assert_eq!(log.get(3).map(|e| e.command.key()), Some("x"));
    }

    #[test]
    fn test_append_from_is_idempotent_for_stale_requests() {
        let mut log = ConsensusLog::new();
        log.append(1, Command::set("a", 1), Utc::now());
        log.append(1, Command::set("b", 1), Utc::now());

        // A delayed request carrying only the first entry must not drop the second
        let last = log.append_from(0, vec![entry(1, 1, "a")]);
        assert_eq!(last, 1);
        assert_eq!(log.last_index(), 2);
    }

    #[test]
    fn test_up_to_date_comparison() {
        let mut log = ConsensusLog::new();
        log.append(2, Command::set("a", 1), Utc::now());
        log.append(2, Command::set("b", 1), Utc::now());

        assert!(log.is_at_least_as_up_to_date(2, 2));
        assert!(log.is_at_least_as_up_to_date(1, 3));
        assert!(!log.is_at_least_as_up_to_date(1, 2));
        assert!(!log.is_at_least_as_up_to_date(5, 1));
    }

    #[test]
    fn test_entries_from() {
        let mut log = ConsensusLog::new();
        for i in 0..4 {
            log.append(1, Command::set(format!("k{i}"), i), Utc::now());
        }
        assert_eq!(log.entries_from(3, usize::MAX).len(), 2);
        assert_eq!(log.entries_from(1, usize::MAX).len(), 4);
        assert_eq!(log.entries_from(0, usize::MAX).len(), 4);
        assert_eq!(log.entries_from(1, 3).len(), 3);
        assert!(log.entries_from(9, usize::MAX).is_empty());
        assert!(log.is_well_formed());
    }

    fn filled(count: u64) -> ConsensusLog {
        let mut log = ConsensusLog::new();
        for i in 0..count {
            log.append(1 + i / 3, Command::set(format!("k{i}"), i), Utc::now());
        }
        log
    }

    #[test]
    fn test_compact_keeps_indices_and_terms() {
        let mut log = filled(6);
        assert_eq!(log.compact(4), 4);

        assert_eq!(log.snapshot_index(), 4);
        assert_eq!(log.snapshot_term(), 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.last_index(), 6);
        assert!(log.get(4).is_none());
        assert_eq!(log.get(5).map(|e| e.index), Some(5));
        assert_eq!(log.term_at(4), Some(2));
        assert_eq!(log.term_at(3), None);
        assert!(log.matches(4, 2));
        assert!(log.matches(2, 1));
        assert!(log.is_well_formed());

        // Already compacted or not yet appended
        assert_eq!(log.compact(3), 0);
        assert_eq!(log.compact(9), 0);
    }

    #[test]
    fn test_compacting_everything_keeps_last_term() {
        let mut log = filled(3);
        log.compact(3);

        assert!(log.is_empty());
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.last_term(), 1);
        assert_eq!(log.append(2, Command::set("next", 1), Utc::now()), 4);
        assert!(log.is_at_least_as_up_to_date(4, 2));
        assert!(!log.is_at_least_as_up_to_date(3, 1));
    }

    #[test]
    fn test_entries_from_and_append_after_compaction() {
        let mut log = filled(6);
        log.compact(4);

        assert!(log.entries_from(3, usize::MAX).is_empty());
        assert_eq!(log.entries_from(5, usize::MAX).len(), 2);

        // A delayed request overlapping the compacted prefix
        let last = log.append_from(2, vec![entry(1, 3, "k2"), entry(2, 4, "k3"), entry(2, 5, "k4")]);
        assert_eq!(last, 5);
        assert_eq!(log.last_index(), 6);

        let last = log.append_from(4, vec![entry(3, 5, "x")]);
        assert_eq!(last, 5);
        assert_eq!(log.last_index(), 5);
        assert_eq!(log.term_at(5), Some(3));
        assert!(log.is_well_formed());
    }

    #[test]
    fn test_install_snapshot_keeps_matching_suffix() {
        let mut log = filled(6);
        log.install_snapshot(4, 2);
        assert_eq!(log.snapshot_index(), 4);
        assert_eq!(log.last_index(), 6);

        let mut diverged = filled(6);
        diverged.install_snapshot(5, 9);
        assert_eq!(diverged.snapshot_index(), 5);
        assert_eq!(diverged.last_index(), 5);
        assert_eq!(diverged.last_term(), 9);
        assert!(diverged.is_empty());

        let mut short = filled(2);
        short.install_snapshot(10, 4);
        assert_eq!(short.last_index(), 10);
        assert!(short.matches(10, 4));
    }
}
