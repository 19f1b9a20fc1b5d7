use std::collections::VecDeque;

use crate::Entry;
use crate::LogId;

/// The in-memory mirror of the persistent log.
///
/// It holds every entry after `purged`: the entries up to and including `purged` are covered by a
/// snapshot and gone. `purged` is `(0,0)` for a log that has never been compacted, standing for
/// the empty prefix every log shares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RaftLog {
    purged: LogId,
    entries: VecDeque<Entry>,
}

impl RaftLog {
    pub(crate) fn new(purged: LogId, entries: impl IntoIterator<Item = Entry>) -> Self {
        let mut log = Self {
            purged,
            entries: VecDeque::new(),
        };
        log.append(entries);
        log
    }

    pub(crate) fn purged(&self) -> LogId {
        self.purged
    }

    pub(crate) fn first_index(&self) -> u64 {
        self.purged.index + 1
    }

    pub(crate) fn last_log_id(&self) -> LogId {
        self.entries.back().map(|e| e.log_id).unwrap_or(self.purged)
    }

    pub(crate) fn last_index(&self) -> u64 {
        self.last_log_id().index
    }

    pub(crate) fn get(&self, index: u64) -> Option<&Entry> {
        if index <= self.purged.index {
            return None;
        }
        self.entries.get((index - self.first_index()) as usize)
    }

    /// The term of the entry at `index`, if it is known.
    pub(crate) fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.purged.index {
            return Some(self.purged.term);
        }
        self.get(index).map(|e| e.log_id.term)
    }

    pub(crate) fn log_id_at(&self, index: u64) -> Option<LogId> {
        self.term_at(index).map(|term| LogId::new(term, index))
    }

    /// Whether this log holds `log_id`, in which case, by the log matching property, all the
    /// entries before it are the same as in the log `log_id` comes from.
    pub(crate) fn matches(&self, log_id: &LogId) -> bool {
        self.term_at(log_id.index) == Some(log_id.term)
    }

    /// Clone at most `max` entries from index `start` (inclusive) to `end` (exclusive).
    pub(crate) fn slice(&self, start: u64, end: u64, max: u64) -> Vec<Entry> {
        let start = start.max(self.first_index());
        let end = end.min(start.saturating_add(max)).min(self.last_index() + 1);

        (start..end).filter_map(|i| self.get(i).cloned()).collect()
    }

    pub(crate) fn append(&mut self, entries: impl IntoIterator<Item = Entry>) {
        for e in entries {
            debug_assert_eq!(e.log_id.index, self.last_index() + 1, "log must be contiguous");
            self.entries.push_back(e);
        }
    }

    /// Returns the index of the first entry in `entries` that conflicts with this log, or that this
    /// log does not have yet.
    ///
    /// `entries` must be contiguous and start right after a matching entry.
    pub(crate) fn find_first_new(&self, entries: &[Entry]) -> Option<usize> {
        entries.iter().position(|e| !self.matches(&e.log_id))
    }

    /// Delete every entry with `index >= since`.
    pub(crate) fn truncate_since(&mut self, since: u64) {
        let keep = since.saturating_sub(self.first_index()) as usize;
        self.entries.truncate(keep);
    }

    /// Delete every entry up to and including `upto`.
    pub(crate) fn purge_upto(&mut self, upto: u64) {
        if upto <= self.purged.index {
            return;
        }

        let term = match self.term_at(upto) {
            Some(t) => t,
            None => return,
        };

        while let Some(e) = self.entries.front() {
            if e.log_id.index > upto {
                break;
            }
            self.entries.pop_front();
        }
        self.purged = LogId::new(term, upto);
    }

    /// Discard everything and restart the log right after `snapshot`.
    pub(crate) fn reset_to(&mut self, snapshot: LogId) {
        self.entries.clear();
        self.purged = snapshot;
    }

    pub(crate) fn iter_from(&self, start: u64) -> impl Iterator<Item = &Entry> {
        let skip = start.saturating_sub(self.first_index()) as usize;
        self.entries.iter().skip(skip)
    }
}
