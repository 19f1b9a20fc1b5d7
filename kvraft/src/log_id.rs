use std::fmt::Display;
use std::fmt::Formatter;

use serde::Deserialize;
use serde::Serialize;

use crate::MessageSummary;

/// The identity of a member of the cluster.
pub type NodeId = u64;

/// The identity of a raft log.
///
/// `(term, index)` uniquely identifies an entry cluster wide. The derived ordering compares `term`
/// first, which is exactly the "more up-to-date log" relation used when granting votes.
#[derive(Debug, Default, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogId {
    pub term: u64,
    pub index: u64,
}

impl LogId {
    pub fn new(term: u64, index: u64) -> Self {
        LogId { term, index }
    }
}

impl Display for LogId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}

impl MessageSummary for LogId {
    fn summary(&self) -> String {
        self.to_string()
    }
}
