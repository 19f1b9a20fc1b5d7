use std::fmt::Display;
use std::fmt::Formatter;

use serde::Deserialize;
use serde::Serialize;

use crate::KvRequest;
use crate::LogId;
use crate::Member;
use crate::Membership;
use crate::MessageSummary;
use crate::NodeId;

/// The kind of a log entry, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Blank,
    Data,
    AddMember,
    RemoveMember,
    ConfigChange,
}

/// Log entry payload variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// An empty payload committed by a new leader.
    Blank,

    /// A state machine mutation.
    Data(KvRequest),

    /// Add a voter or a learner.
    AddMember(Member),

    /// Remove a voter or a learner; its id can never be reused.
    RemoveMember(NodeId),

    /// Replace the whole membership: used for bootstrap, learner promotion and joint changes.
    ConfigChange(Membership),
}

impl EntryPayload {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryPayload::Blank => EntryKind::Blank,
            EntryPayload::Data(_) => EntryKind::Data,
            EntryPayload::AddMember(_) => EntryKind::AddMember,
            EntryPayload::RemoveMember(_) => EntryKind::RemoveMember,
            EntryPayload::ConfigChange(_) => EntryKind::ConfigChange,
        }
    }

    pub fn is_membership(&self) -> bool {
        !matches!(self, EntryPayload::Blank | EntryPayload::Data(_))
    }
}

impl MessageSummary for EntryPayload {
    fn summary(&self) -> String {
        match self {
            EntryPayload::Blank => "blank".to_string(),
            EntryPayload::Data(req) => req.to_string(),
            EntryPayload::AddMember(m) => format!("add:{}", m),
            EntryPayload::RemoveMember(id) => format!("remove:{}", id),
            EntryPayload::ConfigChange(m) => format!("config:{}", m.summary()),
        }
    }
}

/// A Raft log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub log_id: LogId,
    pub payload: EntryPayload,
}

impl Entry {
    pub fn new(log_id: LogId, payload: EntryPayload) -> Self {
        Self { log_id, payload }
    }

    pub fn new_blank(log_id: LogId) -> Self {
        Self::new(log_id, EntryPayload::Blank)
    }
}

impl Display for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.log_id, self.payload.summary())
    }
}

impl MessageSummary for Entry {
    fn summary(&self) -> String {
        self.to_string()
    }
}
