//! Messages exchanged between the members of a cluster.

use std::fmt::Display;
use std::fmt::Formatter;

use serde::Deserialize;
use serde::Serialize;

use crate::storage::Snapshot;
use crate::Entry;
use crate::LogId;
use crate::MessageSummary;
use crate::NodeId;

/// A message from one member to another.
///
/// Every message carries the sender's term: a receiver that sees a higher term steps down to
/// follower, a message with a lower term is stale and is dropped or answered with a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: NodeId,
    pub to: NodeId,
    pub term: u64,
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// A candidate asks for a vote.
    ///
    /// `transfer` is set when the campaign was requested by the leader with `TimeoutNow`, in
    /// which case followers must not ignore it because of the leader lease.
    VoteRequest { last_log_id: LogId, transfer: bool },

    VoteResponse { granted: bool },

    /// Replicate `entries` following `prev_log_id`; an empty list is a heartbeat.
    AppendEntries {
        prev_log_id: LogId,
        entries: Vec<Entry>,
        leader_commit: u64,
    },

    /// On success `index` is the last index the follower durably matches the leader.
    /// On rejection `index` is the rejected `prev_log_id.index` and `hint` the follower's last index,
    /// the leader retries from before both of them.
    AppendEntriesResponse { success: bool, index: u64, hint: u64 },

    /// The whole snapshot, sent when the follower needs entries the leader already purged.
    InstallSnapshot { snapshot: Snapshot },

    InstallSnapshotResponse { last_index: u64 },

    /// Start an election right now; sent by a leader leaving the cluster.
    TimeoutNow,

    /// Connectivity probe, keeps the health record of every pair of members fresh.
    Probe,

    /// The sender considers the receiver removed from the cluster.
    MemberRemoved,
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}@{}:{}", self.from, self.to, self.term, self.body.summary())
    }
}

impl MessageSummary for Message {
    fn summary(&self) -> String {
        self.to_string()
    }
}

impl MessageSummary for MessageBody {
    fn summary(&self) -> String {
        match self {
            MessageBody::VoteRequest { last_log_id, transfer } => {
                format!("vote(last:{}, transfer:{})", last_log_id, transfer)
            }
            MessageBody::VoteResponse { granted } => format!("vote-resp(granted:{})", granted),
            MessageBody::AppendEntries {
                prev_log_id,
                entries,
                leader_commit,
            } => format!(
                "append(prev:{}, entries:{}, commit:{})",
                prev_log_id,
                entries.as_slice().summary(),
                leader_commit
            ),
            MessageBody::AppendEntriesResponse { success, index, hint } => {
                format!("append-resp(success:{}, index:{}, hint:{})", success, index, hint)
            }
            MessageBody::InstallSnapshot { snapshot } => format!("snapshot({})", snapshot.meta.last_log_id),
            MessageBody::InstallSnapshotResponse { last_index } => format!("snapshot-resp({})", last_index),
            MessageBody::TimeoutNow => "timeout-now".to_string(),
            MessageBody::Probe => "probe".to_string(),
            MessageBody::MemberRemoved => "member-removed".to_string(),
        }
    }
}
