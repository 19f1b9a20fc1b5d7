use crate::error::Fatal;
use crate::error::RPCError;
use crate::storage::SnapshotMeta;
use crate::KvResponse;
use crate::LogId;
use crate::Membership;
use crate::NodeId;

/// A message from an internal task to the [`RaftCore`](crate::core::RaftCore).
#[derive(Debug)]
pub(crate) enum Notify {
    /// The outcome of delivering a message to `target`.
    Sent {
        target: NodeId,
        result: Result<(), RPCError>,
    },

    /// The outcome of sending the latest snapshot to `target`.
    SnapshotSent { target: NodeId, success: bool },

    /// Entries up to `last_applied` are applied, by applying `results` or restoring a snapshot.
    Applied {
        last_applied: LogId,
        results: Vec<Applied>,
    },

    /// A snapshot is durable.
    SnapshotBuilt { meta: SnapshotMeta },

    Fatal { error: Fatal },
}

/// The result of applying one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Applied {
    pub(crate) log_id: LogId,
    pub(crate) outcome: ApplyOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApplyOutcome {
    Blank,

    /// `Err` holds the reason the state machine rejected the request.
    Data(Result<KvResponse, String>),

    /// The membership effective after this entry.
    Membership(Membership),
}
