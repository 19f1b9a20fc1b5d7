//! Error types exposed by this crate.

use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::time::Duration;

use anyerror::AnyError;
use serde::Deserialize;
use serde::Serialize;

use crate::LogId;
use crate::NodeId;

/// What it is operating on when a storage error occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSubject {
    /// A general storage error
    Store,

    /// HardState related error.
    HardState,

    /// Error that is happened when operating a series of log entries
    Logs,

    /// Error about a single log entry
    Log(LogId),

    /// Error about a single log entry without knowing the log term.
    LogIndex(u64),

    /// Error happened when operating state machine.
    StateMachine,

    /// Error happened when operating snapshot.
    Snapshot(LogId),
}

/// What it is doing when a storage error occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorVerb {
    Read,
    Write,
    Seek,
    Delete,
}

/// Failure of the persistence layer.
///
/// The durability contract can not be kept once this happens, thus it is always fatal to the node
/// that observes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub struct StorageError {
    pub subject: ErrorSubject,
    pub verb: ErrorVerb,
    pub source: AnyError,
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "when {:?} {:?}: {}", self.verb, self.subject, self.source)
    }
}

impl StorageError {
    pub fn new(subject: ErrorSubject, verb: ErrorVerb, source: AnyError) -> Self {
        Self { subject, verb, source }
    }

    pub fn from_io_error(subject: ErrorSubject, verb: ErrorVerb, io_error: std::io::Error) -> Self {
        Self::new(subject, verb, AnyError::new(&io_error))
    }

    pub fn read_logs(e: &(impl std::error::Error + 'static)) -> Self {
        Self::new(ErrorSubject::Logs, ErrorVerb::Read, AnyError::new(e))
    }

    pub fn write_logs(e: &(impl std::error::Error + 'static)) -> Self {
        Self::new(ErrorSubject::Logs, ErrorVerb::Write, AnyError::new(e))
    }

    pub fn read_hard_state(e: &(impl std::error::Error + 'static)) -> Self {
        Self::new(ErrorSubject::HardState, ErrorVerb::Read, AnyError::new(e))
    }

    pub fn write_hard_state(e: &(impl std::error::Error + 'static)) -> Self {
        Self::new(ErrorSubject::HardState, ErrorVerb::Write, AnyError::new(e))
    }

    pub fn read_snapshot(log_id: LogId, e: &(impl std::error::Error + 'static)) -> Self {
        Self::new(ErrorSubject::Snapshot(log_id), ErrorVerb::Read, AnyError::new(e))
    }

    pub fn write_snapshot(log_id: LogId, e: &(impl std::error::Error + 'static)) -> Self {
        Self::new(ErrorSubject::Snapshot(log_id), ErrorVerb::Write, AnyError::new(e))
    }

    pub fn state_machine(verb: ErrorVerb, e: &(impl std::error::Error + 'static)) -> Self {
        Self::new(ErrorSubject::StateMachine, verb, AnyError::new(e))
    }
}

/// Fatal is unrecoverable and shuts down the raft node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Fatal {
    #[error(transparent)]
    StorageError(#[from] StorageError),

    /// The node learned that it is no longer a member of the cluster.
    #[error("node {0} has been removed from the cluster")]
    Removed(NodeId),

    #[error("panicked")]
    Panicked,

    /// Raft stopped normally.
    #[error("raft stopped")]
    Stopped,
}

/// The operation requires leadership; the caller should retry on `leader_id` if it is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub struct NotLeader {
    pub leader_id: Option<NodeId>,
}

impl Display for NotLeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.leader_id {
            Some(leader_id) => write!(f, "not leader; forward request to leader {}", leader_id),
            None => write!(f, "not leader; cluster has no leader"),
        }
    }
}

/// The request may or may not take effect later; it is always safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Unavailable {
    #[error("timeout after {timeout:?} waiting for the request to commit")]
    Timeout { timeout: Duration },

    #[error("leadership lost before the request was applied")]
    LeadershipLost,

    #[error("raft is shutting down")]
    ShuttingDown,
}

/// The state machine rejected a committed `Data` entry.
///
/// `Rejected` is reported to the proposer and the apply loop goes on; `Storage` means the backend
/// is corrupted and halts the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ApplyError {
    #[error("request rejected by state machine: {0}")]
    Rejected(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ClientWriteError {
    #[error(transparent)]
    NotLeader(#[from] NotLeader),

    #[error(transparent)]
    Unavailable(#[from] Unavailable),

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Fatal(#[from] Fatal),
}

/// A membership change would leave the cluster without a quorum it can rely on.
///
/// No log entry is created for a rejected change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error(
    "quorum would be unsafe for {change}: {healthy} healthy voters, need more than {} of {prospective}; the cluster may be left with no leader",
    .prospective / 2
)]
pub struct QuorumUnsafe {
    pub change: String,
    pub healthy: usize,
    pub prospective: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ChangeMembershipError {
    #[error(transparent)]
    NotLeader(#[from] NotLeader),

    #[error(transparent)]
    QuorumUnsafe(#[from] QuorumUnsafe),

    #[error(transparent)]
    Unavailable(#[from] Unavailable),

    #[error("membership change {log_id} is not applied yet")]
    InProgress { log_id: LogId },

    #[error("member {id} not found")]
    MemberNotFound { id: NodeId },

    #[error("member id {id} is already used or has been removed")]
    MemberExists { id: NodeId },

    #[error("member {id} is not a learner")]
    NotLearner { id: NodeId },

    #[error("learner {id} is not ready: matched {matched} of {leader_last} logs")]
    LearnerNotReady { id: NodeId, matched: u64, leader_last: u64 },

    #[error("new membership can not be empty")]
    EmptyMembership,

    #[error(transparent)]
    Fatal(#[from] Fatal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum InitializeError {
    #[error("can not initialize a node that already has state: term={term}, last_log={last_log_id:?}")]
    NotAllowed { term: u64, last_log_id: Option<LogId> },

    #[error("initial membership can not be empty or without voters")]
    EmptyMembership,

    #[error(transparent)]
    Fatal(#[from] Fatal),
}

/// Error that occurs when delivering a message to a peer.
///
/// They are never surfaced to API callers: they only count as failures for the health monitor and
/// the message is retried by the protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RPCError {
    #[error(transparent)]
    Timeout(#[from] Timeout),

    #[error(transparent)]
    Unreachable(#[from] Unreachable),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("NetworkError: {source}")]
pub struct NetworkError {
    #[from]
    source: AnyError,
}

impl NetworkError {
    pub fn new<E: std::error::Error + 'static>(e: &E) -> Self {
        Self {
            source: AnyError::new(e),
        }
    }
}

/// The peer is known to be down or partitioned away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unreachable node: {source}")]
pub struct Unreachable {
    #[from]
    source: AnyError,
}

impl Unreachable {
    pub fn new<E: std::error::Error + 'static>(e: &E) -> Self {
        Self {
            source: AnyError::new(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("timeout after {timeout:?} when sending to {target}")]
pub struct Timeout {
    pub target: NodeId,
    pub timeout: Duration,
}
