//! The persistence layer: the raft log with its hard state, and the snapshot store.
//!
//! Every write method returns only once the data is durable (fsync or an equivalent). The core
//! never sends a message acknowledging an entry or a vote before the corresponding write returned.

mod entries;

use std::fmt::Debug;
use std::ops::Range;

use async_trait::async_trait;
pub use entries::entries_from;
use serde::Deserialize;
use serde::Serialize;

use crate::Entry;
use crate::LogId;
use crate::Membership;
use crate::NodeId;
use crate::StorageError;

/// The state that must survive a restart before anything derived from it is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub commit_index: u64,
}

/// The identity of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// The last log included in the snapshot, i.e. `(lastIncludedTerm, lastIncludedIndex)`.
    pub last_log_id: LogId,

    /// The membership effective once all logs up to `last_log_id` are applied.
    pub last_membership: Membership,
}

/// A compacted state machine as of `meta.last_log_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,

    /// The blob built by [`KvStateMachine::snapshot`](crate::KvStateMachine::snapshot).
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogState {
    /// The first index still present in the log, if the log is not empty.
    pub first_index: Option<u64>,

    /// The last entry in the log.
    pub last_log_id: Option<LogId>,
}

/// The durable, append-only raft log plus the hard state.
#[async_trait]
pub trait RaftLogStorage: Send + Sync + 'static {
    async fn get_log_state(&self) -> Result<LogState, StorageError>;

    /// Returns `None` for a pristine store.
    async fn read_hard_state(&self) -> Result<Option<HardState>, StorageError>;

    async fn save_hard_state(&self, hs: &HardState) -> Result<(), StorageError>;

    /// Append entries with contiguous indexes right after the last entry.
    ///
    /// When the log is empty, e.g. after being truncated down to a snapshot, the first entry may
    /// have any index.
    async fn append(&self, entries: &[Entry]) -> Result<(), StorageError>;

    /// Returns the entries present in `range`, in index order.
    async fn try_get_log_entries(&self, range: Range<u64>) -> Result<Vec<Entry>, StorageError>;

    /// Delete every entry with `index >= since`; used when a follower's log conflicts with the
    /// leader's.
    async fn truncate_since(&self, since: u64) -> Result<(), StorageError>;

    /// Delete every entry with `index < before`; they are covered by a durable snapshot.
    async fn truncate_before(&self, before: u64) -> Result<(), StorageError>;
}

/// Durable store of compacted checkpoints.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Durably store a snapshot tagged with `snapshot.meta.last_log_id`.
    async fn create(&self, snapshot: &Snapshot) -> Result<(), StorageError>;

    /// Returns the snapshot with the highest last log index.
    async fn latest(&self) -> Result<Option<Snapshot>, StorageError>;

    /// Delete snapshots strictly older than `last_log_id`.
    async fn purge_before(&self, last_log_id: LogId) -> Result<(), StorageError>;
}
