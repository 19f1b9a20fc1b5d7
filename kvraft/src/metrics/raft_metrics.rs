use std::sync::Arc;

use crate::error::Fatal;
use crate::LogId;
use crate::Membership;
use crate::MessageSummary;
use crate::NodeId;
use crate::ServerState;

/// A set of metrics describing the current state of a raft node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaftMetrics {
    /// `Err` once the node stopped, with the reason.
    pub running_state: Result<(), Fatal>,

    pub id: NodeId,

    // ---
    // --- data ---
    // ---
    pub current_term: u64,

    /// The last log index appended to this node's log.
    pub last_log_index: u64,

    /// The last log index known to be committed.
    pub commit_index: u64,

    /// The last log index applied to the state machine.
    pub last_applied: u64,

    /// The last log included in the latest snapshot.
    pub snapshot: Option<LogId>,

    // ---
    // --- cluster ---
    // ---
    pub state: ServerState,

    pub current_leader: Option<NodeId>,

    /// The effective membership, i.e., the last applied one.
    pub membership: Arc<Membership>,

    /// Ids of the voters this node considers healthy.
    pub healthy: Vec<NodeId>,
}

impl RaftMetrics {
    pub(crate) fn new_initial(id: NodeId) -> Self {
        Self {
            running_state: Ok(()),
            id,
            current_term: 0,
            last_log_index: 0,
            commit_index: 0,
            last_applied: 0,
            snapshot: None,
            state: ServerState::default(),
            current_leader: None,
            membership: Arc::new(Membership::default()),
            healthy: vec![],
        }
    }
}

impl MessageSummary for RaftMetrics {
    fn summary(&self) -> String {
        format!(
            "Metrics{{id:{},{:?}, term:{}, last_log:{}, commit:{}, last_applied:{}, leader:{:?}, membership:{}, snapshot:{:?}, healthy:{:?}, running:{:?}}}",
            self.id,
            self.state,
            self.current_term,
            self.last_log_index,
            self.commit_index,
            self.last_applied,
            self.current_leader,
            self.membership.summary(),
            self.snapshot,
            self.healthy,
            self.running_state,
        )
    }
}
