use serde::Deserialize;
use serde::Serialize;

/// All possible states of a Raft node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    /// The node is not a voter of the membership it knows of: a pristine node waiting to be
    /// initialized or to hear from a leader, or a learner.
    Learner,
    /// The node is replicating logs from the leader.
    Follower,
    /// The node is campaigning to become the cluster leader.
    Candidate,
    /// The node is the Raft cluster leader.
    Leader,
    /// The Raft node is shutting down.
    Shutdown,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::Learner
    }
}

impl ServerState {
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader)
    }

    pub fn is_follower(&self) -> bool {
        matches!(self, Self::Follower)
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Self::Candidate)
    }
}
