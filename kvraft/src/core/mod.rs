//! The raft core: the task that owns the state of a node, and the tasks it drives.

mod notify;
mod peer;
mod raft_core;
mod raft_msg;

pub(crate) use notify::Applied;
pub(crate) use notify::ApplyOutcome;
pub(crate) use notify::Notify;
pub(crate) use raft_core::RaftCore;
pub(crate) use raft_msg::MembershipChange;
pub(crate) use raft_msg::RaftMsg;
