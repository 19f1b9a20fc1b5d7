//! Observe the state of a raft node.
//!
//! The core publishes a new [`RaftMetrics`] on a watch channel whenever something changes. Use
//! [`Raft::metrics`](crate::Raft::metrics) to subscribe, or [`Raft::wait`](crate::Raft::wait) to
//! block until a condition holds, which is what tests mostly do.

mod raft_metrics;
mod wait;


pub use raft_metrics::RaftMetrics;
pub use wait::Wait;
pub use wait::WaitError;
