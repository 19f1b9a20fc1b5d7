#![allow(clippy::bool_assert_comparison, clippy::type_complexity)]

//! Raft consensus with membership-safety checks, for a replicated key-value store.
//!
//! A node is a [`Raft`] handle over a core task that owns all of its state. The application
//! provides the durable [`storage`], the key-value [`KvStateMachine`] and the [`network`] that
//! delivers [`Message`]s between peers.
//!
//! Membership changes are checked against the connectivity each node observes: adding or removing
//! a voter is refused when the cluster would be left without a healthy quorum.

mod apply;
mod config;
mod core;
mod engine;
mod entry;
mod health;
mod kv;
mod log_id;
mod membership;
mod message;
mod quorum;
mod raft;
mod server_state;
mod summary;

pub mod error;
pub mod metrics;
pub mod network;
pub mod storage;
pub mod testing;

pub use anyerror;
pub use anyerror::AnyError;
pub use async_trait;

pub use crate::config::Config;
pub use crate::config::ConfigError;
pub use crate::config::SnapshotPolicy;
pub use crate::entry::Entry;
pub use crate::entry::EntryKind;
pub use crate::entry::EntryPayload;
pub use crate::error::StorageError;
pub use crate::health::HealthMonitor;
pub use crate::health::HealthSnapshot;
pub use crate::health::PeerHealth;
pub use crate::kv::KvRequest;
pub use crate::kv::KvResponse;
pub use crate::kv::KvStateMachine;
pub use crate::log_id::LogId;
pub use crate::log_id::NodeId;
pub use crate::membership::compute_member_id;
pub use crate::membership::Member;
pub use crate::membership::Membership;
pub use crate::message::Message;
pub use crate::message::MessageBody;
pub use crate::metrics::RaftMetrics;
pub use crate::network::RaftNetwork;
pub use crate::network::RaftNetworkFactory;
pub use crate::raft::Raft;
pub use crate::server_state::ServerState;
pub use crate::summary::MessageSummary;
