//! The transport a raft node uses to reach its peers.
//!
//! Delivery is best-effort and at-most-once per call. `Ok` means the message reached the peer's
//! inbox, i.e. the peer fed it to its own [`Raft::step`](crate::Raft::step). Responses are plain
//! messages travelling back the same way. Messages sent to one peer are delivered in order; there
//! is no ordering across peers.
//!
//! A failed delivery is never retried by the transport: the protocol resends what is needed on the
//! next tick, and the failure is recorded by the health monitor.

use async_trait::async_trait;

use crate::error::RPCError;
use crate::Member;
use crate::Message;
use crate::NodeId;

/// A connection to a single peer.
#[async_trait]
pub trait RaftNetwork: Send + Sync + 'static {
    async fn send(&mut self, msg: Message) -> Result<(), RPCError>;
}

/// Creates connections to peers.
///
/// A typical implementation keeps a pool of clients keyed by the peer urls in `member`.
///
/// `member` is `None` when the target is not in the local membership yet, e.g. a node that has
/// just been added replying to a leader it knows nothing about. The factory resolves the address
/// on its own then, or returns a connection that always fails.
#[async_trait]
pub trait RaftNetworkFactory: Send + Sync + 'static {
    type Network: RaftNetwork;

    async fn connect(&mut self, target: NodeId, member: Option<&Member>) -> Self::Network;
}
