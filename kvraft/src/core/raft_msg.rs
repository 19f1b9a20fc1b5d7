use std::collections::BTreeSet;

use tokio::sync::oneshot;

use crate::error::ChangeMembershipError;
use crate::error::ClientWriteError;
use crate::error::InitializeError;
use crate::KvRequest;
use crate::KvResponse;
use crate::LogId;
use crate::Member;
use crate::Membership;
use crate::Message;
use crate::MessageSummary;
use crate::NodeId;

/// A oneshot TX to send a result from `RaftCore` to the external caller.
pub(crate) type ResultSender<T, E> = oneshot::Sender<Result<T, E>>;

pub(crate) type ClientWriteTx = ResultSender<KvResponse, ClientWriteError>;

pub(crate) type ChangeMembershipTx = ResultSender<Membership, ChangeMembershipError>;

/// A membership change requested through the [`Raft`](crate::Raft) handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MembershipChange {
    AddMember(Member),
    RemoveMember(NodeId),
    PromoteMember(NodeId),
    ChangeVoters(BTreeSet<NodeId>),
}

/// A message sent by the application to the [`RaftCore`](crate::core::RaftCore).
pub(crate) enum RaftMsg {
    /// A message from a peer.
    Step { msg: Message },

    ClientWrite {
        req: KvRequest,
        tx: ClientWriteTx,
    },

    Initialize {
        members: Vec<Member>,
        tx: ResultSender<(), InitializeError>,
    },

    ChangeMembership {
        change: MembershipChange,
        tx: ChangeMembershipTx,
    },

    /// Build a snapshot now; responds with its last log id, or `None` if nothing is applied yet.
    TriggerSnapshot { tx: oneshot::Sender<Option<LogId>> },
}

impl MessageSummary for RaftMsg {
    fn summary(&self) -> String {
        match self {
            RaftMsg::Step { msg } => format!("Step: {}", msg.summary()),
            RaftMsg::ClientWrite { req, .. } => format!("ClientWrite: {}", req),
            RaftMsg::Initialize { members, .. } => format!("Initialize: {:?}", members),
            RaftMsg::ChangeMembership { change, .. } => format!("ChangeMembership: {:?}", change),
            RaftMsg::TriggerSnapshot { .. } => "TriggerSnapshot".to_string(),
        }
    }
}
