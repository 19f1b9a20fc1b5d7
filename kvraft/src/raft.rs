//! Public Raft interface and data types.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio::task::JoinHandle;
use tracing_futures::Instrument;

use crate::core::MembershipChange;
use crate::core::RaftCore;
use crate::core::RaftMsg;
use crate::error::ChangeMembershipError;
use crate::error::ClientWriteError;
use crate::error::Fatal;
use crate::error::InitializeError;
use crate::error::Unavailable;
use crate::membership::compute_member_id;
use crate::metrics::RaftMetrics;
use crate::metrics::Wait;
use crate::network::RaftNetworkFactory;
use crate::storage::RaftLogStorage;
use crate::storage::SnapshotStore;
use crate::Config;
use crate::KvRequest;
use crate::KvResponse;
use crate::KvStateMachine;
use crate::LogId;
use crate::Member;
use crate::Membership;
use crate::Message;
use crate::MessageSummary;
use crate::NodeId;

struct RaftInner {
    id: NodeId,
    config: Arc<Config>,
    tx_api: mpsc::UnboundedSender<RaftMsg>,
    rx_metrics: watch::Receiver<RaftMetrics>,
    tx_shutdown: Mutex<Option<oneshot::Sender<()>>>,
    core_handle: Mutex<Option<JoinHandle<Result<(), Fatal>>>>,
}

/// The handle to a running raft node.
///
/// Creating a `Raft` spawns the core task that owns all state of the node; every method here
/// only sends a request to it. The handle is cheap to clone and all clones talk to the same node.
///
/// Messages from peers are fed in with [`Raft::step`]. Writes go through [`Raft::client_write`]
/// and membership changes through the `*_member` methods, all of which have to be called on the
/// leader and resolve once the entry is applied locally.
#[derive(Clone)]
pub struct Raft {
    inner: Arc<RaftInner>,
}

impl Raft {
    /// Create and spawn a new raft node.
    ///
    /// The node restores its state from `log_store` and `snapshot_store` first. A pristine node
    /// stays idle until it is [initialized](Raft::initialize) or contacted by a leader.
    pub fn new<NF, L, S, SM>(
        id: NodeId,
        config: Arc<Config>,
        network: NF,
        log_store: Arc<L>,
        snapshot_store: Arc<S>,
        sm: Arc<SM>,
    ) -> Self
    where
        NF: RaftNetworkFactory,
        L: RaftLogStorage,
        S: SnapshotStore,
        SM: KvStateMachine,
    {
        let (tx_api, rx_api) = mpsc::unbounded_channel();
        let (tx_metrics, rx_metrics) = watch::channel(RaftMetrics::new_initial(id));
        let (tx_shutdown, rx_shutdown) = oneshot::channel();

        let core = RaftCore::new(
            id,
            config.clone(),
            network,
            log_store,
            snapshot_store,
            sm,
            rx_api,
            tx_metrics,
        );
        let core_handle = tokio::spawn(core.main(rx_shutdown).instrument(tracing::debug_span!("RaftCore", id)));

        let inner = RaftInner {
            id,
            config,
            tx_api,
            rx_metrics,
            tx_shutdown: Mutex::new(Some(tx_shutdown)),
            core_handle: Mutex::new(Some(core_handle)),
        };

        Self { inner: Arc::new(inner) }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Feed a message received from a peer to this node.
    ///
    /// It returns as soon as the message is queued; an error means the node has stopped.
    pub fn step(&self, msg: Message) -> Result<(), Fatal> {
        tracing::trace!(id = self.inner.id, "step: {}", msg.summary());
        self.send_msg(RaftMsg::Step { msg })
    }

    /// Replicate a key-value request and return the result of applying it.
    #[tracing::instrument(level = "debug", skip(self), fields(id = self.inner.id))]
    pub async fn client_write(&self, req: KvRequest) -> Result<KvResponse, ClientWriteError> {
        let (tx, rx) = oneshot::channel();
        self.send_msg(RaftMsg::ClientWrite { req, tx })?;
        self.recv_within(rx).await
    }

    /// Bootstrap a pristine node as a member of a new cluster with the given members.
    ///
    /// Every initial voter has to be initialized with the same members. The node with a membership
    /// of only itself becomes leader at once.
    pub async fn initialize(&self, members: Vec<Member>) -> Result<(), InitializeError> {
        let (tx, rx) = oneshot::channel();
        self.send_msg(RaftMsg::Initialize { members, tx })?;

        match rx.await {
            Ok(res) => res,
            Err(_) => Err(self.fatal().into()),
        }
    }

    /// Add a voter reachable at `peer_urls` and return the id assigned to it.
    ///
    /// It is refused unless the cluster keeps a healthy quorum with the new voter counted as down.
    pub async fn add_member(&self, peer_urls: impl IntoIterator<Item = impl ToString>) -> Result<NodeId, ChangeMembershipError> {
        self.add(peer_urls, false).await
    }

    /// Add a learner reachable at `peer_urls` and return the id assigned to it.
    pub async fn add_learner(&self, peer_urls: impl IntoIterator<Item = impl ToString>) -> Result<NodeId, ChangeMembershipError> {
        self.add(peer_urls, true).await
    }

    async fn add(
        &self,
        peer_urls: impl IntoIterator<Item = impl ToString>,
        is_learner: bool,
    ) -> Result<NodeId, ChangeMembershipError> {
        let peer_urls: BTreeSet<String> = peer_urls.into_iter().map(|x| x.to_string()).collect();
        let id = compute_member_id(&peer_urls, &self.inner.config.cluster_name, Some(SystemTime::now()));

        let member = Member {
            id,
            peer_urls,
            is_learner,
        };
        self.add_member_with_id(member).await?;
        Ok(id)
    }

    /// Add a member with an id chosen by the caller.
    pub async fn add_member_with_id(&self, member: Member) -> Result<Membership, ChangeMembershipError> {
        self.change_membership(MembershipChange::AddMember(member)).await
    }

    /// Remove a member; the removed node stops itself once it learns about it.
    pub async fn remove_member(&self, id: NodeId) -> Result<Membership, ChangeMembershipError> {
        self.change_membership(MembershipChange::RemoveMember(id)).await
    }

    /// Turn a learner that has caught up with the leader into a voter.
    pub async fn promote_member(&self, id: NodeId) -> Result<Membership, ChangeMembershipError> {
        self.change_membership(MembershipChange::PromoteMember(id)).await
    }

    /// Replace the voter set through a joint consensus.
    ///
    /// It resolves once the final, non-joint membership is applied.
    pub async fn change_voters(&self, voters: BTreeSet<NodeId>) -> Result<Membership, ChangeMembershipError> {
        self.change_membership(MembershipChange::ChangeVoters(voters)).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = self.inner.id))]
    async fn change_membership(&self, change: MembershipChange) -> Result<Membership, ChangeMembershipError> {
        let (tx, rx) = oneshot::channel();
        self.send_msg(RaftMsg::ChangeMembership { change, tx })?;
        self.recv_within(rx).await
    }

    /// Build a snapshot of what is applied now.
    ///
    /// Returns the last log id it covers, or `None` if nothing is applied yet.
    pub async fn trigger_snapshot(&self) -> Result<Option<LogId>, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.send_msg(RaftMsg::TriggerSnapshot { tx })?;
        rx.await.map_err(|_| self.fatal())
    }

    pub async fn current_leader(&self) -> Option<NodeId> {
        self.metrics().borrow().current_leader
    }

    pub async fn is_leader(&self) -> bool {
        self.current_leader().await == Some(self.inner.id)
    }

    /// Get a handle to the metrics channel.
    pub fn metrics(&self) -> watch::Receiver<RaftMetrics> {
        self.inner.rx_metrics.clone()
    }

    /// Get a handle to wait for the metrics to satisfy some condition.
    ///
    /// ```ignore
    /// # use std::time::Duration;
    /// # use kvraft::{ServerState, Raft};
    ///
    /// let timeout = Duration::from_millis(200);
    ///
    /// // wait for log-3 to be received and applied:
    /// r.wait(Some(timeout)).log(3, "log").await?;
    ///
    /// // wait for the raft node to become a follower:
    /// r.wait(None).state(ServerState::Follower, "state").await?;
    /// ```
    pub fn wait(&self, timeout: Option<Duration>) -> Wait {
        let timeout = match timeout {
            Some(t) => t,
            None => Duration::from_millis(500),
        };
        Wait {
            timeout,
            rx: self.inner.rx_metrics.clone(),
        }
    }

    /// Shutdown this raft node and wait for the core task to quit.
    ///
    /// In flight requests are answered with [`Fatal::Stopped`].
    pub async fn shutdown(&self) -> Result<(), JoinError> {
        if let Some(tx) = self.inner.tx_shutdown.lock().await.take() {
            // A failure to send means the core has already quit.
            let send_res = tx.send(());
            tracing::info!(id = self.inner.id, "sending shutdown signal to RaftCore, res: {:?}", send_res);
        }

        if let Some(handle) = self.inner.core_handle.lock().await.take() {
            let res = handle.await?;
            tracing::info!(id = self.inner.id, "RaftCore quit: {:?}", res);
        }
        Ok(())
    }

    fn send_msg(&self, msg: RaftMsg) -> Result<(), Fatal> {
        self.inner.tx_api.send(msg).map_err(|_| self.fatal())
    }

    /// Wait for the core to respond, for at most `request_timeout`.
    async fn recv_within<T, E>(&self, rx: oneshot::Receiver<Result<T, E>>) -> Result<T, E>
    where E: From<Fatal> + From<Unavailable> {
        let timeout = self.inner.config.request_timeout();

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(self.fatal().into()),
            Err(_) => Err(Unavailable::Timeout { timeout }.into()),
        }
    }

    /// The reason the core stopped, as published in the metrics.
    fn fatal(&self) -> Fatal {
        match &self.inner.rx_metrics.borrow().running_state {
            Err(e) => e.clone(),
            Ok(()) => Fatal::Stopped,
        }
    }
}
