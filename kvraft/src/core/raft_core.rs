use std::collections::BTreeMap;
use std::sync::Arc;

use futures::TryStreamExt;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing_futures::Instrument;

use crate::apply::ApplyCmd;
use crate::apply::ApplyLoop;
use crate::core::notify::ApplyOutcome;
use crate::core::notify::Notify;
use crate::core::peer::PeerCmd;
use crate::core::peer::PeerHandle;
use crate::core::peer::PeerSender;
use crate::core::raft_msg::ChangeMembershipTx;
use crate::core::raft_msg::ClientWriteTx;
use crate::core::raft_msg::MembershipChange;
use crate::core::raft_msg::RaftMsg;
use crate::engine::Engine;
use crate::engine::EngineConfig;
use crate::engine::RaftLog;
use crate::engine::Ready;
use crate::error::ChangeMembershipError;
use crate::error::ClientWriteError;
use crate::error::Fatal;
use crate::error::NotLeader;
use crate::health::HealthMonitor;
use crate::membership::MembershipManager;
use crate::metrics::RaftMetrics;
use crate::network::RaftNetworkFactory;
use crate::storage::entries_from;
use crate::storage::HardState;
use crate::storage::RaftLogStorage;
use crate::storage::SnapshotStore;
use crate::Config;
use crate::EntryPayload;
use crate::KvStateMachine;
use crate::LogId;
use crate::Membership;
use crate::Message;
use crate::MessageBody;
use crate::MessageSummary;
use crate::NodeId;

/// A caller waiting for the entry at some log index to be applied.
enum Responder {
    Write(ClientWriteTx),
    Membership(ChangeMembershipTx),
}

impl Responder {
    fn not_leader(self, e: NotLeader) {
        match self {
            Responder::Write(tx) => {
                let _ = tx.send(Err(e.into()));
            }
            Responder::Membership(tx) => {
                let _ = tx.send(Err(e.into()));
            }
        }
    }

    fn fatal(self, e: Fatal) {
        match self {
            Responder::Write(tx) => {
                let _ = tx.send(Err(e.into()));
            }
            Responder::Membership(tx) => {
                let _ = tx.send(Err(e.into()));
            }
        }
    }
}

/// The single task that owns all raft state of a node.
///
/// It drives the [`Engine`] with ticks, peer messages and API requests, then executes the
/// resulting [`Ready`]: log and hard state are durable before any message is sent. Delivering
/// messages and applying entries are done by other tasks that report back through [`Notify`].
pub(crate) struct RaftCore<NF, L, S, SM>
where
    NF: RaftNetworkFactory,
    L: RaftLogStorage,
    S: SnapshotStore,
    SM: KvStateMachine,
{
    id: NodeId,
    config: Arc<Config>,

    network: NF,
    log_store: Arc<L>,
    snapshot_store: Arc<S>,
    sm: Arc<SM>,

    engine: Engine,
    health: HealthMonitor,

    peers: BTreeMap<NodeId, PeerHandle>,

    tx_apply: Option<mpsc::UnboundedSender<ApplyCmd>>,
    apply_handle: Option<JoinHandle<()>>,

    tx_notify: mpsc::UnboundedSender<Notify>,
    rx_notify: mpsc::UnboundedReceiver<Notify>,

    rx_api: mpsc::UnboundedReceiver<RaftMsg>,
    tx_metrics: watch::Sender<RaftMetrics>,

    /// Callers waiting for an entry to be applied, by log index.
    pending: BTreeMap<u64, (LogId, Responder)>,

    last_applied: u64,
    snapshot_last: Option<LogId>,

    /// Ticks since the last round of probes.
    probe_elapsed: u64,
}

impl<NF, L, S, SM> RaftCore<NF, L, S, SM>
where
    NF: RaftNetworkFactory,
    L: RaftLogStorage,
    S: SnapshotStore,
    SM: KvStateMachine,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: NodeId,
        config: Arc<Config>,
        network: NF,
        log_store: Arc<L>,
        snapshot_store: Arc<S>,
        sm: Arc<SM>,
        rx_api: mpsc::UnboundedReceiver<RaftMsg>,
        tx_metrics: watch::Sender<RaftMetrics>,
    ) -> Self {
        let (tx_notify, rx_notify) = mpsc::unbounded_channel();

        // Replaced with the persisted state in `startup()`.
        let engine = Engine::new(
            EngineConfig::new(id, &config),
            HardState::default(),
            RaftLog::default(),
            Membership::default(),
            LogId::default(),
            0,
        );

        Self {
            id,
            health: HealthMonitor::new(config.health_interval()),
            config,
            network,
            log_store,
            snapshot_store,
            sm,
            engine,
            peers: BTreeMap::new(),
            tx_apply: None,
            apply_handle: None,
            tx_notify,
            rx_notify,
            rx_api,
            tx_metrics,
            pending: BTreeMap::new(),
            last_applied: 0,
            snapshot_last: None,
            probe_elapsed: 0,
        }
    }

    /// The main loop; returns when the node is shut down or hits a fatal error.
    pub(crate) async fn main(mut self, rx_shutdown: oneshot::Receiver<()>) -> Result<(), Fatal> {
        let res = self.do_main(rx_shutdown).await;

        let err = match &res {
            Ok(()) => {
                tracing::info!(id = self.id, "raft core stopped");
                Fatal::Stopped
            }
            Err(e) => {
                tracing::error!(id = self.id, "raft core stopped with fatal error: {}", e);
                e.clone()
            }
        };

        // A removed leader hands over leadership before it goes.
        let graceful = matches!(err, Fatal::Removed(_));
        self.stop_tasks(graceful).await;

        for (_, (_, responder)) in std::mem::take(&mut self.pending) {
            responder.fatal(err.clone());
        }

        self.engine.shutdown();
        self.report_metrics(Err(err));

        res
    }

    async fn do_main(&mut self, mut rx_shutdown: oneshot::Receiver<()>) -> Result<(), Fatal> {
        self.startup().await?;

        let mut ticker = tokio::time::interval(self.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.flush().await?;
            self.abort_pending_if_not_leader();
            self.report_metrics(Ok(()));

            tokio::select! {
                _ = ticker.tick() => {
                    self.handle_tick().await;
                }
                msg = self.rx_api.recv() => {
                    match msg {
                        Some(msg) => self.handle_api_msg(msg).await?,
                        None => {
                            tracing::info!(id = self.id, "all raft handles dropped, quit");
                            return Ok(());
                        }
                    }
                }
                Some(notify) = self.rx_notify.recv() => {
                    self.handle_notify(notify).await?;
                }
                _ = &mut rx_shutdown => {
                    tracing::info!(id = self.id, "recv shutdown");
                    return Ok(());
                }
            }
        }
    }

    /// Rebuild the state from the snapshot store and the log, then start the apply loop.
    #[tracing::instrument(level = "debug", skip_all, fields(id = self.id))]
    async fn startup(&mut self) -> Result<(), Fatal> {
        let mut apply = ApplyLoop::new(
            self.id,
            self.sm.clone(),
            self.snapshot_store.clone(),
            self.config.snapshot_policy.clone(),
        );

        if let Some(snapshot) = self.snapshot_store.latest().await? {
            apply.restore(&snapshot).await?;
            self.snapshot_last = Some(snapshot.meta.last_log_id);
        }
        let purged = apply.last_applied;

        let mut hs = self.log_store.read_hard_state().await?.unwrap_or_default();
        hs.commit_index = hs.commit_index.max(purged.index);

        let entries: Vec<_> =
            entries_from(self.log_store.clone(), purged.index + 1, self.config.max_payload_entries).try_collect().await?;

        let committed: Vec<_> = entries.iter().take_while(|e| e.log_id.index <= hs.commit_index).cloned().collect();
        apply.apply(&committed).await?;

        tracing::info!(
            "startup: snapshot: {}, hard state: {:?}, logs: {}, replayed to: {}, membership: {}",
            purged,
            hs,
            entries.len(),
            apply.last_applied,
            apply.membership.summary()
        );

        if apply.membership.is_removed(&self.id) {
            tracing::error!("this node has been removed from the cluster, refuse to start");
            return Err(Fatal::Removed(self.id));
        }

        self.engine = Engine::new(
            EngineConfig::new(self.id, &self.config),
            hs,
            RaftLog::new(purged, entries),
            apply.membership.clone(),
            apply.membership_log_id,
            apply.last_applied.index,
        );
        self.last_applied = apply.last_applied.index;

        let (tx_apply, rx_apply) = mpsc::unbounded_channel();
        let handle = tokio::spawn(
            apply.main(rx_apply, self.tx_notify.clone()).instrument(tracing::debug_span!("apply", id = self.id)),
        );
        self.tx_apply = Some(tx_apply);
        self.apply_handle = Some(handle);

        Ok(())
    }

    /// Execute every pending output of the engine.
    async fn flush(&mut self) -> Result<(), Fatal> {
        while self.engine.has_ready() {
            let ready = self.engine.take_ready();
            self.run_ready(ready).await?;
        }
        Ok(())
    }

    async fn run_ready(&mut self, ready: Ready) -> Result<(), Fatal> {
        tracing::debug!(id = self.id, "run: {}", ready.summary());

        if let Some((snapshot, reset_log)) = ready.install_snapshot {
            let last = snapshot.meta.last_log_id;

            self.snapshot_store.create(&snapshot).await?;
            if reset_log {
                self.log_store.truncate_since(0).await?;
            } else {
                self.log_store.truncate_before(last.index + 1).await?;
            }
            self.snapshot_store.purge_before(last).await?;

            self.snapshot_last = Some(last);
            self.send_apply(ApplyCmd::Restore(snapshot));
        }

        if let Some(since) = ready.truncate_since {
            self.log_store.truncate_since(since).await?;
        }

        if !ready.entries.is_empty() {
            self.log_store.append(&ready.entries).await?;
        }

        if let Some(hs) = &ready.hard_state {
            self.log_store.save_hard_state(hs).await?;
        }

        for msg in ready.messages {
            let target = msg.to;
            self.send_to(target, PeerCmd::Message(msg)).await;
        }

        for target in ready.send_snapshot {
            let cmd = PeerCmd::Snapshot {
                from: self.id,
                term: self.engine.current_term(),
            };
            self.send_to(target, cmd).await;
        }

        if !ready.committed.is_empty() {
            self.send_apply(ApplyCmd::Apply(ready.committed));
        }

        Ok(())
    }

    fn send_apply(&mut self, cmd: ApplyCmd) {
        if let Some(tx) = &self.tx_apply {
            let _ = tx.send(cmd);
        }
    }

    async fn send_to(&mut self, target: NodeId, cmd: PeerCmd) {
        if target == self.id {
            return;
        }

        if !self.peers.contains_key(&target) {
            let member = self.engine.membership.get_member(&target).cloned();
            let network = self.network.connect(target, member.as_ref()).await;

            let handle = PeerSender::spawn(
                target,
                network,
                self.snapshot_store.clone(),
                self.config.send_timeout(),
                self.tx_notify.clone(),
            );
            self.peers.insert(target, handle);
        }

        if let Some(peer) = self.peers.get(&target) {
            let _ = peer.tx.send(cmd);
        }
    }

    async fn handle_tick(&mut self) {
        self.engine.tick();

        self.probe_elapsed += 1;
        if self.probe_elapsed < self.config.heartbeat_ticks() {
            return;
        }
        self.probe_elapsed = 0;

        // A leader reaches every member with its heartbeats.
        if self.engine.is_leader() {
            return;
        }

        let term = self.engine.current_term();
        let targets: Vec<NodeId> = self.engine.membership.member_ids().filter(|id| *id != self.id).collect();
        for target in targets {
            let msg = Message {
                from: self.id,
                to: target,
                term,
                body: MessageBody::Probe,
            };
            self.send_to(target, PeerCmd::Message(msg)).await;
        }
    }

    #[tracing::instrument(level = "trace", skip_all, fields(id = self.id, msg = %msg.summary()))]
    async fn handle_api_msg(&mut self, msg: RaftMsg) -> Result<(), Fatal> {
        match msg {
            RaftMsg::Step { msg } => self.handle_step(msg).await?,
            RaftMsg::ClientWrite { req, tx } => match self.engine.propose(EntryPayload::Data(req)) {
                Ok(log_id) => {
                    self.pending.insert(log_id.index, (log_id, Responder::Write(tx)));
                }
                Err(e) => {
                    let _ = tx.send(Err(ClientWriteError::from(e)));
                }
            },
            RaftMsg::Initialize { members, tx } => {
                let res = self.engine.initialize(Membership::new(members));
                let _ = tx.send(res.map(|_| ()));
            }
            RaftMsg::ChangeMembership { change, tx } => self.handle_change_membership(change, tx),
            RaftMsg::TriggerSnapshot { tx } => self.send_apply(ApplyCmd::BuildSnapshot(tx)),
        }
        Ok(())
    }

    async fn handle_step(&mut self, msg: Message) -> Result<(), Fatal> {
        if msg.to != self.id {
            tracing::warn!("misdelivered message: {}", msg.summary());
            return Ok(());
        }

        let from = msg.from;
        self.health.record_success(from, Instant::now());

        if self.engine.membership.is_removed(&from) {
            tracing::info!("message from removed member {}: {}", from, msg.summary());
            let reply = Message {
                from: self.id,
                to: from,
                term: self.engine.current_term(),
                body: MessageBody::MemberRemoved,
            };
            self.send_to(from, PeerCmd::Message(reply)).await;
            return Ok(());
        }

        match msg.body {
            MessageBody::Probe => Ok(()),
            MessageBody::MemberRemoved => {
                tracing::error!("{} says this node has been removed from the cluster", from);
                Err(Fatal::Removed(self.id))
            }
            _ => {
                self.engine.step(msg);
                Ok(())
            }
        }
    }

    fn handle_change_membership(&mut self, change: MembershipChange, tx: ChangeMembershipTx) {
        if !self.engine.is_leader() {
            let _ = tx.send(Err(NotLeader {
                leader_id: self.engine.leader_id,
            }
            .into()));
            return;
        }

        if let Some(log_id) = self.engine.pending_config {
            let _ = tx.send(Err(ChangeMembershipError::InProgress { log_id }));
            return;
        }

        let membership = self.engine.membership.clone();
        let manager = MembershipManager::new(
            self.id,
            self.config.strict_reconfig_check,
            &membership,
            self.health.snapshot(Instant::now()),
        );

        let res = match change {
            MembershipChange::AddMember(member) => manager.add_member(member),
            MembershipChange::RemoveMember(id) => manager.remove_member(id),
            MembershipChange::PromoteMember(id) => {
                let matched = self.engine.matched(&id).unwrap_or_default();
                manager.promote_member(id, matched, self.engine.log.last_index())
            }
            MembershipChange::ChangeVoters(voters) => manager.change_voters(voters),
        };

        let payload = match res {
            Ok(x) => x,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };

        tracing::info!(id = self.id, "propose membership change: {}", payload.summary());

        match self.engine.propose(payload) {
            Ok(log_id) => {
                self.pending.insert(log_id.index, (log_id, Responder::Membership(tx)));
            }
            Err(e) => {
                let _ = tx.send(Err(e.into()));
            }
        }
    }

    async fn handle_notify(&mut self, notify: Notify) -> Result<(), Fatal> {
        match notify {
            Notify::Sent { target, result } => match result {
                Ok(()) => self.health.record_success(target, Instant::now()),
                Err(e) => {
                    tracing::debug!(id = self.id, "failed to send to {}: {}", target, e);
                    self.health.record_failure(target, Instant::now());
                    self.engine.report_unreachable(target);
                }
            },
            Notify::SnapshotSent { target, success } => {
                if success {
                    self.health.record_success(target, Instant::now());
                } else {
                    self.health.record_failure(target, Instant::now());
                    self.engine.report_snapshot_failure(target);
                }
            }
            Notify::Applied { last_applied, results } => {
                self.last_applied = self.last_applied.max(last_applied.index);

                for applied in results {
                    self.handle_applied(applied.log_id, applied.outcome);
                }

                if self.engine.membership.is_removed(&self.id) {
                    tracing::error!(id = self.id, "this node has been removed from the cluster");
                    self.engine.transfer_leadership();
                    self.flush().await?;
                    return Err(Fatal::Removed(self.id));
                }
            }
            Notify::SnapshotBuilt { meta } => {
                let last = meta.last_log_id;
                self.snapshot_last = Some(last);

                if let Some(upto) = self.engine.on_snapshot_built(last, self.config.max_applied_log_to_keep) {
                    tracing::info!(id = self.id, "snapshot {} built, purge logs upto {}", last, upto);
                    self.log_store.truncate_before(upto + 1).await?;
                }
            }
            Notify::Fatal { error } => return Err(error),
        }
        Ok(())
    }

    fn handle_applied(&mut self, log_id: LogId, outcome: ApplyOutcome) {
        let responder = match self.pending.remove(&log_id.index) {
            Some((expected, responder)) => {
                if expected == log_id {
                    Some(responder)
                } else {
                    // The entry proposed was overwritten by another leader.
                    responder.not_leader(NotLeader {
                        leader_id: self.engine.leader_id,
                    });
                    None
                }
            }
            None => None,
        };

        match outcome {
            ApplyOutcome::Blank => {}
            ApplyOutcome::Data(res) => {
                if let Some(Responder::Write(tx)) = responder {
                    let _ = tx.send(res.map_err(ClientWriteError::Rejected));
                }
            }
            ApplyOutcome::Membership(membership) => {
                let final_log_id = self.engine.update_membership(membership.clone(), log_id);
                self.forget_removed_peers();

                match (responder, final_log_id) {
                    // A joint change is done only once the final membership is applied.
                    (Some(Responder::Membership(tx)), Some(fin)) => {
                        self.pending.insert(fin.index, (fin, Responder::Membership(tx)));
                    }
                    (Some(Responder::Membership(tx)), None) => {
                        let _ = tx.send(Ok(membership));
                    }
                    _ => {}
                }
            }
        }
    }

    /// Stop replicating to and tracking the health of ids that left the cluster.
    fn forget_removed_peers(&mut self) {
        let membership = self.engine.membership.clone();
        let gone: Vec<NodeId> = self.peers.keys().filter(|id| !membership.is_member(id)).copied().collect();

        for id in gone {
            if let Some(peer) = self.peers.remove(&id) {
                peer.join_handle.abort();
            }
            self.health.forget(&id);
        }
    }

    /// A request waiting for its entry to be applied can not be answered by a non-leader.
    fn abort_pending_if_not_leader(&mut self) {
        if self.engine.is_leader() || self.pending.is_empty() {
            return;
        }

        let leader_id = self.engine.leader_id;
        tracing::info!(id = self.id, "leadership lost, abort {} pending requests", self.pending.len());

        for (_, (_, responder)) in std::mem::take(&mut self.pending) {
            responder.not_leader(NotLeader { leader_id });
        }
    }

    /// Stop peer senders and the apply loop.
    ///
    /// With `graceful` the queued messages are still delivered, each within the send timeout.
    async fn stop_tasks(&mut self, graceful: bool) {
        self.tx_apply = None;

        let peers = std::mem::take(&mut self.peers);
        for (_, peer) in peers {
            let PeerHandle { tx, join_handle } = peer;
            drop(tx);

            if graceful {
                let _ = tokio::time::timeout(self.config.send_timeout(), join_handle).await;
            } else {
                join_handle.abort();
            }
        }

        if let Some(handle) = self.apply_handle.take() {
            if graceful {
                let _ = tokio::time::timeout(self.config.send_timeout(), handle).await;
            } else {
                handle.abort();
            }
        }
    }

    fn report_metrics(&self, running_state: Result<(), Fatal>) {
        let now = Instant::now();
        let healthy = self
            .engine
            .membership
            .voter_ids()
            .into_iter()
            .filter(|id| *id == self.id || self.health.is_healthy(id, now))
            .collect();

        let m = RaftMetrics {
            running_state,
            id: self.id,
            current_term: self.engine.current_term(),
            last_log_index: self.engine.log.last_index(),
            commit_index: self.engine.commit_index(),
            last_applied: self.last_applied,
            snapshot: self.snapshot_last,
            state: self.engine.state,
            current_leader: self.engine.leader_id,
            membership: self.engine.membership.clone(),
            healthy,
        };

        if *self.tx_metrics.borrow() != m {
            let _ = self.tx_metrics.send(m);
        }
    }
}
