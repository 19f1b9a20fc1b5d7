use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::engine::engine_config::EngineConfig;
use crate::engine::progress::Progress;
use crate::engine::progress::ReplicationState;
use crate::engine::raft_log::RaftLog;
use crate::engine::ready::Ready;
use crate::error::InitializeError;
use crate::error::NotLeader;
use crate::quorum::QuorumSet;
use crate::storage::HardState;
use crate::storage::Snapshot;
use crate::Entry;
use crate::EntryPayload;
use crate::LogId;
use crate::Membership;
use crate::Message;
use crate::MessageBody;
use crate::MessageSummary;
use crate::NodeId;
use crate::ServerState;

/// The raft protocol algorithm.
///
/// It implements elections, replication and commitment but performs no IO: every effect it
/// decides on is collected into a [`Ready`] that the runtime takes with [`Engine::take_ready`]
/// and executes in order.
///
/// Time is counted in ticks, driven by [`Engine::tick`].
#[derive(Debug)]
pub(crate) struct Engine {
    pub(crate) config: EngineConfig,

    pub(crate) hard_state: HardState,

    /// The hard state last emitted in a `Ready`.
    saved_hard_state: HardState,

    pub(crate) state: ServerState,

    pub(crate) leader_id: Option<NodeId>,

    pub(crate) log: RaftLog,

    /// The effective membership: the one of the last applied membership entry.
    pub(crate) membership: Arc<Membership>,

    /// The log id of the entry, or the snapshot, `membership` comes from.
    pub(crate) membership_log_id: LogId,

    /// The last index handed out in `Ready::committed`.
    handed: u64,

    election_elapsed: u64,
    randomized_election_ticks: u64,
    heartbeat_elapsed: u64,

    votes: BTreeSet<NodeId>,

    /// Replication progress of every other member, only on a leader.
    pub(crate) progress: BTreeMap<NodeId, Progress>,

    /// A membership entry proposed but not yet applied. At most one at a time.
    pub(crate) pending_config: Option<LogId>,

    ready: Ready,
}

impl Engine {
    /// Build an engine from the persisted state.
    ///
    /// `applied` is the last index already applied to the state machine: entries up to it are not
    /// handed out again.
    pub(crate) fn new(
        config: EngineConfig,
        hard_state: HardState,
        log: RaftLog,
        membership: Membership,
        membership_log_id: LogId,
        applied: u64,
    ) -> Self {
        let state = if membership.is_voter(&config.id) {
            ServerState::Follower
        } else {
            ServerState::Learner
        };
        let randomized_election_ticks = config.new_rand_election_ticks();

        Self {
            config,
            saved_hard_state: hard_state.clone(),
            hard_state,
            state,
            leader_id: None,
            log,
            membership: Arc::new(membership),
            membership_log_id,
            handed: applied,
            election_elapsed: 0,
            randomized_election_ticks,
            heartbeat_elapsed: 0,
            votes: BTreeSet::new(),
            progress: BTreeMap::new(),
            pending_config: None,
            ready: Ready::default(),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.config.id
    }

    pub(crate) fn current_term(&self) -> u64 {
        self.hard_state.current_term
    }

    pub(crate) fn commit_index(&self) -> u64 {
        self.hard_state.commit_index
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    /// Take every effect accumulated since the last call.
    pub(crate) fn take_ready(&mut self) -> Ready {
        if self.hard_state != self.saved_hard_state {
            self.saved_hard_state = self.hard_state.clone();
            self.ready.hard_state = Some(self.hard_state.clone());
        }
        std::mem::take(&mut self.ready)
    }

    pub(crate) fn has_ready(&self) -> bool {
        self.hard_state != self.saved_hard_state || !self.ready.is_empty()
    }

    /// Bootstrap a pristine node with its first membership and campaign right away.
    #[tracing::instrument(level = "debug", skip_all)]
    pub(crate) fn initialize(&mut self, membership: Membership) -> Result<LogId, InitializeError> {
        let last_log_id = self.log.last_log_id();
        if self.hard_state.current_term != 0 || self.hard_state.voted_for.is_some() || last_log_id.index != 0 {
            return Err(InitializeError::NotAllowed {
                term: self.hard_state.current_term,
                last_log_id: if last_log_id.index == 0 { None } else { Some(last_log_id) },
            });
        }

        if membership.voter_ids().is_empty() {
            return Err(InitializeError::EmptyMembership);
        }

        let log_id = LogId::new(0, 1);
        let entry = Entry::new(log_id, EntryPayload::ConfigChange(membership.clone()));
        tracing::info!(id = self.id(), "initialize with: {}", entry.summary());

        self.log.append([entry.clone()]);
        self.ready.entries.push(entry);
        self.set_membership(membership, log_id);

        // The first entry is agreed on by every member.
        self.commit_to(1);

        self.campaign(false);
        Ok(log_id)
    }

    pub(crate) fn tick(&mut self) {
        match self.state {
            ServerState::Leader => self.tick_heartbeat(),
            ServerState::Shutdown => {}
            _ => self.tick_election(),
        }
    }

    fn tick_election(&mut self) {
        self.election_elapsed += 1;
        if self.election_elapsed < self.randomized_election_ticks {
            return;
        }

        self.reset_election_timer();
        if self.membership.is_voter(&self.id()) {
            tracing::info!(id = self.id(), term = self.current_term(), "election timeout, start campaign");
            self.campaign(false);
        }
    }

    fn tick_heartbeat(&mut self) {
        self.heartbeat_elapsed += 1;
        self.election_elapsed += 1;

        if self.election_elapsed >= self.config.election_ticks_min {
            self.election_elapsed = 0;
            if !self.check_quorum_active() {
                tracing::warn!(
                    id = self.id(),
                    term = self.current_term(),
                    "a quorum did not respond in an election timeout, step down"
                );
                self.become_follower(self.current_term(), None);
                return;
            }
        }

        if self.heartbeat_elapsed >= self.config.heartbeat_ticks {
            self.heartbeat_elapsed = 0;
            self.broadcast_heartbeat();
        }
    }

    /// Whether a quorum was heard from since the last check; resets the record.
    fn check_quorum_active(&mut self) -> bool {
        let mut active = vec![self.id()];
        for (id, pr) in self.progress.iter_mut() {
            if pr.recent_active {
                active.push(*id);
            }
            pr.recent_active = false;
        }
        self.membership.quorum_set().is_quorum(active.iter())
    }

    /// A node that heard from a leader within the minimal election timeout does not give its vote
    /// away.
    fn in_lease(&self) -> bool {
        self.leader_id.is_some() && self.election_elapsed < self.config.election_ticks_min
    }

    fn reset_election_timer(&mut self) {
        self.election_elapsed = 0;
        self.randomized_election_ticks = self.config.new_rand_election_ticks();
    }

    fn set_state(&mut self, state: ServerState) {
        if self.state != state {
            tracing::info!(id = self.id(), term = self.current_term(), "{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Start an election. With `transfer` the voters ignore their leader lease.
    pub(crate) fn campaign(&mut self, transfer: bool) {
        if !self.membership.is_voter(&self.id()) {
            tracing::debug!(id = self.id(), "not a voter, can not campaign");
            return;
        }

        self.hard_state.current_term += 1;
        self.hard_state.voted_for = Some(self.id());
        self.leader_id = None;
        self.progress.clear();
        self.votes.clear();
        self.votes.insert(self.id());
        self.reset_election_timer();
        self.set_state(ServerState::Candidate);

        if self.membership.quorum_set().is_quorum(self.votes.iter()) {
            self.become_leader();
            return;
        }

        let me = self.id();
        let last_log_id = self.log.last_log_id();
        let voters = self.membership.voter_ids();
        for to in voters.into_iter().filter(|id| *id != me) {
            self.send(to, MessageBody::VoteRequest { last_log_id, transfer });
        }
    }

    /// Step down to follower at `term`.
    ///
    /// The election timer of a follower or candidate is left running: it is reset only by a
    /// granted vote or by a message from the current leader. Otherwise a candidate with a stale
    /// log could keep the whole cluster from ever timing out.
    fn become_follower(&mut self, term: u64, leader_id: Option<NodeId>) {
        if term > self.hard_state.current_term {
            self.hard_state.current_term = term;
            self.hard_state.voted_for = None;
        }

        if self.is_leader() {
            self.reset_election_timer();
        }

        self.leader_id = leader_id;
        self.progress.clear();
        self.votes.clear();
        self.pending_config = None;

        if self.membership.is_voter(&self.id()) {
            self.set_state(ServerState::Follower);
        } else {
            self.set_state(ServerState::Learner);
        }
    }

    fn become_leader(&mut self) {
        self.set_state(ServerState::Leader);
        self.leader_id = Some(self.id());
        self.heartbeat_elapsed = 0;
        self.election_elapsed = 0;

        let next = self.log.last_index() + 1;
        let me = self.id();
        self.progress = self.membership.member_ids().filter(|id| *id != me).map(|id| (id, Progress::new(next))).collect();

        // A membership entry left by a previous leader may still be on its way.
        self.pending_config = self
            .log
            .iter_from(self.membership_log_id.index + 1)
            .filter(|e| e.payload.is_membership())
            .map(|e| e.log_id)
            .last();

        // Entries of previous terms are committed only by committing one of the current term.
        self.append_local(EntryPayload::Blank);

        // The previous leader may have left before leaving the joint membership.
        if self.membership.is_in_joint_consensus() && self.pending_config.is_none() {
            let fin = self.membership.to_final();
            tracing::info!(id = self.id(), "elected in joint membership, propose final: {}", fin.summary());
            let log_id = self.append_local(EntryPayload::ConfigChange(fin));
            self.pending_config = Some(log_id);
        }

        self.broadcast_append();
        self.maybe_commit();
    }

    fn append_local(&mut self, payload: EntryPayload) -> LogId {
        let log_id = LogId::new(self.current_term(), self.log.last_index() + 1);
        let entry = Entry::new(log_id, payload);

        self.log.append([entry.clone()]);
        self.ready.entries.push(entry);
        log_id
    }

    /// Append a new entry on the leader.
    pub(crate) fn propose(&mut self, payload: EntryPayload) -> Result<LogId, NotLeader> {
        if !self.is_leader() {
            return Err(NotLeader {
                leader_id: self.leader_id,
            });
        }

        let is_membership = payload.is_membership();
        let log_id = self.append_local(payload);
        if is_membership {
            self.pending_config = Some(log_id);
        }

        self.broadcast_append();
        self.maybe_commit();
        Ok(log_id)
    }

    fn send(&mut self, to: NodeId, body: MessageBody) {
        self.ready.messages.push(Message {
            from: self.id(),
            to,
            term: self.current_term(),
            body,
        });
    }

    fn broadcast_append(&mut self) {
        let ids: Vec<_> = self.progress.keys().copied().collect();
        for id in ids {
            self.send_append(id, false);
        }
    }

    fn broadcast_heartbeat(&mut self) {
        let ids: Vec<_> = self.progress.keys().copied().collect();
        for id in ids {
            self.send_append(id, true);
        }
    }

    /// Send the entries the peer needs, or schedule a snapshot if they are purged.
    ///
    /// A heartbeat is sent even if a probe is in flight.
    fn send_append(&mut self, to: NodeId, heartbeat: bool) {
        let (next, state) = match self.progress.get(&to) {
            Some(pr) => {
                if pr.state == ReplicationState::Snapshot || (!heartbeat && !pr.can_send()) {
                    return;
                }
                (pr.next, pr.state)
            }
            None => return,
        };

        let prev_log_id = match self.log.log_id_at(next - 1) {
            Some(x) => x,
            None => {
                tracing::info!(id = self.id(), target = to, next, "logs are purged, send snapshot");
                if let Some(pr) = self.progress.get_mut(&to) {
                    pr.become_snapshot();
                }
                self.ready.send_snapshot.push(to);
                return;
            }
        };

        let entries = self.log.slice(next, u64::MAX, self.config.max_payload_entries);
        if let Some(pr) = self.progress.get_mut(&to) {
            match state {
                ReplicationState::Replicate => {
                    if let Some(last) = entries.last() {
                        pr.next = last.log_id.index + 1;
                    }
                }
                ReplicationState::Probe => pr.paused = true,
                ReplicationState::Snapshot => {}
            }
        }

        let leader_commit = self.commit_index();
        self.send(to, MessageBody::AppendEntries {
            prev_log_id,
            entries,
            leader_commit,
        });
    }

    /// Commit the greatest index a quorum of voters holds, if it is of the current term.
    fn maybe_commit(&mut self) {
        let mut matched: BTreeMap<NodeId, u64> = self.progress.iter().map(|(id, pr)| (*id, pr.matched)).collect();
        matched.insert(self.id(), self.log.last_index());

        let index = match self.membership.quorum_set().quorum_value(&matched) {
            Some(x) => x,
            None => return,
        };

        if index <= self.commit_index() || self.log.term_at(index) != Some(self.current_term()) {
            return;
        }

        self.commit_to(index);
        self.broadcast_append();
    }

    fn commit_to(&mut self, index: u64) {
        if index <= self.hard_state.commit_index {
            return;
        }
        tracing::debug!(id = self.id(), "commit to {}", index);
        self.hard_state.commit_index = index;

        let end = self.hard_state.commit_index;
        let committed: Vec<Entry> =
            self.log.iter_from(self.handed + 1).take_while(|e| e.log_id.index <= end).cloned().collect();

        if let Some(last) = committed.last() {
            self.handed = last.log_id.index;
        }
        self.ready.committed.extend(committed);
    }

    /// Handle a message from another member.
    ///
    /// `Probe` and `MemberRemoved` are not raft messages and are ignored here.
    #[tracing::instrument(level = "trace", skip_all, fields(id = self.id()))]
    pub(crate) fn step(&mut self, msg: Message) {
        if matches!(msg.body, MessageBody::Probe | MessageBody::MemberRemoved) {
            return;
        }
        if self.state == ServerState::Shutdown {
            return;
        }

        let term = self.current_term();

        if msg.term > term {
            match &msg.body {
                MessageBody::VoteRequest { transfer, .. } => {
                    if !transfer && self.in_lease() {
                        tracing::debug!(
                            "ignore vote request from {} at term {}: leader lease not expired",
                            msg.from,
                            msg.term
                        );
                        return;
                    }
                    self.become_follower(msg.term, None);
                }
                MessageBody::AppendEntries { .. } | MessageBody::InstallSnapshot { .. } => {
                    self.become_follower(msg.term, Some(msg.from));
                }
                _ => self.become_follower(msg.term, None),
            }
        } else if msg.term < term {
            match msg.body {
                MessageBody::AppendEntries { prev_log_id, .. } => {
                    // Let the stale leader learn the new term.
                    let hint = self.log.last_index();
                    self.send(msg.from, MessageBody::AppendEntriesResponse {
                        success: false,
                        index: prev_log_id.index,
                        hint,
                    });
                }
                MessageBody::InstallSnapshot { .. } => {
                    let last_index = self.log.last_index();
                    self.send(msg.from, MessageBody::AppendEntriesResponse {
                        success: false,
                        index: last_index,
                        hint: last_index,
                    });
                }
                MessageBody::VoteRequest { .. } => {
                    self.send(msg.from, MessageBody::VoteResponse { granted: false });
                }
                _ => {
                    tracing::debug!("ignore stale message: {}", msg.summary());
                }
            }
            return;
        }

        match msg.body {
            MessageBody::VoteRequest { last_log_id, .. } => self.handle_vote_request(msg.from, last_log_id),
            MessageBody::VoteResponse { granted } => self.handle_vote_response(msg.from, granted),
            MessageBody::AppendEntries {
                prev_log_id,
                entries,
                leader_commit,
            } => self.handle_append_entries(msg.from, prev_log_id, entries, leader_commit),
            MessageBody::AppendEntriesResponse { success, index, hint } => {
                self.handle_append_response(msg.from, success, index, hint)
            }
            MessageBody::InstallSnapshot { snapshot } => self.handle_install_snapshot(msg.from, snapshot),
            MessageBody::InstallSnapshotResponse { last_index } => self.handle_snapshot_response(msg.from, last_index),
            MessageBody::TimeoutNow => {
                if !self.is_leader() {
                    tracing::info!("leadership transferred from {}, start campaign", msg.from);
                    self.campaign(true);
                }
            }
            MessageBody::Probe | MessageBody::MemberRemoved => {}
        }
    }

    fn handle_vote_request(&mut self, candidate: NodeId, last_log_id: LogId) {
        let can_vote = self.hard_state.voted_for == Some(candidate)
            || (self.hard_state.voted_for.is_none() && self.leader_id.is_none());
        let up_to_date = last_log_id >= self.log.last_log_id();
        let granted = can_vote && up_to_date;

        tracing::debug!(
            "vote request from {}, last: {}, mine: {}, can_vote: {}, granted: {}",
            candidate,
            last_log_id,
            self.log.last_log_id(),
            can_vote,
            granted
        );

        if granted {
            self.hard_state.voted_for = Some(candidate);
            self.reset_election_timer();
        }
        self.send(candidate, MessageBody::VoteResponse { granted });
    }

    fn handle_vote_response(&mut self, from: NodeId, granted: bool) {
        if !self.state.is_candidate() || !granted {
            return;
        }

        self.votes.insert(from);
        if self.membership.quorum_set().is_quorum(self.votes.iter()) {
            tracing::info!(id = self.id(), term = self.current_term(), votes = ?self.votes, "elected");
            self.become_leader();
        }
    }

    fn handle_append_entries(&mut self, leader: NodeId, prev_log_id: LogId, entries: Vec<Entry>, leader_commit: u64) {
        if self.leader_id != Some(leader) || self.state.is_candidate() || self.is_leader() {
            self.become_follower(self.current_term(), Some(leader));
        }
        self.election_elapsed = 0;

        let commit = self.commit_index();
        if prev_log_id.index < commit {
            self.send(leader, MessageBody::AppendEntriesResponse {
                success: true,
                index: commit,
                hint: 0,
            });
            return;
        }

        if !self.log.matches(&prev_log_id) {
            let hint = self.log.last_index().min(prev_log_id.index.saturating_sub(1));
            tracing::debug!("reject append after {}, last: {}", prev_log_id, self.log.last_log_id());
            self.send(leader, MessageBody::AppendEntriesResponse {
                success: false,
                index: prev_log_id.index,
                hint,
            });
            return;
        }

        let last_new = prev_log_id.index + entries.len() as u64;

        if let Some(i) = self.log.find_first_new(&entries) {
            let first_new = entries[i].log_id.index;
            if first_new <= self.log.last_index() {
                if first_new <= commit {
                    tracing::error!("leader {} conflicts with committed log at {}", leader, first_new);
                    return;
                }
                self.truncate_since(first_new);
            }

            let new_entries = entries[i..].to_vec();
            self.log.append(new_entries.iter().cloned());
            self.ready.entries.extend(new_entries);
        }

        self.commit_to(leader_commit.min(last_new));
        self.send(leader, MessageBody::AppendEntriesResponse {
            success: true,
            index: last_new,
            hint: 0,
        });
    }

    fn truncate_since(&mut self, since: u64) {
        tracing::info!(id = self.id(), "truncate conflicting logs since {}", since);

        self.log.truncate_since(since);
        self.ready.entries.retain(|e| e.log_id.index < since);
        self.ready.truncate_since = Some(self.ready.truncate_since.map_or(since, |x| x.min(since)));
    }

    fn handle_append_response(&mut self, from: NodeId, success: bool, index: u64, hint: u64) {
        if !self.is_leader() {
            return;
        }
        let last_index = self.log.last_index();

        let pr = match self.progress.get_mut(&from) {
            Some(x) => x,
            None => return,
        };
        pr.recent_active = true;

        if !success {
            if pr.decr_to(index, hint) {
                tracing::debug!("{} rejected append after {}, hint: {}, retry from {}", from, index, hint, pr.next);
                self.send_append(from, false);
            }
            return;
        }

        let updated = pr.update(index);
        match pr.state {
            ReplicationState::Probe => {
                if updated || pr.matched == index {
                    pr.become_replicate();
                }
            }
            ReplicationState::Replicate => {}
            ReplicationState::Snapshot => {}
        }
        let more = pr.next <= last_index;

        if updated {
            self.maybe_commit();
        }
        if more {
            self.send_append(from, false);
        }
    }

    fn handle_install_snapshot(&mut self, leader: NodeId, snapshot: Snapshot) {
        if self.leader_id != Some(leader) || self.state.is_candidate() || self.is_leader() {
            self.become_follower(self.current_term(), Some(leader));
        }
        self.election_elapsed = 0;

        let last = snapshot.meta.last_log_id;
        if last.index <= self.commit_index() {
            let commit = self.commit_index();
            self.send(leader, MessageBody::InstallSnapshotResponse { last_index: commit });
            return;
        }

        tracing::info!(id = self.id(), "install snapshot {} from {}", last, leader);

        let reset_log = !self.log.matches(&last);
        if reset_log {
            self.log.reset_to(last);
            self.ready.entries.clear();
            self.ready.truncate_since = None;
        } else {
            self.log.purge_upto(last.index);
            self.ready.entries.retain(|e| e.log_id.index > last.index);
        }

        self.hard_state.commit_index = last.index;
        self.handed = last.index;
        self.ready.committed.retain(|e| e.log_id.index > last.index);
        self.set_membership(snapshot.meta.last_membership.clone(), last);

        self.ready.install_snapshot = Some((snapshot, reset_log));
        self.send(leader, MessageBody::InstallSnapshotResponse { last_index: last.index });
    }

    fn handle_snapshot_response(&mut self, from: NodeId, last_index: u64) {
        if !self.is_leader() {
            return;
        }

        if let Some(pr) = self.progress.get_mut(&from) {
            pr.recent_active = true;
            pr.update(last_index);
            pr.become_probe();
        }
        self.maybe_commit();
        self.send_append(from, false);
    }

    /// The message to `to` could not be delivered.
    pub(crate) fn report_unreachable(&mut self, to: NodeId) {
        if let Some(pr) = self.progress.get_mut(&to) {
            if pr.state != ReplicationState::Probe {
                tracing::debug!("{} is unreachable, switch to probe", to);
            }
            pr.become_probe();
        }
    }

    /// Sending a snapshot to `to` failed; it is retried after the next heartbeat.
    pub(crate) fn report_snapshot_failure(&mut self, to: NodeId) {
        if let Some(pr) = self.progress.get_mut(&to) {
            if pr.state == ReplicationState::Snapshot {
                pr.become_probe();
            }
        }
    }

    /// A membership entry, or a snapshot, has been applied.
    ///
    /// A leader that applied a joint membership proposes the final one; its log id is returned.
    pub(crate) fn update_membership(&mut self, membership: Membership, log_id: LogId) -> Option<LogId> {
        if log_id < self.membership_log_id {
            return None;
        }
        self.set_membership(membership, log_id);

        if self.pending_config.map_or(false, |p| p <= log_id) {
            self.pending_config = None;
        }

        if self.is_leader() && self.membership.is_in_joint_consensus() && self.pending_config.is_none() {
            let fin = self.membership.to_final();
            tracing::info!(id = self.id(), "joint membership applied, propose final: {}", fin.summary());
            return self.propose(EntryPayload::ConfigChange(fin)).ok();
        }
        None
    }

    fn set_membership(&mut self, membership: Membership, log_id: LogId) {
        tracing::info!(id = self.id(), "effective membership at {}: {}", log_id, membership.summary());

        self.membership = Arc::new(membership);
        self.membership_log_id = log_id;

        let is_voter = self.membership.is_voter(&self.id());
        match self.state {
            ServerState::Follower if !is_voter => self.set_state(ServerState::Learner),
            ServerState::Learner if is_voter => {
                self.reset_election_timer();
                self.set_state(ServerState::Follower);
            }
            _ => {}
        }

        if self.is_leader() {
            let me = self.id();
            let next = self.log.last_index() + 1;
            let members: BTreeSet<NodeId> = self.membership.member_ids().filter(|id| *id != me).collect();

            self.progress.retain(|id, _| members.contains(id));

            let added: Vec<NodeId> = members.into_iter().filter(|id| !self.progress.contains_key(id)).collect();
            for id in added {
                self.progress.insert(id, Progress::new(next));
                self.send_append(id, false);
            }
        }
    }

    /// A snapshot up to `last` is durable: drop logs before it, keeping `keep` of them for lagging
    /// followers. Returns the purged index.
    pub(crate) fn on_snapshot_built(&mut self, last: LogId, keep: u64) -> Option<u64> {
        let upto = last.index.saturating_sub(keep);
        if upto <= self.log.purged().index {
            return None;
        }
        self.log.purge_upto(upto);
        Some(upto)
    }

    /// Ask the most up-to-date other voter to campaign immediately.
    pub(crate) fn transfer_leadership(&mut self) -> Option<NodeId> {
        if !self.is_leader() {
            return None;
        }

        let me = self.id();
        let voters = self.membership.voter_ids();
        let target = self
            .progress
            .iter()
            .filter(|(id, _)| **id != me && voters.contains(id))
            .max_by_key(|(_, pr)| pr.matched)
            .map(|(id, _)| *id)?;

        tracing::info!(id = me, "transfer leadership to {}", target);
        self.send(target, MessageBody::TimeoutNow);
        Some(target)
    }

    pub(crate) fn shutdown(&mut self) {
        self.set_state(ServerState::Shutdown);
        self.progress.clear();
    }

    /// The last index known to be replicated to a peer, on a leader.
    pub(crate) fn matched(&self, id: &NodeId) -> Option<u64> {
        self.progress.get(id).map(|pr| pr.matched)
    }
}
