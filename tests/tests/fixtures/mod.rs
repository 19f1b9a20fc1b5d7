//! Fixtures for testing a kvraft cluster in a single process.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::panic::PanicHookInfo;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Once;
use std::time::Duration;

use anyerror::AnyError;
use anyhow::Context;
use kvraft::async_trait::async_trait;
use kvraft::error::NetworkError;
use kvraft::error::RPCError;
use kvraft::error::Unreachable;
use kvraft::metrics::Wait;
use kvraft::Config;
use kvraft::KvRequest;
use kvraft::Member;
use kvraft::Message;
use kvraft::MessageSummary;
use kvraft::NodeId;
use kvraft::Raft;
use kvraft::RaftNetwork;
use kvraft::RaftNetworkFactory;
use kvraft::ServerState;
use lazy_static::lazy_static;
use memstore::MemKv;
use memstore::MemLogStore;
use memstore::MemSnapshotStore;
use tracing_appender::non_blocking::WorkerGuard;

use crate::fixtures::logging::init_file_logging;

pub mod logging;

pub fn init_default_ut_tracing() {
    static START: Once = Once::new();

    START.call_once(|| {
        let mut g = GLOBAL_UT_LOG_GUARD.as_ref().lock().unwrap();
        *g = Some(init_global_tracing("ut", "_log", "DEBUG"));
    });
}

lazy_static! {
    static ref GLOBAL_UT_LOG_GUARD: Arc<Mutex<Option<WorkerGuard>>> = Arc::new(Mutex::new(None));
}

pub fn init_global_tracing(app_name: &str, dir: &str, level: &str) -> WorkerGuard {
    set_panic_hook();

    let (g, sub) = init_file_logging(app_name, dir, level);
    tracing::subscriber::set_global_default(sub).expect("error setting global tracing subscriber");

    tracing::info!("initialized global tracing: in {}/{} at {}", dir, app_name, level);
    g
}

pub fn set_panic_hook() {
    std::panic::set_hook(Box::new(|panic| {
        log_panic(panic);
    }));
}

pub fn log_panic(panic: &PanicHookInfo) {
    eprintln!("{}", panic);

    if let Some(location) = panic.location() {
        tracing::error!(
            message = %panic,
            panic.file = location.file(),
            panic.line = location.line(),
            panic.column = location.column(),
        );
    } else {
        tracing::error!(message = %panic);
    }
}

pub fn timeout() -> Option<Duration> {
    Some(Duration::from_millis(5_000))
}

/// A config with short timeouts; membership changes need peers healthy for 500 ms.
pub fn test_config() -> anyhow::Result<Arc<Config>> {
    let config = Config {
        health_interval: 500,
        ..Default::default()
    }
    .validate()?;

    Ok(Arc::new(config))
}

pub fn member(id: NodeId) -> Member {
    Member::new(id, [format!("http://127.0.0.1:{}", 23800 + id)])
}

pub fn learner(id: NodeId) -> Member {
    Member::new_learner(id, [format!("http://127.0.0.1:{}", 23800 + id)])
}

/// The stores of a node started by the router.
#[derive(Clone)]
pub struct MemStores {
    pub log: Arc<MemLogStore>,
    pub snapshot: Arc<MemSnapshotStore>,
    pub sm: Arc<MemKv>,
}

impl MemStores {
    pub fn new() -> Self {
        let (log, snapshot, sm) = memstore::new_mem_store();
        Self { log, snapshot, sm }
    }
}

/// Emulates the network between nodes in one process, with the `RaftNetworkFactory` trait.
#[derive(Clone)]
pub struct RaftRouter {
    /// The Raft runtime config which all nodes are using.
    config: Arc<Config>,

    /// The table of all nodes currently known to this router instance.
    routing_table: Arc<Mutex<BTreeMap<NodeId, (Raft, MemStores)>>>,

    /// Nodes which are isolated can neither send nor receive messages.
    isolated_nodes: Arc<Mutex<HashSet<NodeId>>>,
}

impl RaftRouter {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            routing_table: Default::default(),
            isolated_nodes: Default::default(),
        }
    }

    /// Create a cluster of `voter_ids` by initializing the smallest id with all of them, then add
    /// `learners`.
    ///
    /// It returns the last log index: 1 for the initial membership, 2 for the blank entry of the
    /// first leader, plus one for each learner.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn new_cluster(
        &mut self,
        voter_ids: BTreeSet<NodeId>,
        learners: BTreeSet<NodeId>,
    ) -> anyhow::Result<u64> {
        let leader_id = *voter_ids.iter().next().context("no voter")?;

        for id in voter_ids.iter() {
            self.new_raft_node(*id);
        }

        tracing::info!("--- initialize {} with voters {:?}", leader_id, voter_ids);
        let members = voter_ids.iter().map(|id| member(*id)).collect();
        self.get_raft_handle(&leader_id)?.initialize(members).await?;

        let mut log_index = 2;
        self.wait(&leader_id, timeout()).state(ServerState::Leader, "init leader").await?;
        self.wait_for_log(&voter_ids, log_index, timeout(), "init cluster").await?;

        for id in learners.iter() {
            tracing::info!(log_index, "--- add learner: {}", id);

            self.new_raft_node(*id);
            self.get_raft_handle(&leader_id)?.add_member_with_id(learner(*id)).await?;
            log_index += 1;
        }

        let all = voter_ids.union(&learners).copied().collect();
        self.wait_for_log(&all, log_index, timeout(), "learners").await?;

        Ok(log_index)
    }

    /// Create and register a new node with empty stores.
    pub fn new_raft_node(&mut self, id: NodeId) {
        self.new_raft_node_with_sto(id, MemStores::new())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id))]
    pub fn new_raft_node_with_sto(&mut self, id: NodeId, stores: MemStores) {
        let node = Raft::new(
            id,
            self.config.clone(),
            self.clone(),
            stores.log.clone(),
            stores.snapshot.clone(),
            stores.sm.clone(),
        );

        let mut rt = self.routing_table.lock().unwrap();
        rt.insert(id, (node, stores));
    }

    /// Remove the node from the routing table and from isolation.
    pub fn remove_node(&mut self, id: NodeId) -> Option<(Raft, MemStores)> {
        let opt_handles = {
            let mut rt = self.routing_table.lock().unwrap();
            rt.remove(&id)
        };

        {
            let mut isolated = self.isolated_nodes.lock().unwrap();
            isolated.remove(&id);
        }

        opt_handles
    }

    /// Shut a node down and start it again on the same log and snapshot stores.
    ///
    /// The key-value state machine is volatile: the new node rebuilds it from the snapshot and
    /// the committed logs.
    pub async fn restart_node(&mut self, id: NodeId) -> anyhow::Result<()> {
        let (raft, stores) = self.remove_node(id).with_context(|| format!("node {} not found", id))?;
        raft.shutdown().await?;

        tracing::info!("--- restart node {}", id);

        let stores = MemStores {
            sm: Arc::new(MemKv::new()),
            ..stores
        };
        self.new_raft_node_with_sto(id, stores);
        Ok(())
    }

    pub fn get_raft_handle(&self, id: &NodeId) -> anyhow::Result<Raft> {
        let rt = self.routing_table.lock().unwrap();
        let (raft, _) = rt.get(id).with_context(|| format!("node {} not found in routing table", id))?;
        Ok(raft.clone())
    }

    pub fn get_storage_handle(&self, id: &NodeId) -> anyhow::Result<MemStores> {
        let rt = self.routing_table.lock().unwrap();
        let (_, stores) = rt.get(id).with_context(|| format!("node {} not found in routing table", id))?;
        Ok(stores.clone())
    }

    /// Isolate the network of the specified node: messages from or to it fail as unreachable.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn isolate_node(&self, id: NodeId) {
        self.isolated_nodes.lock().unwrap().insert(id);
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn restore_node(&self, id: NodeId) {
        self.isolated_nodes.lock().unwrap().remove(&id);
    }

    pub fn wait(&self, node_id: &NodeId, timeout: Option<Duration>) -> Wait {
        let node = {
            let rt = self.routing_table.lock().unwrap();
            rt.get(node_id).expect("target node not found in routing table").clone().0
        };

        node.wait(timeout)
    }

    /// Wait for the specified nodes until they have appended and applied exactly `want_log`.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn wait_for_log(
        &self,
        node_ids: &BTreeSet<NodeId>,
        want_log: u64,
        timeout: Option<Duration>,
        msg: &str,
    ) -> anyhow::Result<()> {
        for id in node_ids.iter() {
            self.wait(id, timeout).log(want_log, msg).await?;
        }
        Ok(())
    }

    /// Wait until one of `node_ids` is a leader, and return it.
    pub async fn wait_for_leader(&self, node_ids: &BTreeSet<NodeId>, msg: &str) -> anyhow::Result<NodeId> {
        let deadline = tokio::time::Instant::now() + timeout().unwrap_or_default();

        loop {
            for id in node_ids.iter() {
                let raft = self.get_raft_handle(id)?;
                let m = raft.metrics().borrow().clone();
                if m.state == ServerState::Leader && m.running_state.is_ok() {
                    return Ok(*id);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("timeout waiting for a leader among {:?}: {}", node_ids, msg);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until `leader` considers every voter it knows healthy.
    pub async fn wait_for_healthy_voters(&self, leader: &NodeId, msg: &str) -> anyhow::Result<()> {
        // Twice the health interval plus slack.
        let t = Duration::from_millis(self.config.health_interval * 2 + 2_000);

        self.wait(leader, Some(t)).all_voters_healthy(msg).await?;
        Ok(())
    }

    /// Send `n` put requests `{prefix}-{i}` to `target`.
    pub async fn client_request_many(&self, target: NodeId, prefix: &str, n: usize) -> anyhow::Result<()> {
        let raft = self.get_raft_handle(&target)?;

        for i in 0..n {
            let req = KvRequest::Put {
                key: format!("{}-{}", prefix, i),
                value: format!("{}", i),
            };
            raft.client_write(req).await?;
        }
        Ok(())
    }

    /// Deliver a message to `target`, unless either end is isolated.
    pub fn send(&self, target: NodeId, msg: Message) -> Result<(), RPCError> {
        tracing::debug!("send to {}: {}", target, msg.summary());

        {
            let isolated = self.isolated_nodes.lock().unwrap();
            if isolated.contains(&target) || isolated.contains(&msg.from) {
                let e = AnyError::error(format!("{} -> {} is isolated", msg.from, target));
                return Err(Unreachable::new(&e).into());
            }
        }

        let raft = {
            let rt = self.routing_table.lock().unwrap();
            match rt.get(&target) {
                Some((raft, _)) => raft.clone(),
                None => {
                    let e = AnyError::error(format!("node {} not found", target));
                    return Err(Unreachable::new(&e).into());
                }
            }
        };

        raft.step(msg).map_err(|e| NetworkError::new(&e).into())
    }

    /// Shut down every node.
    pub async fn shutdown_all(&self) -> anyhow::Result<()> {
        let nodes: Vec<Raft> = {
            let rt = self.routing_table.lock().unwrap();
            rt.values().map(|(raft, _)| raft.clone()).collect()
        };

        for raft in nodes {
            raft.shutdown().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RaftNetworkFactory for RaftRouter {
    type Network = RaftRouterNetwork;

    async fn connect(&mut self, target: NodeId, _member: Option<&Member>) -> Self::Network {
        RaftRouterNetwork {
            target,
            owner: self.clone(),
        }
    }
}

pub struct RaftRouterNetwork {
    target: NodeId,
    owner: RaftRouter,
}

#[async_trait]
impl RaftNetwork for RaftRouterNetwork {
    async fn send(&mut self, msg: Message) -> Result<(), RPCError> {
        self.owner.send(self.target, msg)
    }
}
