use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::engine::Engine;
use crate::engine::EngineConfig;
use crate::engine::RaftLog;
use crate::storage::HardState;
use crate::Entry;
use crate::EntryPayload;
use crate::KvRequest;
use crate::LogId;
use crate::Member;
use crate::Membership;
use crate::Message;
use crate::NodeId;

pub(crate) fn log_id(term: u64, index: u64) -> LogId {
    LogId::new(term, index)
}

pub(crate) fn blank(term: u64, index: u64) -> Entry {
    Entry::new_blank(log_id(term, index))
}

pub(crate) fn put(term: u64, index: u64, key: &str) -> Entry {
    Entry::new(
        log_id(term, index),
        EntryPayload::Data(KvRequest::Put {
            key: key.to_string(),
            value: key.to_string(),
        }),
    )
}

pub(crate) fn member(id: NodeId) -> Member {
    Member::new(id, [format!("http://127.0.0.1:{}", 20000 + id)])
}

pub(crate) fn voters(ids: impl IntoIterator<Item = NodeId>) -> Membership {
    Membership::new(ids.into_iter().map(member))
}

/// An engine with election timeout `10 * id` ticks, so that elections in a test cluster never
/// collide.
pub(crate) fn new_engine(id: NodeId, membership: Membership, entries: Vec<Entry>) -> Engine {
    let config = EngineConfig {
        id,
        election_ticks_min: 10 * id,
        election_ticks_max: 10 * id + 1,
        ..Default::default()
    };

    Engine::new(
        config,
        HardState::default(),
        RaftLog::new(LogId::default(), entries),
        membership,
        LogId::default(),
        0,
    )
}

/// Engines wired together in memory, without persistence delays.
pub(crate) struct Cluster {
    pub(crate) engines: BTreeMap<NodeId, Engine>,
    pub(crate) isolated: BTreeSet<NodeId>,

    /// Committed entries handed out by every engine, in order.
    pub(crate) committed: BTreeMap<NodeId, Vec<Entry>>,
}

impl Cluster {
    pub(crate) fn new(ids: impl IntoIterator<Item = NodeId>) -> Self {
        let ids: Vec<NodeId> = ids.into_iter().collect();
        let membership = voters(ids.clone());

        let engines = ids.iter().map(|id| (*id, new_engine(*id, membership.clone(), vec![]))).collect();

        Self {
            engines,
            isolated: BTreeSet::new(),
            committed: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> &Engine {
        &self.engines[&id]
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Engine {
        self.engines.get_mut(&id).unwrap()
    }

    /// The leader with the highest term that is not isolated.
    pub(crate) fn leader(&self) -> Option<NodeId> {
        self.engines
            .values()
            .filter(|e| e.is_leader() && !self.isolated.contains(&e.id()))
            .max_by_key(|e| e.current_term())
            .map(|e| e.id())
    }

    /// Deliver messages and apply committed entries until nothing moves.
    pub(crate) fn stabilize(&mut self) {
        for _ in 0..1000 {
            let mut messages: Vec<Message> = vec![];
            let mut moved = false;

            let ids: Vec<NodeId> = self.engines.keys().copied().collect();
            for id in ids {
                let eng = self.engines.get_mut(&id).unwrap();
                if !eng.has_ready() {
                    continue;
                }
                moved = true;

                let ready = eng.take_ready();
                messages.extend(ready.messages);

                for entry in ready.committed.iter() {
                    if let Some(m) = eng.membership.apply(&entry.payload) {
                        eng.update_membership(m, entry.log_id);
                    }
                }
                self.committed.entry(id).or_default().extend(ready.committed);
            }

            for msg in messages {
                if self.isolated.contains(&msg.from) || self.isolated.contains(&msg.to) {
                    continue;
                }
                if let Some(eng) = self.engines.get_mut(&msg.to) {
                    eng.step(msg);
                }
            }

            if !moved {
                return;
            }
        }
        panic!("cluster does not stabilize");
    }

    pub(crate) fn tick(&mut self, n: usize) {
        for _ in 0..n {
            for eng in self.engines.values_mut() {
                eng.tick();
            }
            self.stabilize();
        }
    }

    /// Tick until a non-isolated leader is elected.
    pub(crate) fn tick_until_leader(&mut self) -> NodeId {
        for _ in 0..1000 {
            if let Some(id) = self.leader() {
                return id;
            }
            self.tick(1);
        }
        panic!("no leader elected");
    }

    pub(crate) fn propose(&mut self, key: &str) -> LogId {
        let leader = self.leader().unwrap();
        let payload = EntryPayload::Data(KvRequest::Put {
            key: key.to_string(),
            value: key.to_string(),
        });
        let log_id = self.get_mut(leader).propose(payload).unwrap();
        self.stabilize();
        log_id
    }
}
