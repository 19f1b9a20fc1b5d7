use rand::thread_rng;
use rand::Rng;

use crate::Config;
use crate::NodeId;

/// The parameters an [`Engine`](crate::engine::Engine) needs, in ticks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EngineConfig {
    pub(crate) id: NodeId,
    pub(crate) heartbeat_ticks: u64,

    /// Election timeouts are randomized in `[min, max)`.
    pub(crate) election_ticks_min: u64,
    pub(crate) election_ticks_max: u64,

    pub(crate) max_payload_entries: u64,
}

impl EngineConfig {
    pub(crate) fn new(id: NodeId, config: &Config) -> Self {
        Self {
            id,
            heartbeat_ticks: config.heartbeat_ticks(),
            election_ticks_min: config.min_election_ticks(),
            election_ticks_max: config.max_election_ticks(),
            max_payload_entries: config.max_payload_entries,
        }
    }

    pub(crate) fn new_rand_election_ticks(&self) -> u64 {
        thread_rng().gen_range(self.election_ticks_min..self.election_ticks_max)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            id: 0,
            heartbeat_ticks: 1,
            election_ticks_min: 10,
            election_ticks_max: 11,
            max_payload_entries: 300,
        }
    }
}
