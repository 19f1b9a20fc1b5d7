//! Raft runtime configuration.

use std::time::Duration;

use clap::Parser;
use rand::thread_rng;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use crate::config::error::ConfigError;

/// Log compaction and snapshot policy.
///
/// This governs when periodic snapshots will be taken. Once a snapshot is durable the log entries
/// it covers, except the most recent `max_applied_log_to_keep`, are purged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotPolicy {
    /// A snapshot will be generated once the log has grown the specified number of logs since
    /// the last snapshot.
    LogsSinceLast(u64),
}

pub(crate) fn parse_snapshot_policy(src: &str) -> Result<SnapshotPolicy, ConfigError> {
    let elts = src.split(':').collect::<Vec<_>>();
    if elts.len() != 2 || elts[0] != "since_last" {
        return Err(ConfigError::InvalidSnapshotPolicy {
            syntax: "since_last:<num>".to_string(),
            invalid: src.to_string(),
        });
    }

    let n_logs = elts[1].parse::<u64>().map_err(|e| ConfigError::InvalidNumber {
        invalid: src.to_string(),
        reason: e.to_string(),
    })?;
    Ok(SnapshotPolicy::LogsSinceLast(n_logs))
}

/// The runtime configuration for a Raft node.
///
/// All durations are in milliseconds. Keep `tick_interval <= heartbeat_interval <
/// election_timeout_min`, and the election timeout well above the time a message takes to
/// travel between two members, or followers will start needless elections.
///
/// `health_interval` is how long a peer has to stay reachable, without a single failure, before
/// a membership change may count on it.
#[derive(Clone, Debug, Serialize, Deserialize, Parser)]
pub struct Config {
    /// The application specific name of this Raft cluster
    #[clap(long, env = "RAFT_CLUSTER_NAME", default_value = "foo")]
    pub cluster_name: String,

    /// The period of the logical clock driving elections and heartbeats
    #[clap(long, env = "RAFT_TICK_INTERVAL", default_value = "10")]
    pub tick_interval: u64,

    /// The minimum election timeout
    #[clap(long, env = "RAFT_ELECTION_TIMEOUT_MIN", default_value = "150")]
    pub election_timeout_min: u64,

    /// The maximum election timeout
    #[clap(long, env = "RAFT_ELECTION_TIMEOUT_MAX", default_value = "300")]
    pub election_timeout_max: u64,

    /// The interval at which leaders send heartbeats to followers
    #[clap(long, env = "RAFT_HEARTBEAT_INTERVAL", default_value = "50")]
    pub heartbeat_interval: u64,

    /// The maximum number of entries per payload allowed to be transmitted during replication
    #[clap(long, env = "RAFT_MAX_PAYLOAD_ENTRIES", default_value = "300")]
    pub max_payload_entries: u64,

    /// The snapshot policy to use for a Raft node.
    #[clap(
        long,
        env = "RAFT_SNAPSHOT_POLICY",
        default_value = "since_last:5000",
        parse(try_from_str=parse_snapshot_policy)
    )]
    pub snapshot_policy: SnapshotPolicy,

    /// The maximum number of applied logs to keep before purging
    #[clap(long, env = "RAFT_MAX_APPLIED_LOG_TO_KEEP", default_value = "1000")]
    pub max_applied_log_to_keep: u64,

    /// How long a peer must be continuously reachable before it counts as healthy
    #[clap(long, env = "RAFT_HEALTH_INTERVAL", default_value = "5000")]
    pub health_interval: u64,

    /// Reject membership changes that could leave the cluster without a healthy quorum
    #[clap(long, env = "RAFT_STRICT_RECONFIG_CHECK", parse(try_from_str), default_value = "true")]
    pub strict_reconfig_check: bool,

    /// How long a write or a membership change waits for its log to be applied
    #[clap(long, env = "RAFT_REQUEST_TIMEOUT", default_value = "5000")]
    pub request_timeout: u64,

    /// The timeout for delivering a single message to a peer
    #[clap(long, env = "RAFT_SEND_TIMEOUT", default_value = "1000")]
    pub send_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        <Self as Parser>::parse_from(&Vec::<&'static str>::new())
    }
}

impl Config {
    /// Generate a new random election timeout within the configured min & max.
    pub fn new_rand_election_timeout(&self) -> u64 {
        thread_rng().gen_range(self.election_timeout_min..self.election_timeout_max)
    }

    /// Number of ticks between two heartbeats.
    pub fn heartbeat_ticks(&self) -> u64 {
        (self.heartbeat_interval / self.tick_interval).max(1)
    }

    /// The minimum election timeout, in ticks.
    pub fn min_election_ticks(&self) -> u64 {
        (self.election_timeout_min / self.tick_interval).max(1)
    }

    /// The exclusive upper bound of the election timeout, in ticks; always above the minimum.
    pub fn max_election_ticks(&self) -> u64 {
        (self.election_timeout_max / self.tick_interval).max(self.min_election_ticks() + 1)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_interval)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout)
    }

    pub fn build(args: &[&str]) -> Result<Config, ConfigError> {
        let config = <Self as Parser>::parse_from(args);
        config.validate()
    }

    /// Validate the state of this config.
    pub fn validate(self) -> Result<Config, ConfigError> {
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(ConfigError::ElectionTimeout {
                min: self.election_timeout_min,
                max: self.election_timeout_max,
            });
        }

        if self.election_timeout_min <= self.heartbeat_interval {
            return Err(ConfigError::ElectionTimeoutLTHeartBeat {
                election_timeout_min: self.election_timeout_min,
                heartbeat_interval: self.heartbeat_interval,
            });
        }

        if self.tick_interval == 0 || self.tick_interval > self.heartbeat_interval {
            return Err(ConfigError::TickInterval {
                tick_interval: self.tick_interval,
                heartbeat_interval: self.heartbeat_interval,
            });
        }

        if self.max_payload_entries == 0 {
            return Err(ConfigError::MaxPayloadIs0);
        }

        if self.health_interval == 0 {
            return Err(ConfigError::HealthIntervalIs0);
        }

        Ok(self)
    }
}
