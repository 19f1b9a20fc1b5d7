/// Error variants related to configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("election timeout: min({min}) must be < max({max})")]
    ElectionTimeout { min: u64, max: u64 },

    #[error("max_payload_entries must be > 0")]
    MaxPayloadIs0,

    #[error("election_timeout_min({election_timeout_min}) must be > heartbeat_interval({heartbeat_interval})")]
    ElectionTimeoutLTHeartBeat {
        election_timeout_min: u64,
        heartbeat_interval: u64,
    },

    #[error("tick_interval({tick_interval}) must be > 0 and <= heartbeat_interval({heartbeat_interval})")]
    TickInterval { tick_interval: u64, heartbeat_interval: u64 },

    #[error("health_interval must be > 0")]
    HealthIntervalIs0,

    #[error("{reason} when parsing {invalid:?}")]
    InvalidNumber { invalid: String, reason: String },

    #[error("snapshot policy string is invalid: '{invalid:?}' expect: '{syntax}'")]
    InvalidSnapshotPolicy { invalid: String, syntax: String },
}
