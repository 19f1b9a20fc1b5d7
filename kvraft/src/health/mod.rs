//! Per-peer connectivity tracking with hysteresis.
//!
//! A peer becomes healthy only after it has been reachable, with no failure at all, for a whole
//! `health_interval`. A single failure makes it unhealthy at once. Nothing here is persisted: a
//! restarted node starts with every peer unknown, i.e. unhealthy.
//!
//! The monitor knows nothing about membership. Callers that need a decision read a
//! [`HealthSnapshot`] taken at decision time.


use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::NodeId;

/// Connectivity record of one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHealth {
    pub member_id: NodeId,

    /// When the last successful exchange happened.
    pub last_contact: Option<Instant>,

    pub consecutive_failures: u64,

    /// Start of the current failure-free window, `None` after a failure.
    pub healthy_since: Option<Instant>,
}

impl PeerHealth {
    fn new(member_id: NodeId) -> Self {
        Self {
            member_id,
            last_contact: None,
            consecutive_failures: 0,
            healthy_since: None,
        }
    }

    fn is_healthy(&self, now: Instant, interval: Duration) -> bool {
        let since = match self.healthy_since {
            None => return false,
            Some(x) => x,
        };

        // A peer not heard of for a whole interval is as good as failing.
        let fresh = match self.last_contact {
            None => false,
            Some(t) => now.saturating_duration_since(t) <= interval,
        };

        fresh && self.consecutive_failures == 0 && now.saturating_duration_since(since) >= interval
    }
}

#[derive(Debug)]
pub struct HealthMonitor {
    health_interval: Duration,
    peers: BTreeMap<NodeId, PeerHealth>,
}

impl HealthMonitor {
    pub fn new(health_interval: Duration) -> Self {
        Self {
            health_interval,
            peers: BTreeMap::new(),
        }
    }

    /// A message was delivered to, or received from, `id`.
    pub fn record_success(&mut self, id: NodeId, now: Instant) {
        let peer = self.peers.entry(id).or_insert_with(|| PeerHealth::new(id));

        if peer.healthy_since.is_none() {
            tracing::debug!(id, "peer connectivity window starts");
            peer.healthy_since = Some(now);
        }
        peer.consecutive_failures = 0;
        peer.last_contact = Some(now);
    }

    /// Delivering a message to `id` failed or timed out.
    pub fn record_failure(&mut self, id: NodeId, now: Instant) {
        let peer = self.peers.entry(id).or_insert_with(|| PeerHealth::new(id));

        if peer.healthy_since.is_some() {
            tracing::info!(id, at = ?now, "peer becomes unhealthy");
        }
        peer.consecutive_failures += 1;
        peer.healthy_since = None;
    }

    /// Drop the record of a peer that is no longer a member.
    pub fn forget(&mut self, id: &NodeId) {
        self.peers.remove(id);
    }

    pub fn get(&self, id: &NodeId) -> Option<&PeerHealth> {
        self.peers.get(id)
    }

    pub fn is_healthy(&self, id: &NodeId, now: Instant) -> bool {
        self.peers.get(id).map(|p| p.is_healthy(now, self.health_interval)).unwrap_or(false)
    }

    pub fn healthy_count<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>, now: Instant) -> usize {
        ids.into_iter().filter(|id| self.is_healthy(id, now)).count()
    }

    /// The set of healthy peers as of `now`.
    pub fn snapshot(&self, now: Instant) -> HealthSnapshot {
        let healthy = self.peers.keys().filter(|id| self.is_healthy(id, now)).copied().collect();
        HealthSnapshot { healthy }
    }
}

/// An immutable view of the health monitor, passed by value to whoever makes a decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    healthy: BTreeSet<NodeId>,
}

impl HealthSnapshot {
    pub fn new(healthy: BTreeSet<NodeId>) -> Self {
        Self { healthy }
    }

    pub fn is_healthy(&self, id: &NodeId) -> bool {
        self.healthy.contains(id)
    }

    pub fn healthy_ids(&self) -> &BTreeSet<NodeId> {
        &self.healthy
    }
}
