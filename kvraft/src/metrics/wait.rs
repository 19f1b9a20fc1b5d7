use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::metrics::RaftMetrics;
use crate::LogId;
use crate::MessageSummary;
use crate::NodeId;
use crate::ServerState;

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timeout after {0:?} when {1}")]
    Timeout(Duration, String),

    #[error("raft is shutting down")]
    ShuttingDown,
}

/// Wraps the metrics channel with utils to wait for the metrics to satisfy some condition.
pub struct Wait {
    pub timeout: Duration,
    pub rx: watch::Receiver<RaftMetrics>,
}

impl Wait {
    /// Wait for metrics to satisfy some condition or timeout.
    #[tracing::instrument(level = "trace", skip(self, func), fields(msg=%msg.to_string()))]
    pub async fn metrics<T>(&self, func: T, msg: impl ToString) -> Result<RaftMetrics, WaitError>
    where T: Fn(&RaftMetrics) -> bool + Send {
        let timeout_at = Instant::now() + self.timeout;

        let mut rx = self.rx.clone();
        loop {
            let latest = rx.borrow().clone();

            tracing::debug!("id={} wait {} latest: {}", latest.id, msg.to_string(), latest.summary());

            if func(&latest) {
                tracing::debug!("id={} done wait {} latest: {}", latest.id, msg.to_string(), latest.summary());
                return Ok(latest);
            }

            let now = Instant::now();
            if now >= timeout_at {
                return Err(WaitError::Timeout(
                    self.timeout,
                    format!("{} latest: {}", msg.to_string(), latest.summary()),
                ));
            }

            let delay = tokio::time::sleep(timeout_at - now);

            tokio::select! {
                _ = delay => {
                    return Err(WaitError::Timeout(self.timeout, format!("{} latest: {}", msg.to_string(), latest.summary())));
                }
                changed = rx.changed() => {
                    if let Err(err) = changed {
                        tracing::debug!("id={} error: {:?}; wait {} latest: {}", latest.id, err, msg.to_string(), latest.summary());
                        return Err(WaitError::ShuttingDown);
                    }
                }
            };
        }
    }

    /// Wait for `current_leader` to become `Some(leader_id)` until timeout.
    pub async fn current_leader(&self, leader_id: NodeId, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.current_leader == Some(leader_id),
            &format!("{} .current_leader -> {}", msg.to_string(), leader_id),
        )
        .await
    }

    /// Wait until exactly `want_log` logs are appended and applied.
    pub async fn log(&self, want_log: u64, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.last_log_index == want_log,
            &format!("{} .last_log_index -> {}", msg.to_string(), want_log),
        )
        .await?;

        self.metrics(
            |x| x.last_applied == want_log,
            &format!("{} .last_applied -> {}", msg.to_string(), want_log),
        )
        .await
    }

    /// Wait until at least `want_log` logs are applied.
    pub async fn applied_at_least(&self, want_log: u64, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.last_applied >= want_log,
            &format!("{} .last_applied >= {}", msg.to_string(), want_log),
        )
        .await
    }

    pub async fn state(&self, want_state: ServerState, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.state == want_state,
            &format!("{} .state -> {:?}", msg.to_string(), want_state),
        )
        .await
    }

    /// Wait for the effective membership to have exactly `want_members`, voters and learners.
    pub async fn members(&self, want_members: BTreeSet<NodeId>, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| {
                let got = x.membership.member_ids().collect::<BTreeSet<_>>();
                want_members == got
            },
            &format!("{} .members -> {:?}", msg.to_string(), want_members),
        )
        .await
    }

    /// Wait for the effective membership to have exactly `want_voters` as voters.
    pub async fn voters(&self, want_voters: BTreeSet<NodeId>, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.membership.voter_ids() == want_voters && !x.membership.is_in_joint_consensus(),
            &format!("{} .voters -> {:?}", msg.to_string(), want_voters),
        )
        .await
    }

    pub async fn snapshot(&self, want_snapshot: LogId, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.snapshot == Some(want_snapshot),
            &format!("{} .snapshot -> {}", msg.to_string(), want_snapshot),
        )
        .await
    }

    /// Wait until this node considers exactly `want` healthy; itself included if it is a voter.
    pub async fn healthy(&self, want: BTreeSet<NodeId>, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.healthy.iter().copied().collect::<BTreeSet<_>>() == want,
            &format!("{} .healthy -> {:?}", msg.to_string(), want),
        )
        .await
    }

    /// Wait until every voter of the effective membership is healthy.
    pub async fn all_voters_healthy(&self, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| {
                let healthy = x.healthy.iter().copied().collect::<BTreeSet<_>>();
                !healthy.is_empty() && healthy == x.membership.voter_ids()
            },
            &format!("{} .healthy -> all voters", msg.to_string()),
        )
        .await
    }

    /// Wait for the node to stop, returning the metrics with the reason in `running_state`.
    pub async fn stopped(&self, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        let mut rx = self.rx.clone();
        let timeout_at = Instant::now() + self.timeout;

        loop {
            let latest = rx.borrow().clone();
            if latest.running_state.is_err() {
                return Ok(latest);
            }

            let res = tokio::time::timeout_at(timeout_at, rx.changed()).await;
            match res {
                Ok(Ok(_)) => {}
                // The core is gone: the last published metrics tell why.
                Ok(Err(_)) => return Ok(rx.borrow().clone()),
                Err(_) => {
                    return Err(WaitError::Timeout(
                        self.timeout,
                        format!("{} .running_state -> Err latest: {}", msg.to_string(), latest.summary()),
                    ))
                }
            }
        }
    }
}
