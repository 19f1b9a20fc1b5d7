//! Applies committed entries to the state machine, strictly in log order, exactly once.


use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::config::SnapshotPolicy;
use crate::core::Applied;
use crate::core::ApplyOutcome;
use crate::core::Notify;
use crate::error::ApplyError;
use crate::storage::Snapshot;
use crate::storage::SnapshotMeta;
use crate::storage::SnapshotStore;
use crate::Entry;
use crate::EntryPayload;
use crate::KvRequest;
use crate::KvResponse;
use crate::KvStateMachine;
use crate::LogId;
use crate::Membership;
use crate::MessageSummary;
use crate::NodeId;
use crate::StorageError;

pub(crate) enum ApplyCmd {
    /// Committed entries, in log order.
    Apply(Vec<Entry>),

    /// Replace the state machine with a snapshot received from the leader. It is already durable
    /// in the snapshot store.
    Restore(Snapshot),

    BuildSnapshot(oneshot::Sender<Option<LogId>>),
}

/// The apply loop: the only user of the state machine.
///
/// Entries at or before `last_applied` are skipped, so handing out an entry twice, e.g. replaying
/// from an older snapshot after a restart, changes nothing.
pub(crate) struct ApplyLoop<SM, S>
where
    SM: KvStateMachine,
    S: SnapshotStore,
{
    id: NodeId,
    sm: Arc<SM>,
    snapshot_store: Arc<S>,
    policy: SnapshotPolicy,

    pub(crate) last_applied: LogId,

    /// The membership after the last applied entry.
    pub(crate) membership: Membership,
    pub(crate) membership_log_id: LogId,

    /// The last log id included in the latest snapshot.
    pub(crate) snapshot_last: LogId,
}

impl<SM, S> ApplyLoop<SM, S>
where
    SM: KvStateMachine,
    S: SnapshotStore,
{
    pub(crate) fn new(id: NodeId, sm: Arc<SM>, snapshot_store: Arc<S>, policy: SnapshotPolicy) -> Self {
        Self {
            id,
            sm,
            snapshot_store,
            policy,
            last_applied: LogId::default(),
            membership: Membership::default(),
            membership_log_id: LogId::default(),
            snapshot_last: LogId::default(),
        }
    }

    /// Apply entries, skipping those already applied.
    ///
    /// A `Data` entry the state machine rejects is reported in its outcome; a storage error stops
    /// the loop.
    pub(crate) async fn apply(&mut self, entries: &[Entry]) -> Result<Vec<Applied>, StorageError> {
        let mut results = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.log_id.index <= self.last_applied.index {
                tracing::debug!(id = self.id, "skip applied entry: {}", entry.summary());
                continue;
            }

            debug_assert_eq!(self.last_applied.index + 1, entry.log_id.index, "apply in order");

            let outcome = self.apply_one(entry).await?;
            self.last_applied = entry.log_id;
            results.push(Applied {
                log_id: entry.log_id,
                outcome,
            });
        }

        Ok(results)
    }

    async fn apply_one(&mut self, entry: &Entry) -> Result<ApplyOutcome, StorageError> {
        tracing::debug!(id = self.id, "apply: {}", entry.summary());

        match &entry.payload {
            EntryPayload::Blank => Ok(ApplyOutcome::Blank),
            EntryPayload::Data(req) => {
                let res = self.apply_request(req).await;
                match res {
                    Ok(resp) => Ok(ApplyOutcome::Data(Ok(resp))),
                    Err(ApplyError::Rejected(reason)) => {
                        tracing::warn!(id = self.id, "{} rejected: {}", entry.log_id, reason);
                        Ok(ApplyOutcome::Data(Err(reason)))
                    }
                    Err(ApplyError::Storage(e)) => Err(e),
                }
            }
            payload => {
                let next = self.membership.apply(payload);
                match next {
                    Some(m) => {
                        self.membership = m.clone();
                        self.membership_log_id = entry.log_id;
                        Ok(ApplyOutcome::Membership(m))
                    }
                    None => Ok(ApplyOutcome::Blank),
                }
            }
        }
    }

    async fn apply_request(&self, req: &KvRequest) -> Result<KvResponse, ApplyError> {
        match req {
            KvRequest::Put { key, value } => {
                let prev = self.sm.get(key).await?;
                self.sm.put(key, value).await?;
                Ok(KvResponse { prev })
            }
            KvRequest::Delete { key } => {
                let prev = self.sm.get(key).await?;
                self.sm.delete(key).await?;
                Ok(KvResponse { prev })
            }
        }
    }

    /// Load a snapshot into the state machine.
    pub(crate) async fn restore(&mut self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let meta = &snapshot.meta;
        if meta.last_log_id.index <= self.last_applied.index {
            tracing::info!(
                id = self.id,
                "skip restoring snapshot {}: already applied {}",
                meta.last_log_id,
                self.last_applied
            );
            return Ok(());
        }

        tracing::info!(id = self.id, "restore snapshot: {}", meta.last_log_id);

        self.sm.restore(&snapshot.data).await?;
        self.last_applied = meta.last_log_id;
        self.membership = meta.last_membership.clone();
        self.membership_log_id = meta.last_log_id;
        self.snapshot_last = meta.last_log_id;
        Ok(())
    }

    pub(crate) fn should_snapshot(&self) -> bool {
        match self.policy {
            SnapshotPolicy::LogsSinceLast(n) => self.last_applied.index >= self.snapshot_last.index.saturating_add(n),
        }
    }

    /// Build and persist a snapshot of everything applied; `None` if nothing is applied yet.
    pub(crate) async fn build_snapshot(&mut self) -> Result<Option<SnapshotMeta>, StorageError> {
        if self.last_applied.index == 0 {
            return Ok(None);
        }

        let meta = SnapshotMeta {
            last_log_id: self.last_applied,
            last_membership: self.membership.clone(),
        };

        if self.snapshot_last == meta.last_log_id {
            return Ok(Some(meta));
        }

        let data = self.sm.snapshot().await?;
        let snapshot = Snapshot { meta, data };
        self.snapshot_store.create(&snapshot).await?;
        self.snapshot_store.purge_before(snapshot.meta.last_log_id).await?;

        tracing::info!(id = self.id, "snapshot built: {}", snapshot.meta.last_log_id);

        self.snapshot_last = snapshot.meta.last_log_id;
        Ok(Some(snapshot.meta))
    }

    pub(crate) async fn main(mut self, mut rx: mpsc::UnboundedReceiver<ApplyCmd>, tx_notify: mpsc::UnboundedSender<Notify>) {
        let res = self.run(&mut rx, &tx_notify).await;

        if let Err(e) = res {
            tracing::error!(id = self.id, "apply loop stopped: {}", e);
            let _ = tx_notify.send(Notify::Fatal { error: e.into() });
        }
    }

    async fn run(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<ApplyCmd>,
        tx_notify: &mpsc::UnboundedSender<Notify>,
    ) -> Result<(), StorageError> {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                ApplyCmd::Apply(entries) => {
                    let results = self.apply(&entries).await?;
                    let _ = tx_notify.send(Notify::Applied {
                        last_applied: self.last_applied,
                        results,
                    });

                    if self.should_snapshot() {
                        if let Some(meta) = self.build_snapshot().await? {
                            let _ = tx_notify.send(Notify::SnapshotBuilt { meta });
                        }
                    }
                }
                ApplyCmd::Restore(snapshot) => {
                    self.restore(&snapshot).await?;
                    let _ = tx_notify.send(Notify::Applied {
                        last_applied: self.last_applied,
                        results: vec![],
                    });
                }
                ApplyCmd::BuildSnapshot(tx) => {
                    let meta = self.build_snapshot().await?;
                    let last = meta.as_ref().map(|m| m.last_log_id);
                    if let Some(meta) = meta {
                        let _ = tx_notify.send(Notify::SnapshotBuilt { meta });
                    }
                    let _ = tx.send(last);
                }
            }
        }
        Ok(())
    }
}
