use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_futures::Instrument;

use crate::core::notify::Notify;
use crate::error::RPCError;
use crate::error::Timeout;
use crate::network::RaftNetwork;
use crate::storage::SnapshotStore;
use crate::Message;
use crate::MessageBody;
use crate::MessageSummary;
use crate::NodeId;

pub(crate) enum PeerCmd {
    Message(Message),

    /// Load the latest snapshot and send it in an `InstallSnapshot` message.
    Snapshot { from: NodeId, term: u64 },
}

/// The core side of a peer sender task.
pub(crate) struct PeerHandle {
    pub(crate) tx: mpsc::UnboundedSender<PeerCmd>,
    pub(crate) join_handle: JoinHandle<()>,
}

/// Delivers the messages to one peer, in order, and reports every outcome to the core.
///
/// A failed delivery drops everything queued after it: the protocol resends what is still needed,
/// and a backlog built up while the peer was down would only delay fresh messages.
pub(crate) struct PeerSender<Net, S>
where
    Net: RaftNetwork,
    S: SnapshotStore,
{
    target: NodeId,
    network: Net,
    snapshot_store: Arc<S>,
    send_timeout: Duration,
    rx: mpsc::UnboundedReceiver<PeerCmd>,
    tx_notify: mpsc::UnboundedSender<Notify>,
}

impl<Net, S> PeerSender<Net, S>
where
    Net: RaftNetwork,
    S: SnapshotStore,
{
    pub(crate) fn spawn(
        target: NodeId,
        network: Net,
        snapshot_store: Arc<S>,
        send_timeout: Duration,
        tx_notify: mpsc::UnboundedSender<Notify>,
    ) -> PeerHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let this = Self {
            target,
            network,
            snapshot_store,
            send_timeout,
            rx,
            tx_notify,
        };

        let join_handle = tokio::spawn(this.main().instrument(tracing::debug_span!("peer", target)));

        PeerHandle { tx, join_handle }
    }

    async fn main(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            let notify = match cmd {
                PeerCmd::Message(msg) => {
                    let result = self.send(msg).await;
                    Notify::Sent {
                        target: self.target,
                        result,
                    }
                }
                PeerCmd::Snapshot { from, term } => match self.send_snapshot(from, term).await {
                    Ok(success) => Notify::SnapshotSent {
                        target: self.target,
                        success,
                    },
                    Err(error) => Notify::Fatal { error },
                },
            };

            let failed = matches!(
                notify,
                Notify::Sent { result: Err(_), .. } | Notify::SnapshotSent { success: false, .. }
            );

            if self.tx_notify.send(notify).is_err() {
                return;
            }

            if failed {
                self.drop_queued();
            }
        }

        tracing::debug!("peer sender to {} quit", self.target);
    }

    async fn send(&mut self, msg: Message) -> Result<(), RPCError> {
        tracing::trace!("send: {}", msg.summary());

        match tokio::time::timeout(self.send_timeout, self.network.send(msg)).await {
            Ok(res) => res,
            Err(_) => Err(Timeout {
                target: self.target,
                timeout: self.send_timeout,
            }
            .into()),
        }
    }

    /// Returns whether the snapshot is delivered; a local storage error is fatal.
    async fn send_snapshot(&mut self, from: NodeId, term: u64) -> Result<bool, crate::error::Fatal> {
        let snapshot = match self.snapshot_store.latest().await? {
            Some(x) => x,
            None => {
                tracing::warn!("no snapshot to send to {}", self.target);
                return Ok(false);
            }
        };

        tracing::info!("send snapshot {} to {}", snapshot.meta.last_log_id, self.target);

        let msg = Message {
            from,
            to: self.target,
            term,
            body: MessageBody::InstallSnapshot { snapshot },
        };

        match self.send(msg).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!("failed to send snapshot to {}: {}", self.target, e);
                Ok(false)
            }
        }
    }

    fn drop_queued(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            if let PeerCmd::Snapshot { .. } = cmd {
                let _ = self.tx_notify.send(Notify::SnapshotSent {
                    target: self.target,
                    success: false,
                });
            }
        }
    }
}
