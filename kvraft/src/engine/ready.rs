use crate::storage::HardState;
use crate::storage::Snapshot;
use crate::Entry;
use crate::Message;
use crate::MessageSummary;
use crate::NodeId;

/// The output of an [`Engine`](crate::engine::Engine) step.
///
/// The core handles a `Ready` strictly in field order: first the log and the hard state are made
/// durable, then messages are sent, then committed entries are handed to the apply loop.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Ready {
    /// The hard state changed and has to be saved.
    pub(crate) hard_state: Option<HardState>,

    /// A snapshot received from the leader, to be stored and restored into the state machine.
    /// When `reset_log` is set, the whole log is discarded.
    pub(crate) install_snapshot: Option<(Snapshot, bool)>,

    /// Delete logs since this index before appending `entries`.
    pub(crate) truncate_since: Option<u64>,

    pub(crate) entries: Vec<Entry>,

    pub(crate) messages: Vec<Message>,

    /// Peers that need the latest snapshot.
    pub(crate) send_snapshot: Vec<NodeId>,

    /// Entries just committed, in log order, never handed out twice.
    pub(crate) committed: Vec<Entry>,
}

impl Ready {
    pub(crate) fn is_empty(&self) -> bool {
        self.hard_state.is_none()
            && self.install_snapshot.is_none()
            && self.truncate_since.is_none()
            && self.entries.is_empty()
            && self.messages.is_empty()
            && self.send_snapshot.is_empty()
            && self.committed.is_empty()
    }
}

impl MessageSummary for Ready {
    fn summary(&self) -> String {
        format!(
            "Ready{{hs:{:?}, snapshot:{:?}, truncate:{:?}, entries:{}, messages:{}, send_snapshot:{:?}, committed:{}}}",
            self.hard_state,
            self.install_snapshot.as_ref().map(|(s, reset)| (s.meta.last_log_id, *reset)),
            self.truncate_since,
            self.entries.as_slice().summary(),
            self.messages.as_slice().summary(),
            self.send_snapshot,
            self.committed.as_slice().summary(),
        )
    }
}
