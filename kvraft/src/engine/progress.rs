/// How the leader replicates to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplicationState {
    /// The matching prefix is not known: send one batch at a time and wait for its response.
    Probe,
    /// The peer accepted the last batch: keep sending without waiting.
    Replicate,
    /// The peer needs logs that are purged; a snapshot is being sent.
    Snapshot,
}

/// The leader's view of the replication to a single peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Progress {
    /// The highest index known to be durably stored on the peer.
    pub(crate) matched: u64,

    /// The index of the next entry to send.
    pub(crate) next: u64,

    pub(crate) state: ReplicationState,

    /// In probe state, a batch is on the way and no other one is sent until a response or the
    /// next heartbeat.
    pub(crate) paused: bool,

    /// Whether the peer responded since the last quorum check.
    pub(crate) recent_active: bool,
}

impl Progress {
    pub(crate) fn new(next: u64) -> Self {
        Self {
            matched: 0,
            next,
            state: ReplicationState::Probe,
            paused: false,
            recent_active: false,
        }
    }

    pub(crate) fn become_probe(&mut self) {
        self.state = ReplicationState::Probe;
        self.next = self.matched + 1;
        self.paused = false;
    }

    pub(crate) fn become_replicate(&mut self) {
        self.state = ReplicationState::Replicate;
        self.next = self.next.max(self.matched + 1);
        self.paused = false;
    }

    pub(crate) fn become_snapshot(&mut self) {
        self.state = ReplicationState::Snapshot;
        self.paused = true;
    }

    /// The peer acknowledged `index`. Returns true if `matched` advanced.
    pub(crate) fn update(&mut self, index: u64) -> bool {
        let updated = index > self.matched;
        if updated {
            self.matched = index;
        }
        self.next = self.next.max(index + 1);
        updated
    }

    /// The peer rejected an append after `rejected`, and its own last index is `hint`.
    ///
    /// Returns false if the rejection is stale.
    pub(crate) fn decr_to(&mut self, rejected: u64, hint: u64) -> bool {
        if self.state == ReplicationState::Replicate {
            // Everything up to matched is already acknowledged: an earlier rejection is stale.
            if rejected <= self.matched {
                return false;
            }
            self.become_probe();
            return true;
        }

        // In probe state only the rejection of the batch in flight counts.
        if self.next == 0 || rejected != self.next - 1 {
            return false;
        }

        self.next = rejected.min(hint + 1).max(self.matched + 1);
        self.paused = false;
        true
    }

    /// Whether an append may be sent now.
    pub(crate) fn can_send(&self) -> bool {
        match self.state {
            ReplicationState::Probe => !self.paused,
            ReplicationState::Replicate => true,
            ReplicationState::Snapshot => false,
        }
    }
}
