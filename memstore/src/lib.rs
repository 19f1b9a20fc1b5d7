#![deny(unused_qualifications)]


use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use kvraft::async_trait::async_trait;
use kvraft::error::ApplyError;
use kvraft::error::ErrorSubject;
use kvraft::error::ErrorVerb;
use kvraft::storage::HardState;
use kvraft::storage::LogState;
use kvraft::storage::RaftLogStorage;
use kvraft::storage::Snapshot;
use kvraft::storage::SnapshotStore;
use kvraft::AnyError;
use kvraft::Entry;
use kvraft::KvStateMachine;
use kvraft::LogId;
use kvraft::StorageError;
use tokio::sync::RwLock;

/// An in-memory raft log.
///
/// Entries are kept serialized, so that what is read back never shares state with what was
/// appended, just like a disk based store.
#[derive(Debug, Default)]
pub struct MemLogStore {
    /// The raft log, keyed by index, in json.
    log: RwLock<BTreeMap<u64, String>>,

    /// The current hard state.
    hs: RwLock<Option<HardState>>,
}

impl MemLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RaftLogStorage for MemLogStore {
    async fn get_log_state(&self) -> Result<LogState, StorageError> {
        let log = self.log.read().await;

        let first_index = log.keys().next().copied();
        let last_log_id = match log.values().next_back() {
            None => None,
            Some(serialized) => {
                let ent: Entry = serde_json::from_str(serialized).map_err(|e| StorageError::read_logs(&e))?;
                Some(ent.log_id)
            }
        };

        Ok(LogState {
            first_index,
            last_log_id,
        })
    }

    async fn read_hard_state(&self) -> Result<Option<HardState>, StorageError> {
        Ok(self.hs.read().await.clone())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn save_hard_state(&self, hs: &HardState) -> Result<(), StorageError> {
        *self.hs.write().await = Some(hs.clone());
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn append(&self, entries: &[Entry]) -> Result<(), StorageError> {
        let mut log = self.log.write().await;
        for entry in entries {
            let s = serde_json::to_string(entry).map_err(|e| StorageError::write_logs(&e))?;
            log.insert(entry.log_id.index, s);
        }
        Ok(())
    }

    async fn try_get_log_entries(&self, range: Range<u64>) -> Result<Vec<Entry>, StorageError> {
        let log = self.log.read().await;

        let mut entries = vec![];
        for (_, serialized) in log.range(range) {
            let ent = serde_json::from_str(serialized).map_err(|e| StorageError::read_logs(&e))?;
            entries.push(ent);
        }
        Ok(entries)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn truncate_since(&self, since: u64) -> Result<(), StorageError> {
        let mut log = self.log.write().await;
        log.split_off(&since);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn truncate_before(&self, before: u64) -> Result<(), StorageError> {
        let mut log = self.log.write().await;
        *log = log.split_off(&before);
        Ok(())
    }
}

/// Keeps every snapshot in memory until it is purged.
#[derive(Debug, Default)]
pub struct MemSnapshotStore {
    /// Snapshots by last log index.
    snapshots: RwLock<BTreeMap<u64, Snapshot>>,
}

impl MemSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemSnapshotStore {
    #[tracing::instrument(level = "debug", skip_all, fields(last = %snapshot.meta.last_log_id))]
    async fn create(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.meta.last_log_id.index, snapshot.clone());

        tracing::info!(snapshot_size = snapshot.data.len(), "snapshot saved");
        Ok(())
    }

    async fn latest(&self) -> Result<Option<Snapshot>, StorageError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.values().next_back().cloned())
    }

    async fn purge_before(&self, last_log_id: LogId) -> Result<(), StorageError> {
        let mut snapshots = self.snapshots.write().await;
        *snapshots = snapshots.split_off(&last_log_id.index);
        Ok(())
    }
}

/// An in-memory key-value state machine.
///
/// Requests with an empty key are rejected.
#[derive(Debug, Default)]
pub struct MemKv {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the whole key space, for tests.
    pub async fn get_all(&self) -> BTreeMap<String, String> {
        self.data.read().await.clone()
    }
}

#[async_trait]
impl KvStateMachine for MemKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), ApplyError> {
        if key.is_empty() {
            return Err(ApplyError::Rejected("empty key".to_string()));
        }
        self.data.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ApplyError> {
        if key.is_empty() {
            return Err(ApplyError::Rejected("empty key".to_string()));
        }
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<u8>, StorageError> {
        let data = self.data.read().await;
        serde_json::to_vec(&*data)
            .map_err(|e| StorageError::new(ErrorSubject::StateMachine, ErrorVerb::Read, AnyError::new(&e)))
    }

    async fn restore(&self, blob: &[u8]) -> Result<(), StorageError> {
        let new_data: BTreeMap<String, String> = serde_json::from_slice(blob)
            .map_err(|e| StorageError::new(ErrorSubject::StateMachine, ErrorVerb::Write, AnyError::new(&e)))?;

        *self.data.write().await = new_data;
        Ok(())
    }
}

/// Create a set of empty stores.
pub fn new_mem_store() -> (Arc<MemLogStore>, Arc<MemSnapshotStore>, Arc<MemKv>) {
    (
        Arc::new(MemLogStore::new()),
        Arc::new(MemSnapshotStore::new()),
        Arc::new(MemKv::new()),
    )
}
