use std::future::Future;
use std::marker::PhantomData;

use anyerror::AnyError;
use maplit::btreeset;

use crate::error::ErrorSubject;
use crate::error::ErrorVerb;
use crate::storage::HardState;
use crate::storage::LogState;
use crate::storage::RaftLogStorage;
use crate::storage::Snapshot;
use crate::storage::SnapshotMeta;
use crate::storage::SnapshotStore;
use crate::testing::StoreBuilder;
use crate::testing::Stores;
use crate::Entry;
use crate::KvStateMachine;
use crate::LogId;
use crate::Member;
use crate::Membership;
use crate::StorageError;

/// Test suite to ensure the stores a raft node runs on work as expected.
///
/// Usage: `Suite::test_all(builder)` in a plain `#[test]`; every case builds its own runtime.
pub struct Suite<L, S, SM, B>
where
    L: RaftLogStorage,
    S: SnapshotStore,
    SM: KvStateMachine,
    B: StoreBuilder<L, S, SM>,
{
    p: PhantomData<(L, S, SM, B)>,
}

impl<L, S, SM, B> Suite<L, S, SM, B>
where
    L: RaftLogStorage,
    S: SnapshotStore,
    SM: KvStateMachine,
    B: StoreBuilder<L, S, SM>,
{
    pub fn test_all(builder: B) -> Result<(), StorageError> {
        run_fut(Self::pristine_store(&builder))?;
        run_fut(Self::save_hard_state(&builder))?;
        run_fut(Self::append_and_read_logs(&builder))?;
        run_fut(Self::truncate_since(&builder))?;
        run_fut(Self::truncate_before(&builder))?;
        run_fut(Self::append_after_truncating_all(&builder))?;
        run_fut(Self::snapshot_latest(&builder))?;
        run_fut(Self::snapshot_purge(&builder))?;
        run_fut(Self::state_machine_ops(&builder))?;
        run_fut(Self::state_machine_snapshot_restore(&builder))?;
        Ok(())
    }

    pub async fn pristine_store(builder: &B) -> Result<(), StorageError> {
        let Stores { log, snapshot, .. } = builder.build().await;

        assert_eq!(LogState::default(), log.get_log_state().await?);
        assert_eq!(None, log.read_hard_state().await?);
        assert!(log.try_get_log_entries(0..100).await?.is_empty());
        assert_eq!(None, snapshot.latest().await?);
        Ok(())
    }

    pub async fn save_hard_state(builder: &B) -> Result<(), StorageError> {
        let Stores { log, .. } = builder.build().await;

        let hs = HardState {
            current_term: 3,
            voted_for: Some(2),
            commit_index: 5,
        };
        log.save_hard_state(&hs).await?;
        assert_eq!(Some(hs), log.read_hard_state().await?);

        tracing::info!("--- a later save overrides");
        let hs = HardState {
            current_term: 4,
            voted_for: None,
            commit_index: 6,
        };
        log.save_hard_state(&hs).await?;
        assert_eq!(Some(hs), log.read_hard_state().await?);
        Ok(())
    }

    pub async fn append_and_read_logs(builder: &B) -> Result<(), StorageError> {
        let Stores { log, .. } = builder.build().await;
        Self::feed_10_logs(&*log).await?;

        assert_eq!(
            LogState {
                first_index: Some(1),
                last_log_id: Some(LogId::new(1, 10)),
            },
            log.get_log_state().await?
        );

        let got = log.try_get_log_entries(3..6).await?;
        assert_eq!(vec![3, 4, 5], indexes(&got));

        let got = log.try_get_log_entries(8..100).await?;
        assert_eq!(vec![8, 9, 10], indexes(&got), "only present entries are returned");

        log.append(&[blank(2, 11), blank(2, 12)]).await?;
        assert_eq!(Some(LogId::new(2, 12)), log.get_log_state().await?.last_log_id);
        Ok(())
    }

    pub async fn truncate_since(builder: &B) -> Result<(), StorageError> {
        let Stores { log, .. } = builder.build().await;
        Self::feed_10_logs(&*log).await?;

        log.truncate_since(6).await?;

        assert_eq!(vec![1, 2, 3, 4, 5], indexes(&log.try_get_log_entries(0..100).await?));
        assert_eq!(Some(LogId::new(1, 5)), log.get_log_state().await?.last_log_id);

        tracing::info!("--- append after truncating");
        log.append(&[blank(2, 6)]).await?;
        let got = log.try_get_log_entries(6..7).await?;
        assert_eq!(vec![blank(2, 6)], got);
        Ok(())
    }

    pub async fn truncate_before(builder: &B) -> Result<(), StorageError> {
        let Stores { log, .. } = builder.build().await;
        Self::feed_10_logs(&*log).await?;

        log.truncate_before(4).await?;

        let got = log.try_get_log_entries(0..100).await?;
        assert_eq!((4..=10).collect::<Vec<_>>(), indexes(&got));
        assert_eq!(
            LogState {
                first_index: Some(4),
                last_log_id: Some(LogId::new(1, 10)),
            },
            log.get_log_state().await?
        );

        tracing::info!("--- truncating backward is a no-op");
        log.truncate_before(2).await?;
        assert_eq!(Some(4), log.get_log_state().await?.first_index);
        Ok(())
    }

    pub async fn append_after_truncating_all(builder: &B) -> Result<(), StorageError> {
        let Stores { log, .. } = builder.build().await;
        Self::feed_10_logs(&*log).await?;

        log.truncate_since(0).await?;
        assert_eq!(LogState::default(), log.get_log_state().await?);

        tracing::info!("--- an empty log accepts any index, e.g. right after an installed snapshot");
        log.append(&[blank(3, 21), blank(3, 22)]).await?;
        assert_eq!(
            LogState {
                first_index: Some(21),
                last_log_id: Some(LogId::new(3, 22)),
            },
            log.get_log_state().await?
        );
        Ok(())
    }

    pub async fn snapshot_latest(builder: &B) -> Result<(), StorageError> {
        let Stores { snapshot, .. } = builder.build().await;

        snapshot.create(&new_snapshot(1, 5, b"a")).await?;
        snapshot.create(&new_snapshot(2, 10, b"b")).await?;
        assert_eq!(Some(new_snapshot(2, 10, b"b")), snapshot.latest().await?);

        tracing::info!("--- an older snapshot does not shadow the latest");
        snapshot.create(&new_snapshot(1, 3, b"c")).await?;
        assert_eq!(Some(new_snapshot(2, 10, b"b")), snapshot.latest().await?);
        Ok(())
    }

    pub async fn snapshot_purge(builder: &B) -> Result<(), StorageError> {
        let Stores { snapshot, .. } = builder.build().await;

        snapshot.create(&new_snapshot(1, 5, b"a")).await?;
        snapshot.create(&new_snapshot(2, 10, b"b")).await?;

        snapshot.purge_before(LogId::new(2, 10)).await?;
        assert_eq!(Some(new_snapshot(2, 10, b"b")), snapshot.latest().await?);

        snapshot.purge_before(LogId::new(3, 20)).await?;
        assert_eq!(None, snapshot.latest().await?);
        Ok(())
    }

    pub async fn state_machine_ops(builder: &B) -> Result<(), StorageError> {
        let Stores { sm, .. } = builder.build().await;

        assert_eq!(None, sm.get("foo").await?);

        sm.put("foo", "1").await.map_err(apply_to_storage)?;
        assert_eq!(Some("1".to_string()), sm.get("foo").await?);

        sm.put("foo", "2").await.map_err(apply_to_storage)?;
        assert_eq!(Some("2".to_string()), sm.get("foo").await?);

        sm.delete("foo").await.map_err(apply_to_storage)?;
        assert_eq!(None, sm.get("foo").await?);

        sm.delete("absent").await.map_err(apply_to_storage)?;
        Ok(())
    }

    pub async fn state_machine_snapshot_restore(builder: &B) -> Result<(), StorageError> {
        let Stores { sm, .. } = builder.build().await;

        sm.put("a", "1").await.map_err(apply_to_storage)?;
        let blob = sm.snapshot().await?;

        sm.put("b", "2").await.map_err(apply_to_storage)?;
        sm.delete("a").await.map_err(apply_to_storage)?;

        sm.restore(&blob).await?;
        assert_eq!(Some("1".to_string()), sm.get("a").await?);
        assert_eq!(None, sm.get("b").await?, "restore replaces the whole key space");
        Ok(())
    }

    async fn feed_10_logs(log: &L) -> Result<(), StorageError> {
        let entries: Vec<_> = (1..=10).map(|i| blank(1, i)).collect();
        log.append(&entries).await
    }
}

fn blank(term: u64, index: u64) -> Entry {
    Entry::new_blank(LogId::new(term, index))
}

fn indexes(entries: &[Entry]) -> Vec<u64> {
    entries.iter().map(|e| e.log_id.index).collect()
}

fn new_snapshot(term: u64, index: u64, data: &[u8]) -> Snapshot {
    let membership = Membership::new(btreeset! {1, 2, 3}.into_iter().map(|id| Member::new(id, [format!("n{}", id)])));

    Snapshot {
        meta: SnapshotMeta {
            last_log_id: LogId::new(term, index),
            last_membership: membership,
        },
        data: data.to_vec(),
    }
}

fn apply_to_storage(e: crate::error::ApplyError) -> StorageError {
    StorageError::new(ErrorSubject::StateMachine, ErrorVerb::Write, AnyError::new(&e))
}

/// Block until a future is finished, on a new runtime.
pub fn run_fut<F>(f: F) -> Result<(), StorageError>
where F: Future<Output = Result<(), StorageError>> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| StorageError::from_io_error(ErrorSubject::Store, ErrorVerb::Read, e))?;
    rt.block_on(f)
}
