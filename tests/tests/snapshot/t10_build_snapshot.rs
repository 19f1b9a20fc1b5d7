use std::sync::Arc;

use anyhow::Result;
use kvraft::storage::RaftLogStorage;
use kvraft::storage::SnapshotStore;
use kvraft::Config;
use kvraft::LogId;
use kvraft::SnapshotPolicy;
use maplit::btreeset;
use pretty_assertions::assert_eq;

use crate::fixtures::init_default_ut_tracing;
use crate::fixtures::test_config;
use crate::fixtures::timeout;
use crate::fixtures::RaftRouter;

/// Snapshots are built by policy and on demand; the logs they cover are purged, and a restart
/// starts from the latest snapshot.
#[async_entry::test(worker_threads = 4, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn build_snapshot_and_purge() -> Result<()> {
    let config = Config {
        snapshot_policy: SnapshotPolicy::LogsSinceLast(10),
        max_applied_log_to_keep: 0,
        ..(*test_config()?).clone()
    };
    let mut router = RaftRouter::new(Arc::new(config.validate()?));

    let mut log_index = router.new_cluster(btreeset! {1}, btreeset! {}).await?;

    router.client_request_many(1, "foo", 23).await?;
    log_index += 23;
    router.wait(&1, timeout()).log(log_index, "written").await?;

    tracing::info!(log_index, "--- snapshots are built by policy");
    router
        .wait(&1, timeout())
        .metrics(|m| m.snapshot.map_or(false, |s| s.index >= 10), "snapshot by policy")
        .await?;

    tracing::info!(log_index, "--- trigger a snapshot");
    {
        let raft = router.get_raft_handle(&1)?;
        let last = raft.trigger_snapshot().await?;
        assert_eq!(Some(LogId::new(1, log_index)), last);

        router.wait(&1, timeout()).snapshot(LogId::new(1, log_index), "triggered snapshot").await?;

        let stores = router.get_storage_handle(&1)?;
        let snapshot = stores.snapshot.latest().await?.expect("a snapshot is built");
        assert_eq!(LogId::new(1, log_index), snapshot.meta.last_log_id);
        assert_eq!(btreeset! {1}, snapshot.meta.last_membership.voter_ids());

        let log_state = stores.log.get_log_state().await?;
        assert_eq!(None, log_state.first_index, "logs covered by the snapshot are purged");
        assert_eq!(None, log_state.last_log_id);
    }

    tracing::info!(log_index, "--- restart from the snapshot");
    {
        let want = router.get_storage_handle(&1)?.sm.get_all().await;

        router.restart_node(1).await?;
        let m = router.wait(&1, timeout()).applied_at_least(log_index, "restored").await?;
        assert_eq!(Some(LogId::new(1, log_index)), m.snapshot);

        assert_eq!(want, router.get_storage_handle(&1)?.sm.get_all().await);
    }

    Ok(())
}
