use std::sync::Arc;

use anyhow::Result;
use kvraft::Config;
use kvraft::SnapshotPolicy;
use maplit::btreeset;
use memstore::MemKv;
use pretty_assertions::assert_eq;

use crate::fixtures::init_default_ut_tracing;
use crate::fixtures::learner;
use crate::fixtures::test_config;
use crate::fixtures::timeout;
use crate::fixtures::MemStores;
use crate::fixtures::RaftRouter;

fn snapshot_config() -> Result<Arc<Config>> {
    let config = Config {
        snapshot_policy: SnapshotPolicy::LogsSinceLast(10),
        max_applied_log_to_keep: 0,
        ..(*test_config()?).clone()
    };
    Ok(Arc::new(config.validate()?))
}

/// A new learner whose logs are already purged on the leader is sent a snapshot.
#[async_entry::test(worker_threads = 8, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn snapshot_to_new_learner() -> Result<()> {
    let mut router = RaftRouter::new(snapshot_config()?);

    let mut log_index = router.new_cluster(btreeset! {1}, btreeset! {}).await?;

    router.client_request_many(1, "foo", 30).await?;
    log_index += 30;
    router.wait(&1, timeout()).log(log_index, "written").await?;
    router.wait(&1, timeout()).metrics(|m| m.snapshot.is_some(), "snapshot built").await?;

    tracing::info!(log_index, "--- add a learner");
    router.new_raft_node(2);
    router.get_raft_handle(&1)?.add_member_with_id(learner(2)).await?;
    log_index += 1;

    let m = router.wait(&2, timeout()).log(log_index, "learner caught up").await?;
    assert!(m.snapshot.is_some(), "installed a snapshot");

    let want = router.get_storage_handle(&1)?.sm.get_all().await;
    assert_eq!(30, want.len());
    assert_eq!(want, router.get_storage_handle(&2)?.sm.get_all().await);

    Ok(())
}

/// A follower that was down while the leader purged its logs catches up from a snapshot.
#[async_entry::test(worker_threads = 8, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn snapshot_to_lagging_follower() -> Result<()> {
    let mut router = RaftRouter::new(snapshot_config()?);

    let mut log_index = router.new_cluster(btreeset! {1,2,3}, btreeset! {}).await?;

    tracing::info!(log_index, "--- stop node 3");
    let (raft3, stores3) = router.remove_node(3).expect("node 3 exists");
    raft3.shutdown().await?;

    router.client_request_many(1, "foo", 30).await?;
    log_index += 30;
    router.wait_for_log(&btreeset! {1,2}, log_index, timeout(), "written without node 3").await?;
    router.wait(&1, timeout()).metrics(|m| m.snapshot.map_or(false, |s| s.index >= 30), "snapshot built").await?;

    tracing::info!(log_index, "--- restart node 3");
    router.new_raft_node_with_sto(3, MemStores {
        sm: Arc::new(MemKv::new()),
        ..stores3
    });

    let m = router.wait(&3, timeout()).log(log_index, "node 3 caught up").await?;
    assert!(m.snapshot.map_or(false, |s| s.index >= 30), "installed a snapshot: {:?}", m.snapshot);

    let want = router.get_storage_handle(&1)?.sm.get_all().await;
    assert_eq!(want, router.get_storage_handle(&3)?.sm.get_all().await);

    Ok(())
}
