use std::sync::Arc;

use anyhow::Result;
use kvraft::ServerState;
use maplit::btreeset;
use memstore::MemKv;
use pretty_assertions::assert_eq;

use crate::fixtures::init_default_ut_tracing;
use crate::fixtures::test_config;
use crate::fixtures::timeout;
use crate::fixtures::MemStores;
use crate::fixtures::RaftRouter;

/// A restarted node rebuilds its state machine by replaying the committed logs, exactly once.
#[async_entry::test(worker_threads = 4, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn restart_single_node() -> Result<()> {
    let mut router = RaftRouter::new(test_config()?);

    let mut log_index = router.new_cluster(btreeset! {1}, btreeset! {}).await?;

    router.client_request_many(1, "foo", 10).await?;
    log_index += 10;
    router.wait(&1, timeout()).log(log_index, "written").await?;

    let want = router.get_storage_handle(&1)?.sm.get_all().await;

    router.restart_node(1).await?;

    tracing::info!(log_index, "--- replayed on restart");
    {
        let m = router.wait(&1, timeout()).applied_at_least(log_index, "replayed").await?;
        assert!(m.commit_index >= log_index);

        let got = router.get_storage_handle(&1)?.sm.get_all().await;
        assert_eq!(want, got);
    }

    tracing::info!(log_index, "--- elected again, in a new term");
    {
        let m = router.wait(&1, timeout()).state(ServerState::Leader, "re-elected").await?;
        assert_eq!(2, m.current_term);
        log_index += 1;

        router.client_request_many(1, "bar", 5).await?;
        log_index += 5;
        router.wait(&1, timeout()).log(log_index, "written after restart").await?;

        let got = router.get_storage_handle(&1)?.sm.get_all().await;
        assert_eq!(15, got.len());
    }

    Ok(())
}

/// A restarted follower catches up with what it missed.
#[async_entry::test(worker_threads = 8, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn restart_follower() -> Result<()> {
    let mut router = RaftRouter::new(test_config()?);

    let mut log_index = router.new_cluster(btreeset! {1,2,3}, btreeset! {}).await?;

    router.client_request_many(1, "foo", 5).await?;
    log_index += 5;
    router.wait_for_log(&btreeset! {1,2,3}, log_index, timeout(), "written").await?;

    tracing::info!(log_index, "--- stop node 3 and write more");
    let (raft3, stores3) = router.remove_node(3).expect("node 3 exists");
    raft3.shutdown().await?;

    router.client_request_many(1, "bar", 5).await?;
    log_index += 5;
    router.wait_for_log(&btreeset! {1,2}, log_index, timeout(), "written without node 3").await?;

    tracing::info!(log_index, "--- bring node 3 back with its stores");
    router.new_raft_node_with_sto(3, MemStores {
        sm: Arc::new(MemKv::new()),
        ..stores3
    });

    router.wait(&3, timeout()).log(log_index, "node 3 catches up").await?;

    let want = router.get_storage_handle(&1)?.sm.get_all().await;
    assert_eq!(10, want.len());
    assert_eq!(want, router.get_storage_handle(&3)?.sm.get_all().await);

    Ok(())
}
