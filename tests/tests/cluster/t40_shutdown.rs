use std::time::Duration;

use anyhow::Result;
use kvraft::error::ClientWriteError;
use kvraft::error::Fatal;
use kvraft::KvRequest;
use maplit::btreeset;
use pretty_assertions::assert_eq;

use crate::fixtures::init_default_ut_tracing;
use crate::fixtures::test_config;
use crate::fixtures::timeout;
use crate::fixtures::RaftRouter;

/// Shutting down does not wait for unreachable peers, and a stopped node refuses requests.
#[async_entry::test(worker_threads = 8, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn shutdown_with_unreachable_peers() -> Result<()> {
    let mut router = RaftRouter::new(test_config()?);

    let log_index = router.new_cluster(btreeset! {1,2,3}, btreeset! {}).await?;
    tracing::info!(log_index, "--- cluster is up");

    for id in [1, 2, 3] {
        router.isolate_node(id);
    }

    tracing::info!("--- a write on the isolated leader times out or loses leadership");
    let raft = router.get_raft_handle(&1)?;
    let write = {
        let raft = raft.clone();
        tokio::spawn(async move {
            raft.client_write(KvRequest::Put {
                key: "foo".to_string(),
                value: "bar".to_string(),
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    tracing::info!("--- shutdown every node, quickly");
    tokio::time::timeout(Duration::from_millis(2_000), router.shutdown_all()).await??;

    let res = write.await?;
    assert!(res.is_err(), "got: {:?}", res);

    let m = router.wait(&1, timeout()).stopped("stopped").await?;
    assert_eq!(Err(Fatal::Stopped), m.running_state);

    let res = raft
        .client_write(KvRequest::Delete { key: "foo".to_string() })
        .await;
    assert_eq!(Err(ClientWriteError::Fatal(Fatal::Stopped)), res);

    Ok(())
}

/// Nodes stopped and restarted in quick succession still terminate within a short bound.
#[async_entry::test(worker_threads = 8, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn speedy_shutdown_after_restart_churn() -> Result<()> {
    let mut router = RaftRouter::new(test_config()?);

    let mut log_index = router.new_cluster(btreeset! {1,2,3}, btreeset! {}).await?;

    router.client_request_many(1, "foo", 3).await?;
    log_index += 3;
    router.wait_for_log(&btreeset! {1,2,3}, log_index, timeout(), "written").await?;

    tracing::info!(log_index, "--- stop and restart every node, twice, without waiting");
    for _ in 0..2 {
        for id in [1, 2, 3] {
            router.restart_node(id).await?;
        }
    }

    tracing::info!(log_index, "--- the restarted cluster elects a leader");
    router.wait_for_leader(&btreeset! {1,2,3}, "leader after churn").await?;

    tracing::info!(log_index, "--- shutdown every node, quickly");
    let start = tokio::time::Instant::now();
    tokio::time::timeout(Duration::from_millis(3_000), router.shutdown_all()).await??;
    tracing::info!("shutdown took {:?}", start.elapsed());

    for id in [1, 2, 3] {
        let m = router.wait(&id, timeout()).stopped("stopped").await?;
        assert_eq!(Err(Fatal::Stopped), m.running_state, "node {}", id);
    }

    Ok(())
}
