use anyhow::Result;
use kvraft::error::ChangeMembershipError;
use kvraft::error::ClientWriteError;
use kvraft::error::NotLeader;
use kvraft::KvRequest;
use kvraft::ServerState;
use maplit::btreeset;
use pretty_assertions::assert_eq;

use crate::fixtures::init_default_ut_tracing;
use crate::fixtures::test_config;
use crate::fixtures::timeout;
use crate::fixtures::RaftRouter;

/// Writes to the leader are replicated to every voter; a follower refuses writes with a hint of
/// who the leader is.
#[async_entry::test(worker_threads = 8, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn replicate_to_followers() -> Result<()> {
    let mut router = RaftRouter::new(test_config()?);

    let mut log_index = router.new_cluster(btreeset! {1,2,3}, btreeset! {}).await?;

    for id in [2, 3] {
        router.wait(&id, timeout()).state(ServerState::Follower, "follower").await?;
        router.wait(&id, timeout()).current_leader(1, "leader known").await?;
    }

    tracing::info!(log_index, "--- write to the leader");
    {
        router.client_request_many(1, "foo", 20).await?;
        log_index += 20;
        router.wait_for_log(&btreeset! {1,2,3}, log_index, timeout(), "replicated").await?;

        let want = router.get_storage_handle(&1)?.sm.get_all().await;
        assert_eq!(20, want.len());
        for id in [2, 3] {
            let got = router.get_storage_handle(&id)?.sm.get_all().await;
            assert_eq!(want, got, "state machine of node {}", id);
        }
    }

    tracing::info!(log_index, "--- a follower refuses writes");
    {
        let raft = router.get_raft_handle(&2)?;
        let res = raft
            .client_write(KvRequest::Put {
                key: "x".to_string(),
                value: "y".to_string(),
            })
            .await;

        assert_eq!(
            Err(ClientWriteError::NotLeader(NotLeader { leader_id: Some(1) })),
            res
        );

        let res = raft.remove_member(3).await;
        assert_eq!(
            Err(ChangeMembershipError::NotLeader(NotLeader { leader_id: Some(1) })),
            res
        );
    }

    Ok(())
}

/// A partitioned leader is replaced; once back it follows the new leader and catches up.
#[async_entry::test(worker_threads = 8, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn leader_failover() -> Result<()> {
    let mut router = RaftRouter::new(test_config()?);

    let mut log_index = router.new_cluster(btreeset! {1,2,3}, btreeset! {}).await?;

    router.client_request_many(1, "before", 5).await?;
    log_index += 5;
    router.wait_for_log(&btreeset! {1,2,3}, log_index, timeout(), "written before partition").await?;

    tracing::info!(log_index, "--- isolate the leader");
    router.isolate_node(1);

    let leader = router.wait_for_leader(&btreeset! {2,3}, "new leader").await?;
    // The blank entry of the new leader.
    log_index += 1;

    router.client_request_many(leader, "after", 5).await?;
    log_index += 5;
    router.wait_for_log(&btreeset! {2,3}, log_index, timeout(), "written after partition").await?;

    tracing::info!(log_index, "--- the old leader steps down once back");
    router.restore_node(1);

    // The stale term of node 1 may force one more election, which node 1 can not win with its
    // shorter log.
    let m = router
        .wait(&1, timeout())
        .metrics(
            |m| {
                m.state == ServerState::Follower
                    && m.current_leader.map_or(false, |l| l != 1)
                    && m.last_applied >= log_index
            },
            "follow a new leader and catch up",
        )
        .await?;

    let leader = m.current_leader.unwrap_or_default();
    router.wait(&leader, timeout()).applied_at_least(log_index, "leader applied").await?;

    let want = router.get_storage_handle(&leader)?.sm.get_all().await;
    assert_eq!(10, want.len());
    assert_eq!(want, router.get_storage_handle(&1)?.sm.get_all().await);

    Ok(())
}
