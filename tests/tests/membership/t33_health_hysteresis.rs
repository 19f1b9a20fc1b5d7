use anyhow::Result;
use kvraft::error::ChangeMembershipError;
use kvraft::error::Fatal;
use kvraft::error::QuorumUnsafe;
use maplit::btreeset;
use pretty_assertions::assert_eq;

use crate::fixtures::init_default_ut_tracing;
use crate::fixtures::member;
use crate::fixtures::test_config;
use crate::fixtures::timeout;
use crate::fixtures::RaftRouter;

/// A voter that just reconnected is not healthy until it stays reachable for a whole health
/// interval: changes depending on it are refused inside the window and accepted after it.
#[async_entry::test(worker_threads = 8, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn reconnected_voter_needs_a_whole_interval() -> Result<()> {
    let mut router = RaftRouter::new(test_config()?);

    let mut log_index = router.new_cluster(btreeset! {1,2,3}, btreeset! {}).await?;
    let leader = router.get_raft_handle(&1)?;

    router.wait_for_healthy_voters(&1, "cluster up").await?;

    tracing::info!(log_index, "--- disconnect node 3 briefly");
    {
        router.isolate_node(3);
        router.wait(&1, timeout()).healthy(btreeset! {1, 2}, "node 3 unhealthy").await?;
        router.restore_node(3);
    }

    tracing::info!(log_index, "--- inside the health window, adding a voter is refused");
    {
        let res = leader.add_member_with_id(member(4)).await;
        assert_eq!(
            Err(ChangeMembershipError::QuorumUnsafe(QuorumUnsafe {
                change: "add member 4".to_string(),
                healthy: 2,
                prospective: 4,
            })),
            res
        );
    }

    tracing::info!(log_index, "--- inside the health window, removing a healthy voter is refused");
    {
        let res = leader.remove_member(2).await;
        assert_eq!(
            Err(ChangeMembershipError::QuorumUnsafe(QuorumUnsafe {
                change: "remove member 2".to_string(),
                healthy: 1,
                prospective: 2,
            })),
            res
        );
    }

    router.wait(&1, timeout()).log(log_index, "nothing proposed").await?;

    tracing::info!(log_index, "--- after the window, adding a voter is accepted");
    {
        router.wait_for_healthy_voters(&1, "node 3 healthy again").await?;

        router.new_raft_node(4);
        let membership = leader.add_member_with_id(member(4)).await?;
        log_index += 1;

        assert_eq!(btreeset! {1,2,3,4}, membership.voter_ids());
        router.wait_for_log(&btreeset! {1,2,3,4}, log_index, timeout(), "node 4 added").await?;
    }

    tracing::info!(log_index, "--- after the window, removing a voter is accepted");
    {
        router.wait_for_healthy_voters(&1, "node 4 healthy").await?;

        let membership = leader.remove_member(2).await?;
        log_index += 1;

        assert_eq!(btreeset! {1,3,4}, membership.voter_ids());
        router.wait_for_log(&btreeset! {1,3,4}, log_index, timeout(), "node 2 removed").await?;

        let m = router.wait(&2, timeout()).stopped("node 2 removed").await?;
        assert_eq!(Err(Fatal::Removed(2)), m.running_state);
    }

    Ok(())
}
