use anyhow::Result;
use kvraft::error::Fatal;
use maplit::btreeset;
use pretty_assertions::assert_eq;

use crate::fixtures::init_default_ut_tracing;
use crate::fixtures::test_config;
use crate::fixtures::timeout;
use crate::fixtures::RaftRouter;

/// A leader removing itself hands leadership over before it stops.
#[async_entry::test(worker_threads = 8, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn remove_leader() -> Result<()> {
    let mut router = RaftRouter::new(test_config()?);

    let mut log_index = router.new_cluster(btreeset! {1,2,3}, btreeset! {}).await?;
    let leader = router.get_raft_handle(&1)?;

    router.client_request_many(1, "foo", 5).await?;
    log_index += 5;

    router.wait_for_healthy_voters(&1, "cluster up").await?;

    tracing::info!(log_index, "--- remove the leader");
    {
        let membership = leader.remove_member(1).await?;
        log_index += 1;
        assert_eq!(btreeset! {2,3}, membership.voter_ids());

        let m = router.wait(&1, timeout()).stopped("leader removed").await?;
        assert_eq!(Err(Fatal::Removed(1)), m.running_state);
    }

    tracing::info!(log_index, "--- one of the remaining voters takes over");
    {
        let new_leader = router.wait_for_leader(&btreeset! {2,3}, "new leader").await?;
        // The blank entry of the new leader.
        log_index += 1;
        router.wait_for_log(&btreeset! {2,3}, log_index, timeout(), "new leader").await?;

        router.client_request_many(new_leader, "bar", 5).await?;
        log_index += 5;
        router.wait_for_log(&btreeset! {2,3}, log_index, timeout(), "written to new leader").await?;

        let m = router.wait(&new_leader, timeout()).voters(btreeset! {2,3}, "voters").await?;
        assert_eq!(Some(new_leader), m.current_leader);

        let got = router.get_storage_handle(&new_leader)?.sm.get_all().await;
        assert_eq!(10, got.len());
    }

    Ok(())
}
