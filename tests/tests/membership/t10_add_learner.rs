use anyhow::Result;
use kvraft::error::ChangeMembershipError;
use kvraft::ServerState;
use maplit::btreeset;
use pretty_assertions::assert_eq;

use crate::fixtures::init_default_ut_tracing;
use crate::fixtures::learner;
use crate::fixtures::test_config;
use crate::fixtures::timeout;
use crate::fixtures::RaftRouter;

/// A learner receives every log but does not vote; once caught up and with a healthy quorum it
/// can be promoted to a voter.
#[async_entry::test(worker_threads = 8, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn add_learner_and_promote() -> Result<()> {
    let mut router = RaftRouter::new(test_config()?);

    let mut log_index = router.new_cluster(btreeset! {1,2,3}, btreeset! {}).await?;
    let leader = router.get_raft_handle(&1)?;

    router.client_request_many(1, "foo", 10).await?;
    log_index += 10;

    tracing::info!(log_index, "--- add node 4 as learner");
    {
        router.new_raft_node(4);
        let membership = leader.add_member_with_id(learner(4)).await?;
        log_index += 1;

        assert_eq!(btreeset! {1,2,3}, membership.voter_ids());
        assert_eq!(btreeset! {4}, membership.learner_ids());

        router.wait_for_log(&btreeset! {1,2,3,4}, log_index, timeout(), "learner caught up").await?;
        router.wait(&4, timeout()).state(ServerState::Learner, "learner").await?;

        let got = router.get_storage_handle(&4)?.sm.get_all().await;
        assert_eq!(10, got.len());
    }

    tracing::info!(log_index, "--- re-adding is refused");
    {
        let res = leader.add_member_with_id(learner(4)).await;
        assert_eq!(Err(ChangeMembershipError::MemberExists { id: 4 }), res);

        let res = leader.promote_member(2).await;
        assert_eq!(Err(ChangeMembershipError::NotLearner { id: 2 }), res);

        let res = leader.promote_member(9).await;
        assert_eq!(Err(ChangeMembershipError::MemberNotFound { id: 9 }), res);
    }

    tracing::info!(log_index, "--- promote node 4");
    {
        router.wait_for_healthy_voters(&1, "before promoting").await?;

        let membership = leader.promote_member(4).await?;
        log_index += 1;
        assert_eq!(btreeset! {1,2,3,4}, membership.voter_ids());

        router.wait_for_log(&btreeset! {1,2,3,4}, log_index, timeout(), "promoted").await?;
        router.wait(&4, timeout()).state(ServerState::Follower, "voter").await?;
    }

    tracing::info!(log_index, "--- add a learner by urls; the id is derived from them");
    {
        let id = leader.add_learner(["http://127.0.0.1:23899"]).await?;
        log_index += 1;

        let m = router.wait(&1, timeout()).log(log_index, "learner added").await?;
        assert!(m.membership.learner_ids().contains(&id));
        let urls = m.membership.get_member(&id).map(|x| x.peer_urls.clone()).unwrap_or_default();
        assert_eq!(btreeset! {"http://127.0.0.1:23899".to_string()}, urls);

        tracing::info!(log_index, "--- removing a learner needs no healthy quorum");
        let membership = leader.remove_member(id).await?;
        log_index += 1;
        assert!(!membership.is_member(&id));
        assert!(membership.is_removed(&id));

        router.wait_for_log(&btreeset! {1,2,3,4}, log_index, timeout(), "learner removed").await?;
    }

    Ok(())
}
