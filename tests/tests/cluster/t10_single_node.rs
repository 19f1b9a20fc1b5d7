use anyhow::Result;
use kvraft::error::ClientWriteError;
use kvraft::error::InitializeError;
use kvraft::storage::RaftLogStorage;
use kvraft::KvRequest;
use kvraft::KvResponse;
use kvraft::LogId;
use kvraft::ServerState;
use pretty_assertions::assert_eq;

use crate::fixtures::init_default_ut_tracing;
use crate::fixtures::member;
use crate::fixtures::test_config;
use crate::fixtures::timeout;
use crate::fixtures::RaftRouter;

/// Single-node cluster initialization and writes.
///
/// - brings 1 node online, it stays passive until initialized.
/// - initializes the cluster with only this node, it becomes leader at once.
/// - writes are applied and their results returned; a re-initialization is refused.
#[async_entry::test(worker_threads = 4, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn single_node() -> Result<()> {
    let mut router = RaftRouter::new(test_config()?);
    router.new_raft_node(1);

    tracing::info!("--- a pristine node stays passive");
    {
        let m = router.get_raft_handle(&1)?.metrics().borrow().clone();
        assert_eq!(ServerState::Learner, m.state);
        assert_eq!(None, m.current_leader);
        assert_eq!(0, m.last_log_index);
    }

    tracing::info!("--- initializing cluster");
    let raft = router.get_raft_handle(&1)?;
    raft.initialize(vec![member(1)]).await?;

    let mut log_index = 2;
    router.wait(&1, timeout()).state(ServerState::Leader, "init").await?;
    router.wait(&1, timeout()).log(log_index, "init logs").await?;
    assert!(raft.is_leader().await);

    tracing::info!("--- writes return the previous value");
    {
        let res = raft
            .client_write(KvRequest::Put {
                key: "foo".to_string(),
                value: "1".to_string(),
            })
            .await?;
        assert_eq!(KvResponse { prev: None }, res);

        let res = raft
            .client_write(KvRequest::Put {
                key: "foo".to_string(),
                value: "2".to_string(),
            })
            .await?;
        assert_eq!(
            KvResponse {
                prev: Some("1".to_string())
            },
            res
        );

        raft.client_write(KvRequest::Delete { key: "bar".to_string() }).await?;
        log_index += 3;
    }

    tracing::info!("--- a request rejected by the state machine is still committed");
    {
        let res = raft
            .client_write(KvRequest::Put {
                key: "".to_string(),
                value: "x".to_string(),
            })
            .await;
        assert!(matches!(res, Err(ClientWriteError::Rejected(_))), "got: {:?}", res);
        log_index += 1;
    }

    router.client_request_many(1, "k", 10).await?;
    log_index += 10;
    router.wait(&1, timeout()).log(log_index, "client writes").await?;

    let stores = router.get_storage_handle(&1)?;
    let got = stores.sm.get_all().await;
    assert_eq!(Some(&"2".to_string()), got.get("foo"));
    assert_eq!(11, got.len());

    let log_state = stores.log.get_log_state().await?;
    assert_eq!(Some(LogId::new(1, log_index)), log_state.last_log_id);

    let hs = stores.log.read_hard_state().await?.unwrap_or_default();
    assert_eq!(1, hs.current_term);
    assert_eq!(Some(1), hs.voted_for);
    assert_eq!(log_index, hs.commit_index);

    tracing::info!("--- re-initializing is not allowed");
    {
        let res = raft.initialize(vec![member(1)]).await;
        assert!(matches!(res, Err(InitializeError::NotAllowed { .. })), "got: {:?}", res);
    }

    Ok(())
}
