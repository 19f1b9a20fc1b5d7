use std::sync::Arc;

use anyhow::Result;
use kvraft::Raft;
use kvraft::ServerState;
use kvraft::SnapshotPolicy;
use memstore::MemKv;
use pretty_assertions::assert_eq;
use walstore::WalConfig;

use crate::fixtures::init_default_ut_tracing;
use crate::fixtures::member;
use crate::fixtures::test_config;
use crate::fixtures::timeout;
use crate::fixtures::RaftRouter;

fn start(router: &RaftRouter, config: &WalConfig, raft_config: Arc<kvraft::Config>) -> Result<(Raft, Arc<MemKv>)> {
    let (log, snapshot) = walstore::open(config)?;
    let sm = Arc::new(MemKv::new());

    let raft = Raft::new(1, raft_config, router.clone(), Arc::new(log), Arc::new(snapshot), sm.clone());
    Ok((raft, sm))
}

/// A node on the file based stores survives a restart, with logs purged by a snapshot.
#[async_entry::test(worker_threads = 4, init = "init_default_ut_tracing()", tracing_span = "debug")]
async fn wal_store_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wal_config = WalConfig {
        dir: dir.path().to_path_buf(),
        segment_size: 1024,
    };

    let raft_config = {
        let mut c = (*test_config()?).clone();
        c.snapshot_policy = SnapshotPolicy::LogsSinceLast(10);
        c.max_applied_log_to_keep = 2;
        Arc::new(c.validate()?)
    };

    let router = RaftRouter::new(raft_config.clone());

    let mut log_index = 2;
    let want = {
        let (raft, sm) = start(&router, &wal_config, raft_config.clone())?;
        raft.initialize(vec![member(1)]).await?;
        raft.wait(timeout()).state(ServerState::Leader, "init").await?;

        for i in 0..30 {
            raft.client_write(kvraft::KvRequest::Put {
                key: format!("k-{}", i % 7),
                value: format!("{}", i),
            })
            .await?;
        }
        log_index += 30;

        raft.wait(timeout()).log(log_index, "written").await?;
        raft.wait(timeout())
            .metrics(|m| m.snapshot.map_or(false, |s| s.index >= 10), "snapshot built")
            .await?;

        raft.shutdown().await?;
        sm.get_all().await
    };
    assert_eq!(7, want.len());

    tracing::info!(log_index, "--- reopen the stores");
    {
        let (raft, sm) = start(&router, &wal_config, raft_config.clone())?;

        let m = raft.wait(timeout()).applied_at_least(log_index, "restored").await?;
        assert!(m.snapshot.is_some());
        assert_eq!(want, sm.get_all().await);

        raft.wait(timeout()).state(ServerState::Leader, "re-elected").await?;
        raft.shutdown().await?;
    }

    Ok(())
}
