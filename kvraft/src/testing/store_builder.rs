use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::storage::RaftLogStorage;
use crate::storage::SnapshotStore;
use crate::KvStateMachine;

/// A fresh, empty set of the stores a raft node runs on.
pub struct Stores<L, S, SM> {
    pub log: Arc<L>,
    pub snapshot: Arc<S>,
    pub sm: Arc<SM>,
}

/// Builds a pristine [`Stores`] for every test case.
#[async_trait]
pub trait StoreBuilder<L, S, SM>: Send + Sync
where
    L: RaftLogStorage,
    S: SnapshotStore,
    SM: KvStateMachine,
{
    async fn build(&self) -> Stores<L, S, SM>;
}

/// Make the tests easy to use by converting a closure to a [`StoreBuilder`].
///
/// E.g. `Suite::test_all(new_stores)` with an `async fn new_stores() -> Stores<..>`.
#[async_trait]
impl<L, S, SM, Fu, F> StoreBuilder<L, S, SM> for F
where
    L: RaftLogStorage,
    S: SnapshotStore,
    SM: KvStateMachine,
    Fu: Future<Output = Stores<L, S, SM>> + Send,
    F: Fn() -> Fu + Sync + Send,
{
    async fn build(&self) -> Stores<L, S, SM> {
        (self)().await
    }
}
