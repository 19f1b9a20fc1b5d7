//! The data carried by `Data` log entries and the abstract key/value backend they are applied to.

use std::fmt::Display;
use std::fmt::Formatter;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ApplyError;
use crate::StorageError;

/// A state-changing request replicated through the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvRequest {
    Put { key: String, value: String },
    Delete { key: String },
}

impl Display for KvRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            KvRequest::Put { key, value } => write!(f, "put({}={})", key, value),
            KvRequest::Delete { key } => write!(f, "delete({})", key),
        }
    }
}

/// The result of applying a [`KvRequest`]: the value the key held before.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvResponse {
    pub prev: Option<String>,
}

/// The key/value backend that committed `Data` entries are applied to.
///
/// It is only touched by the apply loop, in log order. `snapshot()` and `restore()` exchange an
/// opaque blob that the snapshot store persists verbatim.
#[async_trait]
pub trait KvStateMachine: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), ApplyError>;

    async fn delete(&self, key: &str) -> Result<(), ApplyError>;

    /// Serialize the whole key space.
    async fn snapshot(&self) -> Result<Vec<u8>, StorageError>;

    /// Replace the whole key space with the content of a blob built by `snapshot()`.
    async fn restore(&self, blob: &[u8]) -> Result<(), StorageError>;
}
