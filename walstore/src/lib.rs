//! File based log and snapshot stores for kvraft.
//!
//! The raft log lives in `<dir>/log` as a series of segment files plus `hard_state.json`;
//! snapshots live in `<dir>/snapshot`, one file each.

#![deny(unused_qualifications)]

mod config;
mod log_store;
mod record;
mod snapshot_store;


use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;

pub use config::WalConfig;
pub use config::WalConfigError;
use kvraft::StorageError;
pub use log_store::WalLogStore;
pub use snapshot_store::WalSnapshotStore;

/// Open, or create, both stores under `config.dir`.
pub fn open(config: &WalConfig) -> Result<(WalLogStore, WalSnapshotStore), StorageError> {
    let log = WalLogStore::open(config)?;
    let snapshot = WalSnapshotStore::open(config)?;
    Ok((log, snapshot))
}

/// Replace the content of `path` so that a crash leaves either the old or the new content.
pub(crate) fn write_atomic(path: &Path, buf: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);

    {
        let mut f = File::create(tmp)?;
        f.write_all(buf)?;
        f.sync_all()?;
    }

    std::fs::rename(tmp, path)?;

    match path.parent() {
        Some(dir) => log_store::sync_dir(dir),
        None => Ok(()),
    }
}

/// Run file IO on the blocking pool, so that a write or an fsync does not hold up the runtime
/// worker of the caller.
pub(crate) async fn run_blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
