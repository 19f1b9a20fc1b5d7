use std::fs;
use std::io;
use std::io::Cursor;
use std::path::Path;
use std::path::PathBuf;

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use kvraft::async_trait::async_trait;
use kvraft::error::ErrorSubject;
use kvraft::error::ErrorVerb;
use kvraft::storage::Snapshot;
use kvraft::storage::SnapshotMeta;
use kvraft::storage::SnapshotStore;
use kvraft::LogId;
use kvraft::StorageError;
use tokio::sync::Mutex;

use crate::config::WalConfig;
use crate::run_blocking;
use crate::write_atomic;

const SNAPSHOT_EXT: &str = "snap";

/// Stores each snapshot in a file of its own: `[crc32: u32][meta_len: u32][meta][data]`.
///
/// The checksum covers everything after it. A file that fails it is skipped by `latest()`, so a
/// damaged newest snapshot falls back to the previous one, if it is still there. File IO runs on
/// the blocking pool.
#[derive(Debug)]
pub struct WalSnapshotStore {
    dir: PathBuf,

    /// Serializes writes and purges.
    lock: Mutex<()>,
}

impl WalSnapshotStore {
    #[tracing::instrument(level = "info", skip_all, fields(dir = %config.snapshot_dir().display()))]
    pub fn open(config: &WalConfig) -> Result<Self, StorageError> {
        let dir = config.snapshot_dir();
        fs::create_dir_all(&dir).map_err(|e| StorageError::from_io_error(ErrorSubject::Store, ErrorVerb::Write, e))?;

        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn path_of(&self, log_id: &LogId) -> PathBuf {
        self.dir.join(format!("{:020}-{:020}.{}", log_id.index, log_id.term, SNAPSHOT_EXT))
    }
}

/// Snapshot files in `dir` sorted by last log index.
fn list(dir: &Path) -> io::Result<Vec<(LogId, PathBuf)>> {
    let mut res = vec![];
    for ent in fs::read_dir(dir)? {
        let path = ent?.path();
        if let Some(log_id) = parse_snapshot_name(&path) {
            res.push((log_id, path));
        }
    }
    res.sort_by_key(|(log_id, _)| log_id.index);
    Ok(res)
}

/// The newest snapshot in `dir` that passes its checksum.
fn read_latest(dir: &Path) -> io::Result<Option<Snapshot>> {
    for (_, path) in list(dir)?.into_iter().rev() {
        let buf = fs::read(&path)?;
        match decode(&buf) {
            Ok(snapshot) => return Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!("skip damaged snapshot {}: {}", path.display(), e);
            }
        }
    }
    Ok(None)
}

#[async_trait]
impl SnapshotStore for WalSnapshotStore {
    #[tracing::instrument(level = "debug", skip_all, fields(last = %snapshot.meta.last_log_id))]
    async fn create(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;

        let log_id = snapshot.meta.last_log_id;
        let buf = encode(snapshot).map_err(|e| StorageError::write_snapshot(log_id, &e))?;
        let path = self.path_of(&log_id);
        run_blocking(move || write_atomic(&path, &buf))
            .await
            .map_err(|e| StorageError::write_snapshot(log_id, &e))?;

        tracing::info!(snapshot_size = snapshot.data.len(), "snapshot saved");
        Ok(())
    }

    async fn latest(&self) -> Result<Option<Snapshot>, StorageError> {
        let _guard = self.lock.lock().await;

        let dir = self.dir.clone();
        run_blocking(move || read_latest(&dir))
            .await
            .map_err(|e| StorageError::from_io_error(ErrorSubject::Store, ErrorVerb::Read, e))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn purge_before(&self, last_log_id: LogId) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;

        let dir = self.dir.clone();
        run_blocking(move || {
            for (log_id, path) in list(&dir)? {
                if log_id.index < last_log_id.index {
                    tracing::debug!("purge snapshot {}", path.display());
                    fs::remove_file(&path)?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| StorageError::from_io_error(ErrorSubject::Snapshot(last_log_id), ErrorVerb::Delete, e))
    }
}

fn encode(snapshot: &Snapshot) -> io::Result<Vec<u8>> {
    let meta = serde_json::to_vec(&snapshot.meta)?;

    let mut body = Vec::with_capacity(4 + meta.len() + snapshot.data.len());
    body.write_u32::<BigEndian>(meta.len() as u32)?;
    body.extend_from_slice(&meta);
    body.extend_from_slice(&snapshot.data);

    let mut buf = Vec::with_capacity(4 + body.len());
    buf.write_u32::<BigEndian>(crc32fast::hash(&body))?;
    buf.extend(body);
    Ok(buf)
}

fn decode(buf: &[u8]) -> io::Result<Snapshot> {
    if buf.len() < 8 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "snapshot file too short"));
    }

    let mut cursor = Cursor::new(buf);
    let stored_crc = cursor.read_u32::<BigEndian>()?;
    let body = &buf[4..];

    let crc = crc32fast::hash(body);
    if crc != stored_crc {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("checksum mismatch: stored {:x}, computed {:x}", stored_crc, crc),
        ));
    }

    let meta_len = cursor.read_u32::<BigEndian>()? as usize;
    if body.len() - 4 < meta_len {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "meta length out of range"));
    }

    let meta: SnapshotMeta = serde_json::from_slice(&body[4..4 + meta_len])?;
    let data = body[4 + meta_len..].to_vec();

    Ok(Snapshot { meta, data })
}

fn parse_snapshot_name(path: &Path) -> Option<LogId> {
    if path.extension()?.to_str()? != SNAPSHOT_EXT {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (index, term) = stem.split_once('-')?;
    Some(LogId::new(term.parse().ok()?, index.parse().ok()?))
}
