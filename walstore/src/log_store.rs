use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use kvraft::async_trait::async_trait;
use kvraft::error::ErrorSubject;
use kvraft::error::ErrorVerb;
use kvraft::storage::HardState;
use kvraft::storage::LogState;
use kvraft::storage::RaftLogStorage;
use kvraft::Entry;
use kvraft::StorageError;
use tokio::sync::Mutex;

use crate::config::WalConfig;
use crate::record;
use crate::run_blocking;
use crate::write_atomic;

const SEGMENT_EXT: &str = "wal";
const HARD_STATE_FILE: &str = "hard_state.json";

/// A segment file, named by the index of its first entry.
#[derive(Debug, Clone)]
struct Segment {
    first_index: u64,
    path: PathBuf,
    size: u64,
}

#[derive(Debug)]
struct Inner {
    dir: PathBuf,
    segment_size: u64,

    /// By first index.
    segments: BTreeMap<u64, Segment>,

    /// Every entry on disk, for reads.
    entries: BTreeMap<u64, Entry>,

    hard_state: Option<HardState>,
}

/// A raft log stored in CRC-framed segment files, with the hard state in a file of its own.
///
/// Every write is fsync-ed, on the blocking pool, before it returns. On open, a damaged record at the tail of the last
/// segment, left by a crash in the middle of an append, is cut off; damage anywhere else is an
/// error.
#[derive(Debug)]
pub struct WalLogStore {
    inner: Arc<Mutex<Inner>>,
}

impl WalLogStore {
    /// Open the log in `config.log_dir()`, creating it if it does not exist.
    #[tracing::instrument(level = "info", skip_all, fields(dir = %config.log_dir().display()))]
    pub fn open(config: &WalConfig) -> Result<Self, StorageError> {
        let dir = config.log_dir();
        fs::create_dir_all(&dir).map_err(|e| io_err(ErrorSubject::Store, ErrorVerb::Write, e))?;

        let hard_state = read_hard_state(&dir)?;

        let mut paths = vec![];
        for ent in fs::read_dir(&dir).map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Read, e))? {
            let ent = ent.map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Read, e))?;
            let path = ent.path();
            if let Some(first_index) = parse_segment_name(&path) {
                paths.push((first_index, path));
            }
        }
        paths.sort();

        let mut segments = BTreeMap::new();
        let mut entries = BTreeMap::new();
        let n = paths.len();

        for (i, (first_index, path)) in paths.into_iter().enumerate() {
            let buf = fs::read(&path).map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Read, e))?;
            let decoded = record::decode_all(&buf).map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Read, e))?;

            let mut size = buf.len() as u64;

            if let Some(reason) = decoded.torn {
                if i + 1 != n {
                    let e = io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", path.display(), reason));
                    return Err(io_err(ErrorSubject::Logs, ErrorVerb::Read, e));
                }

                tracing::warn!("cut off torn tail of {}: {}", path.display(), reason);
                let f = OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Write, e))?;
                f.set_len(decoded.valid_len).map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Write, e))?;
                f.sync_all().map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Write, e))?;
                size = decoded.valid_len;
            }

            for entry in decoded.entries {
                entries.insert(entry.log_id.index, entry);
            }
            segments.insert(first_index, Segment {
                first_index,
                path,
                size,
            });
        }

        tracing::info!(
            "opened: {} segments, {} entries, hard state: {:?}",
            segments.len(),
            entries.len(),
            hard_state
        );

        let inner = Inner {
            dir,
            segment_size: config.segment_size,
            segments,
            entries,
            hard_state,
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// The number of segment files, for tests.
    pub async fn segment_count(&self) -> usize {
        self.inner.lock().await.segments.len()
    }
}

#[async_trait]
impl RaftLogStorage for WalLogStore {
    async fn get_log_state(&self) -> Result<LogState, StorageError> {
        let inner = self.inner.lock().await;
        Ok(LogState {
            first_index: inner.entries.keys().next().copied(),
            last_log_id: inner.entries.values().next_back().map(|e| e.log_id),
        })
    }

    async fn read_hard_state(&self) -> Result<Option<HardState>, StorageError> {
        Ok(self.inner.lock().await.hard_state.clone())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn save_hard_state(&self, hs: &HardState) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;

        let buf = serde_json::to_vec(hs).map_err(|e| StorageError::write_hard_state(&e))?;
        let path = inner.dir.join(HARD_STATE_FILE);
        run_blocking(move || write_atomic(&path, &buf))
            .await
            .map_err(|e| io_err(ErrorSubject::HardState, ErrorVerb::Write, e))?;

        inner.hard_state = Some(hs.clone());
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn append(&self, entries: &[Entry]) -> Result<(), StorageError> {
        let mut inner = self.inner.clone().lock_owned().await;
        let entries = entries.to_vec();
        run_blocking(move || inner.append(&entries))
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Write, e))
    }

    async fn try_get_log_entries(&self, range: Range<u64>) -> Result<Vec<Entry>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.range(range).map(|(_, e)| e.clone()).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn truncate_since(&self, since: u64) -> Result<(), StorageError> {
        let mut inner = self.inner.clone().lock_owned().await;
        run_blocking(move || inner.truncate_since(since))
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Delete, e))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn truncate_before(&self, before: u64) -> Result<(), StorageError> {
        let mut inner = self.inner.clone().lock_owned().await;
        run_blocking(move || inner.truncate_before(before))
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Delete, e))
    }
}

impl Inner {
    fn append(&mut self, entries: &[Entry]) -> io::Result<()> {
        let first = match entries.first() {
            None => return Ok(()),
            Some(x) => x.log_id.index,
        };

        let need_new = match self.segments.values().next_back() {
            None => true,
            Some(seg) => seg.size >= self.segment_size,
        };
        if need_new {
            self.new_segment(first)?;
        }

        let mut buf = vec![];
        for entry in entries {
            buf.extend(record::encode(entry)?);
        }

        let seg = match self.segments.values_mut().next_back() {
            None => return Err(io::Error::new(io::ErrorKind::NotFound, "no segment to append to")),
            Some(x) => x,
        };

        let mut f = OpenOptions::new().append(true).open(&seg.path)?;
        f.write_all(&buf)?;
        f.sync_data()?;
        seg.size += buf.len() as u64;

        for entry in entries {
            self.entries.insert(entry.log_id.index, entry.clone());
        }
        Ok(())
    }

    fn new_segment(&mut self, first_index: u64) -> io::Result<()> {
        let path = self.dir.join(format!("{:020}.{}", first_index, SEGMENT_EXT));
        tracing::debug!("new segment: {}", path.display());

        File::create(&path)?.sync_all()?;
        sync_dir(&self.dir)?;

        self.segments.insert(first_index, Segment {
            first_index,
            path,
            size: 0,
        });
        Ok(())
    }

    fn truncate_since(&mut self, since: u64) -> io::Result<()> {
        if self.entries.range(since..).next().is_none() {
            return Ok(());
        }

        self.entries.split_off(&since);

        let removed = self.segments.split_off(&since);
        for seg in removed.values() {
            fs::remove_file(&seg.path)?;
        }

        // The segment holding `since`, if any, keeps only what is before it.
        let last = self.segments.values().next_back().cloned();
        if let Some(seg) = last {
            self.rewrite(&seg)?;
        }

        sync_dir(&self.dir)
    }

    fn truncate_before(&mut self, before: u64) -> io::Result<()> {
        let kept = self.entries.split_off(&before);
        self.entries = kept;

        // Whole segments that end before `before`.
        let firsts: Vec<u64> = self.segments.keys().copied().collect();
        for (i, first) in firsts.iter().enumerate() {
            let next_first = firsts.get(i + 1).copied();
            let fully_purged = match next_first {
                Some(nf) => nf <= before,
                None => false,
            };

            if fully_purged {
                if let Some(seg) = self.segments.remove(first) {
                    fs::remove_file(&seg.path)?;
                }
            } else if *first < before {
                if let Some(seg) = self.segments.get(first).cloned() {
                    self.rewrite(&seg)?;
                }
            }
        }

        sync_dir(&self.dir)
    }

    /// Rewrite a segment with only the entries still in `self.entries`, renaming it after its new
    /// first entry. An emptied segment is deleted.
    fn rewrite(&mut self, seg: &Segment) -> io::Result<()> {
        let next_first = self.segments.range(seg.first_index + 1..).next().map(|(k, _)| *k);
        let upper = next_first.unwrap_or(u64::MAX);

        let mut buf = vec![];
        let mut new_first = None;
        for (index, entry) in self.entries.range(seg.first_index..upper) {
            new_first.get_or_insert(*index);
            buf.extend(record::encode(entry)?);
        }

        self.segments.remove(&seg.first_index);

        let new_first = match new_first {
            None => {
                fs::remove_file(&seg.path)?;
                return Ok(());
            }
            Some(x) => x,
        };

        let path = self.dir.join(format!("{:020}.{}", new_first, SEGMENT_EXT));
        write_atomic(&path, &buf)?;
        if path != seg.path {
            fs::remove_file(&seg.path)?;
        }

        self.segments.insert(new_first, Segment {
            first_index: new_first,
            path,
            size: buf.len() as u64,
        });
        Ok(())
    }
}

fn read_hard_state(dir: &Path) -> Result<Option<HardState>, StorageError> {
    let path = dir.join(HARD_STATE_FILE);

    let buf = match fs::read(&path) {
        Ok(x) => x,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(ErrorSubject::HardState, ErrorVerb::Read, e)),
    };

    let hs = serde_json::from_slice(&buf).map_err(|e| StorageError::read_hard_state(&e))?;
    Ok(Some(hs))
}

fn parse_segment_name(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != SEGMENT_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

fn io_err(subject: ErrorSubject, verb: ErrorVerb, e: io::Error) -> StorageError {
    StorageError::from_io_error(subject, verb, e)
}
