use std::sync::Arc;

use futures::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use futures::TryStreamExt;

use crate::storage::RaftLogStorage;
use crate::Entry;
use crate::StorageError;

/// Lazily stream the log entries from index `start` to the end of the log.
///
/// Entries are fetched in batches of `batch_size`. The stream holds no state other than the next
/// index to read, thus a stream interrupted by an error can be restarted by calling this again
/// from the last index received plus one.
pub fn entries_from<S>(sto: Arc<S>, start: u64, batch_size: u64) -> BoxStream<'static, Result<Entry, StorageError>>
where S: RaftLogStorage + ?Sized {
    let batch_size = batch_size.max(1);

    stream::try_unfold((sto, start), move |(sto, next)| async move {
        let entries = sto.try_get_log_entries(next..next.saturating_add(batch_size)).await?;

        let last = match entries.last() {
            None => return Ok(None),
            Some(x) => x.log_id.index,
        };

        let batch = stream::iter(entries.into_iter().map(Ok::<_, StorageError>));
        Ok(Some((batch, (sto, last + 1))))
    })
    .try_flatten()
    .boxed()
}
