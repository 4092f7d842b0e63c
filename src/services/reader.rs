//! src/services/reader.rs
//!
//! FileReader — lazy, finite, forward-only delivery of a Complete file's
//! chunks in sequence order. A reader holds an RAII registration in the
//! store's reader registry for its whole lifetime; deletion consults the
//! registry and refuses to pull chunks out from under an in-flight read.

use crate::{
    errors::{StoreError, StoreResult},
    models::file_record::FileRecord,
    services::chunk_store::ChunkStore,
};
use bytes::Bytes;
use futures::Stream;
use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use uuid::Uuid;

/// Count of open readers per file id, shared between the facade and every
/// live `FileReader`.
#[derive(Clone, Default, Debug)]
pub(crate) struct ReaderRegistry {
    inner: Arc<Mutex<HashMap<Uuid, usize>>>,
}

impl ReaderRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, usize>> {
        // a poisoned count map is still a usable count map
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register one reader for `id`; the guard releases on drop.
    pub(crate) fn acquire(&self, id: Uuid) -> ReaderGuard {
        *self.lock().entry(id).or_insert(0) += 1;
        ReaderGuard {
            registry: self.clone(),
            id,
        }
    }

    /// Open readers for one file.
    pub(crate) fn active(&self, id: Uuid) -> usize {
        self.lock().get(&id).copied().unwrap_or(0)
    }

    /// Open readers across all files.
    pub(crate) fn total_active(&self) -> usize {
        self.lock().values().sum()
    }

    fn release(&self, id: Uuid) {
        let mut map = self.lock();
        if let Some(count) = map.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                map.remove(&id);
            }
        }
    }
}

/// RAII registration of one open reader.
#[derive(Debug)]
pub(crate) struct ReaderGuard {
    registry: ReaderRegistry,
    id: Uuid,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

/// Pull-based reader over a Complete file's chunks.
///
/// Not seekable mid-stream; to restart, `open` again. Dropping the reader
/// at any point releases everything it holds — there is no close call.
#[derive(Debug)]
pub struct FileReader {
    record: FileRecord,
    chunks: ChunkStore,
    next_sequence: u32,
    skip: usize,
    _guard: ReaderGuard,
}

impl FileReader {
    pub(crate) fn new(record: FileRecord, chunks: ChunkStore, guard: ReaderGuard) -> Self {
        Self {
            record,
            chunks,
            next_sequence: 0,
            skip: 0,
            _guard: guard,
        }
    }

    /// Reader starting at a byte offset: maps the offset to a starting
    /// sequence plus an intra-chunk skip. An offset at or past the end
    /// yields an empty stream.
    pub(crate) fn new_at(
        record: FileRecord,
        chunks: ChunkStore,
        guard: ReaderGuard,
        offset: u64,
    ) -> Self {
        let mut reader = Self::new(record, chunks, guard);
        if offset >= reader.record.length as u64 {
            reader.next_sequence = reader.record.chunk_count as u32;
        } else {
            let chunk_size = reader.record.chunk_size as u64;
            reader.next_sequence = (offset / chunk_size) as u32;
            reader.skip = (offset % chunk_size) as usize;
        }
        reader
    }

    /// The Complete record this reader was opened against.
    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Pull the next chunk's bytes, in sequence order.
    ///
    /// Returns None after the final chunk. A storage error terminates the
    /// stream: the error is yielded once and subsequent calls return None.
    pub async fn next_chunk(&mut self) -> Option<StoreResult<Bytes>> {
        if (self.next_sequence as i64) >= self.record.chunk_count {
            return None;
        }

        match self.chunks.get_chunk(self.record.id, self.next_sequence).await {
            Ok(data) => {
                self.next_sequence += 1;
                let data = if self.skip > 0 {
                    let skip = self.skip.min(data.len());
                    self.skip = 0;
                    data.slice(skip..)
                } else {
                    data
                };
                Some(Ok(data))
            }
            Err(err) => {
                self.next_sequence = self.record.chunk_count as u32;
                Some(Err(err))
            }
        }
    }

    /// Adapt to a `futures::Stream` of chunk bytes.
    pub fn into_stream(self) -> impl Stream<Item = StoreResult<Bytes>> + Send {
        futures::stream::unfold(self, |mut reader| async move {
            reader.next_chunk().await.map(|item| (item, reader))
        })
    }

    /// Adapt to `AsyncRead` for consumers that copy bytes rather than
    /// forward chunks.
    pub fn into_async_read(self) -> impl AsyncRead + Send {
        use futures::StreamExt;
        let stream = self
            .into_stream()
            .map(|res| res.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));
        StreamReader::new(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file_record::FileStatus;
    use chrono::Utc;
    use futures::StreamExt;

    fn record(id: Uuid, length: i64, chunk_size: i64) -> FileRecord {
        let chunk_count = if length == 0 {
            0
        } else {
            (length + chunk_size - 1) / chunk_size
        };
        FileRecord {
            id,
            filename: "test.bin".into(),
            content_type: "application/octet-stream".into(),
            length,
            chunk_size,
            chunk_count,
            checksum: None,
            status: FileStatus::Complete,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            last_write_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reads_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = ChunkStore::new(dir.path(), 4);
        let id = Uuid::new_v4();
        chunks.put_chunk(id, 0, b"abcd").await.unwrap();
        chunks.put_chunk(id, 1, b"efgh").await.unwrap();
        chunks.put_chunk(id, 2, b"ij").await.unwrap();

        let registry = ReaderRegistry::default();
        let reader = FileReader::new(record(id, 10, 4), chunks, registry.acquire(id));

        let parts: Vec<Bytes> = reader
            .into_stream()
            .map(|res| res.unwrap())
            .collect()
            .await;
        assert_eq!(parts, vec![
            Bytes::from_static(b"abcd"),
            Bytes::from_static(b"efgh"),
            Bytes::from_static(b"ij"),
        ]);
    }

    #[tokio::test]
    async fn offset_maps_to_sequence_and_skip() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = ChunkStore::new(dir.path(), 4);
        let id = Uuid::new_v4();
        chunks.put_chunk(id, 0, b"abcd").await.unwrap();
        chunks.put_chunk(id, 1, b"efgh").await.unwrap();
        chunks.put_chunk(id, 2, b"ij").await.unwrap();

        let registry = ReaderRegistry::default();
        let mut reader =
            FileReader::new_at(record(id, 10, 4), chunks.clone(), registry.acquire(id), 6);
        assert_eq!(reader.next_chunk().await.unwrap().unwrap().as_ref(), b"gh");
        assert_eq!(reader.next_chunk().await.unwrap().unwrap().as_ref(), b"ij");
        assert!(reader.next_chunk().await.is_none());

        // at-or-past-the-end offsets are an empty stream
        let mut past = FileReader::new_at(record(id, 10, 4), chunks, registry.acquire(id), 10);
        assert!(past.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn registry_counts_follow_guard_lifetimes() {
        let registry = ReaderRegistry::default();
        let id = Uuid::new_v4();
        assert_eq!(registry.active(id), 0);

        let a = registry.acquire(id);
        let b = registry.acquire(id);
        assert_eq!(registry.active(id), 2);
        assert_eq!(registry.total_active(), 2);

        drop(a);
        assert_eq!(registry.active(id), 1);
        drop(b);
        assert_eq!(registry.active(id), 0);
        assert_eq!(registry.total_active(), 0);
    }
}
