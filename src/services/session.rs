//! src/services/session.rs
//!
//! UploadSession — turns an unbounded incoming byte stream into ordered,
//! checksummed chunks under a single logical transaction. The handle
//! exclusively owns its file id: it is not `Clone`, writes take
//! `&mut self`, and finalize/abort consume it, so no other writer can
//! ever touch the same (file, sequence) space.

use crate::{
    errors::{StoreError, StoreResult},
    models::file_record::FileRecord,
    services::{catalog::Catalog, chunk_store::ChunkStore},
};
use bytes::BytesMut;
use tracing::{debug, warn};
use uuid::Uuid;

/// One in-progress upload: begin → write* → finalize | abort.
pub struct UploadSession {
    record: FileRecord,
    catalog: Catalog,
    chunks: ChunkStore,
    buf: BytesMut,
    next_sequence: u32,
    written: i64,
    digest: md5::Context,
}

impl UploadSession {
    pub(crate) fn new(record: FileRecord, catalog: Catalog, chunks: ChunkStore) -> Self {
        let chunk_size = record.chunk_size as usize;
        Self {
            record,
            catalog,
            chunks,
            buf: BytesMut::with_capacity(chunk_size),
            next_sequence: 0,
            written: 0,
            digest: md5::Context::new(),
        }
    }

    /// Id of the Pending record this session owns.
    pub fn id(&self) -> Uuid {
        self.record.id
    }

    /// The Pending record as created at `begin_upload`.
    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Total bytes accepted so far (persisted plus buffered).
    pub fn bytes_written(&self) -> i64 {
        self.written
    }

    /// Accept an arbitrarily sized slice of the incoming stream.
    ///
    /// Bytes are buffered until a full chunk boundary is reached, then
    /// persisted with the next sequence number. A slice spanning several
    /// chunk boundaries emits several chunks, strictly in order — chunk
    /// N+1 is never issued before N's write returns.
    pub async fn write(&mut self, bytes: &[u8]) -> StoreResult<()> {
        self.digest.consume(bytes);
        self.written += bytes.len() as i64;
        self.buf.extend_from_slice(bytes);

        let chunk_size = self.record.chunk_size as usize;
        while self.buf.len() >= chunk_size {
            self.flush_next().await?;
        }
        Ok(())
    }

    /// Persist the front of the buffer as the next chunk.
    ///
    /// On failure the buffer and sequence number are left exactly as they
    /// were, so a retry lands on the same sequence with identical bytes
    /// and the chunk store accepts it idempotently.
    async fn flush_next(&mut self) -> StoreResult<()> {
        let chunk_size = self.record.chunk_size as usize;
        let take = self.buf.len().min(chunk_size);
        let chunk = self.buf.split_to(take);

        match self
            .chunks
            .put_chunk(self.record.id, self.next_sequence, &chunk)
            .await
        {
            Ok(()) => {
                debug!(
                    "file {} chunk {} persisted ({} bytes)",
                    self.record.id,
                    self.next_sequence,
                    chunk.len()
                );
                self.next_sequence += 1;
                self.catalog.touch(self.record.id).await?;
                Ok(())
            }
            Err(err) => {
                let mut front = chunk;
                front.unsplit(std::mem::take(&mut self.buf));
                self.buf = front;
                Err(err)
            }
        }
    }

    /// Flush the final partial chunk, verify the stored bytes against the
    /// running checksum, and publish the record.
    ///
    /// The verification digest is computed over the chunks as actually
    /// stored, concatenated in sequence order. On mismatch the record is
    /// aborted and its chunks removed; a corrupted upload can end up
    /// Aborted but never Complete.
    pub async fn finalize(mut self) -> StoreResult<FileRecord> {
        while !self.buf.is_empty() {
            self.flush_next().await?;
        }

        let UploadSession {
            record,
            catalog,
            chunks,
            digest,
            next_sequence,
            written,
            ..
        } = self;

        let expected = format!("{:x}", digest.compute());

        let mut verify = md5::Context::new();
        for sequence in 0..next_sequence {
            let data = chunks.get_chunk(record.id, sequence).await?;
            verify.consume(&data);
        }
        let stored = format!("{:x}", verify.compute());

        if stored != expected {
            catalog.abort(record.id).await?;
            if let Err(err) = chunks.delete_all_chunks(record.id).await {
                warn!(
                    "chunk cleanup after checksum mismatch failed for {}: {}",
                    record.id, err
                );
            }
            return Err(StoreError::ChecksumMismatch {
                id: record.id,
                expected,
                stored,
            });
        }

        match catalog.finalize(record.id, written, &expected).await {
            Ok(published) => Ok(published),
            Err(err @ StoreError::FilenameTaken(_)) => {
                // a Complete record owns the name; this session can no
                // longer publish, so release its id and storage
                catalog.abort(record.id).await?;
                if let Err(cleanup) = chunks.delete_all_chunks(record.id).await {
                    warn!(
                        "chunk cleanup after name collision failed for {}: {}",
                        record.id, cleanup
                    );
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Abandon the upload: mark the record Aborted and remove any chunks
    /// already written.
    ///
    /// Call this on client disconnect or after a failed `write`. If chunk
    /// removal fails the record is already Aborted, so the leftovers are
    /// unreadable and the idle reaper will retry the cleanup.
    pub async fn abort(self) -> StoreResult<()> {
        self.catalog.abort(self.record.id).await?;
        self.chunks.delete_all_chunks(self.record.id).await?;
        Ok(())
    }
}
