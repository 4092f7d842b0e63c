//! src/services/chunk_store.rs
//!
//! ChunkStore — append-only storage of fixed-size binary chunks on local
//! disk, addressed by (file id, sequence number). Chunk payloads live
//! beneath `base_path/{shard}/{shard}/{file_id}/{sequence}.chunk`; the
//! two shard levels keep per-directory entry counts low. Chunk data is
//! immutable once written.

use crate::errors::{StoreError, StoreResult};
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const CHUNK_FILE_EXT: &str = "chunk";

/// Disk-backed chunk storage shared by upload sessions and readers.
///
/// A chunk write is visible only after its temp file has been flushed,
/// fsynced, and renamed into place, so `get_chunk` never observes a
/// truncated payload.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    /// Base directory on disk where chunk payloads are stored.
    pub base_path: PathBuf,

    /// Maximum accepted chunk length, in bytes.
    pub chunk_size: usize,
}

impl ChunkStore {
    pub fn new(base_path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            base_path: base_path.into(),
            chunk_size,
        }
    }

    /// Generate two-level shard identifiers for a file id.
    ///
    /// Uses MD5(file_id) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn file_shards(file_id: Uuid) -> (String, String) {
        let digest = md5::compute(file_id.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Directory holding every chunk of one file.
    fn file_root(&self, file_id: Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::file_shards(file_id);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(file_id.simple().to_string());
        path
    }

    /// Construct the payload path for one chunk.
    ///
    /// Parent directories may not exist yet.
    fn chunk_path(&self, file_id: Uuid, sequence: u32) -> PathBuf {
        self.file_root(file_id)
            .join(format!("{:08}.{}", sequence, CHUNK_FILE_EXT))
    }

    /// Persist one chunk at (file_id, sequence).
    ///
    /// - Rejects payloads longer than the configured chunk size.
    /// - Writing an occupied address again is an error, except when the
    ///   stored bytes are identical — a session retrying a failed write
    ///   reuses its sequence number and must be able to land idempotently.
    /// - Bytes go to a temp file first and are renamed into place after
    ///   flush + fsync; the temp file is removed on any error.
    pub async fn put_chunk(&self, file_id: Uuid, sequence: u32, bytes: &[u8]) -> StoreResult<()> {
        if bytes.len() > self.chunk_size {
            return Err(StoreError::ChunkTooLarge {
                sequence,
                len: bytes.len(),
                max: self.chunk_size,
            });
        }

        let chunk_path = self.chunk_path(file_id, sequence);
        match fs::read(&chunk_path).await {
            Ok(existing) => {
                return if existing == bytes {
                    debug!(
                        "chunk {}/{} retried with identical content",
                        file_id, sequence
                    );
                    Ok(())
                } else {
                    Err(StoreError::DuplicateChunk { file_id, sequence })
                };
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::Io(err)),
        }

        let parent = chunk_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "chunk path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = file.write_all(bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &chunk_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        Ok(())
    }

    /// Read back one chunk's bytes.
    ///
    /// Returns NotFound if no chunk exists at this address.
    pub async fn get_chunk(&self, file_id: Uuid, sequence: u32) -> StoreResult<Bytes> {
        let chunk_path = self.chunk_path(file_id, sequence);
        match fs::read(&chunk_path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(format!(
                "{}/{:08}",
                file_id, sequence
            ))),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Remove every chunk belonging to `file_id` and return the count.
    ///
    /// Safe to call for a file with zero chunks. Prunes the shard
    /// directories left empty by the removal.
    pub async fn delete_all_chunks(&self, file_id: Uuid) -> StoreResult<u64> {
        let root = self.file_root(file_id);

        let mut deleted: u64 = 0;
        match fs::read_dir(&root).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if entry
                        .path()
                        .extension()
                        .is_some_and(|ext| ext == CHUNK_FILE_EXT)
                    {
                        deleted += 1;
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(StoreError::Io(err)),
        }

        match fs::remove_dir_all(&root).await {
            Ok(_) => debug!("removed {} chunk(s) under {}", deleted, root.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = root.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(deleted)
    }

    /// Recursively remove empty shard directories up to the base path.
    ///
    /// Stops when a directory is not empty, not found, or the base is
    /// reached.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> ChunkStore {
        ChunkStore::new(dir.path(), 1024)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = store(&dir);
        let id = Uuid::new_v4();

        chunks.put_chunk(id, 0, b"hello").await.unwrap();
        chunks.put_chunk(id, 1, b"world").await.unwrap();

        assert_eq!(chunks.get_chunk(id, 0).await.unwrap().as_ref(), b"hello");
        assert_eq!(chunks.get_chunk(id, 1).await.unwrap().as_ref(), b"world");
    }

    #[tokio::test]
    async fn missing_chunk_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = store(&dir);

        let err = chunks.get_chunk(Uuid::new_v4(), 0).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn oversized_chunk_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = store(&dir);

        let err = chunks
            .put_chunk(Uuid::new_v4(), 0, &[0u8; 2048])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ChunkTooLarge { len: 2048, .. }));
    }

    #[tokio::test]
    async fn duplicate_write_rejected_identical_retry_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = store(&dir);
        let id = Uuid::new_v4();

        chunks.put_chunk(id, 0, b"payload").await.unwrap();
        // retry with the same bytes is idempotent
        chunks.put_chunk(id, 0, b"payload").await.unwrap();
        // different bytes at the same address is an error
        let err = chunks.put_chunk(id, 0, b"other!!").await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateChunk { sequence: 0, .. }));
        assert_eq!(chunks.get_chunk(id, 0).await.unwrap().as_ref(), b"payload");
    }

    #[tokio::test]
    async fn delete_all_counts_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = store(&dir);
        let id = Uuid::new_v4();

        for seq in 0..3u32 {
            chunks.put_chunk(id, seq, &[seq as u8; 16]).await.unwrap();
        }

        assert_eq!(chunks.delete_all_chunks(id).await.unwrap(), 3);
        assert!(matches!(
            chunks.get_chunk(id, 0).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        // second pass is a no-op
        assert_eq!(chunks.delete_all_chunks(id).await.unwrap(), 0);
    }
}
