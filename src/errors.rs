//! Crate-wide error taxonomy.
//!
//! Every component returns `StoreError`; storage-layer failures (`sqlx`,
//! `std::io`) pass through transparently so callers can still reach the
//! underlying cause. Mapping to user-facing responses is the job of the
//! embedding request layer, not this crate.

use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown filename/id, or the record exists but is not Complete.
    #[error("file `{0}` not found")]
    NotFound(String),

    /// The running digest and the digest of the stored chunks disagree at
    /// finalize time. The record is aborted before this is returned.
    #[error("checksum mismatch for file `{id}`: stream {expected}, stored {stored}")]
    ChecksumMismatch {
        id: Uuid,
        expected: String,
        stored: String,
    },

    /// A Complete record already holds this filename.
    #[error("filename `{0}` already exists")]
    FilenameTaken(String),

    #[error("filename `{name}` invalid: {reason}")]
    InvalidFilename { name: String, reason: String },

    /// A chunk was already written at this (file, sequence) address with
    /// different content. Identical retries are accepted silently.
    #[error("chunk {sequence} of file `{file_id}` already written")]
    DuplicateChunk { file_id: Uuid, sequence: u32 },

    #[error("chunk {sequence} is {len} bytes, exceeds chunk size {max}")]
    ChunkTooLarge {
        sequence: u32,
        len: usize,
        max: usize,
    },

    /// Deletion refused: readers are streaming this file, or an upload
    /// session still owns it.
    #[error("file `{0}` is in use")]
    FileInUse(Uuid),

    /// The catalog row was removed but chunk cleanup failed. The chunks
    /// for `id` may still be on disk; `delete_all_chunks` is safe to
    /// re-run.
    #[error("file record `{id}` removed but chunk cleanup failed: {source}")]
    PartialDelete { id: Uuid, source: io::Error },

    /// The file's content type is not in the displayable-image whitelist.
    #[error("content type `{0}` is not a displayable image")]
    UnsupportedMediaType(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
