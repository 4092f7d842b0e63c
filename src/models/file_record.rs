//! Represents a stored file's catalog entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of a catalog entry.
///
/// A record is created Pending when an upload session begins, flips to
/// Complete on a successful finalize, and to Aborted on explicit abort,
/// checksum failure, or idle-session reaping. Only Complete records are
/// ever visible to readers.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Complete,
    Aborted,
}

/// Catalog entry for one stored file.
///
/// The record holds metadata only; the content bytes live in the chunk
/// store, addressed by `id` and a zero-based sequence number.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Unique identifier, assigned at session creation, immutable.
    pub id: Uuid,

    /// Caller-supplied name. Unique among Complete records; an in-progress
    /// session may temporarily collide until finalize.
    pub filename: String,

    /// Content type (MIME type), client-supplied and untrusted.
    pub content_type: String,

    /// Total byte count, known only after all bytes are written.
    pub length: i64,

    /// Fixed chunk size assigned at session creation, in bytes.
    pub chunk_size: i64,

    /// Number of chunks: ceil(length / chunk_size), derived at finalize.
    pub chunk_count: i64,

    /// MD5 over the full content, hex-encoded. Set at finalize.
    pub checksum: Option<String>,

    /// Current lifecycle state.
    pub status: FileStatus,

    /// Timestamp when the upload session began.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the successful finalize, if any.
    pub completed_at: Option<DateTime<Utc>>,

    /// Timestamp of the most recent chunk write; drives idle reaping.
    pub last_write_at: DateTime<Utc>,
}

/// Listing view of a Complete file, as exposed by `list_files`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FileSummary {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub length: i64,
    pub chunk_count: i64,
    /// Whether the content type is in the displayable-image whitelist.
    pub is_image: bool,
    pub created_at: DateTime<Utc>,
}

impl FileSummary {
    /// Project a catalog record into its listing form.
    pub fn from_record(record: &FileRecord, is_image: bool) -> Self {
        Self {
            id: record.id,
            filename: record.filename.clone(),
            content_type: record.content_type.clone(),
            length: record.length,
            chunk_count: record.chunk_count,
            is_image,
            created_at: record.created_at,
        }
    }
}
