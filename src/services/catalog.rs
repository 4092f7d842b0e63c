//! src/services/catalog.rs
//!
//! Catalog — metadata records for stored files, backed by SQLite. Rows
//! move Pending → Complete (finalize) or Pending → Aborted (abort); only
//! Complete rows are visible through the read-side queries. The partial
//! unique index on `filename WHERE status = 'complete'` enforces name
//! uniqueness among published files while letting in-progress sessions
//! temporarily collide.

use crate::{
    errors::{StoreError, StoreResult},
    models::file_record::{FileRecord, FileStatus},
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

const MAX_FILENAME_LEN: usize = 255;

/// Metadata index mapping filenames/ids to file-level attributes and
/// status.
#[derive(Clone)]
pub struct Catalog {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,
}

impl Catalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Basic filename validation to avoid trivial path traversal vectors.
    ///
    /// Rejects empty and over-long names, path separators, `..`, and
    /// control characters.
    fn ensure_filename_safe(&self, name: &str) -> StoreResult<()> {
        let reason = if name.is_empty() {
            Some("cannot be empty")
        } else if name.len() > MAX_FILENAME_LEN {
            Some("exceeds 255 bytes")
        } else if name.contains('/') || name.contains('\\') {
            Some("cannot contain path separators")
        } else if name.contains("..") {
            Some("cannot contain `..`")
        } else if name.bytes().any(|b| b.is_ascii_control() || b == b'\0') {
            Some("cannot contain control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StoreError::InvalidFilename {
                name: name.to_string(),
                reason: reason.into(),
            }),
            None => Ok(()),
        }
    }

    /// Insert a Pending record with a fresh collision-free id.
    ///
    /// The row is invisible to readers until `finalize` flips it to
    /// Complete.
    pub async fn create_pending(
        &self,
        filename: &str,
        content_type: &str,
        chunk_size: i64,
    ) -> StoreResult<FileRecord> {
        self.ensure_filename_safe(filename)?;

        let now = Utc::now();
        let record = FileRecord {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            length: 0,
            chunk_size,
            chunk_count: 0,
            checksum: None,
            status: FileStatus::Pending,
            created_at: now,
            completed_at: None,
            last_write_at: now,
        };

        sqlx::query(
            "INSERT INTO files (
                id, filename, content_type, length, chunk_size, chunk_count,
                checksum, status, created_at, completed_at, last_write_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(record.length)
        .bind(record.chunk_size)
        .bind(record.chunk_count)
        .bind(&record.checksum)
        .bind(record.status)
        .bind(record.created_at)
        .bind(record.completed_at)
        .bind(record.last_write_at)
        .execute(&*self.db)
        .await?;

        Ok(record)
    }

    /// Bump `last_write_at` so the idle reaper leaves an active session
    /// alone.
    pub async fn touch(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE files SET last_write_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Atomically publish a Pending record as Complete.
    ///
    /// `chunk_count` is derived from the stored chunk size. The guarded
    /// UPDATE means a reader either sees the old Pending-invisible row or
    /// the fully populated Complete row, never a mix. Returns NotFound if
    /// the row is missing or no longer Pending, FilenameTaken if another
    /// Complete record already holds the name.
    pub async fn finalize(&self, id: Uuid, length: i64, checksum: &str) -> StoreResult<FileRecord> {
        let pending = self.fetch_any(id).await?;
        if pending.status != FileStatus::Pending {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let chunk_count = if length == 0 {
            0
        } else {
            (length + pending.chunk_size - 1) / pending.chunk_size
        };

        let result = sqlx::query_as::<_, FileRecord>(
            "UPDATE files
             SET status = ?, length = ?, chunk_count = ?, checksum = ?, completed_at = ?
             WHERE id = ? AND status = ?
             RETURNING id, filename, content_type, length, chunk_size, chunk_count,
                       checksum, status, created_at, completed_at, last_write_at",
        )
        .bind(FileStatus::Complete)
        .bind(length)
        .bind(chunk_count)
        .bind(checksum)
        .bind(Utc::now())
        .bind(id)
        .bind(FileStatus::Pending)
        .fetch_one(&*self.db)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(sqlx::Error::RowNotFound) => Err(StoreError::NotFound(id.to_string())),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::FilenameTaken(pending.filename))
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    /// Transition a Pending record to Aborted.
    ///
    /// Idempotent: re-aborting is ok. A record that completed in the
    /// meantime is left untouched — abort never unpublishes. Returns
    /// NotFound for unknown ids.
    pub async fn abort(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE files SET status = ? WHERE id = ? AND status = ?")
            .bind(FileStatus::Aborted)
            .bind(id)
            .bind(FileStatus::Pending)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            // distinguishes a missing row from an already-settled one
            self.fetch_any(id).await?;
        }
        Ok(())
    }

    /// Fetch a record regardless of status.
    ///
    /// Returns NotFound if the row is missing.
    pub(crate) async fn fetch_any(&self, id: Uuid) -> StoreResult<FileRecord> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT id, filename, content_type, length, chunk_size, chunk_count,
                    checksum, status, created_at, completed_at, last_write_at
             FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(id.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Look up a Complete record by filename.
    ///
    /// Pending and Aborted rows are NotFound to callers.
    pub async fn find_by_filename(&self, name: &str) -> StoreResult<FileRecord> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT id, filename, content_type, length, chunk_size, chunk_count,
                    checksum, status, created_at, completed_at, last_write_at
             FROM files WHERE filename = ? AND status = ?",
        )
        .bind(name)
        .bind(FileStatus::Complete)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(name.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Look up a Complete record by id.
    pub async fn find_by_id(&self, id: Uuid) -> StoreResult<FileRecord> {
        let record = self.fetch_any(id).await?;
        if record.status != FileStatus::Complete {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(record)
    }

    /// All Complete records in stable creation order.
    pub async fn list_all(&self) -> StoreResult<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(
            "SELECT id, filename, content_type, length, chunk_size, chunk_count,
                    checksum, status, created_at, completed_at, last_write_at
             FROM files WHERE status = ?
             ORDER BY created_at ASC, filename ASC",
        )
        .bind(FileStatus::Complete)
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }

    /// Remove a row regardless of status, returning the prior record.
    ///
    /// Chunk cleanup is the caller's responsibility; the facade treats
    /// row removal plus cleanup as one logical delete.
    pub async fn delete_row(&self, id: Uuid) -> StoreResult<FileRecord> {
        sqlx::query_as::<_, FileRecord>(
            "DELETE FROM files WHERE id = ?
             RETURNING id, filename, content_type, length, chunk_size, chunk_count,
                       checksum, status, created_at, completed_at, last_write_at",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(id.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Pending records with no writes since `cutoff` — reaper input.
    pub async fn stale_pending(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<FileRecord>> {
        self.stale_with_status(FileStatus::Pending, cutoff).await
    }

    /// Aborted records past `cutoff`, eligible for purge.
    pub async fn stale_aborted(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<FileRecord>> {
        self.stale_with_status(FileStatus::Aborted, cutoff).await
    }

    async fn stale_with_status(
        &self,
        status: FileStatus,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(
            "SELECT id, filename, content_type, length, chunk_size, chunk_count,
                    checksum, status, created_at, completed_at, last_write_at
             FROM files WHERE status = ? AND last_write_at < ?",
        )
        .bind(status)
        .bind(cutoff)
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }
}

/// Return true if a SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
