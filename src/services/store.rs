//! src/services/store.rs
//!
//! FileStore — the engine facade. Owns the catalog pool, the chunk store,
//! and the reader registry, and exposes the boundary operations a request
//! layer drives: upload, list, metadata lookup, chunk streaming (plain and
//! image-gated), deletion, and idle-session reaping. All shared state is
//! constructed in `connect` and passed around explicitly; there are no
//! module-level singletons.

use crate::{
    config::StoreConfig,
    errors::{StoreError, StoreResult},
    media,
    models::file_record::{FileRecord, FileStatus, FileSummary},
    services::{
        catalog::Catalog,
        chunk_store::ChunkStore,
        reader::{FileReader, ReaderRegistry},
        session::UploadSession,
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use serde::Serialize;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{fs, io, path::Path, sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

/// How a caller addresses a stored file: by catalog id or by filename.
#[derive(Debug, Clone, Copy)]
pub enum FileKey<'a> {
    Id(Uuid),
    Name(&'a str),
}

impl From<Uuid> for FileKey<'static> {
    fn from(id: Uuid) -> Self {
        FileKey::Id(id)
    }
}

impl<'a> From<&'a str> for FileKey<'a> {
    fn from(name: &'a str) -> Self {
        FileKey::Name(name)
    }
}

/// Outcome of one readiness probe.
#[derive(Debug, Serialize)]
pub struct CheckStatus {
    pub ok: bool,
    pub error: Option<String>,
}

/// Readiness of the two backing services.
#[derive(Debug, Serialize)]
pub struct ReadyReport {
    pub database: CheckStatus,
    pub disk: CheckStatus,
}

impl ReadyReport {
    pub fn ok(&self) -> bool {
        self.database.ok && self.disk.ok
    }
}

/// The chunked blob-storage engine.
///
/// Cheap to clone; clones share the same pool, chunk store, and reader
/// registry.
#[derive(Clone)]
pub struct FileStore {
    db: Arc<SqlitePool>,
    catalog: Catalog,
    chunks: ChunkStore,
    readers: ReaderRegistry,
    config: StoreConfig,
}

impl FileStore {
    /// Initialize the engine: create the data directories, open the
    /// catalog pool, and apply migrations. Returns only once the store is
    /// ready to serve requests.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        if !Path::new(&config.data_dir).exists() {
            fs::create_dir_all(&config.data_dir)?;
            info!("created chunk directory at {}", config.data_dir);
        }

        // SQLx will not create the database file or its directory itself.
        let db_path = config
            .database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("file:");
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if !db_path.contains(":memory:") {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.exists() {
                    fs::create_dir_all(parent)?;
                    info!("created database directory {}", parent.display());
                }
            }
            fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(db_path)?;
        }

        let db = Arc::new(
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url)
                .await?,
        );

        run_migrations(&db).await?;
        info!(
            "file store ready: chunks under {}, catalog at {}",
            config.data_dir, config.database_url
        );

        let catalog = Catalog::new(db.clone());
        let chunks = ChunkStore::new(config.data_dir.clone(), config.chunk_size);
        Ok(Self {
            db,
            catalog,
            chunks,
            readers: ReaderRegistry::default(),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Tear down: wait (bounded by `shutdown_grace`) for in-flight readers
    /// to finish, then close the pool.
    pub async fn close(self) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        while self.readers.total_active() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        let still_active = self.readers.total_active();
        if still_active > 0 {
            warn!("closing with {} reader(s) still active", still_active);
        }
        self.db.close().await;
    }

    /// Probe the two backing services.
    ///
    /// 1. Runs a lightweight query against SQLite (`SELECT 1`).
    /// 2. Performs a write/read/delete round trip under the data dir.
    ///
    /// Failures are captured in the report rather than returned, so a
    /// request layer can render the whole picture.
    pub async fn readiness(&self) -> ReadyReport {
        let database = match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => CheckStatus {
                ok: true,
                error: None,
            },
            Ok(v) => CheckStatus {
                ok: false,
                error: Some(format!("unexpected result: {}", v)),
            },
            Err(e) => CheckStatus {
                ok: false,
                error: Some(format!("error: {}", e)),
            },
        };

        let probe_path =
            Path::new(&self.config.data_dir).join(format!(".ready-{}", Uuid::new_v4()));
        let disk = match tokio::fs::write(&probe_path, b"ready").await {
            Ok(_) => match tokio::fs::read(&probe_path).await {
                Ok(bytes) if bytes == b"ready" => {
                    let _ = tokio::fs::remove_file(&probe_path).await;
                    CheckStatus {
                        ok: true,
                        error: None,
                    }
                }
                Ok(_) => {
                    let _ = tokio::fs::remove_file(&probe_path).await;
                    CheckStatus {
                        ok: false,
                        error: Some("probe file content mismatch".into()),
                    }
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&probe_path).await;
                    CheckStatus {
                        ok: false,
                        error: Some(format!("could not read probe file: {}", e)),
                    }
                }
            },
            Err(e) => CheckStatus {
                ok: false,
                error: Some(format!("could not write probe file: {}", e)),
            },
        };

        ReadyReport { database, disk }
    }

    /// Start an upload session for `filename`.
    ///
    /// Creates the Pending catalog record and hands back the exclusive
    /// session handle. The record stays invisible to readers until the
    /// session finalizes.
    pub async fn begin_upload(
        &self,
        filename: &str,
        content_type: &str,
    ) -> StoreResult<UploadSession> {
        let record = self
            .catalog
            .create_pending(filename, content_type, self.config.chunk_size as i64)
            .await?;
        Ok(UploadSession::new(
            record,
            self.catalog.clone(),
            self.chunks.clone(),
        ))
    }

    /// Upload a whole stream: begin → write* → finalize, aborting the
    /// session on any stream or storage error.
    pub async fn upload<S>(
        &self,
        filename: &str,
        content_type: &str,
        stream: S,
    ) -> StoreResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut session = self.begin_upload(filename, content_type).await?;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    abort_quietly(session).await;
                    return Err(StoreError::Io(err));
                }
            };
            if let Err(err) = session.write(&chunk).await {
                abort_quietly(session).await;
                return Err(err);
            }
        }
        session.finalize().await
    }

    /// All Complete files in stable creation order, each flagged as
    /// image-displayable per the configured whitelist.
    pub async fn list_files(&self) -> StoreResult<Vec<FileSummary>> {
        let records = self.catalog.list_all().await?;
        Ok(records
            .iter()
            .map(|record| {
                let is_image =
                    media::is_displayable_image(&record.content_type, &self.config.image_types);
                FileSummary::from_record(record, is_image)
            })
            .collect())
    }

    /// Metadata for one Complete file by name.
    pub async fn find_file(&self, name: &str) -> StoreResult<FileRecord> {
        self.catalog.find_by_filename(name).await
    }

    /// Open a reader over a Complete file's chunks.
    ///
    /// Pending and Aborted records are NotFound to callers.
    pub async fn open<'a>(&self, key: impl Into<FileKey<'a>>) -> StoreResult<FileReader> {
        let record = self.resolve(key.into()).await?;
        let guard = self.readers.acquire(record.id);
        Ok(FileReader::new(record, self.chunks.clone(), guard))
    }

    /// Open a reader starting at a byte offset (ranged reads).
    pub async fn open_at<'a>(
        &self,
        key: impl Into<FileKey<'a>>,
        offset: u64,
    ) -> StoreResult<FileReader> {
        let record = self.resolve(key.into()).await?;
        let guard = self.readers.acquire(record.id);
        Ok(FileReader::new_at(record, self.chunks.clone(), guard, offset))
    }

    /// Open a reader through the image-serving path.
    ///
    /// Files whose content type is outside the whitelist are refused with
    /// UnsupportedMediaType, whatever their actual bytes contain.
    pub async fn open_image<'a>(&self, key: impl Into<FileKey<'a>>) -> StoreResult<FileReader> {
        let record = self.resolve(key.into()).await?;
        if !media::is_displayable_image(&record.content_type, &self.config.image_types) {
            return Err(StoreError::UnsupportedMediaType(record.content_type));
        }
        let guard = self.readers.acquire(record.id);
        Ok(FileReader::new(record, self.chunks.clone(), guard))
    }

    /// Delete a file: catalog row and all chunks, as one logical
    /// operation.
    ///
    /// Refused with FileInUse while readers are streaming the file or an
    /// upload session still owns it (Pending). If the row is removed but
    /// chunk cleanup fails, the result is PartialDelete — never plain
    /// success.
    pub async fn delete_file(&self, id: Uuid) -> StoreResult<FileRecord> {
        let record = self.catalog.fetch_any(id).await?;
        if record.status == FileStatus::Pending {
            return Err(StoreError::FileInUse(id));
        }
        if self.readers.active(id) > 0 {
            return Err(StoreError::FileInUse(id));
        }

        let record = self.catalog.delete_row(id).await?;
        match self.chunks.delete_all_chunks(id).await {
            Ok(count) => {
                debug!("deleted file {} ({} chunk(s))", id, count);
                Ok(record)
            }
            Err(StoreError::Io(source)) => Err(StoreError::PartialDelete { id, source }),
            Err(other) => Err(other),
        }
    }

    /// Abort Pending sessions idle past the configured timeout and purge
    /// Aborted leftovers past the same cutoff. Returns how many records
    /// were reaped.
    ///
    /// Per-record failures are logged and skipped so one bad record does
    /// not wedge the sweep.
    pub async fn reap_idle_sessions(&self) -> StoreResult<u64> {
        let Some(cutoff) = chrono::Duration::from_std(self.config.idle_timeout)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
        else {
            return Ok(0);
        };

        let mut reaped = 0u64;

        for record in self.catalog.stale_pending(cutoff).await? {
            info!(
                "aborting idle upload session {} ({})",
                record.id, record.filename
            );
            if let Err(err) = self.catalog.abort(record.id).await {
                warn!("failed to abort idle session {}: {}", record.id, err);
                continue;
            }
            if let Err(err) = self.chunks.delete_all_chunks(record.id).await {
                warn!("failed to clean chunks of {}: {}", record.id, err);
            }
            reaped += 1;
        }

        for record in self.catalog.stale_aborted(cutoff).await? {
            if let Err(err) = self.chunks.delete_all_chunks(record.id).await {
                warn!("failed to clean chunks of {}: {}", record.id, err);
                continue;
            }
            if let Err(err) = self.catalog.delete_row(record.id).await {
                warn!("failed to purge aborted record {}: {}", record.id, err);
                continue;
            }
            reaped += 1;
        }

        Ok(reaped)
    }

    /// Run `reap_idle_sessions` on a fixed interval until the task is
    /// aborted.
    pub fn spawn_reaper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.reap_idle_sessions().await {
                    Ok(0) => {}
                    Ok(count) => info!("reaped {} stale record(s)", count),
                    Err(err) => warn!("session reaper pass failed: {}", err),
                }
            }
        })
    }

    async fn resolve(&self, key: FileKey<'_>) -> StoreResult<FileRecord> {
        match key {
            FileKey::Id(id) => self.catalog.find_by_id(id).await,
            FileKey::Name(name) => self.catalog.find_by_filename(name).await,
        }
    }
}

/// Replacement name for an untrusted client-supplied filename: a random
/// hex basename with the original extension preserved.
pub fn random_filename(original: &str) -> String {
    let stem = Uuid::new_v4().simple().to_string();
    match Path::new(original).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", stem, ext),
        _ => stem,
    }
}

async fn abort_quietly(session: UploadSession) {
    let id = session.id();
    if let Err(err) = session.abort().await {
        warn!("failed to abort session {}: {}", id, err);
    }
}

/// Apply the embedded schema statements to a fresh or existing database.
async fn run_migrations(db: &SqlitePool) -> StoreResult<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("running {} migration statements", statements.len());
    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_filename_keeps_extension() {
        let name = random_filename("holiday photo.jpg");
        assert!(name.ends_with(".jpg"));
        assert_eq!(name.len(), 32 + 4);
        assert_ne!(random_filename("a.jpg"), random_filename("a.jpg"));
    }

    #[test]
    fn random_filename_without_extension() {
        let name = random_filename("README");
        assert_eq!(name.len(), 32);
        assert!(!name.contains('.'));
    }
}
