//! Chunked blob-storage engine.
//!
//! Files are stored as fixed-size chunks on disk plus a metadata record in
//! a SQLite catalog. An upload session slices an incoming byte stream into
//! checksummed chunks and atomically publishes the catalog entry on
//! finalize; readers pull a Complete file's chunks back lazily, in order.
//!
//! The crate is the storage core only: HTTP routing, form handling, and
//! response rendering belong to the embedding application, which drives
//! the [`FileStore`] facade.
//!
//! ```no_run
//! use file_store::{FileStore, StoreConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = FileStore::connect(StoreConfig::from_env()?).await?;
//!
//! let mut session = store.begin_upload("cat.png", "image/png").await?;
//! session.write(b"\x89PNG...").await?;
//! let record = session.finalize().await?;
//!
//! let mut reader = store.open_image(record.id).await?;
//! while let Some(chunk) = reader.next_chunk().await {
//!     let bytes = chunk?;
//!     // hand bytes to the response body
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod media;
pub mod models;
pub mod services;

pub use config::StoreConfig;
pub use errors::{StoreError, StoreResult};
pub use models::file_record::{FileRecord, FileStatus, FileSummary};
pub use services::{
    catalog::Catalog,
    chunk_store::ChunkStore,
    reader::FileReader,
    session::UploadSession,
    store::{CheckStatus, FileKey, FileStore, ReadyReport, random_filename},
};
