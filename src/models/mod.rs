//! Core data models for the chunked file store.
//!
//! These entities represent catalog rows and their listing projections.
//! They map cleanly to database tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod file_record;
