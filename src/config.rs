use anyhow::{Context, Result};
use std::{env, time::Duration};

/// Default chunk size: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Content types served through the image path unless overridden.
pub const DEFAULT_IMAGE_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

/// Centralized store configuration.
/// Populated from environment variables or built programmatically.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for chunk payloads.
    pub data_dir: String,

    /// SQLite URL for the file catalog.
    pub database_url: String,

    /// Fixed chunk size applied to new upload sessions, in bytes.
    pub chunk_size: usize,

    /// Maximum connections in the catalog pool.
    pub max_connections: u32,

    /// Pending sessions with no writes for this long are eligible for
    /// server-initiated abort.
    pub idle_timeout: Duration,

    /// How long `close` waits for in-flight readers before giving up.
    pub shutdown_grace: Duration,

    /// Content types the image-streaming path will serve.
    pub image_types: Vec<String>,
}

impl StoreConfig {
    /// Build a config with defaults for everything but the two locations.
    pub fn new(data_dir: impl Into<String>, database_url: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_url: database_url.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_connections: 5,
            idle_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(5),
            image_types: DEFAULT_IMAGE_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Parse configuration from `FILE_STORE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let data_dir = env::var("FILE_STORE_DATA_DIR").unwrap_or_else(|_| "./data/chunks".into());
        let database_url = env::var("FILE_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/file_store.db".into());

        let mut cfg = Self::new(data_dir, database_url);

        if let Some(value) = read_env("FILE_STORE_CHUNK_SIZE")? {
            cfg.chunk_size = value
                .parse::<usize>()
                .with_context(|| format!("parsing FILE_STORE_CHUNK_SIZE value `{}`", value))?;
            if cfg.chunk_size == 0 {
                anyhow::bail!("FILE_STORE_CHUNK_SIZE must be greater than zero");
            }
        }

        if let Some(value) = read_env("FILE_STORE_MAX_CONNECTIONS")? {
            cfg.max_connections = value
                .parse::<u32>()
                .with_context(|| format!("parsing FILE_STORE_MAX_CONNECTIONS value `{}`", value))?;
        }

        if let Some(value) = read_env("FILE_STORE_IDLE_TIMEOUT_SECS")? {
            let secs = value
                .parse::<u64>()
                .with_context(|| format!("parsing FILE_STORE_IDLE_TIMEOUT_SECS value `{}`", value))?;
            cfg.idle_timeout = Duration::from_secs(secs);
        }

        if let Some(value) = read_env("FILE_STORE_IMAGE_TYPES")? {
            cfg.image_types = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(cfg)
    }
}

/// Read an optional environment variable, surfacing non-UTF-8 values as
/// errors instead of silently falling back.
fn read_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
