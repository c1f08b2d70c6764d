//! Environment-driven configuration for the worker binary.

use loomline_core::queue::INSPECTION_QUEUE;
use std::path::PathBuf;
use thiserror::Error;

/// Default spool location next to the worker's working directory.
const DEFAULT_SPOOL_PATH: &str = "loomline_dead_letter.jsonl";

/// A required environment variable is missing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("missing required environment variable {0}")]
pub struct ConfigError(pub String);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis URL for the counter store and queue (`REDIS_URL`).
    pub redis_url: String,
    /// PostgreSQL URL for the relational store (`DATABASE_URL`).
    pub database_url: String,
    /// Queue to consume (`LOOMLINE_QUEUE`, defaults to the pipeline queue).
    pub queue_name: String,
    /// Dead-letter spool path (`LOOMLINE_SPOOL_PATH`).
    pub spool_path: PathBuf,
}

impl WorkerConfig {
    /// Read configuration from the environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when `REDIS_URL` or `DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| ConfigError(name.to_string()))
        };

        Ok(Self {
            redis_url: required("REDIS_URL")?,
            database_url: required("DATABASE_URL")?,
            queue_name: std::env::var("LOOMLINE_QUEUE")
                .unwrap_or_else(|_| INSPECTION_QUEUE.to_string()),
            spool_path: std::env::var("LOOMLINE_SPOOL_PATH")
                .map_or_else(|_| PathBuf::from(DEFAULT_SPOOL_PATH), PathBuf::from),
        })
    }
}
