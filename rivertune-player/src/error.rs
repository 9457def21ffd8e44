//! Error types for rivertune-player
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Stream-resolution failures keep their own taxonomy
//! ([`ResolveError`]) because the orchestrator applies per-class recovery
//! policy to them.

use rivertune_common::error::ResolveError;
use thiserror::Error;

/// Main error type for rivertune-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Snapshot or config (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stream resolution failures (typed taxonomy)
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Queue management errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Download pipeline errors
    #[error("Download error: {0}")]
    Download(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using rivertune-player Error
pub type Result<T> = std::result::Result<T, Error>;
