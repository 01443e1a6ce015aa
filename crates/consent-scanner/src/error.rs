use consent_browser::BrowserError;
use consent_core::ConfigError;
use consent_db::DatabaseError;
use std::path::PathBuf;
use thiserror::Error;

/// Run-fatal errors.
///
/// Per-domain failures never surface here; they become terminal outcome
/// records. These are raised before tasks execute, or when a durable sink
/// itself fails.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Output directory {path} is not writable: {reason}")]
    OutputDirectory { path: PathBuf, reason: String },

    #[error("Invalid signature pattern '{pattern}': {reason}")]
    InvalidSignature { pattern: String, reason: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
