//! Core error types for the consent crawler.
//!
//! [`TaskError`] is the per-task failure taxonomy. Every variant is recovered at
//! the task level and converted into a terminal outcome record; none of them end a
//! run. [`ConfigError`] is the only run-fatal category and is raised before any
//! task executes.

use crate::types::{CrawlStatus, FetchStatus};
use thiserror::Error;

/// Failure of a single domain task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// DNS failure, refused connection, TLS or redirect failure
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Connect or page-load timeout elapsed
    #[error("timeout: {0}")]
    TimeoutError(String),

    /// A bot challenge page was served instead of the site
    #[error("bot challenge detected: {0}")]
    BotBlocked(String),

    /// Non-success HTTP status outside the bot challenge range
    #[error("HTTP error status {status}")]
    HttpError {
        /// Status code returned by the server
        status: u16,
    },

    /// The browser process died while serving the task
    #[error("browser crashed: {0}")]
    BrowserCrash(String),

    /// The page failed to navigate or settle
    #[error("navigation failed: {0}")]
    NavigationError(String),

    /// Cookies were collected but CMP consent metadata was unavailable
    #[error("consent metadata unavailable: {0}")]
    ParseDegraded(String),
}

impl TaskError {
    /// Terminal presence status for this error.
    ///
    /// Browser-only variants have no presence counterpart and map to
    /// `ConnectionError`.
    #[must_use]
    pub fn fetch_status(&self) -> FetchStatus {
        match self {
            Self::TimeoutError(_) => FetchStatus::Timeout,
            Self::BotBlocked(_) => FetchStatus::BotBlocked,
            Self::HttpError { .. } => FetchStatus::HttpError,
            Self::ConnectionError(_)
            | Self::BrowserCrash(_)
            | Self::NavigationError(_)
            | Self::ParseDegraded(_) => FetchStatus::ConnectionError,
        }
    }

    /// Terminal consent-crawl status for this error.
    ///
    /// `ParseDegraded` is not a navigation failure, so it maps to `Success`.
    #[must_use]
    pub fn crawl_status(&self) -> CrawlStatus {
        match self {
            Self::TimeoutError(_) => CrawlStatus::Timeout,
            Self::BrowserCrash(_) => CrawlStatus::BrowserCrash,
            Self::ParseDegraded(_) => CrawlStatus::Success,
            Self::ConnectionError(_)
            | Self::BotBlocked(_)
            | Self::HttpError { .. }
            | Self::NavigationError(_) => CrawlStatus::NavigationError,
        }
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Config file not found
    #[error("config file not found at {path}")]
    NotFound {
        /// Path where config was expected
        path: String,
    },

    /// Failed to parse TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// I/O error reading config
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
