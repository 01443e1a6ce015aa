//! Consent Core - Foundation crate for the consent crawler.
//!
//! This crate provides the shared data model, the per-task error taxonomy and the
//! configuration record that the browser, database and scanner crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Task-level error taxonomy and configuration errors using thiserror
//! - [`config`] - TOML-based configuration with XDG paths and env overrides
//! - [`types`] - Domain tasks, outcomes, cookie and consent records, CMP identifiers
//!
//! # Example
//!
//! ```rust
//! use consent_core::{AppConfig, CmpType, DomainTask};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! config.validate()?;
//!
//! let task = DomainTask::parse("example.com");
//! assert_eq!(task.normalized_url.as_deref(), Some("https://example.com/"));
//! assert_eq!(CmpType::ALL[0], CmpType::Cookiebot);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, BrowserProfile, BrowserSettings, CrawlSettings, SignatureRule};
pub use config::{SignatureSettings, SignatureTarget};
pub use error::{ConfigError, ConfigResult, TaskError};
pub use types::{
    CmpType, ConsentRecord, ConsentStatus, CookieRecord, CrawlResult, CrawlStatus, DomainTask,
    FetchOutcome, FetchStatus, PurposeLabel,
};
