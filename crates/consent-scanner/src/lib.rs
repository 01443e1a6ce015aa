//! Consent Scanner - CMP presence and consent crawling.
//!
//! This crate holds the two crawl engines and everything they share:
//!
//! - a signature table attributing responses to Cookiebot, OneTrust or Termly
//! - the presence engine, one lightweight HTTP fetch per domain
//! - the consent engine, one pooled browser session per domain, with
//!   CMP-specific consent parsers
//! - the result store: categorized line files, a run summary and the SQLite
//!   crawl database
//! - the batch coordinator and a registry keeping one domain out of both
//!   engines at once
//!
//! # Example
//!
//! ```rust,ignore
//! use consent_scanner::{BatchCoordinator, CrawlContext, EngineKind, PresenceEngine, ResultStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(ResultStore::open(&settings.output_directory, EngineKind::Presence).await?);
//! let engine = PresenceEngine::new(settings, Arc::new(signatures), store)?;
//! let coordinator = BatchCoordinator::new(domains, 4);
//! let report = coordinator.run(&engine, &CrawlContext::new()).await?;
//! println!("{} domains, {} uncrawled", report.summary.total, report.summary.uncrawled);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod banner;
#[allow(missing_docs)]
pub mod batch;
#[allow(missing_docs)]
pub mod consent;
#[allow(missing_docs)]
pub mod error;
#[allow(missing_docs)]
pub mod parsers;
#[allow(missing_docs)]
pub mod presence;
#[allow(missing_docs)]
pub mod registry;
#[allow(missing_docs)]
pub mod signature;
#[allow(missing_docs)]
pub mod sink;
#[allow(missing_docs)]
pub mod store;

// Re-export commonly used types
pub use batch::{BatchCoordinator, BatchReport, CrawlContext, Engine, ProgressSnapshot};
pub use consent::ConsentEngine;
pub use error::{Result, ScanError};
pub use parsers::{parser_for, ConsentParser};
pub use presence::PresenceEngine;
pub use registry::{DomainClaim, DomainRegistry};
pub use signature::{Signature, SignatureTable};
pub use sink::{CategorizedSink, OutcomeCategory};
pub use store::{EngineKind, ResultStore, RunSummary, DATABASE_FILE, SUMMARY_FILE};
