//! Browser automation for consent crawls.
//!
//! Launches one Chromium process per session, each with its own throwaway
//! profile directory, and hands sessions to workers through a bounded pool.
//! The pool is the admission valve of the consent engine: a worker cannot
//! navigate until it holds a lease, and every lease is returned exactly once.

pub mod engine;
pub mod error;
pub mod pool;
pub mod profile;
pub mod session;

pub use engine::{ChromiumLauncher, ChromiumSession};
pub use error::{BrowserError, Result};
pub use pool::{SessionHealth, SessionLease, SessionManager, SessionStats};
pub use profile::SessionConfig;
pub use session::{BrowserCookie, BrowserSession, SessionLauncher};
