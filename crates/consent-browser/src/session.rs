use crate::error::Result;
use crate::profile::SessionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cookie as reported by the browser for the whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Seconds since the epoch; `None` for session cookies
    pub expires: Option<f64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
}

/// One automated browser instance, exclusively owned by one in-flight task.
#[async_trait::async_trait]
pub trait BrowserSession: Send + Sync {
    /// Stable identifier, unique within a launcher
    fn id(&self) -> u64;

    /// Navigate to a URL, waiting at most `timeout` for the load to finish
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Rendered HTML of the current document
    async fn page_source(&self) -> Result<String>;

    /// All cookies visible to the session, across every domain
    async fn cookies(&self) -> Result<Vec<BrowserCookie>>;

    /// Evaluate a script that returns a JSON-encoded string
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Whether the underlying browser process is still reachable
    fn is_alive(&self) -> bool;

    /// Shut the browser down and remove its profile directory
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Creates browser sessions.
#[async_trait::async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>>;
}
