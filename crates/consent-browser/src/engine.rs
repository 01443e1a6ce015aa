use crate::error::{BrowserError, Result};
use crate::profile::SessionConfig;
use crate::session::{BrowserCookie, BrowserSession, SessionLauncher};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::storage::GetCookiesParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures_util::stream::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Launches one Chromium process per session.
#[derive(Debug, Default)]
pub struct ChromiumLauncher {
    next_id: AtomicU64,
}

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn browser_config(config: &SessionConfig, profile_dir: &TempDir) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(config.window_width, config.window_height)
            .user_data_dir(profile_dir.path())
            .request_timeout(config.request_timeout)
            .args(config.launch_args());

        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &config.chrome_executable {
            builder = builder.chrome_executable(exe);
        }
        if let Some(ext) = &config.extension_dir {
            builder = builder.extension(ext.display().to_string());
        }

        builder.build().map_err(BrowserError::LaunchError)
    }
}

#[async_trait::async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let profile_dir = tempfile::Builder::new()
            .prefix("consent-session-")
            .tempdir()?;
        let browser_config = Self::browser_config(config, &profile_dir)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::LaunchError(e.to_string()))?;

        // The handler loop ends when the websocket to the browser closes
        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(CdpError::Ws(e)) = event {
                    tracing::debug!("session {} websocket error: {}", id, e);
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
            tracing::debug!("session {} handler exited", id);
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(BrowserError::LaunchError(e.to_string()));
            }
        };

        tracing::debug!(
            "Launched browser session {} (profile {}, headless {})",
            id,
            config.profile.as_str(),
            config.headless
        );

        Ok(Box::new(ChromiumSession {
            id,
            browser,
            page,
            alive,
            handler_task,
            _profile_dir: profile_dir,
        }))
    }
}

/// A Chromium process with a single page.
pub struct ChromiumSession {
    id: u64,
    browser: Browser,
    page: Page,
    alive: Arc<AtomicBool>,
    handler_task: JoinHandle<()>,
    _profile_dir: TempDir,
}

impl ChromiumSession {
    /// Map a protocol error, reporting a crash once the handler loop is gone.
    fn classify(&self, err: CdpError) -> BrowserError {
        if !self.is_alive() {
            return BrowserError::Crashed(err.to_string());
        }
        match err {
            CdpError::Ws(e) => BrowserError::Crashed(e.to_string()),
            CdpError::Timeout => BrowserError::Timeout("CDP request timed out".to_string()),
            other => BrowserError::ChromiumError(other.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl BrowserSession for ChromiumSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => match self.classify(e) {
                BrowserError::ChromiumError(msg) => Err(BrowserError::NavigationError(msg)),
                other => Err(other),
            },
            Err(_) if !self.is_alive() => Err(BrowserError::Crashed(format!(
                "browser exited while loading {url}"
            ))),
            Err(_) => Err(BrowserError::Timeout(format!(
                "page load exceeded {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn page_source(&self) -> Result<String> {
        self.page.content().await.map_err(|e| self.classify(e))
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        let response = self
            .page
            .execute(GetCookiesParams::default())
            .await
            .map_err(|e| self.classify(e))?;

        Ok(response
            .result
            .cookies
            .into_iter()
            .map(|c| BrowserCookie {
                expires: if c.session { None } else { Some(c.expires) },
                same_site: c.same_site.map(|s| s.as_ref().to_string()),
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| match self.classify(e) {
                BrowserError::ChromiumError(msg) => BrowserError::ScriptError(msg),
                other => other,
            })?;

        let encoded: String = result
            .into_value()
            .map_err(|e| BrowserError::ScriptError(format!("non-string result: {e}")))?;
        serde_json::from_str(&encoded)
            .map_err(|e| BrowserError::ScriptError(format!("invalid JSON result: {e}")))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.handler_task.is_finished()
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        if self.is_alive() {
            if let Err(e) = self.browser.close().await {
                tracing::debug!("session {} close failed: {}", self.id, e);
            }
        }
        // Reap the child so no zombie is left behind
        if let Err(e) = self.browser.wait().await {
            tracing::debug!("session {} wait failed: {}", self.id, e);
        }
        self.handler_task.abort();
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}
