use consent_core::{BrowserProfile, BrowserSettings};
use std::path::PathBuf;
use std::time::Duration;

/// Launch parameters shared by every session of a pool.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub headless: bool,
    pub profile: BrowserProfile,
    pub user_agent: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
    /// Upper bound for a single CDP request, distinct from the page-load timeout
    pub request_timeout: Duration,
    pub chrome_executable: Option<PathBuf>,
    /// Unpacked consent auto-responder loaded for `profile`
    pub extension_dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Build a session config from browser settings.
    ///
    /// `connect_timeout` bounds individual protocol requests; page loads are
    /// bounded separately by the caller.
    pub fn from_settings(settings: &BrowserSettings, connect_timeout: Duration) -> Self {
        Self {
            headless: settings.headless,
            profile: settings.profile,
            user_agent: None,
            window_width: settings.window_width,
            window_height: settings.window_height,
            request_timeout: connect_timeout,
            chrome_executable: settings.chrome_executable.clone(),
            extension_dir: settings.extension_dir().map(PathBuf::from),
        }
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Extra command line switches for this profile.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-first-run".to_string(),
        ];
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={ua}"));
        }
        args
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&BrowserSettings::default(), Duration::from_secs(20))
    }
}
