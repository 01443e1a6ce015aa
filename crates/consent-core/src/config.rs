//! Configuration management for the consent crawler.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides. The configuration is loaded once and passed
//! into each engine at construction; nothing here is global.

use crate::error::{ConfigError, ConfigResult};
use crate::types::CmpType;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default user agent sent by the presence engine.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Main crawler configuration.
///
/// This is loaded from `~/.config/consent-crawl/config.toml` (or platform
/// equivalent) unless an explicit path is given. Missing sections and fields
/// take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Presence crawl and output settings
    pub crawl: CrawlSettings,
    /// Browser automation settings
    pub browser: BrowserSettings,
    /// Additional CMP signatures
    pub signatures: SignatureSettings,
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults
    /// if no file exists.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path.
    ///
    /// Unlike [`AppConfig::load`], a missing file is an error.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }

        tracing::debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `CONSENT_HEADLESS`: Override browser headless mode (true/false)
    /// - `CONSENT_CONCURRENCY`: Override presence worker count
    /// - `CONSENT_OUTPUT_DIR`: Override output directory
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("CONSENT_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("CONSENT_CONCURRENCY") {
            if let Ok(concurrency) = val.parse() {
                self.crawl.concurrency = concurrency;
                tracing::debug!("Override crawl.concurrency from env: {}", concurrency);
            }
        }

        if let Ok(val) = std::env::var("CONSENT_OUTPUT_DIR") {
            if !val.is_empty() {
                tracing::debug!("Override crawl.output_directory from env: {}", val);
                self.crawl.output_directory = PathBuf::from(val);
            }
        }

        self
    }

    /// Load configuration (explicit path or default location) with
    /// environment variable overrides applied.
    pub fn load_with_env(path: Option<&Path>) -> ConfigResult<Self> {
        let config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        Ok(config.with_env_overrides())
    }

    /// Reject values that would make a run meaningless.
    ///
    /// Called before any task executes; a failure here is run-fatal.
    pub fn validate(&self) -> ConfigResult<()> {
        fn invalid(field: &str, reason: &str) -> ConfigError {
            ConfigError::InvalidValue {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.crawl.output_directory.as_os_str().is_empty() {
            return Err(invalid("crawl.output_directory", "must not be empty"));
        }
        if self.crawl.connect_timeout_secs == 0 {
            return Err(invalid("crawl.connect_timeout_secs", "must be at least 1"));
        }
        if self.crawl.load_timeout_secs == 0 {
            return Err(invalid("crawl.load_timeout_secs", "must be at least 1"));
        }
        if self.crawl.batches == 0 {
            return Err(invalid("crawl.batches", "must be at least 1"));
        }
        if self.browser.num_sessions == 0 {
            return Err(invalid("browser.num_sessions", "must be at least 1"));
        }
        if self.browser.page_load_timeout_secs == 0 {
            return Err(invalid("browser.page_load_timeout_secs", "must be at least 1"));
        }
        for (idx, rule) in self.signatures.extra.iter().enumerate() {
            if rule.pattern.trim().is_empty() {
                return Err(invalid(
                    &format!("signatures.extra[{idx}].pattern"),
                    "must not be empty",
                ));
            }
        }

        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/consent-crawl/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("org", "consent-crawl", "consent-crawl")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

/// Presence crawl and output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// Directory receiving categorized files, the run summary and the database
    pub output_directory: PathBuf,
    /// TCP/TLS connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Total load timeout in seconds (connect + response + body)
    pub load_timeout_secs: u64,
    /// Presence workers; 0 scales with available CPUs
    pub concurrency: usize,
    /// Number of contiguous batches the input is split into
    pub batches: usize,
    /// User agent for presence fetches
    pub user_agent: String,
    /// Try `https://www.`, `https://`, `http://` for scheme-less domains
    pub url_fallback: bool,
}

impl CrawlSettings {
    /// Connect timeout as a `Duration`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Load timeout as a `Duration`.
    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    /// Effective worker count.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 4)
            .unwrap_or(4)
    }
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("./data/results"),
            connect_timeout_secs: 20,
            load_timeout_secs: 30,
            concurrency: 0,
            batches: 1,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            url_fallback: false,
        }
    }
}

/// Consent choice applied by the browser profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserProfile {
    /// Auto-responder accepts every consent category
    AcceptAll,
    /// Auto-responder rejects every optional category
    AcceptNone,
    /// No auto-responder; the banner is left untouched
    #[default]
    Default,
}

impl BrowserProfile {
    /// Stable snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AcceptAll => "accept_all",
            Self::AcceptNone => "accept_none",
            Self::Default => "default",
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run browser in headless mode
    pub headless: bool,
    /// Consent profile applied to every session
    pub profile: BrowserProfile,
    /// Number of concurrent browser sessions
    pub num_sessions: usize,
    /// Page-load timeout in seconds
    pub page_load_timeout_secs: u64,
    /// Delay after load before extraction, letting consent banners render
    pub settle_delay_secs: u64,
    /// Grace period for in-flight navigations after cancellation
    pub cancel_grace_secs: u64,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Explicit Chrome/Chromium binary
    pub chrome_executable: Option<PathBuf>,
    /// Unpacked auto-responder extension per profile
    pub extension_dirs: ExtensionDirs,
}

impl BrowserSettings {
    /// Page-load timeout as a `Duration`.
    #[must_use]
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    /// Settle delay as a `Duration`.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Cancellation grace period as a `Duration`.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    /// Extension directory for the configured profile.
    #[must_use]
    pub fn extension_dir(&self) -> Option<&Path> {
        match self.profile {
            BrowserProfile::AcceptAll => self.extension_dirs.accept_all.as_deref(),
            BrowserProfile::AcceptNone => self.extension_dirs.accept_none.as_deref(),
            BrowserProfile::Default => None,
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            profile: BrowserProfile::Default,
            num_sessions: 1,
            page_load_timeout_secs: 30,
            settle_delay_secs: 5,
            cancel_grace_secs: 10,
            window_width: 1920,
            window_height: 1080,
            chrome_executable: None,
            extension_dirs: ExtensionDirs::default(),
        }
    }
}

/// Auto-responder extension directories keyed by profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionDirs {
    /// Extension configured to accept all categories
    pub accept_all: Option<PathBuf>,
    /// Extension configured to reject optional categories
    pub accept_none: Option<PathBuf>,
}

/// Where a signature pattern is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureTarget {
    /// Response body only
    Body,
    /// Response header values only
    Headers,
    /// Body and header values
    #[default]
    Any,
}

/// A user-supplied CMP signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRule {
    /// CMP attributed on match
    pub cmp: CmpType,
    /// Case-insensitive regular expression
    pub pattern: String,
    /// Where to match
    #[serde(default)]
    pub target: SignatureTarget,
}

/// Additional CMP signatures, appended after the built-in table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureSettings {
    /// Extra rules in declaration order
    pub extra: Vec<SignatureRule>,
}
