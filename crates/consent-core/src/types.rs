//! Shared types used across the consent crawler.
//!
//! This module defines the crawl data model: the input [`DomainTask`], the terminal
//! [`FetchOutcome`] of the presence path, the terminal [`CrawlResult`] of the consent
//! path and the cookie and consent records attached to a crawl.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Consent management platforms recognized by the crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpType {
    /// Cookiebot (Usercentrics)
    Cookiebot,
    /// OneTrust / CookiePro / cookielaw.org
    #[serde(rename = "onetrust")]
    OneTrust,
    /// Termly
    Termly,
}

impl CmpType {
    /// All CMPs in classification priority order.
    pub const ALL: [CmpType; 3] = [CmpType::Cookiebot, CmpType::OneTrust, CmpType::Termly];

    /// Stable lowercase name used in files and the database.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cookiebot => "cookiebot",
            Self::OneTrust => "onetrust",
            Self::Termly => "termly",
        }
    }

    /// Numeric code used by downstream extraction tooling.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Cookiebot => 0,
            Self::OneTrust => 1,
            Self::Termly => 2,
        }
    }
}

impl fmt::Display for CmpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CmpType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cookiebot" => Ok(Self::Cookiebot),
            "onetrust" => Ok(Self::OneTrust),
            "termly" => Ok(Self::Termly),
            other => Err(format!("unknown CMP type '{other}'")),
        }
    }
}

/// Terminal status of a presence fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Page fetched; the signature matcher was applied
    Ok,
    /// No response within the connect or load timeout
    Timeout,
    /// DNS failure, refused connection, TLS or redirect failure
    ConnectionError,
    /// Bot challenge status or page
    BotBlocked,
    /// Any other non-success status
    HttpError,
}

impl FetchStatus {
    /// Stable snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::BotBlocked => "bot_blocked",
            Self::HttpError => "http_error",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a browser-driven consent crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    /// Navigation settled and extraction ran
    Success,
    /// The page-load timeout elapsed; cookies collected so far are kept as partial
    Timeout,
    /// The browser process died, or was force-released on cancellation
    BrowserCrash,
    /// Navigation failed before the page could settle
    NavigationError,
}

impl CrawlStatus {
    /// Stable snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::BrowserCrash => "browser_crash",
            Self::NavigationError => "navigation_error",
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "timeout" => Ok(Self::Timeout),
            "browser_crash" => Ok(Self::BrowserCrash),
            "navigation_error" => Ok(Self::NavigationError),
            other => Err(format!("unknown crawl status '{other}'")),
        }
    }
}

/// Whether CMP-declared consent metadata was obtained for a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    /// The CMP parser produced consent records
    Declared,
    /// A CMP was recognized but its metadata could not be parsed
    Degraded,
    /// No CMP recognized, or navigation never settled
    NotApplicable,
}

impl ConsentStatus {
    /// Stable snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Declared => "declared",
            Self::Degraded => "degraded",
            Self::NotApplicable => "not_applicable",
        }
    }
}

impl FromStr for ConsentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "declared" => Ok(Self::Declared),
            "degraded" => Ok(Self::Degraded),
            "not_applicable" => Ok(Self::NotApplicable),
            other => Err(format!("unknown consent status '{other}'")),
        }
    }
}

/// Purpose label derived from a CMP-declared category name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurposeLabel {
    /// Strictly necessary
    Necessary,
    /// Functional / preferences
    Functional,
    /// Analytics / statistics
    Analytics,
    /// Advertising / marketing
    Advertising,
    /// Social media
    Social,
    /// Unclassified or unrecognized
    Unknown,
}

impl PurposeLabel {
    /// Map a free-form declared category onto a purpose label.
    #[must_use]
    pub fn from_category(category: &str) -> Self {
        let lower = category.to_lowercase();
        let has = |terms: &[&str]| terms.iter().any(|t| lower.contains(t));

        if has(&["necessary", "essential", "required", "strictly"]) {
            Self::Necessary
        } else if has(&["functional", "preference", "personalization"]) {
            Self::Functional
        } else if has(&["analytics", "performance", "statistics", "measurement"]) {
            Self::Analytics
        } else if has(&["advertising", "marketing", "targeting", "ads"]) {
            Self::Advertising
        } else if has(&["social", "media"]) {
            Self::Social
        } else {
            Self::Unknown
        }
    }

    /// Numeric label (`-1` for unknown).
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Necessary => 0,
            Self::Functional => 1,
            Self::Analytics => 2,
            Self::Advertising => 3,
            Self::Social => 4,
            Self::Unknown => -1,
        }
    }

    /// Inverse of [`PurposeLabel::code`].
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Necessary,
            1 => Self::Functional,
            2 => Self::Analytics,
            3 => Self::Advertising,
            4 => Self::Social,
            _ => Self::Unknown,
        }
    }
}

/// A single domain to crawl.
///
/// Built once from raw input, never mutated, consumed by exactly one worker.
/// A task without a `normalized_url` is degenerate and is classified without
/// ever reaching a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTask {
    /// Input as given by the caller
    pub raw_domain: String,
    /// Lowercase host, used as the record key
    pub domain: String,
    /// Absolute http(s) URL, `None` when the input is unusable
    pub normalized_url: Option<String>,
}

impl DomainTask {
    /// Normalize a raw domain or URL.
    ///
    /// Bare domains get an `https://` scheme. Empty input, whitespace inside the
    /// input, non-http schemes and unparsable hosts yield a degenerate task.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let degenerate = || Self {
            raw_domain: raw.to_string(),
            domain: trimmed.to_lowercase(),
            normalized_url: None,
        };

        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
            return degenerate();
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        match Url::parse(&candidate) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => match url.host_str() {
                Some(host) if !host.is_empty() => Self {
                    raw_domain: raw.to_string(),
                    domain: host.to_string(),
                    normalized_url: Some(url.to_string()),
                },
                _ => degenerate(),
            },
            _ => degenerate(),
        }
    }

    /// Whether the task can be sent to a worker.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.normalized_url.is_none()
    }

    /// URLs to try, in order.
    ///
    /// With `fallback` enabled and a scheme-less input, the `https://www.`,
    /// `https://` and `http://` prefixes are tried in that order.
    #[must_use]
    pub fn url_candidates(&self, fallback: bool) -> Vec<String> {
        let Some(normalized) = &self.normalized_url else {
            return Vec::new();
        };

        let trimmed = self.raw_domain.trim();
        if !fallback || trimmed.contains("://") {
            return vec![normalized.clone()];
        }

        let suffix = trimmed.strip_prefix("www.").unwrap_or(trimmed);
        ["https://www.", "https://", "http://"]
            .iter()
            .map(|prefix| format!("{prefix}{suffix}"))
            .collect()
    }

    /// Name written to line-oriented sinks.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.domain.is_empty() {
            "<empty>"
        } else {
            &self.domain
        }
    }
}

/// Terminal result of a presence fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    /// Domain the outcome belongs to
    pub domain: String,
    /// Final URL after redirects, when a response arrived
    pub final_url: Option<String>,
    /// Terminal status
    pub status: FetchStatus,
    /// HTTP status code, when a response arrived
    pub http_status: Option<u16>,
    /// CMP attributed by the signature matcher (only for `Ok`)
    pub matched_cmp: Option<CmpType>,
    /// Leading part of the response body
    pub response_snippet: String,
    /// Error detail for non-`Ok` outcomes
    pub error: Option<String>,
    /// Wall time spent on the fetch
    pub duration: Duration,
}

impl FetchOutcome {
    /// Outcome for a failed fetch.
    #[must_use]
    pub fn failed(domain: impl Into<String>, status: FetchStatus, error: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            final_url: None,
            status,
            http_status: None,
            matched_cmp: None,
            response_snippet: String::new(),
            error: Some(error.into()),
            duration: Duration::ZERO,
        }
    }
}

/// Terminal result of a browser-driven consent crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlResult {
    /// Domain the result belongs to
    pub domain: String,
    /// URL the browser was sent to
    pub url: String,
    /// Terminal status
    pub status: CrawlStatus,
    /// CMP detected on the rendered page
    pub cmp_type: Option<CmpType>,
    /// Number of cookies extracted from the session
    pub cookies_collected_count: usize,
    /// Whether consent metadata was declared, degraded or not applicable
    pub consent_status: ConsentStatus,
    /// Wall time from session acquisition to extraction end
    pub duration: Duration,
    /// Error detail for non-success results and degraded parses
    pub error_message: Option<String>,
}

/// A cookie observed in a browser session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    /// Crawled domain that produced the cookie
    pub domain: String,
    /// Domain attribute of the cookie
    pub cookie_domain: String,
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Cookie path
    pub path: String,
    /// Expiry as seconds since the epoch, `None` for session cookies
    pub expiry: Option<f64>,
    /// `Secure` attribute
    pub secure: bool,
    /// `HttpOnly` attribute
    pub http_only: bool,
    /// `SameSite` attribute, if set
    pub same_site: Option<String>,
    /// Collected from a page whose navigation did not settle
    pub partial: bool,
}

impl CookieRecord {
    /// Provenance of every cookie record.
    pub const SOURCE: &'static str = "observed";
}

/// A consent declaration made by a CMP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Crawled domain that declared it
    pub domain: String,
    /// CMP that declared it
    pub cmp_type: CmpType,
    /// Cookie the declaration refers to, if any
    pub cookie_name: Option<String>,
    /// Host the declared cookie belongs to, if given
    pub cookie_domain: Option<String>,
    /// Category as written by the CMP
    pub declared_purpose_category: String,
    /// Normalized purpose label
    pub consent_label: PurposeLabel,
    /// Free-text purpose, if given
    pub purpose_description: Option<String>,
}

impl ConsentRecord {
    /// Provenance of every consent record.
    pub const SOURCE: &'static str = "declared";

    /// Build a record, deriving the label from the declared category.
    #[must_use]
    pub fn declared(
        domain: &str,
        cmp_type: CmpType,
        cookie_name: Option<String>,
        cookie_domain: Option<String>,
        category: &str,
        purpose_description: Option<String>,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            cmp_type,
            cookie_name,
            cookie_domain,
            declared_purpose_category: category.to_string(),
            consent_label: PurposeLabel::from_category(category),
            purpose_description,
        }
    }
}
