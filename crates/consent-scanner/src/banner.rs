//! Consent banner interaction for the accept-all and accept-none profiles.
//!
//! CMP-specific controls come first, then the generic attribute matches that
//! catch hand-rolled banners. The first visible, enabled match is clicked.

use consent_browser::{BrowserError, BrowserSession};
use consent_core::BrowserProfile;
use once_cell::sync::Lazy;
use serde_json::Value;

pub const ACCEPT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll",
    "#CybotCookiebotDialogBodyButtonAccept",
    "[data-tid='banner-accept']",
    "[id*='accept']",
    "[class*='accept']",
    "[id*='agree']",
    "[class*='agree']",
    "[aria-label*='Accept']",
    "[aria-label*='Agree']",
];

pub const REJECT_SELECTORS: &[&str] = &[
    "#onetrust-reject-all-handler",
    "#CybotCookiebotDialogBodyButtonDecline",
    "[data-tid='banner-decline']",
    "[id*='reject']",
    "[class*='reject']",
    "[id*='decline']",
    "[class*='decline']",
    "[aria-label*='Reject']",
    "[aria-label*='Decline']",
];

pub static ACCEPT_SCRIPT: Lazy<String> = Lazy::new(|| click_script(ACCEPT_SELECTORS));
pub static REJECT_SCRIPT: Lazy<String> = Lazy::new(|| click_script(REJECT_SELECTORS));

/// Script clicking the first usable match; returns the selector or `null`.
fn click_script(selectors: &[&str]) -> String {
    let list = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
  for (const selector of {list}) {{
    for (const el of document.querySelectorAll(selector)) {{
      const style = window.getComputedStyle(el);
      const visible = el.getClientRects().length > 0 && style.visibility !== "hidden";
      if (visible && !el.disabled) {{
        el.click();
        return JSON.stringify(selector);
      }}
    }}
  }}
  return JSON.stringify(null);
}})()"#
    )
}

/// Banner script for a profile; the default profile leaves the banner alone.
pub fn script_for(profile: BrowserProfile) -> Option<&'static str> {
    match profile {
        BrowserProfile::AcceptAll => Some(ACCEPT_SCRIPT.as_str()),
        BrowserProfile::AcceptNone => Some(REJECT_SCRIPT.as_str()),
        BrowserProfile::Default => None,
    }
}

/// Apply the profile's consent choice to the rendered banner.
///
/// Returns the selector that was clicked, or `None` when the profile takes no
/// action or no control matched.
pub async fn respond(
    session: &dyn BrowserSession,
    profile: BrowserProfile,
) -> Result<Option<String>, BrowserError> {
    let Some(script) = script_for(profile) else {
        return Ok(None);
    };
    match session.evaluate(script).await? {
        Value::String(selector) => Ok(Some(selector)),
        _ => Ok(None),
    }
}
