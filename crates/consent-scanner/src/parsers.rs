//! CMP-specific consent metadata extraction.
//!
//! Each supported CMP has one [`ConsentParser`]; [`parser_for`] is the only
//! place that knows the mapping. A parser reads the CMP's own storage through
//! the live session and returns the declared cookies. Any failure is reported
//! as [`TaskError::ParseDegraded`] so the caller keeps the observed cookies and
//! drops only the declarations.

use consent_browser::BrowserSession;
use consent_core::{CmpType, ConsentRecord, TaskError};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

/// Cookiebot keeps its declaration in `CookieConsentDialog.cookieTable*`.
pub const COOKIEBOT_SCRIPT: &str = r#"(() => {
  const dialog = window.CookieConsentDialog;
  if (!dialog) { return JSON.stringify(null); }
  const tables = {};
  for (const key of ["Necessary", "Preference", "Statistics", "Advertising", "Unclassified"]) {
    const rows = dialog["cookieTable" + key];
    if (Array.isArray(rows)) { tables[key] = rows; }
  }
  return JSON.stringify(tables);
})()"#;

/// OneTrust exposes its groups through `OneTrust.GetDomainData()`.
pub const ONETRUST_SCRIPT: &str = r#"(() => {
  const ot = window.OneTrust;
  if (!ot || typeof ot.GetDomainData !== "function") { return JSON.stringify(null); }
  const data = ot.GetDomainData();
  return JSON.stringify((data && data.Groups) || null);
})()"#;

/// Termly caches its cookie policy in local storage.
pub const TERMLY_SCRIPT: &str = r#"(() => {
  try {
    const raw = window.localStorage.getItem("TERMLY_API_CACHE");
    return JSON.stringify(raw ? JSON.parse(raw) : null);
  } catch (e) {
    return JSON.stringify(null);
  }
})()"#;

/// Reports which consent libraries are loaded in the page.
pub const MARKER_SCRIPT: &str = r#"(() => JSON.stringify({
  cookiebot: !!(window.Cookiebot || window.CookieConsentDialog),
  onetrust: !!(window.OneTrust || window.Optanon),
  termly: !!(window.Termly || (window.localStorage && window.localStorage.getItem("TERMLY_API_CACHE")))
}))()"#;

/// Extracts CMP-declared consent records from a live session.
#[async_trait::async_trait]
pub trait ConsentParser: Send + Sync {
    fn cmp(&self) -> CmpType;

    async fn extract(
        &self,
        session: &dyn BrowserSession,
        domain: &str,
    ) -> Result<Vec<ConsentRecord>, TaskError>;
}

pub fn parser_for(cmp: CmpType) -> &'static dyn ConsentParser {
    match cmp {
        CmpType::Cookiebot => &CookiebotParser,
        CmpType::OneTrust => &OneTrustParser,
        CmpType::Termly => &TermlyParser,
    }
}

/// CMP whose library is loaded, in priority order.
pub async fn probe_markers(session: &dyn BrowserSession) -> Option<CmpType> {
    let markers = match session.evaluate(MARKER_SCRIPT).await {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("marker probe failed: {}", e);
            return None;
        }
    };
    CmpType::ALL
        .into_iter()
        .find(|cmp| markers.get(cmp.as_str()).and_then(Value::as_bool) == Some(true))
}

async fn evaluate(session: &dyn BrowserSession, script: &str) -> Result<Value, TaskError> {
    session
        .evaluate(script)
        .await
        .map_err(|e| TaskError::ParseDegraded(e.to_string()))
}

pub struct CookiebotParser;

#[async_trait::async_trait]
impl ConsentParser for CookiebotParser {
    fn cmp(&self) -> CmpType {
        CmpType::Cookiebot
    }

    async fn extract(
        &self,
        session: &dyn BrowserSession,
        domain: &str,
    ) -> Result<Vec<ConsentRecord>, TaskError> {
        let tables = evaluate(session, COOKIEBOT_SCRIPT).await?;
        parse_cookiebot(domain, &tables).map_err(TaskError::ParseDegraded)
    }
}

/// Rows are `[name, host, purpose, expiry, type]`; the table name is the category.
pub fn parse_cookiebot(domain: &str, tables: &Value) -> Result<Vec<ConsentRecord>, String> {
    let Some(tables) = tables.as_object() else {
        return Err("CookieConsentDialog not present".to_string());
    };
    if tables.is_empty() {
        return Err("CookieConsentDialog has no cookie tables".to_string());
    }

    let mut records = Vec::new();
    for (category, rows) in tables {
        for row in rows.as_array().into_iter().flatten() {
            let Some(fields) = row.as_array() else {
                continue;
            };
            let Some(name) = fields.first().and_then(Value::as_str) else {
                continue;
            };
            records.push(ConsentRecord::declared(
                domain,
                CmpType::Cookiebot,
                Some(name.to_string()),
                non_empty(fields.get(1)),
                category,
                non_empty(fields.get(2)),
            ));
        }
    }
    Ok(records)
}

pub struct OneTrustParser;

#[async_trait::async_trait]
impl ConsentParser for OneTrustParser {
    fn cmp(&self) -> CmpType {
        CmpType::OneTrust
    }

    async fn extract(
        &self,
        session: &dyn BrowserSession,
        domain: &str,
    ) -> Result<Vec<ConsentRecord>, TaskError> {
        let groups = evaluate(session, ONETRUST_SCRIPT).await?;
        if let Ok(records) = parse_onetrust_groups(domain, &groups) {
            return Ok(records);
        }

        // Older banners only render the cookie policy list
        let html = session
            .page_source()
            .await
            .map_err(|e| TaskError::ParseDegraded(e.to_string()))?;
        let records = parse_onetrust_policy(domain, &html);
        if records.is_empty() {
            return Err(TaskError::ParseDegraded(
                "no OneTrust domain data or cookie policy list".to_string(),
            ));
        }
        Ok(records)
    }
}

/// `Groups[*]` with `GroupName` and cookies under `Cookies`,
/// `FirstPartyCookies` and `Hosts[*].Cookies`.
pub fn parse_onetrust_groups(domain: &str, groups: &Value) -> Result<Vec<ConsentRecord>, String> {
    let Some(groups) = groups.as_array() else {
        return Err("OneTrust domain data not present".to_string());
    };

    let mut records = Vec::new();
    for group in groups {
        let category = group
            .get("GroupName")
            .and_then(Value::as_str)
            .unwrap_or("Unknown");

        let direct = ["Cookies", "FirstPartyCookies"]
            .iter()
            .filter_map(|key| group.get(*key).and_then(Value::as_array))
            .flatten()
            .map(|cookie| (cookie, None));
        let hosted = group
            .get("Hosts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .flat_map(|host| {
                let host_name = host.get("HostName").and_then(Value::as_str);
                host.get("Cookies")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .map(move |cookie| (cookie, host_name))
            });

        for (cookie, host_name) in direct.chain(hosted) {
            let Some(name) = cookie.get("Name").and_then(Value::as_str) else {
                continue;
            };
            let cookie_domain = non_empty(cookie.get("Host"))
                .or_else(|| host_name.map(str::to_string));
            let description =
                non_empty(cookie.get("description")).or_else(|| non_empty(cookie.get("Description")));
            records.push(ConsentRecord::declared(
                domain,
                CmpType::OneTrust,
                Some(name.to_string()),
                cookie_domain,
                category,
                description,
            ));
        }
    }

    if records.is_empty() {
        return Err("OneTrust domain data declares no cookies".to_string());
    }
    Ok(records)
}

/// Rendered `.ot-sdk-cookie` policy rows.
pub fn parse_onetrust_policy(domain: &str, html: &str) -> Vec<ConsentRecord> {
    let (Ok(row), Ok(name), Ok(category), Ok(description)) = (
        Selector::parse(".ot-sdk-cookie"),
        Selector::parse(".ot-sdk-cookie-policy-name"),
        Selector::parse(".ot-sdk-cookie-policy-category"),
        Selector::parse(".ot-sdk-cookie-policy-description"),
    ) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    document
        .select(&row)
        .filter_map(|element| {
            let cookie_name = select_text(element, &name)?;
            let declared =
                select_text(element, &category).unwrap_or_else(|| "Unknown".to_string());
            Some(ConsentRecord::declared(
                domain,
                CmpType::OneTrust,
                Some(cookie_name),
                element.value().attr("data-domain").map(str::to_string),
                &declared,
                select_text(element, &description),
            ))
        })
        .collect()
}

fn select_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

pub struct TermlyParser;

#[async_trait::async_trait]
impl ConsentParser for TermlyParser {
    fn cmp(&self) -> CmpType {
        CmpType::Termly
    }

    async fn extract(
        &self,
        session: &dyn BrowserSession,
        domain: &str,
    ) -> Result<Vec<ConsentRecord>, TaskError> {
        let cache = evaluate(session, TERMLY_SCRIPT).await?;
        parse_termly(domain, &cache).map_err(TaskError::ParseDegraded)
    }
}

/// Every nested object carrying `name` and `category` is a declared cookie.
pub fn parse_termly(domain: &str, cache: &Value) -> Result<Vec<ConsentRecord>, String> {
    if cache.is_null() {
        return Err("TERMLY_API_CACHE not present".to_string());
    }

    let mut records = Vec::new();
    let mut pending = vec![cache];
    while let Some(value) = pending.pop() {
        match value {
            Value::Object(map) => {
                let name = map.get("name").and_then(Value::as_str);
                let category = map.get("category").and_then(Value::as_str);
                if let (Some(name), Some(category)) = (name, category) {
                    records.push(ConsentRecord::declared(
                        domain,
                        CmpType::Termly,
                        Some(name.to_string()),
                        non_empty(map.get("domain")).or_else(|| non_empty(map.get("host"))),
                        category,
                        non_empty(map.get("description")),
                    ));
                }
                pending.extend(map.values());
            }
            Value::Array(items) => pending.extend(items),
            _ => {}
        }
    }

    if records.is_empty() {
        return Err("TERMLY_API_CACHE holds no cookie declarations".to_string());
    }
    Ok(records)
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
