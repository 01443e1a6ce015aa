//! CMP signature matching.
//!
//! A response is attributed to a CMP when one of that CMP's patterns matches
//! the body or a header value. Patterns are checked in CMP priority order
//! (Cookiebot, OneTrust, Termly) and in declaration order within a CMP; the
//! first hit wins.

use crate::error::{Result, ScanError};
use consent_core::{CmpType, SignatureRule, SignatureTarget};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Built-in patterns, case-insensitive.
const BUILTIN_PATTERNS: &[(CmpType, &str)] = &[
    (CmpType::Cookiebot, r"https://consent\.cookiebot\.(com|eu)/"),
    (CmpType::Cookiebot, r"cb-main\.js"),
    (CmpType::OneTrust, r"cdn-apac\.onetrust\.com"),
    (CmpType::OneTrust, r"cdn-ukwest\.onetrust\.com"),
    (CmpType::OneTrust, r"cmp-cdn\.cookielaw\.org"),
    (CmpType::OneTrust, r"cdn\.cookielaw\.org"),
    (CmpType::OneTrust, r"optanon\.blob\.core\.windows\.net"),
    (CmpType::OneTrust, r"cookie-cdn\.cookiepro\.com"),
    (CmpType::OneTrust, r"cookiepro\.blob\.core\.windows\.net"),
    (CmpType::Termly, r"https://app\.termly\.io/"),
];

static BUILTIN_SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    BUILTIN_PATTERNS
        .iter()
        .filter_map(|(cmp, pattern)| Signature::new(*cmp, pattern, SignatureTarget::Any).ok())
        .collect()
});

/// A compiled pattern attributed to one CMP.
#[derive(Debug, Clone)]
pub struct Signature {
    cmp: CmpType,
    regex: Regex,
    target: SignatureTarget,
}

impl Signature {
    pub fn new(cmp: CmpType, pattern: &str, target: SignatureTarget) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ScanError::InvalidSignature {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { cmp, regex, target })
    }

    pub fn cmp(&self) -> CmpType {
        self.cmp
    }

    fn matches(&self, headers: &[(String, String)], body: &str) -> bool {
        let in_body = || self.regex.is_match(body);
        let in_headers = || headers.iter().any(|(_, value)| self.regex.is_match(value));
        match self.target {
            SignatureTarget::Body => in_body(),
            SignatureTarget::Headers => in_headers(),
            SignatureTarget::Any => in_body() || in_headers(),
        }
    }
}

/// Ordered signature table, shared read-only by every worker of a run.
#[derive(Debug, Clone)]
pub struct SignatureTable {
    signatures: Vec<Signature>,
}

impl SignatureTable {
    /// The built-in table.
    pub fn builtin() -> Self {
        Self {
            signatures: BUILTIN_SIGNATURES.clone(),
        }
    }

    /// Built-ins followed by user rules.
    pub fn with_rules(rules: &[SignatureRule]) -> Result<Self> {
        let mut signatures = BUILTIN_SIGNATURES.clone();
        signatures.extend(compile(rules)?);
        Ok(Self::ordered(signatures))
    }

    /// Only the given rules, without built-ins.
    pub fn from_rules(rules: &[SignatureRule]) -> Result<Self> {
        Ok(Self::ordered(compile(rules)?))
    }

    fn ordered(mut signatures: Vec<Signature>) -> Self {
        // Stable: declaration order survives within a CMP
        signatures.sort_by_key(|s| s.cmp.code());
        Self { signatures }
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Attribute a response to a CMP.
    ///
    /// Pure and deterministic. Non-UTF-8 bodies are matched lossily, so binary
    /// content simply fails to match.
    pub fn classify(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Option<CmpType> {
        let body = String::from_utf8_lossy(body);
        let matched = self
            .signatures
            .iter()
            .find(|s| s.matches(headers, &body))
            .map(Signature::cmp);

        if let Some(cmp) = matched {
            tracing::trace!("{} matched {}", url, cmp);
        }
        matched
    }
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn compile(rules: &[SignatureRule]) -> Result<Vec<Signature>> {
    rules
        .iter()
        .map(|rule| Signature::new(rule.cmp, &rule.pattern, rule.target))
        .collect()
}
