//! Consent engine.
//!
//! Drives one pooled browser session per domain: navigate, let the banner
//! render, attribute the page to a CMP and parse what that CMP declares, apply
//! the profile's consent choice to the banner, then read every cookie. Each issued task is persisted exactly once and its session is
//! returned to the pool on every exit path.

use crate::banner;
use crate::batch::{CrawlContext, Engine};
use crate::parsers::{parser_for, probe_markers};
use crate::signature::SignatureTable;
use crate::store::ResultStore;
use consent_browser::{BrowserCookie, BrowserError, BrowserSession, SessionHealth, SessionManager};
use consent_core::{
    BrowserProfile, BrowserSettings, CmpType, ConsentRecord, ConsentStatus, CookieRecord, CrawlResult, CrawlStatus,
    DomainTask,
};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a single visit produced, before it is stamped with duration and URL.
#[derive(Debug)]
struct Visit {
    status: CrawlStatus,
    cmp_type: Option<CmpType>,
    cookies: Vec<CookieRecord>,
    consent: Vec<ConsentRecord>,
    consent_status: ConsentStatus,
    error: Option<String>,
}

impl Visit {
    fn failed(status: CrawlStatus, error: impl ToString) -> Self {
        Self {
            status,
            cmp_type: None,
            cookies: Vec::new(),
            consent: Vec::new(),
            consent_status: ConsentStatus::NotApplicable,
            error: Some(error.to_string()),
        }
    }
}

/// Browser-driven cookie and consent collection.
pub struct ConsentEngine {
    sessions: Arc<SessionManager>,
    signatures: Arc<SignatureTable>,
    store: Arc<ResultStore>,
    profile: BrowserProfile,
    page_load_timeout: Duration,
    settle_delay: Duration,
    cancel_grace: Duration,
}

impl ConsentEngine {
    pub fn new(
        sessions: Arc<SessionManager>,
        signatures: Arc<SignatureTable>,
        store: Arc<ResultStore>,
        settings: &BrowserSettings,
    ) -> Self {
        Self {
            sessions,
            signatures,
            store,
            profile: settings.profile,
            page_load_timeout: settings.page_load_timeout(),
            settle_delay: settings.settle_delay(),
            cancel_grace: settings.cancel_grace(),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Close idle sessions once the run is over.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }

    /// Crawl one domain: `None` when cancellation fired before a session was acquired.
    async fn run_task(&self, task: DomainTask, ctx: &CrawlContext) -> Option<CrawlResult> {
        let url = task.normalized_url.clone()?;

        let _claim = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return None,
            claim = ctx.registry.claim(&task.domain) => claim,
        };

        let acquired = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                tracing::debug!("{} not issued, run cancelled", task.domain);
                return None;
            }
            lease = self.sessions.acquire() => lease,
        };

        let mut lease = match acquired {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!("No browser session for {}: {}", task.domain, e);
                let visit = Visit::failed(CrawlStatus::BrowserCrash, e);
                return Some(self.persist(&task.domain, url, visit, Duration::ZERO).await);
            }
        };
        tracing::debug!("{} acquired session {}", task.domain, lease.id());

        let started = Instant::now();
        let (visit, health) = {
            let visit = self.visit(lease.session_mut(), &task.domain, &url);
            tokio::pin!(visit);
            tokio::select! {
                done = &mut visit => done,
                () = ctx.cancel.cancelled() => {
                    match tokio::time::timeout(self.cancel_grace, &mut visit).await {
                        Ok(done) => done,
                        Err(_) => {
                            tracing::warn!("{} still navigating after cancel grace, force-releasing", task.domain);
                            (
                                Visit::failed(CrawlStatus::BrowserCrash, "session force-released on cancellation"),
                                SessionHealth::Crashed,
                            )
                        }
                    }
                }
            }
        };
        let elapsed = started.elapsed();

        let result = self.persist(&task.domain, url, visit, elapsed).await;
        self.sessions.release(lease, health).await;
        Some(result)
    }

    async fn visit(
        &self,
        session: &mut dyn BrowserSession,
        domain: &str,
        url: &str,
    ) -> (Visit, SessionHealth) {
        let settled = match session.navigate(url, self.page_load_timeout).await {
            Ok(()) => {
                tokio::time::sleep(self.settle_delay).await;
                true
            }
            Err(BrowserError::Timeout(e)) => {
                tracing::debug!("{} did not settle: {}", domain, e);
                false
            }
            Err(e) if e.is_crash() || !session.is_alive() => {
                tracing::warn!("Browser crashed on {}: {}", domain, e);
                return (Visit::failed(CrawlStatus::BrowserCrash, e), SessionHealth::Crashed);
            }
            Err(e) => {
                tracing::warn!("Navigation to {} failed: {}", url, e);
                return (Visit::failed(CrawlStatus::NavigationError, e), SessionHealth::Healthy);
            }
        };

        if !settled {
            let cookies = match self.read_cookies(session, domain, true).await {
                Ok(cookies) => cookies,
                Err(visit) => return (visit, SessionHealth::Crashed),
            };
            let visit = Visit {
                cookies,
                ..Visit::failed(
                    CrawlStatus::Timeout,
                    format!("page load exceeded {}s", self.page_load_timeout.as_secs()),
                )
            };
            return (visit, SessionHealth::Healthy);
        }

        let session: &dyn BrowserSession = session;
        let cmp_type = self.classify(session, url).await;
        let (consent, consent_status, error) = match cmp_type {
            None => (Vec::new(), ConsentStatus::NotApplicable, None),
            Some(cmp) => match parser_for(cmp).extract(session, domain).await {
                Ok(records) => (records, ConsentStatus::Declared, None),
                Err(e) => {
                    tracing::warn!("{} consent metadata on {} degraded: {}", cmp, domain, e);
                    (Vec::new(), ConsentStatus::Degraded, Some(e.to_string()))
                }
            },
        };

        match banner::respond(session, self.profile).await {
            Ok(Some(selector)) => {
                tracing::debug!("{} banner answered via {}", domain, selector);
                tokio::time::sleep(self.settle_delay).await;
            }
            Ok(None) => {}
            Err(e) if e.is_crash() => {
                tracing::warn!("Browser crashed answering banner on {}: {}", domain, e);
                return (Visit::failed(CrawlStatus::BrowserCrash, e), SessionHealth::Crashed);
            }
            Err(e) => tracing::debug!("No banner interaction on {}: {}", domain, e),
        }

        let cookies = match self.read_cookies(session, domain, false).await {
            Ok(cookies) => cookies,
            Err(visit) => return (visit, SessionHealth::Crashed),
        };

        let visit = Visit {
            status: CrawlStatus::Success,
            cmp_type,
            cookies,
            consent,
            consent_status,
            error,
        };
        (visit, SessionHealth::Healthy)
    }

    /// Every cookie in the session; a crash ends the visit.
    async fn read_cookies(
        &self,
        session: &dyn BrowserSession,
        domain: &str,
        partial: bool,
    ) -> Result<Vec<CookieRecord>, Visit> {
        match session.cookies().await {
            Ok(cookies) => Ok(cookies
                .into_iter()
                .map(|cookie| observed(domain, cookie, partial))
                .collect()),
            Err(e) if e.is_crash() => {
                tracing::warn!("Browser crashed reading cookies on {}: {}", domain, e);
                Err(Visit::failed(CrawlStatus::BrowserCrash, e))
            }
            Err(e) => {
                tracing::warn!("Could not read cookies on {}: {}", domain, e);
                Ok(Vec::new())
            }
        }
    }

    /// Signature match on the rendered page, then library markers.
    async fn classify(&self, session: &dyn BrowserSession, url: &str) -> Option<CmpType> {
        match session.page_source().await {
            Ok(html) => {
                if let Some(cmp) = self.signatures.classify(url, &[], html.as_bytes()) {
                    return Some(cmp);
                }
            }
            Err(e) => tracing::debug!("No page source for {}: {}", url, e),
        }
        probe_markers(session).await
    }

    async fn reject(&self, task: DomainTask) -> CrawlResult {
        let visit = Visit::failed(
            CrawlStatus::NavigationError,
            format!("invalid domain or URL: {:?}", task.raw_domain),
        );
        self.persist(task.display_name(), task.raw_domain.clone(), visit, Duration::ZERO)
            .await
    }

    async fn persist(&self, domain: &str, url: String, visit: Visit, duration: Duration) -> CrawlResult {
        let result = CrawlResult {
            domain: domain.to_string(),
            url,
            status: visit.status,
            cmp_type: visit.cmp_type,
            cookies_collected_count: visit.cookies.len(),
            consent_status: visit.consent_status,
            duration,
            error_message: visit.error,
        };

        match self
            .store
            .record_crawl(&result, &visit.cookies, &visit.consent)
            .await
        {
            Ok(crawl_id) => tracing::debug!(
                "{} persisted as crawl {} ({}, {} cookies, {} declared)",
                domain,
                crawl_id,
                result.status,
                visit.cookies.len(),
                visit.consent.len()
            ),
            Err(e) => tracing::error!("Failed to record crawl for {}: {}", domain, e),
        }
        result
    }
}

impl Engine for ConsentEngine {
    type Outcome = CrawlResult;

    fn crawl<'a>(
        &'a self,
        tasks: Vec<DomainTask>,
        ctx: &'a CrawlContext,
    ) -> BoxStream<'a, CrawlResult> {
        let (degenerate, valid): (Vec<_>, Vec<_>) =
            tasks.into_iter().partition(DomainTask::is_degenerate);

        let rejected = stream::iter(degenerate)
            .take_until(ctx.cancel.cancelled())
            .then(move |task| self.reject(task));

        // The session pool is the admission valve; this only bounds queued tasks
        let width = self.sessions.capacity() * 2;
        let crawled = stream::iter(valid)
            .take_until(ctx.cancel.cancelled())
            .map(move |task| self.run_task(task, ctx))
            .buffer_unordered(width)
            .filter_map(future::ready);

        rejected.chain(crawled).boxed()
    }

    fn store(&self) -> &ResultStore {
        &self.store
    }
}

fn observed(domain: &str, cookie: BrowserCookie, partial: bool) -> CookieRecord {
    CookieRecord {
        domain: domain.to_string(),
        cookie_domain: cookie.domain,
        name: cookie.name,
        value: cookie.value,
        path: cookie.path,
        expiry: cookie.expires,
        secure: cookie.secure,
        http_only: cookie.http_only,
        same_site: cookie.same_site,
        partial,
    }
}
