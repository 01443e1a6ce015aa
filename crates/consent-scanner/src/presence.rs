//! Presence engine.
//!
//! One plain HTTP fetch per domain, classified by the signature table. The
//! engine never retries: a failed fetch is terminal for that domain in this
//! run. Outcomes are handed to the result store as each fetch completes.

use crate::batch::{CrawlContext, Engine};
use crate::error::{Result, ScanError};
use crate::signature::SignatureTable;
use crate::store::ResultStore;
use consent_core::{CmpType, CrawlSettings, DomainTask, FetchOutcome, FetchStatus, TaskError};
use futures::stream::{self, BoxStream, StreamExt};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Status codes served by bot challenge pages.
const BOT_STATUSES: [u16; 2] = [403, 406];

/// Leading characters of the body kept on the outcome.
const SNIPPET_CHARS: usize = 256;

/// Maximum redirects followed per fetch.
const MAX_REDIRECTS: usize = 10;

static BOT_CHALLENGE: Lazy<Option<Regex>> = Lazy::new(|| {
    RegexBuilder::new(
        r"cf-browser-verification|challenge-platform|just a moment\.\.\.|_incapsula_resource|px-captcha|captcha-delivery\.com",
    )
    .case_insensitive(true)
    .build()
    .ok()
});

struct FetchedPage {
    final_url: String,
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

/// Classifies domains by CMP using lightweight fetches.
pub struct PresenceEngine {
    client: reqwest::Client,
    settings: CrawlSettings,
    signatures: Arc<SignatureTable>,
    store: Arc<ResultStore>,
    concurrency: usize,
}

impl PresenceEngine {
    pub fn new(
        settings: CrawlSettings,
        signatures: Arc<SignatureTable>,
        store: Arc<ResultStore>,
    ) -> Result<Self> {
        let client = Self::client_builder(&settings)
            .build()
            .map_err(|e| ScanError::HttpClient(e.to_string()))?;
        Ok(Self::with_client(client, settings, signatures, store))
    }

    /// Use a pre-built client.
    pub fn with_client(
        client: reqwest::Client,
        settings: CrawlSettings,
        signatures: Arc<SignatureTable>,
        store: Arc<ResultStore>,
    ) -> Self {
        let concurrency = settings.effective_concurrency();
        Self {
            client,
            settings,
            signatures,
            store,
            concurrency,
        }
    }

    /// Client builder carrying the configured timeouts and user agent.
    pub fn client_builder(settings: &CrawlSettings) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.load_timeout())
            .user_agent(settings.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch and classify one domain.
    ///
    /// With URL fallback enabled the next candidate URL is only tried after a
    /// connection error or timeout; any response is terminal.
    pub async fn fetch(&self, task: &DomainTask) -> FetchOutcome {
        let candidates = task.url_candidates(self.settings.url_fallback);
        self.fetch_first(&task.domain, &candidates).await
    }

    async fn fetch_first(&self, domain: &str, candidates: &[String]) -> FetchOutcome {
        let started = Instant::now();
        let mut outcome =
            FetchOutcome::failed(domain, FetchStatus::ConnectionError, "no URL to fetch");

        for url in candidates {
            match self.fetch_url(url).await {
                Ok(page) => {
                    outcome = self.classify_page(domain, page);
                    break;
                }
                Err(err) => {
                    tracing::debug!("{} failed: {}", url, err);
                    outcome = FetchOutcome::failed(domain, err.fetch_status(), err.to_string());
                }
            }
        }

        outcome.duration = started.elapsed();
        outcome
    }

    async fn fetch_url(&self, url: &str) -> std::result::Result<FetchedPage, TaskError> {
        let response = self.client.get(url).send().await.map_err(network_error)?;

        let final_url = response.url().to_string();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(network_error)?.to_vec();

        Ok(FetchedPage {
            final_url,
            status,
            headers,
            body,
        })
    }

    fn classify_page(&self, domain: &str, page: FetchedPage) -> FetchOutcome {
        let verdict: std::result::Result<Option<CmpType>, TaskError> =
            if BOT_STATUSES.contains(&page.status) || is_bot_challenge(&page.body) {
                Err(TaskError::BotBlocked(format!("status {}", page.status)))
            } else if !(200..400).contains(&page.status) {
                Err(TaskError::HttpError { status: page.status })
            } else {
                Ok(self
                    .signatures
                    .classify(&page.final_url, &page.headers, &page.body))
            };

        let (status, matched_cmp, error) = match verdict {
            Ok(cmp) => (FetchStatus::Ok, cmp, None),
            Err(e) => (e.fetch_status(), None, Some(e.to_string())),
        };

        FetchOutcome {
            domain: domain.to_string(),
            response_snippet: snippet(&page.body),
            final_url: Some(page.final_url),
            status,
            http_status: Some(page.status),
            matched_cmp,
            error,
            duration: Duration::ZERO,
        }
    }

    async fn visit(&self, task: DomainTask, ctx: &CrawlContext) -> FetchOutcome {
        let _claim = ctx.registry.claim(&task.domain).await;
        let outcome = self.fetch(&task).await;
        tracing::debug!("{} -> {:?} {:?}", task.domain, outcome.status, outcome.matched_cmp);
        self.persist(&outcome).await;
        outcome
    }

    async fn reject(&self, task: DomainTask) -> FetchOutcome {
        let outcome = FetchOutcome::failed(
            task.display_name(),
            FetchStatus::ConnectionError,
            format!("invalid domain or URL: {:?}", task.raw_domain),
        );
        self.persist(&outcome).await;
        outcome
    }

    async fn persist(&self, outcome: &FetchOutcome) {
        if let Err(e) = self.store.record_fetch(outcome).await {
            tracing::error!("Failed to record outcome for {}: {}", outcome.domain, e);
        }
    }
}

impl Engine for PresenceEngine {
    type Outcome = FetchOutcome;

    fn crawl<'a>(
        &'a self,
        tasks: Vec<DomainTask>,
        ctx: &'a CrawlContext,
    ) -> BoxStream<'a, FetchOutcome> {
        let (degenerate, valid): (Vec<_>, Vec<_>) =
            tasks.into_iter().partition(DomainTask::is_degenerate);

        // Invalid input is classified without taking a worker slot
        let rejected = stream::iter(degenerate)
            .take_until(ctx.cancel.cancelled())
            .then(move |task| self.reject(task));

        let fetched = stream::iter(valid)
            .take_until(ctx.cancel.cancelled())
            .map(move |task| self.visit(task, ctx))
            .buffer_unordered(self.concurrency);

        rejected.chain(fetched).boxed()
    }

    fn store(&self) -> &ResultStore {
        &self.store
    }
}

fn network_error(err: reqwest::Error) -> TaskError {
    if err.is_timeout() {
        TaskError::TimeoutError(err.to_string())
    } else {
        TaskError::ConnectionError(err.to_string())
    }
}

fn is_bot_challenge(body: &[u8]) -> bool {
    BOT_CHALLENGE
        .as_ref()
        .is_some_and(|re| re.is_match(&String::from_utf8_lossy(body)))
}

fn snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body).chars().take(SNIPPET_CHARS).collect()
}
