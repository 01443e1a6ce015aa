//! Presence engine scenarios against local mock servers.
//!
//! Each fake domain gets its own mock server; the HTTP client resolves the
//! domain to that server, so outcomes are keyed by the real domain name.

use consent_core::{CmpType, CrawlSettings, FetchStatus, SignatureRule, SignatureTarget};
use consent_scanner::{
    BatchCoordinator, CrawlContext, EngineKind, OutcomeCategory, PresenceEngine, ResultStore,
    SignatureTable,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const COOKIEBOT_PAGE: &str = r#"<html><head>
<script id="Cookiebot" src="https://consent.cookiebot.com/uc.js" data-cbid="0000"></script>
</head><body>shop</body></html>"#;

/// A fake domain served by its own mock server.
struct Site {
    host: &'static str,
    server: MockServer,
}

impl Site {
    async fn new(host: &'static str, response: ResponseTemplate) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(response)
            .mount(&server)
            .await;
        Self { host, server }
    }

    fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.server.address().port())
    }
}

fn settings(timeout_secs: u64) -> CrawlSettings {
    CrawlSettings {
        connect_timeout_secs: timeout_secs,
        load_timeout_secs: timeout_secs,
        concurrency: 4,
        ..CrawlSettings::default()
    }
}

fn engine(
    settings: CrawlSettings,
    routes: &[(&str, SocketAddr)],
    signatures: SignatureTable,
    store: Arc<ResultStore>,
) -> PresenceEngine {
    let mut builder = PresenceEngine::client_builder(&settings);
    for (host, addr) in routes {
        builder = builder.resolve(host, *addr);
    }
    let client = builder.build().unwrap();
    PresenceEngine::with_client(client, settings, Arc::new(signatures), store)
}

fn onetrust_header_rule() -> SignatureTable {
    SignatureTable::with_rules(&[SignatureRule {
        cmp: CmpType::OneTrust,
        pattern: "onetrust-demo-tenant".to_string(),
        target: SignatureTarget::Headers,
    }])
    .unwrap()
}

fn lines(dir: &Path, category: OutcomeCategory) -> Vec<String> {
    std::fs::read_to_string(dir.join(category.file_name()))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// A port nothing listens on.
fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_classifies_by_body_and_header_signatures() {
    let cookiebot = Site::new(
        "cookiebot-demo.test",
        ResponseTemplate::new(200).set_body_string(COOKIEBOT_PAGE),
    )
    .await;
    let onetrust = Site::new(
        "onetrust-demo.test",
        ResponseTemplate::new(200)
            .insert_header("x-consent-provider", "onetrust-demo-tenant")
            .set_body_string("<html><body>news</body></html>"),
    )
    .await;
    let plain = Site::new(
        "plain.test",
        ResponseTemplate::new(200).set_body_string("<html><body>hello</body></html>"),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ResultStore::open(dir.path(), EngineKind::Presence).await.unwrap());
    let engine = engine(
        settings(10),
        &[
            (cookiebot.host, *cookiebot.server.address()),
            (onetrust.host, *onetrust.server.address()),
            (plain.host, *plain.server.address()),
        ],
        onetrust_header_rule(),
        Arc::clone(&store),
    );

    let coordinator =
        BatchCoordinator::new([cookiebot.url(), onetrust.url(), plain.url()], 1);
    let report = coordinator.run(&engine, &CrawlContext::new()).await.unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert!(report.outcomes.iter().all(|o| o.status == FetchStatus::Ok));

    let out = dir.path();
    assert_eq!(lines(out, OutcomeCategory::Cookiebot), vec!["cookiebot-demo.test"]);
    assert_eq!(lines(out, OutcomeCategory::OneTrust), vec!["onetrust-demo.test"]);
    assert_eq!(lines(out, OutcomeCategory::NoCmp), vec!["plain.test"]);
    for category in OutcomeCategory::ALL.into_iter().filter(|c| c.is_failure()) {
        assert!(lines(out, category).is_empty(), "{category} should be empty");
    }

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.uncrawled, 0);
    assert_eq!(report.summary.counts.get("cookiebot"), Some(&1));
}

#[tokio::test]
async fn test_unresponsive_domain_times_out() {
    let slow = Site::new(
        "slow.test",
        ResponseTemplate::new(200)
            .set_body_string(COOKIEBOT_PAGE)
            .set_delay(Duration::from_secs(5)),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ResultStore::open(dir.path(), EngineKind::Presence).await.unwrap());
    let engine = engine(
        settings(2),
        &[(slow.host, *slow.server.address())],
        SignatureTable::builtin(),
        Arc::clone(&store),
    );

    let report = BatchCoordinator::new([slow.url()], 1)
        .run(&engine, &CrawlContext::new())
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, FetchStatus::Timeout);
    assert_eq!(outcome.matched_cmp, None);
    assert!(outcome.http_status.is_none());
    assert!(outcome.duration < Duration::from_secs(5));

    assert_eq!(lines(dir.path(), OutcomeCategory::Timeout), vec!["slow.test"]);
    assert!(lines(dir.path(), OutcomeCategory::Cookiebot).is_empty());
}

#[tokio::test]
async fn test_failure_classification() {
    let refused = closed_port();
    let bot = Site::new(
        "bot.test",
        ResponseTemplate::new(403).set_body_string("<title>Just a moment...</title>"),
    )
    .await;
    let challenge = Site::new(
        "challenge.test",
        ResponseTemplate::new(200)
            .set_body_string(r#"<script src="/cdn-cgi/challenge-platform/h/g/orchestrate"></script>"#),
    )
    .await;
    let broken = Site::new("broken.test", ResponseTemplate::new(500)).await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ResultStore::open(dir.path(), EngineKind::Presence).await.unwrap());
    let engine = engine(
        settings(5),
        &[
            ("refused.test", refused),
            (bot.host, *bot.server.address()),
            (challenge.host, *challenge.server.address()),
            (broken.host, *broken.server.address()),
        ],
        SignatureTable::builtin(),
        Arc::clone(&store),
    );

    let domains = vec![
        format!("http://refused.test:{}/", refused.port()),
        bot.url(),
        challenge.url(),
        broken.url(),
        "not a domain".to_string(),
    ];
    let report = BatchCoordinator::new(&domains, 1)
        .run(&engine, &CrawlContext::new())
        .await
        .unwrap();

    let by_domain: HashMap<_, _> = report
        .outcomes
        .iter()
        .map(|o| (o.domain.as_str(), o))
        .collect();
    assert_eq!(by_domain["refused.test"].status, FetchStatus::ConnectionError);
    assert_eq!(by_domain["bot.test"].status, FetchStatus::BotBlocked);
    assert_eq!(by_domain["challenge.test"].status, FetchStatus::BotBlocked);
    assert_eq!(by_domain["broken.test"].status, FetchStatus::HttpError);
    assert_eq!(by_domain["broken.test"].http_status, Some(500));
    assert_eq!(by_domain["not a domain"].status, FetchStatus::ConnectionError);

    let out = dir.path();
    assert_eq!(lines(out, OutcomeCategory::ConnectionFailed).len(), 2);
    assert_eq!(lines(out, OutcomeCategory::BotBlocked).len(), 2);
    assert_eq!(lines(out, OutcomeCategory::HttpError), vec!["broken.test"]);
}

#[tokio::test]
async fn test_categories_partition_submitted_domains() {
    let mut sites = Vec::new();
    for (host, response) in [
        ("a.test", ResponseTemplate::new(200).set_body_string(COOKIEBOT_PAGE)),
        ("b.test", ResponseTemplate::new(200).set_body_string("plain")),
        ("c.test", ResponseTemplate::new(404)),
        ("d.test", ResponseTemplate::new(406)),
        (
            "e.test",
            ResponseTemplate::new(200)
                .set_body_string(r#"<script src="https://app.termly.io/embed.min.js"></script>"#),
        ),
    ] {
        sites.push(Site::new(host, response).await);
    }
    let refused = closed_port();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ResultStore::open(dir.path(), EngineKind::Presence).await.unwrap());
    let mut routes: Vec<_> = sites.iter().map(|s| (s.host, *s.server.address())).collect();
    routes.push(("f.test", refused));
    let engine = engine(settings(5), &routes, SignatureTable::builtin(), Arc::clone(&store))
        .with_concurrency(2);

    let mut domains: Vec<String> = sites.iter().map(Site::url).collect();
    domains.push(format!("http://f.test:{}/", refused.port()));
    domains.push(sites[0].url());
    domains.push(String::new());

    let coordinator = BatchCoordinator::new(&domains, 3);
    let report = coordinator.run(&engine, &CrawlContext::new()).await.unwrap();

    let submitted = coordinator.total();
    assert_eq!(submitted, 7);
    assert_eq!(report.outcomes.len(), submitted);
    assert_eq!(coordinator.progress().completed, submitted);

    let mut seen = HashMap::new();
    for category in OutcomeCategory::ALL {
        for domain in lines(dir.path(), category) {
            assert!(
                seen.insert(domain.clone(), category).is_none(),
                "{domain} appears in two category files"
            );
        }
    }
    assert_eq!(seen.len(), submitted);
    assert_eq!(seen["e.test"], OutcomeCategory::Termly);
    assert_eq!(seen["<empty>"], OutcomeCategory::ConnectionFailed);
}

#[tokio::test]
async fn test_rerun_appends_to_category_files() {
    let cookiebot = Site::new(
        "cookiebot-demo.test",
        ResponseTemplate::new(200).set_body_string(COOKIEBOT_PAGE),
    )
    .await;
    let plain = Site::new("plain.test", ResponseTemplate::new(200).set_body_string("hi")).await;
    let routes = [
        (cookiebot.host, *cookiebot.server.address()),
        (plain.host, *plain.server.address()),
    ];
    let domains = [cookiebot.url(), plain.url()];

    let dir = tempfile::tempdir().unwrap();
    let mut run_ids = Vec::new();
    for _ in 0..2 {
        let store = Arc::new(ResultStore::open(dir.path(), EngineKind::Presence).await.unwrap());
        let engine = engine(settings(5), &routes, SignatureTable::builtin(), Arc::clone(&store));
        let report = BatchCoordinator::new(&domains, 1)
            .run(&engine, &CrawlContext::new())
            .await
            .unwrap();
        run_ids.push(report.summary.run_id);
    }

    assert_eq!(lines(dir.path(), OutcomeCategory::Cookiebot).len(), 2);
    assert_eq!(lines(dir.path(), OutcomeCategory::NoCmp).len(), 2);
    assert_ne!(run_ids[0], run_ids[1]);

    let summaries = std::fs::read_to_string(dir.path().join(consent_scanner::SUMMARY_FILE)).unwrap();
    assert_eq!(summaries.lines().count(), 2);
}

#[tokio::test]
async fn test_cancelled_run_reports_uncrawled() {
    let site = Site::new("a.test", ResponseTemplate::new(200).set_body_string("hi")).await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ResultStore::open(dir.path(), EngineKind::Presence).await.unwrap());
    let engine = engine(
        settings(5),
        &[(site.host, *site.server.address())],
        SignatureTable::builtin(),
        Arc::clone(&store),
    );

    let ctx = CrawlContext::new();
    ctx.cancel();
    let report = BatchCoordinator::new([site.url(), "b.test".to_string()], 2)
        .run(&engine, &ctx)
        .await
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(report.summary.total, 0);
    assert_eq!(report.summary.uncrawled, 2);
    for category in OutcomeCategory::ALL {
        assert!(lines(dir.path(), category).is_empty());
    }
}

#[tokio::test]
async fn test_url_fallback_moves_past_unreachable_candidates() {
    let site = Site::new(
        "fallback.test",
        ResponseTemplate::new(200).set_body_string(COOKIEBOT_PAGE),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ResultStore::open(dir.path(), EngineKind::Presence).await.unwrap());
    let engine = engine(
        CrawlSettings {
            url_fallback: true,
            ..settings(5)
        },
        &[
            ("www.fallback.test", closed_port()),
            (site.host, *site.server.address()),
            ("www.unreachable.test", closed_port()),
            ("unreachable.test", closed_port()),
        ],
        SignatureTable::builtin(),
        Arc::clone(&store),
    );

    let report = BatchCoordinator::new(["fallback.test", "unreachable.test"], 1)
        .run(&engine, &CrawlContext::new())
        .await
        .unwrap();
    let outcomes: HashMap<_, _> = report
        .outcomes
        .iter()
        .map(|o| (o.domain.as_str(), o))
        .collect();

    // https://www. is refused and https:// fails the handshake; http:// answers
    let found = outcomes["fallback.test"];
    assert_eq!(found.status, FetchStatus::Ok);
    assert_eq!(found.matched_cmp, Some(CmpType::Cookiebot));
    assert!(found
        .final_url
        .as_deref()
        .is_some_and(|u| u.starts_with("http://fallback.test")));

    assert_eq!(outcomes["unreachable.test"].status, FetchStatus::ConnectionError);
    assert_eq!(lines(dir.path(), OutcomeCategory::Cookiebot), vec!["fallback.test"]);
}
