//! Consent Crawl command line shell.
//!
//! Thin entry point: loads configuration, reads the domain list and hands it
//! to one of the engines in `consent-scanner`. Crawl logic lives in the crates.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use consent_browser::{ChromiumLauncher, SessionConfig, SessionManager};
use consent_core::{AppConfig, BrowserProfile};
use consent_scanner::{
    BatchCoordinator, ConsentEngine, CrawlContext, EngineKind, PresenceEngine, ResultStore,
    RunSummary, SignatureTable,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "consent-crawl",
    about = "Detect consent management platforms and collect declared consent",
    version
)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Override the output directory
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,

    /// Number of batches the domain list is split into
    #[arg(long, global = true)]
    batches: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify domains by CMP with plain HTTP fetches
    Presence {
        /// Domain list, one domain or URL per line
        #[arg(long)]
        domains: PathBuf,
        /// Concurrent fetches (0 scales with CPUs)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Visit domains in a browser and record cookies and consent declarations
    Consent {
        /// Domain list, one domain or URL per line
        #[arg(long)]
        domains: PathBuf,
        /// Concurrent browser sessions
        #[arg(long)]
        sessions: Option<usize>,
        /// Consent profile: accept_all, accept_none or default
        #[arg(long, value_parser = parse_profile)]
        profile: Option<BrowserProfile>,
        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },
}

/// Initialize tracing subscriber for logging
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,consent=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn parse_profile(value: &str) -> std::result::Result<BrowserProfile, String> {
    match value.to_lowercase().replace('-', "_").as_str() {
        "accept_all" => Ok(BrowserProfile::AcceptAll),
        "accept_none" => Ok(BrowserProfile::AcceptNone),
        "default" => Ok(BrowserProfile::Default),
        other => Err(format!(
            "unknown profile '{other}' (expected accept_all, accept_none or default)"
        )),
    }
}

/// One domain or URL per line; blank lines and `#` comments are skipped.
fn read_domains(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading domain list {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(output) = &cli.output {
        config.crawl.output_directory.clone_from(output);
    }
    if let Some(batches) = cli.batches {
        config.crawl.batches = batches;
    }
    match &cli.command {
        Commands::Presence { concurrency, .. } => {
            if let Some(concurrency) = concurrency {
                config.crawl.concurrency = *concurrency;
            }
        }
        Commands::Consent {
            sessions,
            profile,
            headed,
            ..
        } => {
            if let Some(sessions) = sessions {
                config.browser.num_sessions = *sessions;
            }
            if let Some(profile) = profile {
                config.browser.profile = *profile;
            }
            if *headed {
                config.browser.headless = false;
            }
        }
    }
}

async fn run_presence(
    config: &AppConfig,
    signatures: Arc<SignatureTable>,
    coordinator: &BatchCoordinator,
    ctx: &CrawlContext,
) -> Result<RunSummary> {
    let store = Arc::new(
        ResultStore::open(&config.crawl.output_directory, EngineKind::Presence).await?,
    );
    let engine = PresenceEngine::new(config.crawl.clone(), signatures, store)?;
    info!(
        "Presence crawl of {} domains with {} workers",
        coordinator.total(),
        engine.concurrency()
    );

    let report = coordinator.run(&engine, ctx).await?;
    Ok(report.summary)
}

async fn run_consent(
    config: &AppConfig,
    signatures: Arc<SignatureTable>,
    coordinator: &BatchCoordinator,
    ctx: &CrawlContext,
) -> Result<RunSummary> {
    let store = Arc::new(
        ResultStore::open(&config.crawl.output_directory, EngineKind::Consent).await?,
    );
    let session_config = SessionConfig::from_settings(&config.browser, config.crawl.connect_timeout())
        .with_user_agent(config.crawl.user_agent.clone());
    let sessions = Arc::new(SessionManager::new(
        Arc::new(ChromiumLauncher::new()),
        session_config,
        config.browser.num_sessions,
    ));
    sessions
        .warm_up()
        .await
        .context("launching browser sessions")?;

    let engine = ConsentEngine::new(sessions, signatures, store, &config.browser);
    info!(
        "Consent crawl of {} domains with {} sessions ({} profile)",
        coordinator.total(),
        config.browser.num_sessions,
        config.browser.profile.as_str()
    );

    let report = coordinator.run(&engine, ctx).await;
    engine.shutdown().await;
    Ok(report?.summary)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    info!("Starting consent-crawl v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load_with_env(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    let signatures = Arc::new(SignatureTable::with_rules(&config.signatures.extra)?);

    let domains_path = match &cli.command {
        Commands::Presence { domains, .. } | Commands::Consent { domains, .. } => domains,
    };
    let domains = read_domains(domains_path)?;
    if domains.is_empty() {
        bail!("no domains in {}", domains_path.display());
    }
    let coordinator = BatchCoordinator::new(domains, config.crawl.batches);

    let ctx = CrawlContext::new();
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight tasks");
                ctx.cancel();
            }
        });
    }

    let summary = match cli.command {
        Commands::Presence { .. } => run_presence(&config, signatures, &coordinator, &ctx).await?,
        Commands::Consent { .. } => run_consent(&config, signatures, &coordinator, &ctx).await?,
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
