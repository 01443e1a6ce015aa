//! Result store shared by the workers of one run.
//!
//! Presence outcomes go to the categorized line files; consent results go to the
//! SQLite database in the same output directory. Both are written as each task
//! completes, so an aborted run keeps everything recorded up to that point.

use crate::error::{Result, ScanError};
use crate::sink::{CategorizedSink, OutcomeCategory};
use chrono::{DateTime, Utc};
use consent_core::{ConsentRecord, CookieRecord, CrawlResult, FetchOutcome};
use consent_db::{CrawlRun, Database, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokio::io::AsyncWriteExt;

/// Database file shared by every run in an output directory.
pub const DATABASE_FILE: &str = "consent_crawl.sqlite";

/// Run summaries, one JSON object per line.
pub const SUMMARY_FILE: &str = "crawl_summary.jsonl";

/// Which engine a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Presence,
    Consent,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Presence => "presence",
            Self::Consent => "consent",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate record of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub engine: EngineKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Domains that reached a terminal outcome
    pub total: u32,
    /// Outcomes per category (presence) or status (consent)
    pub counts: BTreeMap<String, u32>,
    /// Domains never issued because the run was cancelled
    pub uncrawled: u32,
    pub elapsed_secs: f64,
}

/// Durable sink for one run.
pub struct ResultStore {
    dir: PathBuf,
    engine: EngineKind,
    sink: CategorizedSink,
    db: Database,
    run: CrawlRun,
    started: Instant,
    expected: AtomicU32,
    recorded: AtomicU32,
    counts: Mutex<BTreeMap<String, u32>>,
}

impl ResultStore {
    /// Open the output directory for a new run.
    ///
    /// Creates the directory, every category file and the database. Failing
    /// here is run-fatal: no task has executed yet.
    pub async fn open(dir: &Path, engine: EngineKind) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ScanError::OutputDirectory {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })?;

        let sink = CategorizedSink::open(dir).await?;
        let db = Database::open(dir.join(DATABASE_FILE)).await?;
        let run = db.create_run(engine.as_str(), 0).await?;

        let counts = match engine {
            EngineKind::Presence => OutcomeCategory::ALL
                .iter()
                .map(|c| (c.as_str().to_string(), 0))
                .collect(),
            EngineKind::Consent => BTreeMap::new(),
        };

        tracing::info!("Run {} ({}) writing to {}", run.id, engine, dir.display());

        Ok(Self {
            dir: dir.to_path_buf(),
            engine,
            sink,
            db,
            run,
            started: Instant::now(),
            expected: AtomicU32::new(0),
            recorded: AtomicU32::new(0),
            counts: Mutex::new(counts),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run.id
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn sink(&self) -> &CategorizedSink {
        &self.sink
    }

    pub fn output_dir(&self) -> &Path {
        &self.dir
    }

    /// Add to the number of domains submitted to this run.
    pub fn expect_domains(&self, count: u32) {
        self.expected.fetch_add(count, Ordering::SeqCst);
    }

    /// Domains recorded so far.
    pub fn recorded(&self) -> u32 {
        self.recorded.load(Ordering::SeqCst)
    }

    /// Append a presence outcome to its category file.
    pub async fn record_fetch(&self, outcome: &FetchOutcome) -> Result<()> {
        let category = OutcomeCategory::from_outcome(outcome);
        self.sink.append(category, &outcome.domain).await?;
        self.count(category.as_str());
        Ok(())
    }

    /// Persist a consent result with its cookies and consent records.
    ///
    /// Returns the crawl id once the transaction has committed.
    pub async fn record_crawl(
        &self,
        result: &CrawlResult,
        cookies: &[CookieRecord],
        consent: &[ConsentRecord],
    ) -> Result<i64> {
        let crawl_id = self
            .db
            .record_crawl(&self.run.id, result, cookies, consent)
            .await?;
        self.count(result.status.as_str());
        Ok(crawl_id)
    }

    /// Close the run: write the summary line and mark the run finished.
    pub async fn finalize(&self) -> Result<RunSummary> {
        let total = self.recorded();
        let submitted = self.expected.load(Ordering::SeqCst).max(total);
        let uncrawled = submitted - total;
        let summary = RunSummary {
            run_id: self.run.id.clone(),
            engine: self.engine,
            started_at: self.run.started_at,
            finished_at: Utc::now(),
            total,
            counts: self.counts().clone(),
            uncrawled,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        };

        let mut line = serde_json::to_string(&summary)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(SUMMARY_FILE))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        let status = if uncrawled > 0 {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        self.db
            .complete_run(&self.run.id, status, submitted, total, uncrawled)
            .await?;

        tracing::info!(
            "Run {} finished: {} recorded, {} uncrawled in {:.1}s",
            summary.run_id,
            summary.total,
            summary.uncrawled,
            summary.elapsed_secs
        );
        Ok(summary)
    }

    fn count(&self, key: &str) {
        *self.counts().entry(key.to_string()).or_insert(0) += 1;
        self.recorded.fetch_add(1, Ordering::SeqCst);
    }

    fn counts(&self) -> MutexGuard<'_, BTreeMap<String, u32>> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consent_core::{CmpType, ConsentStatus, CrawlStatus, FetchStatus};
    use std::time::Duration;

    #[tokio::test]
    async fn test_open_fails_on_unwritable_location() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();

        let result = ResultStore::open(&file.join("out"), EngineKind::Presence).await;
        assert!(matches!(result, Err(ScanError::OutputDirectory { .. })));
    }

    #[tokio::test]
    async fn test_presence_summary_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path(), EngineKind::Presence)
            .await
            .unwrap();
        store.expect_domains(3);

        let mut ok = FetchOutcome::failed("a.test", FetchStatus::Ok, "");
        ok.error = None;
        ok.matched_cmp = Some(CmpType::Cookiebot);
        store.record_fetch(&ok).await.unwrap();
        store
            .record_fetch(&FetchOutcome::failed("b.test", FetchStatus::Timeout, "elapsed"))
            .await
            .unwrap();

        let summary = store.finalize().await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.uncrawled, 1);
        assert_eq!(summary.counts.get("cookiebot"), Some(&1));
        assert_eq!(summary.counts.get("timeout"), Some(&1));
        assert_eq!(summary.counts.get("nocmp"), Some(&0));

        let lines = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        let parsed: RunSummary = serde_json::from_str(lines.trim()).unwrap();
        assert_eq!(parsed.run_id, summary.run_id);
        assert_eq!(parsed.engine, EngineKind::Presence);

        let run = store
            .database()
            .get_run(store.run_id())
            .await
            .unwrap()
            .expect("run row");
        assert_eq!(run.total_domains, 3);
        assert_eq!(run.completed_domains, 2);
        assert_eq!(run.uncrawled_domains, 1);
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_record_crawl_returns_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path(), EngineKind::Consent)
            .await
            .unwrap();

        let result = CrawlResult {
            domain: "a.test".to_string(),
            url: "https://a.test/".to_string(),
            status: CrawlStatus::Success,
            cmp_type: None,
            cookies_collected_count: 0,
            consent_status: ConsentStatus::NotApplicable,
            duration: Duration::from_millis(5),
            error_message: None,
        };
        let first = store.record_crawl(&result, &[], &[]).await.unwrap();
        let second = store.record_crawl(&result, &[], &[]).await.unwrap();
        assert!(second > first);

        let summary = store.finalize().await.unwrap();
        assert_eq!(summary.counts.get("success"), Some(&2));
        assert_eq!(summary.uncrawled, 0);
    }
}
