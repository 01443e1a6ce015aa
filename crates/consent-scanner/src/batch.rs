//! Batch coordination.
//!
//! Splits the input into ordered batches, feeds each batch to the active
//! engine and tracks progress. Outcomes come back in completion order; batch
//! boundaries only matter for progress reporting.

use crate::error::Result;
use crate::registry::DomainRegistry;
use crate::store::{ResultStore, RunSummary};
use consent_core::DomainTask;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Completions between progress log lines.
const PROGRESS_INTERVAL: usize = 50;

/// Run-scoped state shared by the engines.
#[derive(Debug, Clone, Default)]
pub struct CrawlContext {
    pub cancel: CancellationToken,
    pub registry: DomainRegistry,
}

impl CrawlContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a registry with another engine's context.
    #[must_use]
    pub fn with_registry(registry: DomainRegistry) -> Self {
        Self {
            cancel: CancellationToken::new(),
            registry,
        }
    }

    /// Stop issuing new tasks. In-flight tasks still reach a terminal record.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A crawl engine the coordinator can drive.
pub trait Engine: Send + Sync {
    /// Terminal record produced per domain
    type Outcome: Send;

    /// Crawl one batch. Every task that is issued yields exactly one outcome,
    /// already persisted when it is yielded.
    fn crawl<'a>(
        &'a self,
        tasks: Vec<DomainTask>,
        ctx: &'a CrawlContext,
    ) -> BoxStream<'a, Self::Outcome>;

    /// Store the engine records into.
    fn store(&self) -> &ResultStore;
}

/// Point-in-time progress of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    /// 1-based; 0 before the first batch starts
    pub current_batch: usize,
    pub batches: usize,
}

/// Outcomes of a run plus its summary.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub outcomes: Vec<T>,
    pub summary: RunSummary,
}

/// Splits domains into batches and drives an engine over them.
#[derive(Debug)]
pub struct BatchCoordinator {
    batches: Vec<Vec<DomainTask>>,
    total: usize,
    completed: AtomicUsize,
    current_batch: AtomicUsize,
}

impl BatchCoordinator {
    /// Normalize, de-duplicate and split `domains` into `batches` chunks.
    ///
    /// The first occurrence of a domain wins. Invalid entries stay in as
    /// degenerate tasks so they are still accounted for. With `n` tasks the
    /// chunk size is `max(1, n / batches)`.
    pub fn new<I, S>(domains: I, batches: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let tasks: Vec<DomainTask> = domains
            .into_iter()
            .map(|raw| DomainTask::parse(raw.as_ref()))
            .filter(|task| seen.insert(task.domain.clone()))
            .collect();

        let total = tasks.len();
        let chunk = (total / batches.max(1)).max(1);
        let batches: Vec<Vec<DomainTask>> = tasks.chunks(chunk).map(<[DomainTask]>::to_vec).collect();

        tracing::debug!("Split {} domains into {} batches", total, batches.len());

        Self {
            batches,
            total,
            completed: AtomicUsize::new(0),
            current_batch: AtomicUsize::new(0),
        }
    }

    pub fn batches(&self) -> &[Vec<DomainTask>] {
        &self.batches
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            completed: self.completed.load(Ordering::SeqCst),
            current_batch: self.current_batch.load(Ordering::SeqCst),
            batches: self.batches.len(),
        }
    }

    /// Run every batch in order and finalize the store.
    ///
    /// Cancellation stops issuing batches and tasks; whatever was never issued
    /// is reported as uncrawled in the summary.
    pub async fn run<E: Engine>(&self, engine: &E, ctx: &CrawlContext) -> Result<BatchReport<E::Outcome>> {
        let store = engine.store();
        store.expect_domains(u32::try_from(self.total).unwrap_or(u32::MAX));

        let mut outcomes = Vec::with_capacity(self.total);
        let count = self.batches.len();

        for (index, batch) in self.batches.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::warn!("Run cancelled, skipping batches {}..={}", index + 1, count);
                break;
            }
            self.current_batch.store(index + 1, Ordering::SeqCst);
            tracing::info!("Batch {}/{}: {} domains", index + 1, count, batch.len());

            let mut stream = engine.crawl(batch.clone(), ctx);
            let mut done = 0;
            while let Some(outcome) = stream.next().await {
                outcomes.push(outcome);
                done += 1;
                let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
                if done % PROGRESS_INTERVAL == 0 {
                    tracing::info!(
                        "Batch {}/{}: {}/{} done, {}/{} overall",
                        index + 1,
                        count,
                        done,
                        batch.len(),
                        completed,
                        self.total
                    );
                }
            }
        }

        let summary = store.finalize().await?;
        Ok(BatchReport { outcomes, summary })
    }
}
