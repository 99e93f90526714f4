//! # Harvest Orchestrator
//!
//! Partitions the page range round-robin across the worker pool, runs the
//! parallel phase, hands the accumulated retry queue to the retry
//! orchestrator and assembles the final report. Session-setup failures
//! shrink the pool; only a pool of zero aborts the run.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::harvesting::extractor::ListingExtractor;
use crate::harvesting::retry::RetryOrchestrator;
use crate::harvesting::state::CoordinationContext;
use crate::harvesting::tasks::WorkerResult;
use crate::harvesting::worker::WorkerSession;
use crate::infrastructure::config::HarvestConfig;
use crate::infrastructure::csv_sink::{RecordSink, SinkError};
use crate::infrastructure::debug_capture::DebugCapture;
use crate::renderer::SessionFactory;

/// Run-level errors. Per-page trouble never surfaces here; it lives in the
/// report instead.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid page range {start}..={end}")]
    InvalidRange { start: u32, end: u32 },

    #[error("invalid base URL: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("no rendering sessions could be started")]
    NoSessions,

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Final accounting of one harvest run.
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub run_id: Uuid,
    pub start_page: u32,
    pub end_page: u32,
    pub worker_count: usize,
    pub total_records: u64,
    pub valid_records: u64,
    pub unique_urls: usize,
    pub successful_pages: BTreeSet<u32>,
    pub failed_pages: BTreeSet<u32>,
    pub pages_by_worker: HashMap<usize, Vec<u32>>,
    pub retried: usize,
    pub retry_succeeded: usize,
    pub permanently_failed: Vec<u32>,
    pub elapsed: Duration,
}

impl HarvestReport {
    /// Emits the run summary through the log, the run's user-visible
    /// output.
    pub fn log_summary(&self) {
        let total_pages = self.end_page - self.start_page + 1;
        info!("📊 Harvest {} complete", self.run_id);
        info!("   Listings: {} total, {} valid", self.total_records, self.valid_records);
        info!("   Unique URLs: {}", self.unique_urls);
        info!("   Pages: {}/{} successful", self.successful_pages.len(), total_pages);
        info!(
            "   Elapsed: {:.1}s ({:.1} pages/min)",
            self.elapsed.as_secs_f64(),
            self.successful_pages.len() as f64 / self.elapsed.as_secs_f64().max(0.001) * 60.0
        );

        if self.retried > 0 {
            info!("   Retries: {}/{} succeeded", self.retry_succeeded, self.retried);
        }
        if self.permanently_failed.is_empty() {
            info!("   ✅ No permanently failed pages");
        } else {
            warn!("   ⚠ Permanently failed pages: {:?}", self.permanently_failed);
        }

        let mut workers: Vec<_> = self.pages_by_worker.iter().collect();
        workers.sort_by_key(|(id, _)| **id);
        for (worker_id, pages) in workers {
            info!("   Worker {}: {} pages", worker_id, pages.len());
        }
    }
}

/// Round-robin partition of `[start, end]` over `worker_count` shards. The
/// shards cover the range exactly once and each shard is in ascending
/// order, which is also the order its worker visits it.
#[must_use]
pub fn partition_pages(start: u32, end: u32, worker_count: usize) -> Vec<Vec<u32>> {
    let worker_count = worker_count.max(1);
    let mut shards = vec![Vec::new(); worker_count];
    for (offset, page) in (start..=end).enumerate() {
        shards[offset % worker_count].push(page);
    }
    shards
}

/// Drives one complete harvest: session startup, parallel phase, retry
/// rounds, final report.
pub struct HarvestOrchestrator {
    config: Arc<HarvestConfig>,
    factory: Arc<dyn SessionFactory>,
    sink: Arc<dyn RecordSink>,
    debug: DebugCapture,
}

impl HarvestOrchestrator {
    #[must_use]
    pub fn new(
        config: Arc<HarvestConfig>,
        factory: Arc<dyn SessionFactory>,
        sink: Arc<dyn RecordSink>,
        debug: DebugCapture,
    ) -> Self {
        Self { config, factory, sink, debug }
    }

    /// Runs the whole harvest and returns the report.
    ///
    /// # Errors
    /// Only run-level problems abort: an inverted page range, an unparseable
    /// base URL, or a worker pool that could not start a single session.
    pub async fn run(
        &self,
        start_page: u32,
        end_page: u32,
        requested_workers: usize,
    ) -> Result<HarvestReport, HarvestError> {
        if start_page > end_page || start_page == 0 {
            return Err(HarvestError::InvalidRange { start: start_page, end: end_page });
        }

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            "Starting harvest {}: pages {}-{}, {} workers requested",
            run_id, start_page, end_page, requested_workers
        );

        let extractor = Arc::new(ListingExtractor::new(
            self.config.selectors.clone(),
            &self.config.base_url,
        )?);
        let ctx = Arc::new(CoordinationContext::new());

        let mut workers = self.start_workers(requested_workers, &extractor, &ctx).await?;
        let shards = partition_pages(start_page, end_page, workers.len());

        // Phase 1: every worker walks its own shard; the only contention is
        // on the coordination context.
        let mut handles = Vec::new();
        for (mut worker, shard) in workers.drain(..).zip(shards) {
            handles.push(tokio::spawn(async move {
                let result = worker.run_shard(&shard).await;
                (worker, result)
            }));
        }

        let mut results: Vec<WorkerResult> = Vec::new();
        for joined in join_all(handles).await {
            match joined {
                Ok((worker, result)) => {
                    info!(
                        "Worker {} finished: {} listings from {} pages",
                        worker.worker_id(),
                        result.listings_emitted,
                        result.successful_pages.len()
                    );
                    workers.push(worker);
                    results.push(result);
                }
                Err(e) => error!("Worker task panicked: {}", e),
            }
        }

        // Phase 2: bounded retry rounds over the accumulated queue.
        let retry = RetryOrchestrator::new(Arc::clone(&self.config), Arc::clone(&ctx));
        let (_workers, retry_report) = retry.run_rounds(workers).await;

        let stats = ctx.stats_snapshot().await;
        let report = HarvestReport {
            run_id,
            start_page,
            end_page,
            worker_count: results.len(),
            total_records: stats.total_records,
            valid_records: stats.valid_records,
            unique_urls: ctx.unique_urls().await,
            successful_pages: stats.successful_pages,
            failed_pages: stats.failed_pages,
            pages_by_worker: stats.pages_by_worker,
            retried: retry_report.retried,
            retry_succeeded: retry_report.succeeded,
            permanently_failed: retry_report.permanently_failed,
            elapsed: started.elapsed(),
        };

        report.log_summary();
        Ok(report)
    }

    /// Starts as many sessions as possible; a setup failure costs one
    /// worker, not the run.
    async fn start_workers(
        &self,
        requested: usize,
        extractor: &Arc<ListingExtractor>,
        ctx: &Arc<CoordinationContext>,
    ) -> Result<Vec<WorkerSession>, HarvestError> {
        let mut workers = Vec::new();

        for worker_id in 0..requested.max(1) {
            match self.factory.create_session(worker_id).await {
                Ok(session) => {
                    workers.push(WorkerSession::new(
                        worker_id,
                        session,
                        Arc::clone(&self.config),
                        Arc::clone(extractor),
                        Arc::clone(&self.sink),
                        self.debug.clone(),
                        Arc::clone(ctx),
                    ));
                }
                Err(e) => error!("Could not start session for worker {}: {}", worker_id, e),
            }
        }

        if workers.is_empty() {
            return Err(HarvestError::NoSessions);
        }
        if workers.len() < requested {
            warn!(
                "Proceeding with {}/{} sessions; pages will be redistributed",
                workers.len(),
                requested
            );
        }
        Ok(workers)
    }
}
