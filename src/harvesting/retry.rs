//! # Retry Orchestrator
//!
//! Drains the retry queue in bounded rounds after the parallel phase. Each
//! round waits out a randomized backoff (longer than the inter-page delay,
//! so the same transient failure is not replayed immediately), then spreads
//! the batch across whichever sessions are still alive. Sessions are
//! fungible, so a page need not return to its original owner. Pages that
//! exhaust their attempt budget drop into the permanent failure set.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::harvesting::state::CoordinationContext;
use crate::harvesting::tasks::{PageOutcome, PageTask};
use crate::harvesting::worker::WorkerSession;
use crate::infrastructure::config::HarvestConfig;

/// Totals across all retry rounds of a run.
#[derive(Debug, Default, Clone)]
pub struct RetryReport {
    pub retried: usize,
    pub succeeded: usize,
    pub permanently_failed: Vec<u32>,
}

#[derive(Debug, Default)]
struct RoundOutcome {
    retried: usize,
    succeeded: usize,
    permanently_failed: Vec<u32>,
}

/// Runs the bounded retry phase against the surviving worker sessions.
pub struct RetryOrchestrator {
    config: Arc<HarvestConfig>,
    ctx: Arc<CoordinationContext>,
}

impl RetryOrchestrator {
    #[must_use]
    pub fn new(config: Arc<HarvestConfig>, ctx: Arc<CoordinationContext>) -> Self {
        Self { config, ctx }
    }

    /// Runs up to the configured number of rounds, stopping early when the
    /// queue is empty, then converts any leftover tasks into permanent
    /// failures so every page ends in exactly one of the two page sets.
    pub async fn run_rounds(
        &self,
        mut workers: Vec<WorkerSession>,
    ) -> (Vec<WorkerSession>, RetryReport) {
        let mut report = RetryReport::default();
        let max_rounds = self.config.retry.max_rounds;

        for round in 1..=max_rounds {
            let (eligible, overlimit) = self.drain_eligible().await;
            for page_number in overlimit {
                if self.ctx.record_permanent_failure(page_number).await {
                    report.permanently_failed.push(page_number);
                }
            }
            if eligible.is_empty() {
                break;
            }

            let alive = workers.iter().filter(|w| w.is_alive()).count();
            if alive == 0 {
                warn!("No sessions left for retry round {}", round);
                for task in eligible {
                    if self.ctx.record_permanent_failure(task.page_number).await {
                        report.permanently_failed.push(task.page_number);
                    }
                }
                break;
            }

            info!(
                "🔄 Retry round {}/{}: {} pages across {} sessions",
                round,
                max_rounds,
                eligible.len(),
                alive
            );

            let backoff = self.config.delays.retry_backoff.sample();
            info!("Waiting {:.1}s before retrying", backoff.as_secs_f64());
            sleep(backoff).await;

            let outcome = self.run_one_round(&mut workers, eligible).await;
            report.retried += outcome.retried;
            report.succeeded += outcome.succeeded;
            report.permanently_failed.extend(outcome.permanently_failed);
        }

        // Whatever is still queued after the last round has no more rounds
        // to run in; close the books on it.
        for task in self.ctx.drain_retries().await {
            if self.ctx.record_permanent_failure(task.page_number).await {
                report.permanently_failed.push(task.page_number);
            }
        }

        report.permanently_failed.sort_unstable();
        report.permanently_failed.dedup();
        (workers, report)
    }

    /// Splits the queued tasks into retryable ones and pages that already
    /// exceeded the attempt bound.
    async fn drain_eligible(&self) -> (Vec<PageTask>, Vec<u32>) {
        let max_attempts = self.config.retry.max_attempts;
        let mut eligible = Vec::new();
        let mut overlimit = Vec::new();

        for task in self.ctx.drain_retries().await {
            if task.attempt <= max_attempts {
                eligible.push(task);
            } else {
                overlimit.push(task.page_number);
            }
        }
        (eligible, overlimit)
    }

    /// Distributes one round's batch round-robin over the alive sessions
    /// and runs all sessions concurrently.
    async fn run_one_round(
        &self,
        workers: &mut Vec<WorkerSession>,
        batch: Vec<PageTask>,
    ) -> RoundOutcome {
        let alive_slots: Vec<usize> = workers
            .iter()
            .enumerate()
            .filter_map(|(index, worker)| worker.is_alive().then_some(index))
            .collect();

        let mut batches: Vec<Vec<PageTask>> = workers.iter().map(|_| Vec::new()).collect();
        for (position, task) in batch.into_iter().enumerate() {
            batches[alive_slots[position % alive_slots.len()]].push(task);
        }

        let mut handles = Vec::new();
        for (worker, tasks) in workers.drain(..).zip(batches) {
            let ctx = Arc::clone(&self.ctx);
            let max_attempts = self.config.retry.max_attempts;
            handles.push(tokio::spawn(async move {
                retry_on_session(worker, tasks, ctx, max_attempts).await
            }));
        }

        let mut outcome = RoundOutcome::default();
        for handle in handles {
            match handle.await {
                Ok((worker, session_outcome)) => {
                    workers.push(worker);
                    outcome.retried += session_outcome.retried;
                    outcome.succeeded += session_outcome.succeeded;
                    outcome.permanently_failed.extend(session_outcome.permanently_failed);
                }
                Err(e) => warn!("Retry task panicked: {}", e),
            }
        }
        outcome
    }
}

/// Replays a batch of pages on one session, with the same counters as the
/// main loop on success and attempt-bounded requeueing on failure.
async fn retry_on_session(
    mut worker: WorkerSession,
    tasks: Vec<PageTask>,
    ctx: Arc<CoordinationContext>,
    max_attempts: u32,
) -> (WorkerSession, RoundOutcome) {
    let mut outcome = RoundOutcome::default();

    for task in tasks {
        if !worker.is_alive() {
            requeue_or_close(&ctx, task, max_attempts, &mut outcome).await;
            continue;
        }

        outcome.retried += 1;
        match worker.process_page(task).await {
            PageOutcome::Harvested { emitted, valid, quality_retry, .. } => {
                ctx.record_page_success(worker.worker_id(), task.page_number, emitted, valid)
                    .await;
                outcome.succeeded += 1;
                info!(
                    "✓ Page {} retry success: {} listings",
                    task.page_number, emitted
                );
                if quality_retry {
                    requeue_or_close(&ctx, task, max_attempts, &mut outcome).await;
                }
            }
            PageOutcome::NoContent => {
                warn!("Retry of page {} still has no cards", task.page_number);
                ctx.record_page_failure(worker.worker_id(), task.page_number).await;
                requeue_or_close(&ctx, task, max_attempts, &mut outcome).await;
            }
            PageOutcome::Failed(failure) => {
                warn!("Retry of page {} failed: {}", task.page_number, failure);
                if failure.is_fatal() {
                    worker.retire();
                }
                ctx.record_page_failure(worker.worker_id(), task.page_number).await;
                requeue_or_close(&ctx, task, max_attempts, &mut outcome).await;
            }
        }
    }

    (worker, outcome)
}

/// Re-enqueues the next attempt or, at the bound, records the page as
/// permanently failed.
async fn requeue_or_close(
    ctx: &CoordinationContext,
    task: PageTask,
    max_attempts: u32,
    outcome: &mut RoundOutcome,
) {
    let next = task.next_attempt();
    if next.attempt <= max_attempts {
        ctx.enqueue_retry(next).await;
    } else if ctx.record_permanent_failure(task.page_number).await {
        outcome.permanently_failed.push(task.page_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    use crate::harvesting::extractor::ListingExtractor;
    use crate::infrastructure::config::{DelayProfile, DelayWindow, ScrollProfile};
    use crate::infrastructure::csv_sink::{RecordSink, SinkError};
    use crate::infrastructure::debug_capture::DebugCapture;
    use crate::renderer::{Element, RenderError, RenderSession};

    fn fast_config() -> Arc<HarvestConfig> {
        let zero = DelayWindow::new(0, 0);
        Arc::new(HarvestConfig {
            delays: DelayProfile {
                page_load: zero,
                lazy_scroll: zero,
                final_settle: zero,
                between_listings: zero,
                between_pages: zero,
                retry_backoff: zero,
                break_every_pages: (1000, 1000),
                break_duration: zero,
            },
            scroll: ScrollProfile {
                micro_pause: zero,
                hesitation: zero,
                ..ScrollProfile::default()
            },
            ..HarvestConfig::default()
        })
    }

    struct NullSink;

    #[async_trait]
    impl RecordSink for NullSink {
        async fn append(
            &self,
            _: &[crate::harvesting::records::ListingRecord],
        ) -> Result<(), SinkError> {
            Ok(())
        }
    }

    /// Session whose pages are always empty.
    struct BarrenSession;

    #[async_trait]
    impl RenderSession for BarrenSession {
        async fn navigate(&mut self, _: &str) -> Result<(), RenderError> {
            Ok(())
        }
        async fn execute_script(&mut self, _: &str) -> Result<Value, RenderError> {
            Ok(Value::from(0.0))
        }
        async fn find(&mut self, _: &str) -> Result<Vec<Box<dyn Element>>, RenderError> {
            Ok(Vec::new())
        }
        async fn scroll_to(&mut self, _: f64) -> Result<(), RenderError> {
            Ok(())
        }
        async fn window_size(&mut self, _: u32, _: u32) -> Result<(), RenderError> {
            Ok(())
        }
        async fn screenshot(&mut self) -> Result<Vec<u8>, RenderError> {
            Ok(Vec::new())
        }
        async fn page_source(&mut self) -> Result<String, RenderError> {
            Ok(String::new())
        }
    }

    fn barren_worker(ctx: &Arc<CoordinationContext>) -> WorkerSession {
        let config = fast_config();
        let extractor = Arc::new(
            ListingExtractor::new(config.selectors.clone(), &config.base_url).unwrap(),
        );
        WorkerSession::new(
            0,
            Box::new(BarrenSession),
            config,
            extractor,
            Arc::new(NullSink),
            DebugCapture::disabled(),
            Arc::clone(ctx),
        )
    }

    #[tokio::test]
    async fn exhausted_pages_become_permanent_failures() {
        let ctx = Arc::new(CoordinationContext::new());
        ctx.record_page_failure(0, 42).await;
        ctx.enqueue_retry(PageTask { page_number: 42, attempt: 1 }).await;

        let config = fast_config();
        let orchestrator = RetryOrchestrator::new(Arc::clone(&config), Arc::clone(&ctx));
        let (_, report) = orchestrator.run_rounds(vec![barren_worker(&ctx)]).await;

        // Round 1 retries attempt 1, round 2 retries attempt 2; the final
        // drain closes attempt 3.
        assert_eq!(report.retried, 2);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.permanently_failed, vec![42]);

        let stats = ctx.stats_snapshot().await;
        assert!(stats.failed_pages.contains(&42));
        assert!(!stats.successful_pages.contains(&42));
        assert_eq!(ctx.pending_retries().await, 0);
    }

    #[tokio::test]
    async fn rounds_stop_early_when_queue_is_empty() {
        let ctx = Arc::new(CoordinationContext::new());
        let orchestrator = RetryOrchestrator::new(fast_config(), Arc::clone(&ctx));

        let (workers, report) = orchestrator.run_rounds(vec![barren_worker(&ctx)]).await;

        assert_eq!(workers.len(), 1);
        assert_eq!(report.retried, 0);
        assert!(report.permanently_failed.is_empty());
    }

    #[tokio::test]
    async fn no_alive_sessions_closes_the_queue() {
        let ctx = Arc::new(CoordinationContext::new());
        ctx.record_page_failure(0, 9).await;
        ctx.enqueue_retry(PageTask { page_number: 9, attempt: 1 }).await;

        let orchestrator = RetryOrchestrator::new(fast_config(), Arc::clone(&ctx));
        let mut dead = barren_worker(&ctx);
        dead.retire();

        let (_, report) = orchestrator.run_rounds(vec![dead]).await;

        assert_eq!(report.retried, 0);
        assert_eq!(report.permanently_failed, vec![9]);
    }
}
