//! # Worker Session Loop
//!
//! One worker exclusively owns one rendering session and walks its page
//! shard in order: load, clear overlays, trigger lazy loading, extract,
//! validate and deduplicate, emit, then pace itself like a human reader.
//! Failures are contained at page granularity: a broken page lands in the
//! retry queue and the loop moves on. Only a fatal session loss ends the
//! shard early, surrendering the remaining pages to the retry orchestrator.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::harvesting::content::ContentLoader;
use crate::harvesting::extractor::ListingExtractor;
use crate::harvesting::overlay::OverlayClearer;
use crate::harvesting::state::CoordinationContext;
use crate::harvesting::tasks::{PageOutcome, PageTask, WorkerResult};
use crate::infrastructure::config::HarvestConfig;
use crate::infrastructure::csv_sink::RecordSink;
use crate::infrastructure::debug_capture::DebugCapture;
use crate::renderer::RenderSession;

/// Chance that an inactivity break also changes the viewport.
const VIEWPORT_SHUFFLE_CHANCE: f64 = 0.3;

/// One rendering session plus everything it needs to harvest its shard.
pub struct WorkerSession {
    worker_id: usize,
    session: Box<dyn RenderSession>,
    alive: bool,
    config: Arc<HarvestConfig>,
    extractor: Arc<ListingExtractor>,
    overlay: OverlayClearer,
    loader: ContentLoader,
    sink: Arc<dyn RecordSink>,
    debug: DebugCapture,
    ctx: Arc<CoordinationContext>,
    pages_since_break: u32,
    next_break_at: u32,
}

impl WorkerSession {
    pub fn new(
        worker_id: usize,
        session: Box<dyn RenderSession>,
        config: Arc<HarvestConfig>,
        extractor: Arc<ListingExtractor>,
        sink: Arc<dyn RecordSink>,
        debug: DebugCapture,
        ctx: Arc<CoordinationContext>,
    ) -> Self {
        let overlay = OverlayClearer::new(config.selectors.clone());
        let loader = ContentLoader::new(
            config.scroll.clone(),
            config.delays.lazy_scroll,
            config.delays.final_settle,
            config.selectors.card.clone(),
        );
        let next_break_at = sample_break_interval(&config);

        Self {
            worker_id,
            session,
            alive: true,
            config,
            extractor,
            overlay,
            loader,
            sink,
            debug,
            ctx,
            pages_since_break: 0,
            next_break_at,
        }
    }

    #[must_use]
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Whether the underlying session can still process pages.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }

    /// Marks the session unusable; remaining work belongs to other workers.
    pub fn retire(&mut self) {
        self.alive = false;
    }

    /// Processes the assigned shard in order and returns the per-session
    /// summary. A single page's failure never ends the loop; a fatal
    /// session loss surrenders the rest of the shard to the retry queue.
    pub async fn run_shard(&mut self, pages: &[u32]) -> WorkerResult {
        let mut result = WorkerResult::default();
        if pages.is_empty() {
            return result;
        }

        info!(
            "Worker {}: assigned {} pages ({}-{})",
            self.worker_id,
            pages.len(),
            pages[0],
            pages[pages.len() - 1]
        );

        let viewport = self.config.random_viewport();
        if let Err(e) = self.session.window_size(viewport.width, viewport.height).await {
            warn!("Worker {}: could not size viewport: {}", self.worker_id, e);
        }

        for (index, &page_number) in pages.iter().enumerate() {
            self.maybe_take_break().await;

            let task = PageTask::initial(page_number);
            let outcome = self.process_page(task).await;
            let fatal = self.settle_main_outcome(task, outcome, &mut result).await;

            if fatal {
                self.retire();
                self.surrender_remaining(&pages[index + 1..], &mut result).await;
                break;
            }

            sleep(self.config.delays.between_pages.sample()).await;
        }

        info!(
            "Worker {}: shard done, {} listings ({} valid) from {} pages",
            self.worker_id,
            result.listings_emitted,
            result.valid_count,
            result.successful_pages.len()
        );
        result
    }

    /// Runs one page through the full pipeline. Shared state is only
    /// touched for dedup checks; all bookkeeping belongs to the caller.
    pub async fn process_page(&mut self, task: PageTask) -> PageOutcome {
        let page_number = task.page_number;
        let url = self.config.page_url(page_number);

        info!(
            "Worker {}: loading page {} (attempt {})",
            self.worker_id, page_number, task.attempt
        );

        if let Err(e) = self.session.navigate(&url).await {
            self.capture("navigation_error", page_number).await;
            return PageOutcome::Failed(e.into());
        }
        sleep(self.config.delays.page_load.sample()).await;

        // Overlays show up both right after load and mid-scroll, so
        // clearance runs before and after the lazy-load pass.
        self.overlay.ensure_cleared(self.session.as_mut(), self.worker_id).await;

        let count = match self.loader.load_all(self.session.as_mut(), self.worker_id, page_number).await
        {
            Ok(count) => count,
            Err(e) => {
                self.capture("load_error", page_number).await;
                return PageOutcome::Failed(e.into());
            }
        };

        self.overlay.clear_overlays(self.session.as_mut(), self.worker_id).await;

        if count == 0 {
            warn!("Worker {}: no cards on page {}", self.worker_id, page_number);
            self.capture("no_cards", page_number).await;
            return PageOutcome::NoContent;
        }

        let cards = match self.session.find(&self.config.selectors.card).await {
            Ok(cards) => cards,
            Err(e) => {
                self.capture("stale_page", page_number).await;
                return PageOutcome::Failed(e.into());
            }
        };

        let mut accepted = Vec::with_capacity(cards.len());
        let mut valid = 0usize;
        let mut duplicates = 0usize;

        for card in &cards {
            sleep(self.config.delays.between_listings.sample()).await;
            let record = self.extractor.extract(card.as_ref(), page_number).await;

            if let Some(url) = record.url.as_deref() {
                if self.ctx.check_and_insert(url).await {
                    duplicates += 1;
                    continue;
                }
            }

            if record.is_valid() {
                valid += 1;
            }
            accepted.push(record);
        }

        if let Err(e) = self.sink.append(&accepted).await {
            error!("Worker {}: sink append failed on page {}: {}", self.worker_id, page_number, e);
            return PageOutcome::Failed(e.into());
        }

        let emitted = accepted.len();
        let quality_retry = self.config.quality.wants_retry(emitted, valid);
        if quality_retry {
            self.capture("low_quality", page_number).await;
        }

        let marker = if quality_retry { "⚠" } else { "✓" };
        info!(
            "Worker {}: page {} {} - {} listings ({} valid, {} dupes)",
            self.worker_id, page_number, marker, emitted, valid, duplicates
        );

        PageOutcome::Harvested { emitted, valid, duplicates, quality_retry }
    }

    /// Main-phase bookkeeping for one page outcome. Returns whether the
    /// failure was fatal for this session.
    async fn settle_main_outcome(
        &mut self,
        task: PageTask,
        outcome: PageOutcome,
        result: &mut WorkerResult,
    ) -> bool {
        let page_number = task.page_number;
        match outcome {
            PageOutcome::Harvested { emitted, valid, quality_retry, .. } => {
                self.ctx.record_page_success(self.worker_id, page_number, emitted, valid).await;
                result.listings_emitted += emitted;
                result.valid_count += valid;
                result.successful_pages.push(page_number);

                if quality_retry {
                    warn!(
                        "Worker {}: page {} below quality thresholds, queued for retry",
                        self.worker_id, page_number
                    );
                    self.ctx.enqueue_retry(task.next_attempt()).await;
                }
                false
            }
            PageOutcome::NoContent => {
                self.ctx.record_page_failure(self.worker_id, page_number).await;
                result.failed_pages.push(page_number);
                self.ctx.enqueue_retry(task.next_attempt()).await;
                false
            }
            PageOutcome::Failed(failure) => {
                error!(
                    "Worker {}: page {} failed: {}",
                    self.worker_id, page_number, failure
                );
                self.ctx.record_page_failure(self.worker_id, page_number).await;
                result.failed_pages.push(page_number);
                self.ctx.enqueue_retry(task.next_attempt()).await;
                failure.is_fatal()
            }
        }
    }

    /// Hands the untouched tail of the shard to the retry queue after a
    /// fatal session loss.
    async fn surrender_remaining(&mut self, pages: &[u32], result: &mut WorkerResult) {
        if pages.is_empty() {
            return;
        }
        warn!(
            "Worker {}: session lost, surrendering {} remaining pages to retry",
            self.worker_id,
            pages.len()
        );
        for &page_number in pages {
            self.ctx.record_page_failure(self.worker_id, page_number).await;
            self.ctx.enqueue_retry(PageTask::initial(page_number).next_attempt()).await;
            result.failed_pages.push(page_number);
        }
    }

    /// Inactivity break every N pages, occasionally with a viewport change.
    async fn maybe_take_break(&mut self) {
        self.pages_since_break += 1;
        if self.pages_since_break < self.next_break_at {
            return;
        }

        let pause = self.config.delays.break_duration.sample();
        info!(
            "Worker {}: taking a {:.1}s inactivity break",
            self.worker_id,
            pause.as_secs_f64()
        );
        sleep(pause).await;

        self.pages_since_break = 0;
        self.next_break_at = sample_break_interval(&self.config);

        if fastrand::f64() < VIEWPORT_SHUFFLE_CHANCE {
            let viewport = self.config.random_viewport();
            let _ = self.session.window_size(viewport.width, viewport.height).await;
        }
    }

    async fn capture(&mut self, reason: &str, page_number: u32) {
        let debug = self.debug.clone();
        debug
            .capture_page(self.session.as_mut(), self.worker_id, page_number, reason)
            .await;
    }
}

fn sample_break_interval(config: &HarvestConfig) -> u32 {
    let (lo, hi) = config.delays.break_every_pages;
    fastrand::u32(lo..=hi.max(lo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    use crate::infrastructure::config::{DelayProfile, DelayWindow, HarvestConfig, ScrollProfile};
    use crate::renderer::{Element, RenderError};

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
        ) -> Result<(), crate::infrastructure::csv_sink::SinkError> {
            Ok(())
        }
    }

    /// Session that dies on the given page and renders nothing anywhere.
    struct FlakySession {
        die_on_page: Option<u32>,
    }

    #[async_trait]
    impl RenderSession for FlakySession {
        async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
            if let Some(page) = self.die_on_page {
                if url.ends_with(&format!("page={page}")) {
                    return Err(RenderError::SessionLost("renderer crashed".to_string()));
                }
            }
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

    fn worker(session: FlakySession, ctx: Arc<CoordinationContext>) -> WorkerSession {
        let config = fast_config();
        let extractor = Arc::new(
            ListingExtractor::new(config.selectors.clone(), &config.base_url).unwrap(),
        );
        WorkerSession::new(
            0,
            Box::new(session),
            config,
            extractor,
            Arc::new(NullSink),
            DebugCapture::disabled(),
            ctx,
        )
    }

    #[tokio::test]
    async fn empty_pages_land_in_retry_queue() {
        let ctx = Arc::new(CoordinationContext::new());
        let mut worker = worker(FlakySession { die_on_page: None }, Arc::clone(&ctx));

        let result = worker.run_shard(&[1, 2]).await;

        assert_eq!(result.failed_pages, vec![1, 2]);
        assert!(result.successful_pages.is_empty());
        assert_eq!(ctx.pending_retries().await, 2);
        assert!(worker.is_alive(), "empty pages are not fatal");

        let stats = ctx.stats_snapshot().await;
        assert!(stats.failed_pages.contains(&1));
        assert!(stats.failed_pages.contains(&2));
    }

    #[tokio::test]
    async fn fatal_session_loss_surrenders_the_shard() {
        let ctx = Arc::new(CoordinationContext::new());
        let mut worker = worker(FlakySession { die_on_page: Some(3) }, Arc::clone(&ctx));

        let result = worker.run_shard(&[1, 3, 5, 7]).await;

        assert!(!worker.is_alive());
        // Page 1 fails softly (no cards); 3 dies fatally; 5 and 7 are
        // surrendered without being attempted.
        assert_eq!(result.failed_pages, vec![1, 3, 5, 7]);
        assert_eq!(ctx.pending_retries().await, 4);

        let drained = ctx.drain_retries().await;
        assert!(drained.iter().all(|task| task.attempt == 1));
    }
}
