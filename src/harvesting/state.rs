//! # Shared Coordination State
//!
//! The only cross-worker mutable resources of a run: the URL dedup set, the
//! run statistics and the retry queue. Each lives behind its own mutex so a
//! worker holds exactly one short-lived lock at a time. The whole context is
//! constructed per run, never as a process-wide static, so concurrent runs
//! (tests included) cannot interfere.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::harvesting::tasks::PageTask;

/// Aggregated run statistics, read once at the end for reporting.
///
/// `successful_pages` and `failed_pages` stay disjoint: a page that succeeds
/// after a failed attempt leaves the failure set, and a structurally
/// successful page is never demoted by an exhausted quality retry.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub total_records: u64,
    pub valid_records: u64,
    pub successful_pages: BTreeSet<u32>,
    pub failed_pages: BTreeSet<u32>,
    pub pages_by_worker: HashMap<usize, Vec<u32>>,
}

/// Per-run coordination context shared by all workers.
#[derive(Debug, Default)]
pub struct CoordinationContext {
    dedup: Mutex<HashSet<String>>,
    stats: Mutex<RunStats>,
    retry_queue: Mutex<VecDeque<PageTask>>,
}

impl CoordinationContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-then-insert on the dedup set. Returns `true` when the
    /// URL was already present; the insert and the check happen under one
    /// lock so two workers can never both observe "not present".
    pub async fn check_and_insert(&self, url: &str) -> bool {
        let mut seen = self.dedup.lock().await;
        !seen.insert(url.to_string())
    }

    /// Number of distinct listing URLs seen so far.
    pub async fn unique_urls(&self) -> usize {
        self.dedup.lock().await.len()
    }

    /// Records a structurally successful page and its record counts.
    pub async fn record_page_success(
        &self,
        worker_id: usize,
        page_number: u32,
        emitted: usize,
        valid: usize,
    ) {
        let mut stats = self.stats.lock().await;
        stats.total_records += emitted as u64;
        stats.valid_records += valid as u64;
        stats.successful_pages.insert(page_number);
        stats.failed_pages.remove(&page_number);
        stats.pages_by_worker.entry(worker_id).or_default().push(page_number);
    }

    /// Records a failed page attempt. A page that already succeeded keeps
    /// its successful status (quality retries can fail without demoting it).
    pub async fn record_page_failure(&self, worker_id: usize, page_number: u32) {
        let mut stats = self.stats.lock().await;
        if !stats.successful_pages.contains(&page_number) {
            stats.failed_pages.insert(page_number);
        }
        stats.pages_by_worker.entry(worker_id).or_default().push(page_number);
    }

    /// Marks a page as permanently failed after its retry budget ran out.
    /// Returns `false` when the page had already succeeded structurally and
    /// therefore keeps its successful status.
    pub async fn record_permanent_failure(&self, page_number: u32) -> bool {
        let mut stats = self.stats.lock().await;
        if stats.successful_pages.contains(&page_number) {
            return false;
        }
        stats.failed_pages.insert(page_number);
        true
    }

    /// Enqueues a retry task. Callable from any worker at any time.
    pub async fn enqueue_retry(&self, task: PageTask) {
        self.retry_queue.lock().await.push_back(task);
    }

    /// Drains the entire retry queue. Only the retry orchestrator calls
    /// this, between phases; workers never consume.
    pub async fn drain_retries(&self) -> Vec<PageTask> {
        self.retry_queue.lock().await.drain(..).collect()
    }

    /// Number of queued retry tasks.
    pub async fn pending_retries(&self) -> usize {
        self.retry_queue.lock().await.len()
    }

    /// Snapshot of the statistics for final reporting.
    pub async fn stats_snapshot(&self) -> RunStats {
        self.stats.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn dedup_reports_already_present_after_first_insert() {
        let ctx = CoordinationContext::new();
        assert!(!ctx.check_and_insert("https://x/1").await);
        assert!(ctx.check_and_insert("https://x/1").await);
        assert!(ctx.check_and_insert("https://x/1").await);
        assert_eq!(ctx.unique_urls().await, 1);
    }

    #[tokio::test]
    async fn dedup_admits_each_url_exactly_once_across_tasks() {
        let ctx = Arc::new(CoordinationContext::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(async move {
                let mut fresh = 0u32;
                for i in 0..50 {
                    if !ctx.check_and_insert(&format!("https://x/{i}")).await {
                        fresh += 1;
                    }
                }
                fresh
            }));
        }

        let mut total_fresh = 0;
        for handle in handles {
            total_fresh += handle.await.unwrap();
        }

        assert_eq!(total_fresh, 50, "each URL admitted exactly once overall");
        assert_eq!(ctx.unique_urls().await, 50);
    }

    #[tokio::test]
    async fn page_sets_stay_disjoint() {
        let ctx = CoordinationContext::new();

        // Hard failure, then a successful retry.
        ctx.record_page_failure(0, 4).await;
        ctx.record_page_success(1, 4, 20, 18).await;

        // Structural success whose quality retry later hard-fails.
        ctx.record_page_success(0, 9, 5, 5).await;
        ctx.record_page_failure(1, 9).await;
        assert!(!ctx.record_permanent_failure(9).await, "successful page is not demoted");

        let stats = ctx.stats_snapshot().await;
        assert!(stats.successful_pages.contains(&4));
        assert!(!stats.failed_pages.contains(&4));
        assert!(stats.successful_pages.contains(&9));
        assert!(!stats.failed_pages.contains(&9));
        assert!(stats.successful_pages.is_disjoint(&stats.failed_pages));
    }

    #[tokio::test]
    async fn retry_queue_drains_completely() {
        let ctx = CoordinationContext::new();
        ctx.enqueue_retry(PageTask::initial(1).next_attempt()).await;
        ctx.enqueue_retry(PageTask::initial(2).next_attempt()).await;
        assert_eq!(ctx.pending_retries().await, 2);

        let drained = ctx.drain_retries().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(ctx.pending_retries().await, 0);
    }
}
