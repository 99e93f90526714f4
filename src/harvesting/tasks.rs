//! # Page Tasks
//!
//! Unit of work flowing between the partitioner, the worker sessions and the
//! retry orchestrator. Tasks are small and copyable; re-queueing creates a
//! fresh task with an incremented attempt counter.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::csv_sink::SinkError;
use crate::renderer::RenderError;

/// One result page to harvest.
///
/// `attempt` is 0 for the initial pass and counts retry attempts afterwards;
/// a task whose attempt exceeds the configured bound is dropped into the
/// permanent failure set instead of being re-queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTask {
    pub page_number: u32,
    pub attempt: u32,
}

impl PageTask {
    /// Task for the initial parallel pass.
    #[must_use]
    pub const fn initial(page_number: u32) -> Self {
        Self { page_number, attempt: 0 }
    }

    /// The follow-up task queued when this one fails.
    #[must_use]
    pub const fn next_attempt(self) -> Self {
        Self { page_number: self.page_number, attempt: self.attempt + 1 }
    }
}

/// Outcome of processing a single page inside a worker session.
#[derive(Debug)]
pub enum PageOutcome {
    /// The page rendered and records were emitted. `quality_retry` flags a
    /// structurally successful page whose yield fell below the configured
    /// quality policy.
    Harvested {
        emitted: usize,
        valid: usize,
        duplicates: usize,
        quality_retry: bool,
    },

    /// The page rendered but no primary element ever appeared.
    NoContent,

    /// Navigation, clearance, loading or persistence failed at page level.
    Failed(PageFailure),
}

/// Page-granular failure cause.
#[derive(Debug, Error)]
pub enum PageFailure {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("sink failure: {0}")]
    Sink(#[from] SinkError),
}

impl PageFailure {
    /// Fatal failures end the owning session's shard; everything else is
    /// retried page by page.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Render(e) if e.is_fatal())
    }
}

/// Per-session summary returned to the orchestrator when a worker finishes
/// its shard. Exclusively owned by the worker until then.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub listings_emitted: usize,
    pub valid_count: usize,
    pub failed_pages: Vec<u32>,
    pub successful_pages: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_counter_increments() {
        let task = PageTask::initial(7);
        assert_eq!(task.attempt, 0);

        let retried = task.next_attempt().next_attempt();
        assert_eq!(retried.page_number, 7);
        assert_eq!(retried.attempt, 2);
    }
}
