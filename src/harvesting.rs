//! # Harvesting Core
//!
//! The parallel harvesting pipeline: page tasks and records, the
//! multi-layer extractor, overlay clearance, lazy-load driving, the worker
//! session loop, shared coordination state, the retry orchestrator and the
//! run-level orchestrator on top.

pub mod content;
pub mod extractor;
pub mod orchestrator;
pub mod overlay;
pub mod records;
pub mod retry;
pub mod state;
pub mod tasks;
pub mod worker;

pub use content::ContentLoader;
pub use extractor::ListingExtractor;
pub use orchestrator::{HarvestError, HarvestOrchestrator, HarvestReport, partition_pages};
pub use overlay::OverlayClearer;
pub use records::{CSV_COLUMNS, ListingRecord, MISSING_FIELD_TOKEN};
pub use retry::{RetryOrchestrator, RetryReport};
pub use state::{CoordinationContext, RunStats};
pub use tasks::{PageFailure, PageOutcome, PageTask, WorkerResult};
pub use worker::WorkerSession;
