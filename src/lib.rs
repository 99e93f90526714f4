//! # immo-harvest
//!
//! Parallel harvester for paginated, JavaScript-rendered real-estate
//! listing pages. A pool of isolated rendering sessions walks its page
//! shards concurrently, a three-layer extractor turns listing cards into
//! records with confidence scores, and a bounded retry phase replays the
//! pages that failed or came back thin. The rendering engine itself is an
//! external capability behind the [`renderer`] traits.

pub mod harvesting;
pub mod infrastructure;
pub mod renderer;

pub use harvesting::{
    CoordinationContext, HarvestError, HarvestOrchestrator, HarvestReport, ListingRecord,
    PageTask, RunStats, WorkerResult,
};
pub use infrastructure::config::HarvestConfig;
pub use infrastructure::csv_sink::{CsvSink, RecordSink, SinkError};
pub use renderer::{RenderError, RenderSession, SessionFactory};
