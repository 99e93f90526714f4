//! # Infrastructure
//!
//! Everything around the harvesting core: configuration, logging setup,
//! the CSV result sink and the debug artifact capture.

pub mod config;
pub mod csv_sink;
pub mod debug_capture;
pub mod logging;

pub use config::HarvestConfig;
pub use csv_sink::{CsvSink, RecordSink, SinkError};
pub use debug_capture::DebugCapture;
