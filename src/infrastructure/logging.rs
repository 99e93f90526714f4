//! # Logging Setup
//!
//! Console plus file logging through `tracing`. The file layer writes to a
//! non-blocking appender whose guard must outlive the process, so guards
//! are parked in a global holder.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use lazy_static::lazy_static;
use tracing_appender::non_blocking;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Initializes console and file logging once at startup.
///
/// The level defaults to `info` (`debug` with `verbose`) and can be
/// overridden through `RUST_LOG`.
///
/// # Errors
/// Fails when the log directory cannot be created or a subscriber is
/// already installed.
pub fn init_logging(verbose: bool, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("immo_harvest={default_level},warn")));

    let file_appender = tracing_appender::rolling::never(log_dir, "immo-harvest.log");
    let (file_writer, guard) = non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false).with_target(false))
        .try_init()?;

    LOG_GUARDS
        .lock()
        .expect("log guard holder poisoned")
        .push(guard);

    Ok(())
}
