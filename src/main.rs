//! CLI entry point: flag parsing with interactive prompts as fallback,
//! wiring of the replay renderer backend, the CSV sink and the harvest
//! orchestrator. Fire-and-report: the run logs its final summary and only
//! run-level failures (no sessions at all, bad range) abort.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use immo_harvest::harvesting::HarvestOrchestrator;
use immo_harvest::infrastructure::config::HarvestConfig;
use immo_harvest::infrastructure::csv_sink::CsvSink;
use immo_harvest::infrastructure::debug_capture::DebugCapture;
use immo_harvest::infrastructure::logging::init_logging;
use immo_harvest::renderer::ReplaySessionFactory;

const MAX_WORKERS: usize = 10;
const DEFAULT_WORKERS: usize = 3;

#[derive(Debug, Parser)]
#[command(
    name = "immo-harvest",
    about = "Parallel harvester for paginated real-estate listing pages",
    long_about = "Harvests structured listing records from paginated, JS-rendered result \
                  pages using a pool of isolated rendering sessions. Ships with an offline \
                  replay backend over captured markup; live automation backends plug in \
                  through the renderer traits."
)]
struct Cli {
    /// First result page to harvest.
    #[arg(long)]
    start: Option<u32>,

    /// Last result page to harvest (inclusive).
    #[arg(long)]
    end: Option<u32>,

    /// Number of parallel rendering sessions.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Output CSV path; defaults to a timestamped file in the configured
    /// output directory.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Configuration file.
    #[arg(long, default_value = "immo-harvest.json")]
    config: PathBuf,

    /// Capture directory for the replay rendering backend.
    #[arg(long, default_value = "captures")]
    replay_dir: PathBuf,

    /// Save markup and screenshots of failed pages.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, Path::new("logs"))?;

    let config = Arc::new(HarvestConfig::load_or_default(&cli.config).await?);

    // Interactive fallback mirrors the flags for ad-hoc runs.
    let start = match cli.start {
        Some(start) => start,
        None => prompt_number("Start page (e.g., 1)")?,
    };
    let end = match cli.end {
        Some(end) => end,
        None => prompt_number("End page (e.g., 50)")?,
    };
    let workers = cli.workers.clamp(1, MAX_WORKERS);

    let output_path = cli.output.unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        config.output_dir.join(format!("immo_harvest_{stamp}.csv"))
    });

    let sink = Arc::new(
        CsvSink::create(&output_path)
            .await
            .with_context(|| format!("cannot create output file {}", output_path.display()))?,
    );
    let factory = Arc::new(ReplaySessionFactory::new(cli.replay_dir));
    let debug = DebugCapture::new(cli.debug, &config.output_dir);

    let orchestrator = HarvestOrchestrator::new(config, factory, sink, debug);
    orchestrator
        .run(start, end, workers)
        .await
        .context("harvest run failed")?;

    Ok(())
}

fn prompt_number(label: &str) -> Result<u32> {
    print!("{label}: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    line.trim()
        .parse()
        .with_context(|| format!("'{}' is not a page number", line.trim()))
}
