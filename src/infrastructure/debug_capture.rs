//! # Debug Artifact Capture
//!
//! When debug mode is on, failed pages leave behind their raw markup and a
//! screenshot, keyed by worker id, page number and failure reason. Capture
//! is strictly best-effort: a page that cannot even produce its source must
//! not turn a diagnostic into a second failure.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::renderer::RenderSession;

/// Best-effort sink for failure diagnostics.
#[derive(Debug, Clone)]
pub struct DebugCapture {
    enabled: bool,
    root: PathBuf,
}

impl DebugCapture {
    /// Capture rooted at `<output_dir>/debug`, active only when `enabled`.
    #[must_use]
    pub fn new(enabled: bool, output_dir: &Path) -> Self {
        Self { enabled, root: output_dir.join("debug") }
    }

    /// A capture that never writes anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false, root: PathBuf::new() }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Persists page markup and screenshot for a failed page. Never fails;
    /// problems are logged and swallowed.
    pub async fn capture_page(
        &self,
        session: &mut dyn RenderSession,
        worker_id: usize,
        page_number: u32,
        reason: &str,
    ) {
        if !self.enabled {
            return;
        }

        let dir = self.root.join(format!("worker{worker_id}"));
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("Worker {}: cannot create debug dir {}: {}", worker_id, dir.display(), e);
            return;
        }

        let stamp = chrono::Local::now().format("%H%M%S");
        let stem = format!("page{page_number}_{reason}_{stamp}");

        match session.page_source().await {
            Ok(source) => {
                let path = dir.join(format!("{stem}.html"));
                match tokio::fs::write(&path, source).await {
                    Ok(()) => debug!("Worker {}: saved markup to {}", worker_id, path.display()),
                    Err(e) => debug!("Worker {}: could not save markup: {}", worker_id, e),
                }
            }
            Err(e) => debug!("Worker {}: page source unavailable: {}", worker_id, e),
        }

        match session.screenshot().await {
            Ok(image) if !image.is_empty() => {
                let path = dir.join(format!("{stem}.png"));
                match tokio::fs::write(&path, image).await {
                    Ok(()) => {
                        debug!("Worker {}: saved screenshot to {}", worker_id, path.display());
                    }
                    Err(e) => debug!("Worker {}: could not save screenshot: {}", worker_id, e),
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Worker {}: screenshot unavailable: {}", worker_id, e),
        }
    }
}
