//! # Overlay Clearance Protocol
//!
//! Detects and dismisses UI that blocks the primary content: consent
//! managers living in an isolated sub-document, dialog/modal roles,
//! class-based popups and full-screen overlays, with an Escape signal as
//! the last resort. The battery is idempotent and bounded: callers loop
//! through [`OverlayClearer::ensure_cleared`], which stops as soon as one
//! pass dismisses nothing.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::infrastructure::config::SelectorProfile;
use crate::renderer::{ESCAPE_SCRIPT, Element, RenderSession};

/// Upper bound on dismissal passes per [`OverlayClearer::ensure_cleared`].
const MAX_CLEAR_ATTEMPTS: u32 = 5;

/// Settle time after a dismissal action.
const DISMISS_SETTLE: Duration = Duration::from_millis(500);

/// Overlays at least this large in both dimensions count as blocking.
const FULLSCREEN_MIN_PX: f64 = 500.0;

const DIALOG_SELECTOR: &str = "[role='dialog']";
const ARIA_MODAL_SELECTOR: &str = "[aria-modal='true']";
const POPIN_SELECTOR: &str = "[class*='popin'], [class*='popup'], [class*='modal']";
const OVERLAY_SELECTOR: &str = "[class*='overlay']";

/// Labeled dismiss controls, tried before any generic escape.
const CLOSE_SELECTORS: [&str; 5] = [
    "button[aria-label*='close' i]",
    "button[aria-label*='fermer' i]",
    "button[class*='close']",
    "button[class*='dismiss']",
    "[data-testid*='close']",
];

/// Runs the fixed dismissal battery against one session.
pub struct OverlayClearer {
    selectors: SelectorProfile,
}

impl OverlayClearer {
    #[must_use]
    pub fn new(selectors: SelectorProfile) -> Self {
        Self { selectors }
    }

    /// One pass of the battery. Returns `true` when anything was dismissed.
    /// Detector errors are page-local noise and never escape.
    pub async fn clear_overlays(&self, session: &mut dyn RenderSession, worker_id: usize) -> bool {
        let mut dismissed = false;

        // 1. Consent widget in its isolated sub-document.
        if let Ok(value) = session.execute_script(&self.selectors.consent_script).await {
            if value.as_bool() == Some(true) {
                info!("Worker {}: dismissed consent widget", worker_id);
                dismissed = true;
                sleep(DISMISS_SETTLE).await;
            }
        }

        // 2. Dialog roles and aria-modal overlays, labeled controls first.
        for selector in [DIALOG_SELECTOR, ARIA_MODAL_SELECTOR] {
            if self.dismiss_containers(session, selector, worker_id).await {
                dismissed = true;
            }
        }

        // 3. Class-based popins and popups.
        if self.dismiss_containers(session, POPIN_SELECTOR, worker_id).await {
            dismissed = true;
        }

        // 4. Full-screen blocking overlays.
        if let Ok(overlays) = session.find(OVERLAY_SELECTOR).await {
            for overlay in &overlays {
                let displayed = overlay.is_displayed().await.unwrap_or(false);
                let rect = overlay.rect().await.ok();
                let blocking = rect
                    .is_some_and(|r| r.width > FULLSCREEN_MIN_PX && r.height > FULLSCREEN_MIN_PX);
                if displayed && blocking && overlay.click().await.is_ok() {
                    info!("Worker {}: clicked blocking overlay away", worker_id);
                    dismissed = true;
                    sleep(DISMISS_SETTLE).await;
                }
            }
        }

        // 5. Escape as the final fallback when nothing else fired.
        if !dismissed {
            let _ = session.execute_script(ESCAPE_SCRIPT).await;
        }

        dismissed
    }

    /// Loops the battery until a pass dismisses nothing (at most
    /// [`MAX_CLEAR_ATTEMPTS`]), then probes for primary content as the
    /// readiness signal.
    pub async fn ensure_cleared(&self, session: &mut dyn RenderSession, worker_id: usize) -> bool {
        for attempt in 0..MAX_CLEAR_ATTEMPTS {
            if !self.clear_overlays(session, worker_id).await {
                debug!("Worker {}: overlays clear after {} pass(es)", worker_id, attempt + 1);
                break;
            }
            sleep(DISMISS_SETTLE).await;
        }

        match session.find(&self.selectors.card).await {
            Ok(cards) => match cards.first() {
                Some(card) => card.is_displayed().await.unwrap_or(false),
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Dismisses displayed containers matching `selector` via their close
    /// controls, falling back to Escape when a container has none.
    async fn dismiss_containers(
        &self,
        session: &mut dyn RenderSession,
        selector: &str,
        worker_id: usize,
    ) -> bool {
        let Ok(containers) = session.find(selector).await else {
            return false;
        };

        let mut dismissed = false;
        let mut needs_escape = false;

        for container in &containers {
            if !container.is_displayed().await.unwrap_or(false) {
                continue;
            }

            let mut closed = false;
            for close_selector in CLOSE_SELECTORS {
                let Ok(buttons) = container.find(close_selector).await else {
                    continue;
                };
                if let Some(button) = buttons.first() {
                    if button.is_displayed().await.unwrap_or(false)
                        && button.click().await.is_ok()
                    {
                        info!(
                            "Worker {}: closed '{}' via {}",
                            worker_id, selector, close_selector
                        );
                        closed = true;
                        dismissed = true;
                        sleep(DISMISS_SETTLE).await;
                        break;
                    }
                }
            }

            if !closed {
                needs_escape = true;
            }
        }

        if needs_escape && session.execute_script(ESCAPE_SCRIPT).await.is_ok() {
            debug!("Worker {}: sent Escape for stubborn '{}'", worker_id, selector);
            dismissed = true;
        }

        dismissed
    }
}
