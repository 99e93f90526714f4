//! # Content Loader
//!
//! Drives the lazy-load mechanism of a result page: incremental eased
//! scrolling toward the (growing) document height, with random jitter,
//! hesitations and occasional scroll-backs so the pacing does not look
//! machine-generated. Loading converges when the primary element count
//! stops changing for two consecutive steps.

use tokio::time::sleep;
use tracing::{debug, info};

use crate::infrastructure::config::{DelayWindow, ScrollProfile};
use crate::renderer::{RenderError, RenderSession, SCROLL_HEIGHT_SCRIPT, SCROLL_OFFSET_SCRIPT};

/// Steps with an unchanged element count before loading counts as converged.
const STABLE_STEPS: u32 = 2;

/// Scroll-driven lazy loading for one page.
pub struct ContentLoader {
    scroll: ScrollProfile,
    lazy_wait: DelayWindow,
    settle: DelayWindow,
    card_selector: String,
}

impl ContentLoader {
    #[must_use]
    pub fn new(
        scroll: ScrollProfile,
        lazy_wait: DelayWindow,
        settle: DelayWindow,
        card_selector: String,
    ) -> Self {
        Self { scroll, lazy_wait, settle, card_selector }
    }

    /// Scrolls until the primary element count converges, returns to the
    /// top and reports the final count. A count of 0 is the page-level
    /// failure signal.
    ///
    /// # Errors
    /// Propagates scroll and script failures; element lookups that fail
    /// mid-scroll only skip that step's convergence check.
    pub async fn load_all(
        &self,
        session: &mut dyn RenderSession,
        worker_id: usize,
        page_number: u32,
    ) -> Result<usize, RenderError> {
        debug!("Worker {}: lazy-loading page {}", worker_id, page_number);

        let mut last_count = 0usize;
        let mut stable = 0u32;

        for step in 0..self.scroll.steps {
            // The document grows as content loads, so the height is
            // re-read every step.
            let height = self.script_number(session, SCROLL_HEIGHT_SCRIPT).await?;
            let fraction = f64::from(step + 1) / f64::from(self.scroll.steps);
            let jitter = f64::from(fastrand::i32(-self.scroll.jitter_px..=self.scroll.jitter_px));
            let target = (height * fraction + jitter).max(0.0);

            let current = self.script_number(session, SCROLL_OFFSET_SCRIPT).await?;
            self.eased_scroll(session, current, target, ease_out_cubic).await?;

            if fastrand::f64() < self.scroll.hesitation_chance {
                sleep(self.scroll.hesitation.sample()).await;
            }

            sleep(self.lazy_wait.sample()).await;

            if fastrand::f64() < self.scroll.scroll_back_chance {
                self.scroll_back(session).await?;
            }

            match session.find(&self.card_selector).await {
                Ok(cards) => {
                    let count = cards.len();
                    if count == last_count {
                        stable += 1;
                        if stable >= STABLE_STEPS {
                            debug!(
                                "Worker {}: element count stable at {} after step {}",
                                worker_id,
                                count,
                                step + 1
                            );
                            break;
                        }
                    } else {
                        stable = 0;
                        last_count = count;
                    }
                }
                Err(e) => debug!("Worker {}: count check failed mid-scroll: {}", worker_id, e),
            }
        }

        // Back to the top, eased as well, then let the page settle before
        // the caller takes its final element snapshot.
        let current = self.script_number(session, SCROLL_OFFSET_SCRIPT).await?;
        self.eased_scroll(session, current, 0.0, ease_out_quadratic).await?;
        session.scroll_to(0.0).await?;
        sleep(self.settle.sample()).await;

        let final_count = match session.find(&self.card_selector).await {
            Ok(cards) => cards.len(),
            Err(_) => 0,
        };

        info!("Worker {}: page {} loaded {} cards", worker_id, page_number, final_count);
        Ok(final_count)
    }

    /// Smooth scroll from `from` to `to` in randomized micro-increments.
    async fn eased_scroll(
        &self,
        session: &mut dyn RenderSession,
        from: f64,
        to: f64,
        ease: fn(f64) -> f64,
    ) -> Result<(), RenderError> {
        let (lo, hi) = self.scroll.micro_steps;
        let increments = fastrand::u32(lo..=hi.max(lo));

        for i in 1..=increments {
            let progress = f64::from(i) / f64::from(increments);
            let y = from + (to - from) * ease(progress);
            session.scroll_to(y.max(0.0)).await?;
            sleep(self.scroll.micro_pause.sample()).await;
        }
        Ok(())
    }

    /// Brief scroll-up and return, mimicking a reader double-checking
    /// content above the fold.
    async fn scroll_back(&self, session: &mut dyn RenderSession) -> Result<(), RenderError> {
        let (lo, hi) = self.scroll.scroll_back_px;
        let amplitude = f64::from(fastrand::u32(lo..=hi.max(lo)));
        let current = self.script_number(session, SCROLL_OFFSET_SCRIPT).await?;

        session.scroll_to((current - amplitude).max(0.0)).await?;
        sleep(self.scroll.micro_pause.sample()).await;
        session.scroll_to(current).await?;
        sleep(self.scroll.micro_pause.sample()).await;
        Ok(())
    }

    async fn script_number(
        &self,
        session: &mut dyn RenderSession,
        js: &str,
    ) -> Result<f64, RenderError> {
        let value = session.execute_script(js).await?;
        Ok(value.as_f64().unwrap_or(0.0))
    }
}

fn ease_out_cubic(progress: f64) -> f64 {
    1.0 - (1.0 - progress).powi(3)
}

fn ease_out_quadratic(progress: f64) -> f64 {
    1.0 - (1.0 - progress).powi(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    use crate::infrastructure::config::{DelayWindow, ScrollProfile};
    use crate::renderer::{Element, ElementRect};

    fn fast_loader(card_selector: &str) -> ContentLoader {
        let scroll = ScrollProfile {
            micro_pause: DelayWindow::new(0, 0),
            hesitation: DelayWindow::new(0, 0),
            ..ScrollProfile::default()
        };
        ContentLoader::new(
            scroll,
            DelayWindow::new(0, 0),
            DelayWindow::new(0, 0),
            card_selector.to_string(),
        )
    }

    #[derive(Clone)]
    struct NullElement;

    #[async_trait]
    impl Element for NullElement {
        async fn text(&self) -> Result<String, RenderError> {
            Ok(String::new())
        }
        async fn attr(&self, _: &str) -> Result<Option<String>, RenderError> {
            Ok(None)
        }
        async fn outer_html(&self) -> Result<String, RenderError> {
            Ok(String::new())
        }
        async fn find(&self, _: &str) -> Result<Vec<Box<dyn Element>>, RenderError> {
            Ok(Vec::new())
        }
        async fn is_displayed(&self) -> Result<bool, RenderError> {
            Ok(true)
        }
        async fn rect(&self) -> Result<ElementRect, RenderError> {
            Ok(ElementRect { width: 0.0, height: 0.0 })
        }
        async fn click(&self) -> Result<(), RenderError> {
            Ok(())
        }
    }

    /// Reveals `batch` more cards every time the viewport moves down, up to
    /// `total`, like a lazy-loading result list.
    struct LazySession {
        total: usize,
        batch: usize,
        revealed: usize,
        offset: f64,
    }

    #[async_trait]
    impl RenderSession for LazySession {
        async fn navigate(&mut self, _: &str) -> Result<(), RenderError> {
            Ok(())
        }
        async fn execute_script(&mut self, js: &str) -> Result<Value, RenderError> {
            if js == SCROLL_HEIGHT_SCRIPT {
                return Ok(json!(2000.0 + self.revealed as f64 * 50.0));
            }
            if js == SCROLL_OFFSET_SCRIPT {
                return Ok(json!(self.offset));
            }
            Ok(Value::Null)
        }
        async fn find(&mut self, _: &str) -> Result<Vec<Box<dyn Element>>, RenderError> {
            Ok((0..self.revealed).map(|_| Box::new(NullElement) as Box<dyn Element>).collect())
        }
        async fn scroll_to(&mut self, y: f64) -> Result<(), RenderError> {
            if y > self.offset {
                self.revealed = (self.revealed + self.batch).min(self.total);
            }
            self.offset = y;
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

    #[tokio::test]
    async fn loader_reveals_all_cards_and_converges() {
        let loader = fast_loader("div.card");
        let mut session = LazySession { total: 25, batch: 25, revealed: 0, offset: 0.0 };

        let count = loader.load_all(&mut session, 0, 1).await.unwrap();
        assert_eq!(count, 25);
    }

    #[test]
    fn empty_page_reports_zero() {
        tokio_test::block_on(async {
            let loader = fast_loader("div.card");
            let mut session = LazySession { total: 0, batch: 0, revealed: 0, offset: 0.0 };

            let count = loader.load_all(&mut session, 0, 7).await.unwrap();
            assert_eq!(count, 0);
        });
    }
}
