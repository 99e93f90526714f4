//! # Replay Renderer
//!
//! Offline rendering backend over a directory of captured page markup
//! (`page-<n>.html`). It parses with `scraper`, simulates lazy loading by
//! revealing more matches as the caller scrolls, and simulates a consent
//! overlay that the clearance script dismisses once per session. This is
//! the backend the test suite and the CLI's replay mode run against; live
//! automation backends implement the same traits out of tree.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{Value, json};

use super::{Element, ElementRect, RenderError, RenderSession, SessionFactory};

/// Fraction of matches visible right after navigation.
const INITIAL_REVEAL: f64 = 0.4;

/// Additional fraction revealed by each downward scroll.
const REVEAL_PER_SCROLL: f64 = 0.2;

/// Creates replay sessions over one capture directory.
pub struct ReplaySessionFactory {
    root: PathBuf,
}

impl ReplaySessionFactory {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SessionFactory for ReplaySessionFactory {
    async fn create_session(&self, worker_id: usize) -> Result<Box<dyn RenderSession>, RenderError> {
        if !self.root.is_dir() {
            return Err(RenderError::Setup(format!(
                "capture directory '{}' does not exist",
                self.root.display()
            )));
        }
        Ok(Box::new(ReplaySession::new(self.root.clone(), worker_id)))
    }
}

/// One replayed browsing session.
pub struct ReplaySession {
    root: PathBuf,
    worker_id: usize,
    html: String,
    scroll_offset: f64,
    reveal: f64,
    consent_pending: bool,
    viewport: (u32, u32),
}

impl ReplaySession {
    #[must_use]
    pub fn new(root: PathBuf, worker_id: usize) -> Self {
        Self {
            root,
            worker_id,
            html: String::new(),
            scroll_offset: 0.0,
            reveal: INITIAL_REVEAL,
            consent_pending: true,
            viewport: (1280, 720),
        }
    }

    #[must_use]
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }

    fn capture_path(&self, url: &str) -> Result<PathBuf, RenderError> {
        let page = url
            .rsplit_once("page=")
            .and_then(|(_, tail)| {
                let digits: String =
                    tail.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse::<u32>().ok()
            })
            .ok_or_else(|| RenderError::Navigation {
                url: url.to_string(),
                reason: "no page parameter in URL".to_string(),
            })?;
        Ok(self.root.join(format!("page-{page}.html")))
    }

    /// Number of matches currently visible under the lazy-load simulation.
    fn visible_count(&self, matches: usize) -> usize {
        ((matches as f64) * self.reveal.min(1.0)).ceil() as usize
    }
}

#[async_trait]
impl RenderSession for ReplaySession {
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
        let path = self.capture_path(url)?;
        self.html =
            tokio::fs::read_to_string(&path).await.map_err(|e| RenderError::Navigation {
                url: url.to_string(),
                reason: format!("cannot read capture {}: {e}", path.display()),
            })?;
        self.scroll_offset = 0.0;
        self.reveal = INITIAL_REVEAL;
        Ok(())
    }

    async fn execute_script(&mut self, js: &str) -> Result<Value, RenderError> {
        if js.contains("scrollHeight") {
            return Ok(json!(2_000.0 + self.html.len() as f64 / 100.0));
        }
        if js.contains("pageYOffset") {
            return Ok(json!(self.scroll_offset));
        }
        if js.contains("usercentrics") || js.contains("shadowRoot") {
            let clicked = self.consent_pending;
            self.consent_pending = false;
            return Ok(Value::Bool(clicked));
        }
        if js.contains("Escape") {
            return Ok(Value::Bool(true));
        }
        Ok(Value::Null)
    }

    async fn find(&mut self, selector: &str) -> Result<Vec<Box<dyn Element>>, RenderError> {
        let parsed = Selector::parse(selector)
            .map_err(|_| RenderError::Lookup(selector.to_string()))?;

        let document = Html::parse_document(&self.html);
        let all: Vec<ReplayElement> =
            document.select(&parsed).map(ReplayElement::from_element_ref).collect();

        let visible = self.visible_count(all.len());
        Ok(all
            .into_iter()
            .take(visible)
            .map(|element| Box::new(element) as Box<dyn Element>)
            .collect())
    }

    async fn scroll_to(&mut self, y: f64) -> Result<(), RenderError> {
        if y > self.scroll_offset {
            self.reveal = (self.reveal + REVEAL_PER_SCROLL).min(1.0);
        }
        self.scroll_offset = y;
        Ok(())
    }

    async fn window_size(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.viewport = (width, height);
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, RenderError> {
        // Nothing is actually rendered offline; an empty image tells the
        // debug capture to skip the artifact.
        Ok(Vec::new())
    }

    async fn page_source(&mut self) -> Result<String, RenderError> {
        Ok(self.html.clone())
    }
}

/// Materialized snapshot of one matched element. Replayed documents never
/// mutate, so snapshots cannot go stale.
#[derive(Debug, Clone)]
pub struct ReplayElement {
    html: String,
    text: String,
    attrs: HashMap<String, String>,
}

impl ReplayElement {
    fn from_element_ref(element: scraper::ElementRef<'_>) -> Self {
        let attrs = element
            .value()
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Self {
            html: element.html(),
            text: squish(&element.text().collect::<Vec<_>>().join(" ")),
            attrs,
        }
    }
}

#[async_trait]
impl Element for ReplayElement {
    async fn text(&self) -> Result<String, RenderError> {
        Ok(self.text.clone())
    }

    async fn attr(&self, name: &str) -> Result<Option<String>, RenderError> {
        Ok(self.attrs.get(name).cloned())
    }

    async fn outer_html(&self) -> Result<String, RenderError> {
        Ok(self.html.clone())
    }

    async fn find(&self, selector: &str) -> Result<Vec<Box<dyn Element>>, RenderError> {
        let parsed = Selector::parse(selector)
            .map_err(|_| RenderError::Lookup(selector.to_string()))?;

        let fragment = Html::parse_fragment(&self.html);
        Ok(fragment
            .select(&parsed)
            .map(|element| Box::new(ReplayElement::from_element_ref(element)) as Box<dyn Element>)
            .collect())
    }

    async fn is_displayed(&self) -> Result<bool, RenderError> {
        Ok(true)
    }

    async fn rect(&self) -> Result<ElementRect, RenderError> {
        Ok(ElementRect { width: 800.0, height: 160.0 })
    }

    async fn click(&self) -> Result<(), RenderError> {
        Ok(())
    }
}

fn squish(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session_with_page(html: &str) -> (tempfile::TempDir, ReplaySession) {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("page-1.html"), html).await.unwrap();
        let session = ReplaySession::new(dir.path().to_path_buf(), 0);
        (dir, session)
    }

    #[tokio::test]
    async fn lazy_reveal_grows_with_scrolling() {
        let html = format!(
            "<html><body>{}</body></html>",
            "<div class='card'>x</div>".repeat(10)
        );
        let (_dir, mut session) = session_with_page(&html).await;

        session.navigate("https://replay.local/search?page=1").await.unwrap();
        let first = session.find("div.card").await.unwrap().len();
        assert!(first < 10, "initial reveal is partial, saw {first}");

        for step in 1..=5 {
            session.scroll_to(step as f64 * 400.0).await.unwrap();
        }
        let after = session.find("div.card").await.unwrap().len();
        assert_eq!(after, 10);
    }

    #[tokio::test]
    async fn consent_script_fires_once_per_session() {
        let (_dir, mut session) = session_with_page("<html><body></body></html>").await;
        session.navigate("https://replay.local/search?page=1").await.unwrap();

        let script = "const root = document.querySelector('#usercentrics-root'); ...";
        assert_eq!(session.execute_script(script).await.unwrap(), Value::Bool(true));
        assert_eq!(session.execute_script(script).await.unwrap(), Value::Bool(false));
    }

    #[tokio::test]
    async fn missing_capture_is_a_navigation_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ReplaySession::new(dir.path().to_path_buf(), 0);

        let result = session.navigate("https://replay.local/search?page=4").await;
        assert!(matches!(result, Err(RenderError::Navigation { .. })));
    }

    #[tokio::test]
    async fn element_snapshot_exposes_text_attrs_and_children() {
        let html = "<html><body><div class='card'>\
                    <a href='/annonces/1' title='Maison'>Maison 120 m²</a>\
                    </div></body></html>";
        let (_dir, mut session) = session_with_page(html).await;
        session.navigate("https://replay.local/search?page=1").await.unwrap();
        // Reveal everything before asserting.
        session.scroll_to(2_000.0).await.unwrap();
        session.scroll_to(4_000.0).await.unwrap();
        session.scroll_to(6_000.0).await.unwrap();

        let cards = session.find("div.card").await.unwrap();
        let card = &cards[0];
        assert_eq!(card.text().await.unwrap(), "Maison 120 m²");

        let links = card.find("a").await.unwrap();
        assert_eq!(links[0].attr("href").await.unwrap().as_deref(), Some("/annonces/1"));
        assert_eq!(links[0].attr("title").await.unwrap().as_deref(), Some("Maison"));
    }

    #[tokio::test]
    async fn factory_rejects_missing_capture_directory() {
        let factory = ReplaySessionFactory::new("/nonexistent/captures");
        let result = factory.create_session(0).await;
        assert!(matches!(result, Err(RenderError::Setup(_))));
    }
}
