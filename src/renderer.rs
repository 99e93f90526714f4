//! # Page Renderer Adapter
//!
//! Contract for the external rendering capability (page load, script
//! execution, DOM queries). The harvesting core never assumes a specific
//! automation technology; any backend that can satisfy these operations can
//! drive a worker session. Element handles may go stale across reloads, so
//! every read is fallible and callers catch instead of assuming validity.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod replay;

pub use replay::{ReplaySession, ReplaySessionFactory};

/// Script returning the current document scroll height.
pub const SCROLL_HEIGHT_SCRIPT: &str = "return document.body.scrollHeight";

/// Script returning the current vertical scroll offset.
pub const SCROLL_OFFSET_SCRIPT: &str = "return window.pageYOffset";

/// Script dispatching an Escape keydown to the document body.
pub const ESCAPE_SCRIPT: &str = "document.body.dispatchEvent(new KeyboardEvent('keydown', \
     {key: 'Escape', bubbles: true})); return true";

/// Errors surfaced by a rendering backend.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("navigation to '{url}' failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("script execution failed: {0}")]
    Script(String),

    #[error("element lookup failed for selector '{0}'")]
    Lookup(String),

    #[error("stale element handle")]
    StaleElement,

    #[error("rendering session lost: {0}")]
    SessionLost(String),

    #[error("session setup failed: {0}")]
    Setup(String),
}

impl RenderError {
    /// A fatal error means the session cannot process any further page;
    /// the remaining shard is surrendered to the retry orchestrator.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionLost(_) | Self::Setup(_))
    }
}

/// On-screen bounding box of an element, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementRect {
    pub width: f64,
    pub height: f64,
}

/// A handle to a rendered DOM element.
///
/// Handles are snapshots of live browser state: a reload or re-render can
/// invalidate them at any time, in which case reads return
/// [`RenderError::StaleElement`].
#[async_trait]
pub trait Element: Send + Sync {
    /// Visible text content of the element.
    async fn text(&self) -> Result<String, RenderError>;

    /// Value of an attribute, if present.
    async fn attr(&self, name: &str) -> Result<Option<String>, RenderError>;

    /// Raw outer markup of the element.
    async fn outer_html(&self) -> Result<String, RenderError>;

    /// Scoped lookup below this element.
    async fn find(&self, selector: &str) -> Result<Vec<Box<dyn Element>>, RenderError>;

    /// Whether the element is currently visible.
    async fn is_displayed(&self) -> Result<bool, RenderError>;

    /// Current bounding box.
    async fn rect(&self) -> Result<ElementRect, RenderError>;

    /// Native click on the element.
    async fn click(&self) -> Result<(), RenderError>;
}

/// One isolated rendering session, exclusively owned by a single worker.
#[async_trait]
pub trait RenderSession: Send {
    /// Loads the given URL and waits for the initial document.
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError>;

    /// Executes JavaScript in the page and returns its result.
    async fn execute_script(&mut self, js: &str) -> Result<Value, RenderError>;

    /// Document-wide element lookup.
    async fn find(&mut self, selector: &str) -> Result<Vec<Box<dyn Element>>, RenderError>;

    /// Scrolls the viewport to the given vertical offset.
    async fn scroll_to(&mut self, y: f64) -> Result<(), RenderError>;

    /// Resizes the rendering viewport.
    async fn window_size(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    /// Captures a screenshot of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, RenderError>;

    /// Full markup of the current document.
    async fn page_source(&mut self) -> Result<String, RenderError>;
}

/// Creates rendering sessions for the worker pool.
///
/// A factory failure for one worker shrinks the pool; the run only aborts
/// when no session at all could be created.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(&self, worker_id: usize) -> Result<Box<dyn RenderSession>, RenderError>;
}
