//! # Harvest Configuration
//!
//! All site-specific and tunable values live here: selectors are volatile
//! per-site data, pacing windows and quality thresholds are policy. The
//! config is a single JSON document loaded beside the binary; every field
//! has a default so a missing or partial file still yields a runnable
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Complete harvester configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Search-results URL without the page parameter.
    pub base_url: String,

    /// Directory receiving the CSV output and debug artifacts.
    pub output_dir: PathBuf,

    /// User agents assigned round-robin to worker sessions.
    pub user_agents: Vec<String>,

    /// Viewport pool for randomization at session setup and during breaks.
    pub viewports: Vec<Viewport>,

    pub selectors: SelectorProfile,
    pub delays: DelayProfile,
    pub scroll: ScrollProfile,
    pub retry: RetryPolicy,
    pub quality: QualityPolicy,
}

impl HarvestConfig {
    /// Loads the configuration from `path`, falling back to defaults when
    /// the file does not exist.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// URL of one result page: base query plus page index.
    #[must_use]
    pub fn page_url(&self, page_number: u32) -> String {
        let sep = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}page={}", self.base_url, sep, page_number)
    }

    /// Picks a random viewport from the configured pool.
    #[must_use]
    pub fn random_viewport(&self) -> Viewport {
        if self.viewports.is_empty() {
            return Viewport { width: 1920, height: 1080 };
        }
        self.viewports[fastrand::usize(..self.viewports.len())]
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.seloger.com/classified-search?distributionTypes=Buy&estateTypes=House,Apartment".to_string(),
            output_dir: PathBuf::from("output"),
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            ],
            viewports: vec![
                Viewport { width: 1920, height: 1080 },
                Viewport { width: 1366, height: 768 },
                Viewport { width: 1536, height: 864 },
                Viewport { width: 1440, height: 900 },
                Viewport { width: 1600, height: 900 },
                Viewport { width: 1280, height: 720 },
                Viewport { width: 1680, height: 1050 },
            ],
            selectors: SelectorProfile::default(),
            delays: DelayProfile::default(),
            scroll: ScrollProfile::default(),
            retry: RetryPolicy::default(),
            quality: QualityPolicy::default(),
        }
    }
}

/// Rendering viewport dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Site-specific selectors. These change whenever the target redesigns its
/// markup, which is why they are configuration rather than code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorProfile {
    /// Primary listing card container.
    pub card: String,

    /// Covering link inside a card.
    pub link: String,

    /// Price container inside a card.
    pub price: String,

    /// Key-facts block (surface, rooms, bedrooms, floor).
    pub keyfacts: String,

    /// Address line inside a card.
    pub address: String,

    /// Tag strip (new-build marker and similar).
    pub tags: String,

    /// Energy-performance badge.
    pub energy_badge: String,

    /// Path fragment identifying listing-detail URLs.
    pub listing_path: String,

    /// Injected script that clicks the consent-accept control inside the
    /// consent widget's isolated sub-document; must return whether a
    /// control was clicked.
    pub consent_script: String,
}

impl Default for SelectorProfile {
    fn default() -> Self {
        Self {
            card: "div[data-testid='serp-core-classified-card-testid']".to_string(),
            link: "a[data-testid='card-mfe-covering-link-testid']".to_string(),
            price: "div[data-testid='cardmfe-price-testid']".to_string(),
            keyfacts: "div[data-testid='cardmfe-keyfacts-testid']".to_string(),
            address: "div[data-testid='cardmfe-description-box-address']".to_string(),
            tags: "div[data-testid='cardmfe-tag-testid']".to_string(),
            energy_badge: "span[data-testid='card-mfe-energy-performance-class']".to_string(),
            listing_path: "/annonces/".to_string(),
            consent_script: "const root = document.querySelector('#usercentrics-root'); \
                 if (root && root.shadowRoot) { \
                   const btn = root.shadowRoot.querySelector('[data-testid=\"uc-accept-all-button\"]'); \
                   if (btn && btn.offsetParent !== null) { btn.click(); return true; } \
                 } \
                 return false"
                .to_string(),
        }
    }
}

/// A randomized wait window in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DelayWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayWindow {
    #[must_use]
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Samples a uniform random duration from the window.
    #[must_use]
    pub fn sample(&self) -> Duration {
        let upper = self.max_ms.max(self.min_ms);
        Duration::from_millis(fastrand::u64(self.min_ms..=upper))
    }
}

/// Human-pacing delay windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayProfile {
    /// Wait after navigation before touching the page.
    pub page_load: DelayWindow,

    /// Wait after each scroll step for lazy content.
    pub lazy_scroll: DelayWindow,

    /// Settle wait after returning to the top of the document.
    pub final_settle: DelayWindow,

    /// Pause between extracting consecutive cards.
    pub between_listings: DelayWindow,

    /// Pause between consecutive pages of one shard.
    pub between_pages: DelayWindow,

    /// Backoff before a retry round; deliberately longer than the
    /// inter-page delay.
    pub retry_backoff: DelayWindow,

    /// Inclusive range of page counts between simulated inactivity breaks.
    pub break_every_pages: (u32, u32),

    /// Duration window of a simulated inactivity break.
    pub break_duration: DelayWindow,
}

impl Default for DelayProfile {
    fn default() -> Self {
        Self {
            page_load: DelayWindow::new(2_000, 4_000),
            lazy_scroll: DelayWindow::new(800, 1_500),
            final_settle: DelayWindow::new(1_000, 1_800),
            between_listings: DelayWindow::new(50, 150),
            between_pages: DelayWindow::new(500, 1_500),
            retry_backoff: DelayWindow::new(5_000, 10_000),
            break_every_pages: (8, 15),
            break_duration: DelayWindow::new(5_000, 15_000),
        }
    }
}

/// Shape of the lazy-load scroll pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollProfile {
    /// Number of coarse scroll steps toward the bottom.
    pub steps: u32,

    /// Inclusive range of eased micro-increments per step.
    pub micro_steps: (u32, u32),

    /// Pause between micro-increments.
    pub micro_pause: DelayWindow,

    /// Probability of a mid-scroll hesitation.
    pub hesitation_chance: f64,

    pub hesitation: DelayWindow,

    /// Probability of scrolling back up briefly before continuing.
    pub scroll_back_chance: f64,

    /// Inclusive amplitude range of a scroll-back, in pixels.
    pub scroll_back_px: (u32, u32),

    /// Random offset applied to each scroll target, in pixels.
    pub jitter_px: i32,
}

impl Default for ScrollProfile {
    fn default() -> Self {
        Self {
            steps: 5,
            micro_steps: (8, 15),
            micro_pause: DelayWindow::new(30, 120),
            hesitation_chance: 0.3,
            hesitation: DelayWindow::new(300, 800),
            scroll_back_chance: 0.25,
            scroll_back_px: (50, 150),
            jitter_px: 10,
        }
    }
}

/// Retry bounds for failed and low-quality pages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum retry attempts per page across all rounds.
    pub max_attempts: u32,

    /// Maximum retry rounds after the parallel phase.
    pub max_rounds: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, max_rounds: 2 }
    }
}

/// Thresholds deciding when a structurally successful page is still
/// re-queued for retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityPolicy {
    /// Minimum accepted records per page.
    pub min_listings_per_page: usize,

    /// Minimum ratio of valid records to accepted records.
    pub min_valid_ratio: f64,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self { min_listings_per_page: 15, min_valid_ratio: 0.5 }
    }
}

impl QualityPolicy {
    /// Whether a page with `emitted` accepted records of which `valid`
    /// passed validation should be re-queued.
    #[must_use]
    pub fn wants_retry(&self, emitted: usize, valid: usize) -> bool {
        if emitted < self.min_listings_per_page {
            return true;
        }
        emitted > 0 && (valid as f64) < (emitted as f64) * self.min_valid_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_appends_with_correct_separator() {
        let mut config = HarvestConfig::default();
        assert!(config.page_url(3).ends_with("&page=3"));

        config.base_url = "https://example.com/search".to_string();
        assert_eq!(config.page_url(1), "https://example.com/search?page=1");
    }

    #[test]
    fn delay_window_stays_in_bounds() {
        let window = DelayWindow::new(100, 200);
        for _ in 0..64 {
            let sampled = window.sample().as_millis() as u64;
            assert!((100..=200).contains(&sampled));
        }
    }

    #[test]
    fn quality_policy_flags_thin_and_dirty_pages() {
        let policy = QualityPolicy::default();
        assert!(policy.wants_retry(5, 5), "below minimum count");
        assert!(policy.wants_retry(20, 8), "below valid ratio");
        assert!(!policy.wants_retry(20, 18));
    }

    #[tokio::test]
    async fn missing_config_file_falls_back_to_defaults() {
        let config = HarvestConfig::load_or_default(Path::new("/nonexistent/ih.json"))
            .await
            .unwrap();
        assert_eq!(config.retry.max_rounds, 2);
        assert_eq!(config.quality.min_listings_per_page, 15);
    }

    #[tokio::test]
    async fn partial_config_file_is_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("immo-harvest.json");
        tokio::fs::write(&path, r#"{"quality": {"min_listings_per_page": 3}}"#)
            .await
            .unwrap();

        let config = HarvestConfig::load_or_default(&path).await.unwrap();
        assert_eq!(config.quality.min_listings_per_page, 3);
        assert_eq!(config.retry.max_attempts, 3);
    }
}
