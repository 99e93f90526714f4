//! # Record Extractor
//!
//! Turns one rendered listing card into a [`ListingRecord`] plus a
//! confidence score. Three strategies are tried per field, in priority
//! order: structured lookup by semantic attribute, regex over the card's
//! visible text, regex over its raw markup. The first non-empty value per
//! field wins, and fields are independent of each other.
//!
//! Extraction never mutates shared state and never propagates an error: a
//! card whose handles have gone stale yields an empty record with
//! confidence 0.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::harvesting::records::ListingRecord;
use crate::infrastructure::config::SelectorProfile;
use crate::renderer::{Element, RenderError};

static KIND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(Appartement|Maison|Studio|Loft|Duplex|Triplex|Villa|Terrain|Local|Bureau)\b")
        .expect("kind pattern")
});

static PRICE_PER_M2_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new("([\\d \u{00A0}\u{202F}]+(?:[,.]\\d+)?)\\s*€\\s*/\\s*m[²2]").expect("price/m² pattern")
});

static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("(\\d[\\d \u{00A0}\u{202F}]{2,})\\s*€").expect("price pattern"));

static SURFACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:[,.]\d+)?)\s*m[²2]").expect("surface pattern"));

static ROOMS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*pièces?").expect("rooms pattern"));

static BEDROOMS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*chambres?").expect("bedrooms pattern"));

static FLOOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(RDC|\d+(?:er|e|ème)?\s*étage)\b").expect("floor pattern"));

static DELIVERY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(dès\s+(?:le\s+)?\d{1,2}/\d{1,2}/\d{4}|Livraison\s+\d{4})")
        .expect("delivery pattern")
});

static POSTAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d{5})\)").expect("postal pattern"));

static CITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([^,(]+?)\s*\(\d{5}\)").expect("city pattern"));

static CITY_LEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^,(]+?)\s*\(\d{5}\)").expect("leading city pattern"));

static ENERGY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-G])\b").expect("energy pattern"));

static HREF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"href="([^"]+)""#).expect("href pattern"));

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));

/// Strategy layer that resolved a field, ordered by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Markup = 1,
    Text = 2,
    Structured = 3,
}

/// Which layer resolved each critical field (url, price, surface, kind).
#[derive(Debug, Default, Clone, Copy)]
struct CriticalLayers {
    url: Option<Layer>,
    price: Option<Layer>,
    surface: Option<Layer>,
    kind: Option<Layer>,
}

impl CriticalLayers {
    fn weight(&self) -> u32 {
        [self.url, self.price, self.surface, self.kind]
            .iter()
            .flatten()
            .map(|layer| *layer as u32)
            .sum()
    }
}

/// Maps the critical-field resolution weight to a 1..=10 score.
///
/// Weights are 3 per structured hit, 2 per text-regex hit, 1 per markup hit,
/// so upgrading any field to a higher-priority layer can only raise the
/// score.
fn score(layers: &CriticalLayers) -> u8 {
    match layers.weight() {
        11..=12 => 10,
        9..=10 => 8,
        6..=8 => 7,
        4..=5 => 5,
        1..=3 => 3,
        _ => 1,
    }
}

/// Extracts listing records from rendered cards.
pub struct ListingExtractor {
    selectors: SelectorProfile,
    base_origin: Url,
}

impl ListingExtractor {
    /// # Errors
    /// Fails when `base_url` is not a parseable absolute URL.
    pub fn new(selectors: SelectorProfile, base_url: &str) -> Result<Self, url::ParseError> {
        let base_origin = Url::parse(base_url)?;
        Ok(Self { selectors, base_origin })
    }

    /// Extracts one record. Infallible by contract: card-level failures are
    /// recorded as confidence 0, never raised.
    pub async fn extract(&self, card: &dyn Element, page_number: u32) -> ListingRecord {
        match self.try_extract(card, page_number).await {
            Ok(record) => record,
            Err(e) => {
                debug!("Extraction failed on page {}: {}", page_number, e);
                ListingRecord { page_number, confidence: 0, ..ListingRecord::default() }
            }
        }
    }

    async fn try_extract(
        &self,
        card: &dyn Element,
        page_number: u32,
    ) -> Result<ListingRecord, RenderError> {
        // A card whose root handle is unreadable is a genuine extraction
        // failure; individual sub-lookups below are each allowed to miss.
        let visible_text = card.text().await?;
        let markup = card.outer_html().await.unwrap_or_default();

        let mut record = ListingRecord { page_number, ..ListingRecord::default() };
        let mut layers = CriticalLayers::default();

        self.structured_pass(card, &mut record, &mut layers).await;
        self.text_pass(&visible_text, &mut record, &mut layers);
        self.markup_pass(&markup, &mut record, &mut layers);

        if record.department.is_none() {
            record.department = record.postal_code.as_ref().map(|p| p[..2].to_string());
        }

        record.confidence = score(&layers);
        Ok(record)
    }

    /// Layer 1: lookups by stable semantic attributes.
    async fn structured_pass(
        &self,
        card: &dyn Element,
        record: &mut ListingRecord,
        layers: &mut CriticalLayers,
    ) {
        if let Some((href, title)) = self.structured_link(card).await {
            if let Some(url) = self.normalize_url(&href) {
                record.url = Some(url);
                layers.url = Some(Layer::Structured);
            }
            if let Some(title) = title {
                if let Some(kind) = first_capture(&KIND_RE, &title) {
                    record.kind = Some(kind);
                    layers.kind = Some(Layer::Structured);
                }
            }
        }

        if let Some(price_text) = self.select_text(card, &self.selectors.price).await {
            if let Some(per_m2) = first_capture(&PRICE_PER_M2_RE, &price_text) {
                record.price_per_area = Some(format!("{} €/m²", strip_separators(&per_m2)));
            }
            let without_per_m2 = PRICE_PER_M2_RE.replace_all(&price_text, "");
            if let Some(digits) = first_capture(&PRICE_RE, &without_per_m2) {
                record.price = Some(format!("{} €", strip_separators(&digits)));
                layers.price = Some(Layer::Structured);
            }
        }

        if let Some(facts) = self.select_text(card, &self.selectors.keyfacts).await {
            if let Some(surface) = first_capture(&SURFACE_RE, &facts) {
                record.surface = Some(format!("{surface} m²"));
                layers.surface = Some(Layer::Structured);
            }
            if let Some(rooms) = first_capture(&ROOMS_RE, &facts) {
                record.rooms = Some(format!("{rooms} pièce(s)"));
            }
            if let Some(bedrooms) = first_capture(&BEDROOMS_RE, &facts) {
                record.bedrooms = Some(format!("{bedrooms} chambre(s)"));
            }
            record.floor_or_delivery = first_capture(&FLOOR_RE, &facts)
                .or_else(|| first_capture(&DELIVERY_RE, &facts));
        }

        if let Some(address) = self.select_text(card, &self.selectors.address).await {
            if let Some(postal) = first_capture(&POSTAL_RE, &address) {
                record.department = Some(postal[..2].to_string());
                record.postal_code = Some(postal);
            }
            record.city = first_capture(&CITY_RE, &address)
                .or_else(|| first_capture(&CITY_LEADING_RE, &address));
            record.address = Some(address);
        }

        if let Some(badge) = self.select_text(card, &self.selectors.energy_badge).await {
            record.energy_class = first_capture(&ENERGY_RE, &badge);
        }

        if let Some(tags) = self.select_text(card, &self.selectors.tags).await {
            record.is_new = tags.to_lowercase().contains("nouveau");
        }
    }

    /// Layer 2: regex over the card's visible text, for fields the
    /// structured pass left unresolved.
    fn text_pass(&self, text: &str, record: &mut ListingRecord, layers: &mut CriticalLayers) {
        if text.is_empty() {
            return;
        }

        if record.kind.is_none() {
            if let Some(kind) = first_capture(&KIND_RE, text) {
                record.kind = Some(kind);
                layers.kind = Some(Layer::Text);
            }
        }
        if record.price_per_area.is_none() {
            if let Some(per_m2) = first_capture(&PRICE_PER_M2_RE, text) {
                record.price_per_area = Some(format!("{} €/m²", strip_separators(&per_m2)));
            }
        }
        if record.price.is_none() {
            let without_per_m2 = PRICE_PER_M2_RE.replace_all(text, "");
            if let Some(digits) = first_capture(&PRICE_RE, &without_per_m2) {
                record.price = Some(format!("{} €", strip_separators(&digits)));
                layers.price = Some(Layer::Text);
            }
        }
        if record.surface.is_none() {
            if let Some(surface) = first_capture(&SURFACE_RE, text) {
                record.surface = Some(format!("{surface} m²"));
                layers.surface = Some(Layer::Text);
            }
        }
        if record.rooms.is_none() {
            if let Some(rooms) = first_capture(&ROOMS_RE, text) {
                record.rooms = Some(format!("{rooms} pièce(s)"));
            }
        }
        if record.bedrooms.is_none() {
            if let Some(bedrooms) = first_capture(&BEDROOMS_RE, text) {
                record.bedrooms = Some(format!("{bedrooms} chambre(s)"));
            }
        }
        if record.floor_or_delivery.is_none() {
            record.floor_or_delivery =
                first_capture(&FLOOR_RE, text).or_else(|| first_capture(&DELIVERY_RE, text));
        }
        if record.postal_code.is_none() {
            if let Some(postal) = first_capture(&POSTAL_RE, text) {
                record.department = Some(postal[..2].to_string());
                record.postal_code = Some(postal);
            }
        }
    }

    /// Layer 3: regex over the raw markup with tags stripped; also the last
    /// resort for the listing URL via raw href attributes.
    fn markup_pass(&self, markup: &str, record: &mut ListingRecord, layers: &mut CriticalLayers) {
        if markup.is_empty() {
            return;
        }

        if record.url.is_none() {
            let candidate = HREF_RE
                .captures_iter(markup)
                .map(|c| c[1].to_string())
                .find(|href| href.contains(&self.selectors.listing_path));
            if let Some(url) = candidate.and_then(|href| self.normalize_url(&href)) {
                record.url = Some(url);
                layers.url = Some(Layer::Markup);
            }
        }

        let flat = TAG_RE.replace_all(markup, " ");

        if record.kind.is_none() {
            if let Some(kind) = first_capture(&KIND_RE, &flat) {
                record.kind = Some(kind);
                layers.kind = Some(Layer::Markup);
            }
        }
        if record.price.is_none() {
            let without_per_m2 = PRICE_PER_M2_RE.replace_all(&flat, "");
            if let Some(digits) = first_capture(&PRICE_RE, &without_per_m2) {
                record.price = Some(format!("{} €", strip_separators(&digits)));
                layers.price = Some(Layer::Markup);
            }
        }
        if record.surface.is_none() {
            if let Some(surface) = first_capture(&SURFACE_RE, &flat) {
                record.surface = Some(format!("{surface} m²"));
                layers.surface = Some(Layer::Markup);
            }
        }
        if record.postal_code.is_none() {
            if let Some(postal) = first_capture(&POSTAL_RE, &flat) {
                record.department = Some(postal[..2].to_string());
                record.postal_code = Some(postal);
            }
        }
    }

    /// Primary link lookup with a generic anchor fallback, returning
    /// (href, title).
    async fn structured_link(&self, card: &dyn Element) -> Option<(String, Option<String>)> {
        if let Ok(links) = card.find(&self.selectors.link).await {
            if let Some(link) = links.first() {
                if let Ok(Some(href)) = link.attr("href").await {
                    let title = link.attr("title").await.ok().flatten();
                    return Some((href, title));
                }
            }
        }

        // Markup drifts; any anchor pointing into the listing path will do.
        let anchors = card.find("a").await.ok()?;
        for anchor in &anchors {
            if let Ok(Some(href)) = anchor.attr("href").await {
                if href.contains(&self.selectors.listing_path) {
                    return Some((href, None));
                }
            }
        }
        None
    }

    async fn select_text(&self, card: &dyn Element, selector: &str) -> Option<String> {
        let found = card.find(selector).await.ok()?;
        let element = found.first()?;
        let text = element.text().await.ok()?;
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn normalize_url(&self, href: &str) -> Option<String> {
        if href.starts_with("http://") || href.starts_with("https://") {
            return Some(href.to_string());
        }
        self.base_origin.join(href).ok().map(|joined| joined.to_string())
    }
}

fn first_capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack).map(|caps| caps[1].trim().to_string())
}

/// Strips thousands separators, including the non-breaking and narrow
/// non-breaking space variants the target site mixes in.
fn strip_separators(raw: &str) -> String {
    raw.chars().filter(|c| !matches!(c, ' ' | '\u{00A0}' | '\u{202F}')).collect()
}
