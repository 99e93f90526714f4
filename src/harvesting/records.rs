//! # Listing Records
//!
//! The immutable record produced by the extractor for one listing card.
//! Optional fields stay `Option<String>` internally; the single well-known
//! missing token is applied only at the serialization boundary.

use serde::{Deserialize, Serialize};

/// Token written for absent fields in tabular output.
pub const MISSING_FIELD_TOKEN: &str = "N/A";

/// Column order of the tabular output, fixed across runs.
pub const CSV_COLUMNS: [&str; 16] = [
    "Page_Number",
    "Type",
    "Price",
    "Price_Per_M2",
    "Surface",
    "Rooms",
    "Bedrooms",
    "Floor_Or_Delivery",
    "Address",
    "City",
    "Postal_Code",
    "Department",
    "Energy_Class",
    "Is_New",
    "URL",
    "Confidence_Score",
];

/// One extracted listing. Constructed by the extractor, never mutated
/// downstream except for formatting at the sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingRecord {
    /// Result page the listing was found on.
    pub page_number: u32,

    /// Property kind (appartement, maison, ...).
    pub kind: Option<String>,

    /// Asking price, separators stripped, as a display string ("250000 €").
    pub price: Option<String>,

    /// Price per square meter, as displayed on the card.
    pub price_per_area: Option<String>,

    /// Living or plot surface ("50 m²").
    pub surface: Option<String>,

    pub rooms: Option<String>,
    pub bedrooms: Option<String>,

    /// Floor ordinal for existing stock, delivery date for new builds.
    pub floor_or_delivery: Option<String>,

    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,

    /// First two digits of the postal code.
    pub department: Option<String>,

    /// DPE letter A-G when the card carries the badge.
    pub energy_class: Option<String>,

    /// Whether the card is tagged as a new-build program.
    pub is_new: bool,

    /// Absolute listing URL; also the deduplication key.
    pub url: Option<String>,

    /// Extraction confidence, 0 (extractor error) to 10 (all critical
    /// fields via structured lookup).
    pub confidence: u8,
}

impl ListingRecord {
    /// A record is valid when it has a URL and at least one of price,
    /// surface or kind. Everything else is kept for inspection but does not
    /// count toward page quality.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let has = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());
        has(&self.url) && (has(&self.price) || has(&self.surface) || has(&self.kind))
    }

    /// Serializes the record into the fixed column order of
    /// [`CSV_COLUMNS`], substituting the missing token for absent fields.
    #[must_use]
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.page_number.to_string(),
            format_field(&self.kind),
            format_field(&self.price),
            format_field(&self.price_per_area),
            format_field(&self.surface),
            format_field(&self.rooms),
            format_field(&self.bedrooms),
            format_field(&self.floor_or_delivery),
            format_field(&self.address),
            format_field(&self.city),
            format_field(&self.postal_code),
            format_field(&self.department),
            format_field(&self.energy_class),
            if self.is_new { "Oui" } else { "Non" }.to_string(),
            format_field(&self.url),
            self.confidence.to_string(),
        ]
    }
}

fn format_field(value: &Option<String>) -> String {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => MISSING_FIELD_TOKEN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, price: &str, surface: &str) -> ListingRecord {
        let opt = |v: &str| (!v.is_empty()).then(|| v.to_string());
        ListingRecord {
            page_number: 1,
            url: opt(url),
            price: opt(price),
            surface: opt(surface),
            ..ListingRecord::default()
        }
    }

    #[test]
    fn validity_requires_url() {
        assert!(!record("", "250000 €", "50 m²").is_valid());
        assert!(record("https://x/1", "", "50 m²").is_valid());
        assert!(record("https://x/1", "250000 €", "").is_valid());
    }

    #[test]
    fn url_alone_is_not_enough() {
        assert!(!record("https://x/1", "", "").is_valid());

        let mut by_kind = record("https://x/1", "", "");
        by_kind.kind = Some("Maison".to_string());
        assert!(by_kind.is_valid());
    }

    #[test]
    fn empty_string_counts_as_absent() {
        let mut rec = record("https://x/1", "250000 €", "50 m²");
        rec.city = Some(String::new());
        let row = rec.to_row();
        assert_eq!(row[9], MISSING_FIELD_TOKEN);
        assert_eq!(row.len(), CSV_COLUMNS.len());
    }

    #[test]
    fn boolean_field_is_localized() {
        let mut rec = record("https://x/1", "250000 €", "");
        rec.is_new = true;
        assert_eq!(rec.to_row()[13], "Oui");
    }
}
