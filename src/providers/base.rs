//! Helpers shared by the built-in providers for producing raw events.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::types::RawEvent;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Collapse whitespace runs and trim; empty results become `None`.
pub fn clean_text(s: Option<&str>) -> Option<String> {
    let s = s?;
    let cleaned = WHITESPACE.replace_all(s, " ").trim().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Fields a provider knows about an event. Anything left `None` is repaired
/// or defaulted by the normalizer later.
#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    pub start_time: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub venue_name: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub currency: Option<String>,
    pub min_price: Option<f64>,
}

impl EventDraft {
    /// Build the raw dictionary. `source` is left for the executor to fill.
    pub fn into_raw(self) -> RawEvent {
        json!({
            "external_id": self.external_id,
            "title": clean_text(self.title.as_deref()),
            "category": self.category,
            "start_time": self.start_time,
            "city": clean_text(self.city.as_deref()),
            "country": self.country,
            "venue_name": clean_text(self.venue_name.as_deref()),
            "url": self.url.filter(|u| !u.is_empty()),
            "description": self.description,
            "image_url": self.image_url,
            "currency": self.currency,
            "min_price": self.min_price,
        })
    }
}
