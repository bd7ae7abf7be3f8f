//! Raw provider dictionaries → [`EventRecord`].
//!
//! Malformed fields are repaired or dropped, never raised. The only record
//! that does not make it through is one without a usable title.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

use crate::providers::base::clean_text;
use crate::providers::ics_feed::parse_ics_datetime;
use crate::types::{to_iso_z, EventRecord, RawEvent};

const DEFAULT_CATEGORY: &str = "general";

/// Lowercased country names and aliases → ISO 3166-1 alpha-2.
static COUNTRY_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("lithuania", "LT"),
        ("lietuva", "LT"),
        ("latvia", "LV"),
        ("latvija", "LV"),
        ("estonia", "EE"),
        ("eesti", "EE"),
        ("poland", "PL"),
        ("polska", "PL"),
        ("finland", "FI"),
        ("suomi", "FI"),
        ("sweden", "SE"),
        ("sverige", "SE"),
        ("norway", "NO"),
        ("norge", "NO"),
        ("denmark", "DK"),
        ("danmark", "DK"),
        ("germany", "DE"),
        ("deutschland", "DE"),
        ("belarus", "BY"),
        ("беларусь", "BY"),
        ("ukraine", "UA"),
        ("україна", "UA"),
        ("united kingdom", "GB"),
        ("uk", "GB"),
        ("great britain", "GB"),
        ("england", "GB"),
        ("united states", "US"),
        ("united states of america", "US"),
        ("usa", "US"),
        ("france", "FR"),
        ("spain", "ES"),
        ("españa", "ES"),
        ("italy", "IT"),
        ("italia", "IT"),
        ("netherlands", "NL"),
        ("the netherlands", "NL"),
        ("nederland", "NL"),
        ("czech republic", "CZ"),
        ("czechia", "CZ"),
        ("česko", "CZ"),
    ]
    .into_iter()
    .collect()
});

/// Keys tried, in order, when a country arrives as an address-like object.
const COUNTRY_OBJECT_KEYS: [&str; 4] = ["countryCode", "addressCountry", "name", "code"];

/// Builds [`EventRecord`]s for one search.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    default_country: Option<String>,
}

impl Normalizer {
    /// `default_country` (typically the requested country) fills records that
    /// carry no usable country of their own.
    pub fn new(default_country: Option<&str>) -> Self {
        Self {
            default_country: default_country
                .and_then(|c| coerce_country(&Value::String(c.to_string()))),
        }
    }

    /// Normalize a batch, returning the records and how many were dropped.
    pub fn normalize_all(&self, raw: &[RawEvent]) -> (Vec<EventRecord>, usize) {
        let records: Vec<EventRecord> = raw.iter().filter_map(|r| self.normalize(r)).collect();
        let dropped = raw.len() - records.len();
        if dropped > 0 {
            debug!(dropped, "raw items dropped during normalization");
        }
        (records, dropped)
    }

    pub fn normalize(&self, raw: &RawEvent) -> Option<EventRecord> {
        if !raw.is_object() {
            return None;
        }
        let title = first_text(raw, &["/title", "/name", "/name/text", "/summary"])?;

        let start_time = ["/start_time", "/startDate", "/start", "/date", "/datetime"]
            .iter()
            .filter_map(|p| raw.pointer(p))
            .find_map(coerce_timestamp);
        let venue_name = first_text(
            raw,
            &["/venue_name", "/venue", "/venue/name", "/location", "/location/name"],
        );
        let city = first_text(
            raw,
            &["/city", "/city/name", "/location/address/addressLocality", "/address/city"],
        );
        let country = ["/country", "/countryCode", "/location/address/addressCountry"]
            .iter()
            .filter_map(|p| raw.pointer(p))
            .find_map(coerce_country)
            .or_else(|| self.default_country.clone());

        let offers = first_of(raw.get("offers"));
        let currency = [raw.get("currency"), raw.get("priceCurrency"), offers.get("priceCurrency")]
            .into_iter()
            .flatten()
            .find_map(coerce_currency);
        let min_price = [
            raw.get("min_price"),
            raw.get("price"),
            raw.get("lowPrice"),
            offers.get("lowPrice"),
            offers.get("price"),
        ]
        .into_iter()
        .flatten()
        .find_map(coerce_price);

        let external_id = ["/external_id", "/id"]
            .iter()
            .filter_map(|p| raw.pointer(p))
            .find_map(id_string)
            .unwrap_or_else(|| {
                stable_id(&title, start_time.as_deref(), venue_name.as_deref(), city.as_deref())
            });

        Some(EventRecord {
            source: first_text(raw, &["/source"]).unwrap_or_else(|| "unknown".to_string()),
            external_id,
            category: first_text(raw, &["/category", "/type", "/segment"])
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            title,
            start_time,
            city,
            country,
            venue_name,
            url: ["/url", "/link", "/event_url"]
                .iter()
                .filter_map(|p| raw.pointer(p).and_then(Value::as_str))
                .map(str::trim)
                .find(|u| u.starts_with("http://") || u.starts_with("https://"))
                .map(String::from),
            description: raw
                .get("description")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from),
            image_url: image_url(raw),
            currency,
            min_price,
        })
    }
}

/// First pointer that resolves to non-blank text, whitespace collapsed.
fn first_text(raw: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| raw.pointer(p).and_then(Value::as_str))
        .find_map(|s| clean_text(Some(s)))
}

fn first_of(value: Option<&Value>) -> &Value {
    match value {
        Some(Value::Array(items)) => items.first().unwrap_or(&Value::Null),
        Some(v) => v,
        None => &Value::Null,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn image_url(raw: &Value) -> Option<String> {
    if let Some(url) = first_text(raw, &["/image_url"]) {
        return Some(url);
    }
    match raw.get("image") {
        Some(Value::String(s)) => clean_text(Some(s)),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).find_map(|s| clean_text(Some(s))),
        Some(Value::Object(obj)) => obj.get("url").and_then(Value::as_str).and_then(|s| clean_text(Some(s))),
        _ => None,
    }
}

/// First 16 hex chars of SHA-256 over `title|start_time|venue|city`.
fn stable_id(title: &str, start: Option<&str>, venue: Option<&str>, city: Option<&str>) -> String {
    let material = format!(
        "{}|{}|{}|{}",
        title,
        start.unwrap_or(""),
        venue.unwrap_or(""),
        city.unwrap_or("")
    );
    let digest = Sha256::digest(material.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// ISO-2 code from a code, a known name/alias, or an address-like object.
pub fn coerce_country(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            // aliases first: "UK" looks like a code but is not one
            if let Some(code) = COUNTRY_ALIASES.get(s.to_lowercase().as_str()) {
                return Some(code.to_string());
            }
            (s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic())).then(|| s.to_ascii_uppercase())
        }
        Value::Object(map) => COUNTRY_OBJECT_KEYS
            .iter()
            .filter_map(|k| map.get(*k))
            .find_map(coerce_country),
        _ => None,
    }
}

/// Three uppercase ASCII letters. Longer words are cut to their first three
/// letters; anything with fewer letters or with other characters is `None`.
pub fn coerce_currency(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    if s.len() < 3 || !s.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(s[..3].to_ascii_uppercase())
}

/// Finite, non-negative price. Strings may use a decimal comma.
pub fn coerce_price(value: &Value) -> Option<f64> {
    let price = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };
    (price.is_finite() && price >= 0.0).then_some(price)
}

const NAIVE_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Any supported timestamp → `YYYY-MM-DDTHH:MM:SSZ`. Unparseable ⇒ `None`.
pub fn coerce_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            let secs = n.as_i64()?;
            // millisecond epochs are common in JS-backed APIs
            let secs = if secs.unsigned_abs() >= 100_000_000_000 { secs / 1000 } else { secs };
            Utc.timestamp_opt(secs, 0).single().map(|dt| to_iso_z(&dt))
        }
        Value::String(s) => parse_timestamp(s.trim()).map(|dt| to_iso_z(&dt)),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return day.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    if s.chars().all(|c| c.is_ascii_digit() || c == 'T' || c == 'Z') {
        return parse_ics_datetime(s)
            .and_then(|iso| DateTime::parse_from_rfc3339(&iso).ok())
            .map(|dt| dt.with_timezone(&Utc));
    }
    None
}
