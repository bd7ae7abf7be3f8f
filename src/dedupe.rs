//! Duplicate removal: an exact-key pass followed by a fuzzy title pass.
//!
//! The first record seen always wins; later duplicates are dropped whole,
//! without merging their fields into the survivor.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::config::{Settings, DEFAULT_DATE_TOLERANCE_DAYS, DEFAULT_FUZZY_THRESHOLD};
use crate::types::EventRecord;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupConfig {
    /// Minimum token-set similarity (0–100) for two titles to be the same event.
    pub title_threshold: f64,
    /// Maximum distance between two start times, in days.
    pub date_tolerance_days: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_threshold: DEFAULT_FUZZY_THRESHOLD,
            date_tolerance_days: DEFAULT_DATE_TOLERANCE_DAYS,
        }
    }
}

impl From<&Settings> for DedupConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            title_threshold: settings.fuzzy_threshold,
            date_tolerance_days: settings.date_tolerance_days,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub exact_removed: usize,
    pub fuzzy_removed: usize,
}

impl DedupStats {
    pub fn total(&self) -> usize {
        self.exact_removed + self.fuzzy_removed
    }
}

#[derive(Hash, PartialEq, Eq)]
enum ExactKey {
    Url(String),
    Composite(String, Option<String>, String, String),
}

fn lower_trim(s: Option<&str>) -> String {
    s.map(|v| v.trim().to_lowercase()).unwrap_or_default()
}

fn exact_key(record: &EventRecord) -> ExactKey {
    match record.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => ExactKey::Url(url.to_string()),
        None => ExactKey::Composite(
            lower_trim(Some(&record.title)),
            record.start_time.clone(),
            lower_trim(record.venue_name.as_deref()),
            lower_trim(record.city.as_deref()),
        ),
    }
}

/// Remove duplicates, keeping input order among survivors.
pub fn dedupe(records: Vec<EventRecord>, config: &DedupConfig) -> (Vec<EventRecord>, DedupStats) {
    let mut stats = DedupStats::default();

    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(records.len());
    for record in records {
        if seen.insert(exact_key(&record)) {
            unique.push(record);
        } else {
            stats.exact_removed += 1;
        }
    }

    let mut accepted: Vec<EventRecord> = Vec::with_capacity(unique.len());
    for record in unique {
        let duplicate_of = accepted
            .iter()
            .position(|kept| is_fuzzy_duplicate(kept, &record, config));
        match duplicate_of {
            Some(idx) => {
                debug!(
                    kept = %accepted[idx].title,
                    dropped = %record.title,
                    "fuzzy duplicate removed"
                );
                stats.fuzzy_removed += 1;
            }
            None => accepted.push(record),
        }
    }

    (accepted, stats)
}

/// Same venue, similar title and, when both are dated, close start times.
pub fn is_fuzzy_duplicate(a: &EventRecord, b: &EventRecord, config: &DedupConfig) -> bool {
    let venue_a = lower_trim(a.venue_name.as_deref());
    if venue_a.is_empty() || venue_a != lower_trim(b.venue_name.as_deref()) {
        return false;
    }
    if let (Some(sa), Some(sb)) = (a.start(), b.start()) {
        let apart = (sa - sb).num_seconds().abs();
        if apart > config.date_tolerance_days * SECONDS_PER_DAY {
            return false;
        }
    }
    token_set_ratio(&a.title, &b.title) >= config.title_threshold
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(String::from)
        .collect()
}

fn join(parts: &[&String]) -> String {
    parts
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Token-set similarity in `0..=100`.
///
/// A title whose tokens are a subset of the other's scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let sect: Vec<&String> = ta.intersection(&tb).collect();
    let diff_ab: Vec<&String> = ta.difference(&tb).collect();
    let diff_ba: Vec<&String> = tb.difference(&ta).collect();
    if !sect.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }

    let base = join(&sect);
    let combined = |diff: &[&String]| {
        let tail = join(diff);
        if base.is_empty() {
            tail
        } else {
            format!("{base} {tail}")
        }
    };
    let with_a = combined(&diff_ab);
    let with_b = combined(&diff_ba);

    [
        strsim::normalized_levenshtein(&base, &with_a),
        strsim::normalized_levenshtein(&base, &with_b),
        strsim::normalized_levenshtein(&with_a, &with_b),
    ]
    .into_iter()
    .fold(0.0_f64, f64::max)
        * 100.0
}
