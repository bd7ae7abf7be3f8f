//! Result ordering and pagination.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::types::EventRecord;

/// How the final result set is ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SortPolicy {
    /// Soonest first; undated listings last, then by title.
    #[default]
    Date,
    PriceAsc,
    PriceDesc,
    /// Score against interest keywords, highest first.
    Relevance(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sort policy '{0}' (expected date, price_asc, price_desc or relevance)")]
pub struct UnknownSortPolicy(pub String);

impl FromStr for SortPolicy {
    type Err = UnknownSortPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "date" => Ok(SortPolicy::Date),
            "price_asc" | "price" => Ok(SortPolicy::PriceAsc),
            "price_desc" => Ok(SortPolicy::PriceDesc),
            "relevance" => Ok(SortPolicy::Relevance(Vec::new())),
            other => Err(UnknownSortPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for SortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortPolicy::Date => "date",
            SortPolicy::PriceAsc => "price_asc",
            SortPolicy::PriceDesc => "price_desc",
            SortPolicy::Relevance(_) => "relevance",
        })
    }
}

impl SortPolicy {
    /// Parse a policy name, attaching `interests` when it is `relevance`.
    pub fn parse_with_interests(name: &str, interests: &[String]) -> Result<Self, UnknownSortPolicy> {
        match name.parse::<SortPolicy>()? {
            SortPolicy::Relevance(_) => Ok(SortPolicy::Relevance(
                interests
                    .iter()
                    .map(|i| i.trim().to_lowercase())
                    .filter(|i| !i.is_empty())
                    .collect(),
            )),
            other => Ok(other),
        }
    }
}

fn by_date(a: &EventRecord, b: &EventRecord) -> Ordering {
    let date = match (a.start(), b.start()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    date.then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
}

/// Missing prices go last in either direction.
fn by_price(a: &EventRecord, b: &EventRecord, descending: bool) -> Ordering {
    match (a.min_price, b.min_price) {
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// +2 per keyword found in the title, otherwise +1 if found in the category.
/// Cheaper tickets add up to 0.25, so price only breaks ties between equal
/// keyword scores.
pub fn relevance_score(record: &EventRecord, keywords: &[String]) -> f64 {
    let title = record.title.to_lowercase();
    let category = record.category.to_lowercase();
    let hits: u32 = keywords
        .iter()
        .map(|k| {
            if title.contains(k.as_str()) {
                2
            } else if category.contains(k.as_str()) {
                1
            } else {
                0
            }
        })
        .sum();
    f64::from(hits) + price_bonus(record.min_price)
}

fn price_bonus(price: Option<f64>) -> f64 {
    match price {
        Some(p) if p.is_finite() && p >= 0.0 => (1.0 - p.min(100.0) / 100.0) * 0.25,
        _ => 0.0,
    }
}

/// Stable sort under `policy`.
pub fn sort_events(records: &mut [EventRecord], policy: &SortPolicy) {
    match policy {
        SortPolicy::Date => records.sort_by(by_date),
        SortPolicy::PriceAsc => records.sort_by(|a, b| by_price(a, b, false)),
        SortPolicy::PriceDesc => records.sort_by(|a, b| by_price(a, b, true)),
        SortPolicy::Relevance(keywords) => records.sort_by(|a, b| {
            relevance_score(b, keywords)
                .total_cmp(&relevance_score(a, keywords))
                .then_with(|| by_date(a, b))
        }),
    }
}

/// One page of a sorted result set.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Size of the whole set before slicing.
    pub total: usize,
}

/// Slice `offset..offset + limit`; an offset past the end gives an empty page.
pub fn paginate<T>(items: Vec<T>, offset: usize, limit: usize) -> Page<T> {
    let total = items.len();
    let items = items.into_iter().skip(offset).take(limit).collect();
    Page { items, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(title: &str, category: &str, start: Option<&str>, price: Option<f64>) -> EventRecord {
        EventRecord {
            source: "test".into(),
            external_id: title.into(),
            title: title.into(),
            category: category.into(),
            start_time: start.map(String::from),
            city: None,
            country: None,
            venue_name: None,
            url: None,
            description: None,
            image_url: None,
            currency: None,
            min_price: price,
        }
    }

    fn titles(records: &[EventRecord]) -> Vec<&str> {
        records.iter().map(|r| r.title.as_str()).collect()
    }

    fn sample() -> Vec<EventRecord> {
        vec![
            event("Undated Walk", "outdoors", None, Some(5.0)),
            event("Jazz Night", "music", Some("2025-05-07T20:00:00Z"), Some(10.0)),
            event("Food Festival", "food", Some("2025-05-03T18:00:00Z"), Some(0.0)),
            event("Art Fair", "art", Some("2025-05-03T18:00:00Z"), None),
        ]
    }

    #[test]
    fn date_order_puts_undated_last() {
        let mut records = sample();
        sort_events(&mut records, &SortPolicy::Date);
        assert_eq!(titles(&records), vec!["Art Fair", "Food Festival", "Jazz Night", "Undated Walk"]);
    }

    #[test]
    fn price_order_puts_unpriced_last_both_ways() {
        let mut records = sample();
        sort_events(&mut records, &SortPolicy::PriceAsc);
        assert_eq!(titles(&records), vec!["Food Festival", "Undated Walk", "Jazz Night", "Art Fair"]);

        sort_events(&mut records, &SortPolicy::PriceDesc);
        assert_eq!(titles(&records), vec!["Jazz Night", "Undated Walk", "Food Festival", "Art Fair"]);
    }

    #[test]
    fn relevance_prefers_title_hits() {
        let mut records = sample();
        let policy = SortPolicy::parse_with_interests("relevance", &["Music".into(), "food".into()]).unwrap();
        sort_events(&mut records, &policy);
        // "Food Festival" scores 2 (title), "Jazz Night" 1 (category); the
        // cheaper "Undated Walk" edges out the unpriced "Art Fair"
        assert_eq!(titles(&records), vec!["Food Festival", "Jazz Night", "Undated Walk", "Art Fair"]);
    }

    #[test]
    fn cheaper_tickets_get_a_small_bonus() {
        let keywords = vec!["jazz".to_string()];
        let free = event("Jazz Brunch", "music", None, Some(0.0));
        let pricey = event("Jazz Gala", "music", None, Some(250.0));
        let mid = event("Jazz Club", "music", None, Some(40.0));
        let unpriced = event("Jazz Jam", "music", None, None);

        assert_eq!(relevance_score(&free, &keywords), 2.25);
        assert_eq!(relevance_score(&pricey, &keywords), 2.0);
        assert!((relevance_score(&mid, &keywords) - 2.15).abs() < 1e-9);
        assert_eq!(relevance_score(&unpriced, &keywords), 2.0);

        // a free event never outranks an extra keyword hit
        let folk = event("Folk Fair", "music", None, Some(0.0));
        assert!(relevance_score(&folk, &keywords) < relevance_score(&pricey, &keywords));
    }

    #[test]
    fn policy_names_parse() {
        assert_eq!("date".parse::<SortPolicy>().unwrap(), SortPolicy::Date);
        assert_eq!("PRICE_DESC".parse::<SortPolicy>().unwrap(), SortPolicy::PriceDesc);
        assert!("popularity".parse::<SortPolicy>().is_err());
        assert_eq!(SortPolicy::PriceAsc.to_string(), "price_asc");
    }

    #[test]
    fn pagination_reports_total() {
        let items: Vec<u32> = (1..=25).collect();
        let page = paginate(items.clone(), 10, 10);
        assert_eq!(page.items, (11..=20).collect::<Vec<_>>());
        assert_eq!(page.total, 25);

        let past_end = paginate(items, 40, 10);
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.total, 25);
    }
}
