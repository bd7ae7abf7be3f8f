//! Deterministic mock provider for local development and tests.

use anyhow::Result;
use chrono::{Duration, Utc};

use super::base::EventDraft;
use super::{ModuleExports, ProviderModule};
use crate::types::{to_iso_z, DateWindowStyle, ParamSet, ProviderArgs, RawEvent};

pub const KEY: &str = "mock_local";
pub const NAME: &str = "Mock (Local)";

pub fn module() -> ProviderModule {
    ProviderModule::new(
        KEY,
        ParamSet::location_only()
            .with_window(DateWindowStyle::Relative)
            .with_keyword(),
        ModuleExports::function(search),
    )
    .with_display_name(NAME)
}

/// Always returns the same two events relative to now: a free street food
/// festival in three days and a priced jazz night in seven.
pub fn search(args: &ProviderArgs) -> Result<Vec<RawEvent>> {
    let city = args.city_or_empty();
    let country = args.country.clone();
    let start = Utc::now() + Duration::days(args.start_in_days.unwrap_or(0));

    let festival = EventDraft {
        external_id: Some(format!("mock-food-{}", city.to_lowercase())),
        title: Some(format!("{city} Street Food Festival")),
        category: Some("food".into()),
        start_time: Some(to_iso_z(&(start + Duration::days(3) + Duration::hours(18)))),
        city: Some(city.to_string()),
        country: country.clone(),
        venue_name: Some(format!("{city} Old Town")),
        currency: Some("EUR".into()),
        min_price: Some(0.0),
        ..Default::default()
    };
    let jazz = EventDraft {
        external_id: Some(format!("mock-jazz-{}", city.to_lowercase())),
        title: Some(format!("{city} Live Jazz Night")),
        category: Some("music".into()),
        start_time: Some(to_iso_z(&(start + Duration::days(7) + Duration::hours(20)))),
        city: Some(city.to_string()),
        country,
        venue_name: Some(format!("{city} Jazz Club")),
        currency: Some("EUR".into()),
        min_price: Some(10.0),
        ..Default::default()
    };

    let mut events = vec![festival, jazz];
    if let Some(q) = args.query.as_deref().filter(|q| !q.trim().is_empty()) {
        let q = q.to_lowercase();
        events.retain(|e| {
            e.title
                .as_deref()
                .map(|t| t.to_lowercase().contains(&q))
                .unwrap_or(false)
        });
    }

    Ok(events.into_iter().map(EventDraft::into_raw).collect())
}
