//! Eventbrite event search provider.
//!
//! Searches around the city first; when that finds nothing the radius is
//! widened and the city dropped, so nearby events still come back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::base::EventDraft;
use super::{AsyncSearch, ModuleExports, ProviderModule, SearchCall};
use crate::config::Settings;
use crate::error::ProviderError;
use crate::http;
use crate::types::{to_iso_z, DateWindowStyle, ParamSet, ProviderArgs, RawEvent};

pub const KEY: &str = "eventbrite";
pub const NAME: &str = "Eventbrite";

const EB_SEARCH_URL: &str = "https://www.eventbriteapi.com/v3/events/search/";
const CITY_RADIUS: &str = "100km";
const WIDE_RADIUS: &str = "400km";
const PAGE_SIZE: &str = "200";

pub fn module() -> ProviderModule {
    ProviderModule::new(
        KEY,
        ParamSet::location_only()
            .with_window(DateWindowStyle::Absolute)
            .with_keyword(),
        ModuleExports::class(|settings| Ok(SearchCall::from_async(EventbriteProvider::new(settings)?))),
    )
    .with_display_name(NAME)
}

pub struct EventbriteProvider {
    token: String,
    client: reqwest::Client,
}

impl EventbriteProvider {
    pub fn new(settings: &Settings) -> Result<Self> {
        let token = settings
            .eventbrite_token
            .clone()
            .ok_or_else(|| ProviderError::MissingConfig("EVENTBRITE_TOKEN".into()))?;
        Ok(Self {
            token,
            client: http::client(settings)?,
        })
    }

    async fn fetch(&self, params: &[(&'static str, String)]) -> Result<Value> {
        let request = self
            .client
            .get(EB_SEARCH_URL)
            .bearer_auth(&self.token)
            .query(params);
        let resp = http::get_with_retry(&self.client, request).await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Status {
                provider: KEY.into(),
                status: resp.status().as_u16(),
            }
            .into());
        }
        resp.json().await.context("decoding Eventbrite response")
    }
}

/// Query parameters for one search; `city` is `None` for the widened pass.
pub fn search_params(args: &ProviderArgs, city: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("expand", "venue".to_string()),
        ("include_adult_events", "false".to_string()),
        ("sort_by", "date".to_string()),
        ("page_size", PAGE_SIZE.to_string()),
    ];
    match city {
        Some(city) => {
            params.push(("location.address", city.to_string()));
            params.push(("location.within", CITY_RADIUS.to_string()));
        }
        None => params.push(("location.within", WIDE_RADIUS.to_string())),
    }
    if let Some(start) = &args.start {
        params.push(("start_date.range_start", to_iso_z(start)));
    }
    if let Some(end) = &args.end {
        params.push(("start_date.range_end", to_iso_z(end)));
    }
    if let Some(q) = args.query.as_deref().filter(|q| !q.trim().is_empty()) {
        params.push(("q", q.to_string()));
    }
    params
}

#[async_trait]
impl AsyncSearch for EventbriteProvider {
    #[instrument(skip(self, args), fields(provider = KEY))]
    async fn search(&self, args: &ProviderArgs) -> Result<Vec<RawEvent>> {
        let city = args.city.as_deref().filter(|c| !c.trim().is_empty());

        let first = self.fetch(&search_params(args, city)).await;
        if let Ok(body) = &first {
            let events = parse_events(body);
            if !events.is_empty() || city.is_none() {
                debug!("Eventbrite returned {} events", events.len());
                return Ok(events);
            }
        }

        debug!("no Eventbrite events around the city, widening the search");
        match self.fetch(&search_params(args, None)).await {
            Ok(body) => Ok(parse_events(&body)),
            // an empty first pass still counts as a successful search
            Err(_) if first.is_ok() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// Map an `events/search` body to raw events. Venues come from the expanded
/// `venue` object, or from another event in the same body by `venue_id`.
pub fn parse_events(body: &Value) -> Vec<RawEvent> {
    let Some(events) = body.get("events").and_then(Value::as_array) else {
        return Vec::new();
    };

    let venues: HashMap<&str, &Value> = events
        .iter()
        .filter_map(|e| e.get("venue"))
        .filter_map(|v| Some((v.get("id")?.as_str()?, v)))
        .collect();

    events
        .iter()
        .map(|e| {
            let venue = e
                .get("venue_id")
                .and_then(Value::as_str)
                .and_then(|id| venues.get(id).copied())
                .or_else(|| e.get("venue"))
                .unwrap_or(&Value::Null);
            let text = |v: &Value, pointer: &str| v.pointer(pointer).and_then(Value::as_str).map(String::from);

            EventDraft {
                external_id: text(e, "/id"),
                title: text(e, "/name/text").or_else(|| text(e, "/name")),
                category: text(e, "/category_id"),
                start_time: text(e, "/start/utc").map(|s| s.replace("+00:00", "Z")),
                city: text(venue, "/address/city"),
                country: text(venue, "/address/country"),
                venue_name: text(venue, "/name"),
                url: text(e, "/url"),
                description: text(e, "/summary"),
                image_url: text(e, "/logo/url"),
                // ticket prices live behind a separate endpoint
                currency: None,
                min_price: None,
            }
            .into_raw()
        })
        .collect()
}
