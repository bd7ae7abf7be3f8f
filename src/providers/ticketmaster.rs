//! Ticketmaster Discovery API provider.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::base::EventDraft;
use super::{AsyncSearch, ModuleExports, ProviderModule, SearchCall};
use crate::config::Settings;
use crate::error::ProviderError;
use crate::http;
use crate::types::{to_iso_z, DateWindowStyle, ParamSet, ProviderArgs, RawEvent};

pub const KEY: &str = "ticketmaster";
pub const NAME: &str = "Ticketmaster";

const TM_EVENTS_URL: &str = "https://app.ticketmaster.com/discovery/v2/events.json";
const MAX_PAGE_SIZE: usize = 200;

pub fn module() -> ProviderModule {
    ProviderModule::new(
        KEY,
        ParamSet::location_only()
            .with_window(DateWindowStyle::Absolute)
            .with_keyword()
            .with_pagination(),
        ModuleExports::class(|settings| Ok(SearchCall::from_async(TicketmasterProvider::new(settings)?))),
    )
    .with_display_name(NAME)
}

pub struct TicketmasterProvider {
    api_key: String,
    client: reqwest::Client,
}

impl TicketmasterProvider {
    pub fn new(settings: &Settings) -> Result<Self> {
        let api_key = settings
            .ticketmaster_api_key
            .clone()
            .ok_or_else(|| ProviderError::MissingConfig("TICKETMASTER_API_KEY".into()))?;
        Ok(Self {
            api_key,
            client: http::client(settings)?,
        })
    }

    fn query_params(&self, args: &ProviderArgs) -> Vec<(&'static str, String)> {
        let size = args
            .limit
            .map(|limit| (limit + args.offset.unwrap_or(0)).clamp(1, MAX_PAGE_SIZE))
            .unwrap_or(100);

        let mut params = vec![
            ("apikey", self.api_key.clone()),
            ("size", size.to_string()),
            ("sort", "date,asc".to_string()),
        ];
        if let Some(country) = &args.country {
            params.push(("countryCode", country.clone()));
        }
        if let Some(city) = &args.city {
            params.push(("city", city.clone()));
        }
        if let Some(start) = &args.start {
            params.push(("startDateTime", to_iso_z(start)));
        }
        if let Some(end) = &args.end {
            params.push(("endDateTime", to_iso_z(end)));
        }
        if let Some(q) = args.query.as_deref().filter(|q| !q.trim().is_empty()) {
            params.push(("keyword", q.to_string()));
        }
        params
    }
}

#[async_trait]
impl AsyncSearch for TicketmasterProvider {
    #[instrument(skip(self, args), fields(provider = KEY))]
    async fn search(&self, args: &ProviderArgs) -> Result<Vec<RawEvent>> {
        let request = self.client.get(TM_EVENTS_URL).query(&self.query_params(args));
        let resp = http::get_with_retry(&self.client, request).await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Status {
                provider: KEY.into(),
                status: resp.status().as_u16(),
            }
            .into());
        }
        let body: Value = resp.json().await.context("decoding Ticketmaster response")?;
        let events = parse_events(&body, args);
        debug!("Ticketmaster returned {} events", events.len());
        Ok(events)
    }
}

/// Map a Discovery API `events.json` body to raw events.
pub fn parse_events(body: &Value, args: &ProviderArgs) -> Vec<RawEvent> {
    let Some(events) = body
        .pointer("/_embedded/events")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    events
        .iter()
        .map(|ev| {
            let venue = ev.pointer("/_embedded/venues/0").unwrap_or(&Value::Null);
            let price = ev.pointer("/priceRanges/0").unwrap_or(&Value::Null);
            let start = ev
                .pointer("/dates/start/dateTime")
                .or_else(|| ev.pointer("/dates/start/localDate"))
                .and_then(Value::as_str);

            EventDraft {
                external_id: str_field(ev, "/id"),
                title: str_field(ev, "/name"),
                category: str_field(ev, "/classifications/0/segment/name")
                    .or_else(|| Some("unknown".to_string())),
                start_time: start.map(String::from),
                city: str_field(venue, "/city/name").or_else(|| args.city.clone()),
                country: str_field(venue, "/country/countryCode").or_else(|| args.country.clone()),
                venue_name: str_field(venue, "/name"),
                url: str_field(ev, "/url"),
                description: str_field(ev, "/info"),
                image_url: str_field(ev, "/images/0/url"),
                currency: str_field(price, "/currency").or_else(|| Some("EUR".to_string())),
                min_price: price
                    .get("min")
                    .and_then(Value::as_f64)
                    .or_else(|| price.get("max").and_then(Value::as_f64)),
            }
            .into_raw()
        })
        .collect()
}

fn str_field(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(String::from)
}
