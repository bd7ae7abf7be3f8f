//! SeatGeek events API provider, exposed through a factory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::base::EventDraft;
use super::{AsyncSearch, ModuleExports, ProviderModule, SearchCall};
use crate::config::Settings;
use crate::error::ProviderError;
use crate::http;
use crate::types::{DateWindowStyle, ParamSet, ProviderArgs, RawEvent};

pub const KEY: &str = "seatgeek";
pub const NAME: &str = "SeatGeek";

const SG_EVENTS_URL: &str = "https://api.seatgeek.com/2/events";

pub fn module() -> ProviderModule {
    ProviderModule::new(
        KEY,
        ParamSet::location_only()
            .with_window(DateWindowStyle::Absolute)
            .with_keyword(),
        ModuleExports::factory(make_provider),
    )
    .with_display_name(NAME)
}

fn make_provider(settings: &Settings) -> Result<SearchCall> {
    let client_id = settings
        .seatgeek_client_id
        .clone()
        .ok_or_else(|| ProviderError::MissingConfig("SEATGEEK_CLIENT_ID".into()))?;
    Ok(SearchCall::from_async(SeatGeekProvider {
        client_id,
        client_secret: settings.seatgeek_client_secret.clone(),
        client: http::client(settings)?,
    }))
}

pub struct SeatGeekProvider {
    client_id: String,
    client_secret: Option<String>,
    client: reqwest::Client,
}

#[async_trait]
impl AsyncSearch for SeatGeekProvider {
    async fn search(&self, args: &ProviderArgs) -> Result<Vec<RawEvent>> {
        let mut params: Vec<(&str, String)> = vec![("client_id", self.client_id.clone())];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.clone()));
        }
        if let Some(q) = args.query.as_deref().filter(|q| !q.trim().is_empty()) {
            params.push(("q", q.to_string()));
        }
        if let Some(city) = args.city.as_deref().filter(|c| !c.is_empty()) {
            params.push(("venue.city", city.to_string()));
        }
        if let Some(country) = args.country.as_deref().filter(|c| !c.is_empty()) {
            params.push(("venue.country", country.to_string()));
        }
        if let Some(start) = &args.start {
            params.push(("datetime_utc.gte", start.format("%Y-%m-%dT%H:%M:%S").to_string()));
        }
        if let Some(end) = &args.end {
            params.push(("datetime_utc.lte", end.format("%Y-%m-%dT%H:%M:%S").to_string()));
        }

        let request = self.client.get(SG_EVENTS_URL).query(&params);
        let resp = http::get_with_retry(&self.client, request).await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Status {
                provider: KEY.into(),
                status: resp.status().as_u16(),
            }
            .into());
        }
        let body: Value = resp.json().await.context("decoding SeatGeek response")?;
        Ok(parse_events(&body, args))
    }
}

pub fn parse_events(body: &Value, args: &ProviderArgs) -> Vec<RawEvent> {
    let Some(events) = body.get("events").and_then(Value::as_array) else {
        return Vec::new();
    };

    events
        .iter()
        .map(|e| {
            let venue = e.get("venue").unwrap_or(&Value::Null);
            let text = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(String::from);
            // datetime_utc carries no offset; mark it as UTC explicitly
            let start = text(e, "datetime_utc").map(|s| format!("{}Z", s.trim_end_matches('Z')));

            EventDraft {
                external_id: e.get("id").map(|id| match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
                title: text(e, "short_title").or_else(|| text(e, "title")),
                category: text(e, "type").or_else(|| Some("unknown".into())),
                start_time: start,
                city: text(venue, "city").or_else(|| args.city.clone()),
                country: text(venue, "country").or_else(|| args.country.clone()),
                venue_name: text(venue, "name"),
                url: text(e, "url"),
                min_price: e.pointer("/stats/lowest_price").and_then(Value::as_f64),
                currency: Some("USD".into()),
                ..Default::default()
            }
            .into_raw()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn factory_requires_client_id() {
        assert!(make_provider(&Settings::default()).is_err());

        let settings = Settings {
            seatgeek_client_id: Some("abc".into()),
            ..Settings::default()
        };
        assert!(make_provider(&settings).unwrap().is_async());
    }

    #[test]
    fn parses_events_payload() {
        let body = json!({ "events": [{
            "id": 5521,
            "title": "Boston Celtics at Chicago Bulls",
            "short_title": "Celtics at Bulls",
            "type": "nba",
            "datetime_utc": "2025-11-02T00:30:00",
            "url": "https://seatgeek.com/e/5521",
            "stats": { "lowest_price": 41 },
            "venue": { "name": "United Center", "city": "Chicago", "country": "US" }
        }]});
        let events = parse_events(&body, &ProviderArgs::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["external_id"], "5521");
        assert_eq!(events[0]["title"], "Celtics at Bulls");
        assert_eq!(events[0]["start_time"], "2025-11-02T00:30:00Z");
        assert_eq!(events[0]["min_price"], 41.0);
    }
}
