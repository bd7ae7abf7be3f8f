//! Schema.org `Event` extraction from JSON-LD blocks on configured pages.
//!
//! Runs on the blocking pool: pages are fetched with the blocking client and
//! parsed with `scraper`.

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::base::clean_text;
use super::{BlockingSearch, ModuleExports, ProviderModule, SearchCall};
use crate::config::Settings;
use crate::http;
use crate::types::{ParamSet, ProviderArgs, RawEvent};

pub const KEY: &str = "web";
pub const NAME: &str = "Web (JSON-LD)";

static JSONLD_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid JSON-LD selector")
});
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("valid trailing comma regex"));

pub fn module() -> ProviderModule {
    ProviderModule::new(
        KEY,
        ParamSet::location_only(),
        ModuleExports::class(|settings| {
            Ok(SearchCall::blocking(WebProvider::new(
                settings.web_discovery_urls.clone(),
                settings,
            )))
        }),
    )
    .with_display_name(NAME)
}

pub struct WebProvider {
    urls: Vec<String>,
    timeout: Duration,
}

impl WebProvider {
    pub fn new(urls: Vec<String>, settings: &Settings) -> Self {
        Self {
            urls,
            timeout: Duration::from_secs(settings.http_timeout_secs),
        }
    }

    fn fetch(client: &reqwest::blocking::Client, url: &str) -> Result<String> {
        let resp = http::get_with_retry_blocking(client, url)?;
        if !resp.status().is_success() {
            return Err(anyhow!("{} responded with status {}", url, resp.status().as_u16()));
        }
        Ok(resp.text()?)
    }
}

impl BlockingSearch for WebProvider {
    fn search(&self, args: &ProviderArgs) -> Result<Vec<RawEvent>> {
        if self.urls.is_empty() {
            return Ok(Vec::new());
        }
        // Built here rather than in the constructor: the blocking client owns
        // a runtime and must not be created on an async worker thread.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(http::user_agent())
            .build()?;

        let mut items = Vec::new();
        let mut failures = 0;
        for url in &self.urls {
            match Self::fetch(&client, url) {
                Ok(html) => {
                    let found = extract_jsonld_events(&html, url);
                    debug!(url = %url, "found {} JSON-LD events", found.len());
                    items.extend(found.into_iter().map(|mut e| {
                        if e["city"].is_null() {
                            if let Some(city) = &args.city {
                                e["city"] = json!(city);
                            }
                        }
                        e
                    }));
                }
                Err(e) => {
                    warn!(url = %url, "page fetch failed: {:#}", e);
                    failures += 1;
                }
            }
        }

        if failures == self.urls.len() {
            return Err(anyhow!("all {} pages failed to load", failures));
        }
        Ok(items)
    }
}

/// Pull every schema.org `Event` out of the JSON-LD scripts of a page.
///
/// Nested `@graph` containers and lists are walked; entries without a name are
/// ignored. `origin_url` stands in for events that carry no `url`.
pub fn extract_jsonld_events(html: &str, origin_url: &str) -> Vec<RawEvent> {
    let document = Html::parse_document(html);
    let mut out = Vec::new();

    for script in document.select(&JSONLD_SELECTOR) {
        let blob = script.text().collect::<String>();
        let blob = blob.trim();
        if blob.is_empty() {
            continue;
        }
        let data: Value = match serde_json::from_str(blob) {
            Ok(v) => v,
            Err(_) => match serde_json::from_str(&TRAILING_COMMA.replace_all(blob, "$1")) {
                Ok(v) => v,
                Err(e) => {
                    debug!(url = origin_url, "skipping unparsable JSON-LD: {}", e);
                    continue;
                }
            },
        };

        let mut nodes = Vec::new();
        collect_objects(&data, &mut nodes);
        out.extend(
            nodes
                .into_iter()
                .filter(|n| is_event_node(n))
                .filter_map(|n| event_from_node(n, origin_url)),
        );
    }
    out
}

fn collect_objects<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            out.push(value);
            for v in map.values() {
                collect_objects(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_objects(v, out);
            }
        }
        _ => {}
    }
}

fn is_event_node(node: &Value) -> bool {
    let kind = node.get("@type").or_else(|| node.get("type"));
    match kind {
        Some(Value::String(s)) => s.eq_ignore_ascii_case("event"),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .any(|s| s.eq_ignore_ascii_case("event")),
        _ => false,
    }
}

fn first_str(node: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| node.get(*k).and_then(Value::as_str))
        .find_map(|s| clean_text(Some(s)))
}

/// Lists stand for "the first of".
fn first_of(value: Option<&Value>) -> &Value {
    match value {
        Some(Value::Array(items)) => items.first().unwrap_or(&Value::Null),
        Some(v) => v,
        None => &Value::Null,
    }
}

fn event_from_node(node: &Value, origin_url: &str) -> Option<RawEvent> {
    let title = first_str(node, &["name"])?;
    let location = first_of(node.get("location"));
    let address = location.get("address").unwrap_or(&Value::Null);
    let offers = first_of(node.get("offers"));
    let url = first_str(node, &["url"]).unwrap_or_else(|| origin_url.to_string());
    let image = match node.get("image") {
        Some(Value::Object(img)) => img.get("url").and_then(Value::as_str).map(String::from),
        other => first_of(other).as_str().map(String::from),
    };

    Some(json!({
        "external_id": url,
        "title": title,
        "category": first_str(node, &["eventType"]).unwrap_or_else(|| "event".into()),
        "start_time": first_str(node, &["startDate", "start_date"]),
        "city": first_str(address, &["addressLocality", "address_locality"]),
        "country": address.get("addressCountry").cloned(),
        "venue_name": first_str(location, &["name"]).or_else(|| first_str(address, &["name"])),
        "url": url,
        "description": first_str(node, &["description"]),
        "image_url": image,
        // kept as found; the normalizer coerces strings and numbers alike
        "min_price": offers.get("lowPrice").or_else(|| offers.get("price")).cloned(),
        "currency": first_str(offers, &["priceCurrency"]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>Events</title>
<script type="application/ld+json">
{"@context": "https://schema.org", "@graph": [
  {"@type": "WebSite", "name": "Bilietai"},
  {"@type": ["Event", "MusicEvent"],
   "name": "  Indie   Night ",
   "startDate": "2025-10-05T19:00:00+03:00",
   "url": "https://tickets.example/e/42",
   "location": {"@type": "Place", "name": "Loftas",
                "address": {"addressLocality": "Vilnius", "addressCountry": "LT"}},
   "offers": [{"price": "15,50", "priceCurrency": "EUR"}]},
]}
</script>
<script type="application/ld+json">{"@type": "Event", "startDate": "2025-10-06"}</script>
<script type="application/ld+json">not json at all</script>
</head><body></body></html>"#;

    #[test]
    fn extracts_events_from_graph() {
        let events = extract_jsonld_events(PAGE, "https://tickets.example/");
        // the nameless event is dropped, the broken script ignored
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e["title"], "Indie Night");
        assert_eq!(e["start_time"], "2025-10-05T19:00:00+03:00");
        assert_eq!(e["venue_name"], "Loftas");
        assert_eq!(e["city"], "Vilnius");
        assert_eq!(e["country"], "LT");
        assert_eq!(e["min_price"], "15,50");
        assert_eq!(e["currency"], "EUR");
        assert_eq!(e["external_id"], "https://tickets.example/e/42");
    }

    #[test]
    fn falls_back_to_origin_url() {
        let html = r#"<script type="application/ld+json">{"@type":"event","name":"Market"}</script>"#;
        let events = extract_jsonld_events(html, "https://city.example/whatson");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["url"], "https://city.example/whatson");
        assert_eq!(events[0]["category"], "event");
    }

    #[test]
    fn no_urls_means_no_work() {
        let provider = WebProvider::new(Vec::new(), &Settings::default());
        assert!(provider.search(&ProviderArgs::default()).unwrap().is_empty());
    }
}
