//! iCalendar (ICS) feed provider.
//!
//! Fetches each configured feed, extracts `VEVENT` blocks and keeps the ones
//! inside the requested window. Feeds that fail to download are logged and
//! skipped; the provider only errors when every feed failed.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;
use tracing::warn;

use super::base::EventDraft;
use super::{AsyncSearch, ModuleExports, ProviderModule, SearchCall};
use crate::config::Settings;
use crate::http;
use crate::types::{to_iso_z, DateWindowStyle, ParamSet, ProviderArgs, RawEvent};

pub const KEY: &str = "ics";
pub const NAME: &str = "ICS Feeds";

pub fn params() -> ParamSet {
    ParamSet::location_only()
        .with_window(DateWindowStyle::Absolute)
        .with_keyword()
}

pub fn module() -> ProviderModule {
    ProviderModule::new(
        KEY,
        params(),
        ModuleExports::class(|settings| {
            Ok(SearchCall::from_async(IcsFeedProvider::new(
                settings.ics_urls.clone(),
                settings,
            )?))
        }),
    )
    .with_display_name(NAME)
}

pub struct IcsFeedProvider {
    urls: Vec<String>,
    client: reqwest::Client,
}

impl IcsFeedProvider {
    pub fn new(urls: Vec<String>, settings: &Settings) -> Result<Self> {
        Ok(Self {
            urls,
            client: http::client(settings)?,
        })
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let resp = http::get_with_retry(&self.client, self.client.get(url)).await?;
        if !resp.status().is_success() {
            return Err(anyhow!("{} responded with status {}", url, resp.status().as_u16()));
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl AsyncSearch for IcsFeedProvider {
    async fn search(&self, args: &ProviderArgs) -> Result<Vec<RawEvent>> {
        let mut items = Vec::new();
        let mut failures = Vec::new();

        for url in &self.urls {
            match self.fetch(url).await {
                Ok(text) if text.contains("BEGIN:VCALENDAR") => {
                    items.extend(
                        parse_ics(&text)
                            .into_iter()
                            .filter(|e| matches_args(e, args))
                            .map(EventDraft::into_raw),
                    );
                }
                Ok(_) => {
                    warn!(url = %url, "response is not an iCalendar document");
                    failures.push(format!("{url}: not an iCalendar document"));
                }
                Err(e) => {
                    warn!(url = %url, "ICS feed fetch failed: {:#}", e);
                    failures.push(format!("{url}: {e:#}"));
                }
            }
        }

        if !self.urls.is_empty() && failures.len() == self.urls.len() {
            return Err(anyhow!("all ICS feeds failed: {}", failures.join("; ")));
        }
        Ok(items)
    }
}

fn matches_args(event: &EventDraft, args: &ProviderArgs) -> bool {
    if let Some(q) = args.query.as_deref().filter(|q| !q.trim().is_empty()) {
        let q = q.to_lowercase();
        let hit = event
            .title
            .as_deref()
            .map(|t| t.to_lowercase().contains(&q))
            .unwrap_or(false);
        if !hit {
            return false;
        }
    }

    let start = event
        .start_time
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    match (start, args.start, args.end) {
        (Some(s), Some(from), _) if s < from => false,
        (Some(s), _, Some(to)) if s > to => false,
        _ => true,
    }
}

/// Minimal iCalendar parser: unfolds continuation lines and reads the
/// `SUMMARY`, `DTSTART`, `LOCATION`, `URL`, `UID` and `DESCRIPTION` of every
/// `VEVENT`.
pub fn parse_ics(text: &str) -> Vec<EventDraft> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        let raw = raw.trim_end_matches('\r');
        if (raw.starts_with(' ') || raw.starts_with('\t')) && !lines.is_empty() {
            if let Some(last) = lines.last_mut() {
                last.push_str(&raw[1..]);
            }
        } else {
            lines.push(raw.trim().to_string());
        }
    }

    let mut out = Vec::new();
    let mut props: Option<HashMap<String, String>> = None;
    for line in &lines {
        match line.as_str() {
            "BEGIN:VEVENT" => props = Some(HashMap::new()),
            "END:VEVENT" => {
                if let Some(p) = props.take() {
                    out.push(event_from_props(&p));
                }
            }
            _ => {
                if let (Some(p), Some((key, value))) = (props.as_mut(), line.split_once(':')) {
                    // DTSTART;TZID=Europe/Vilnius:20250131T190000 → DTSTART
                    let name = key.split(';').next().unwrap_or(key).to_uppercase();
                    p.entry(name).or_insert_with(|| unescape(value.trim()));
                }
            }
        }
    }
    out
}

fn event_from_props(props: &HashMap<String, String>) -> EventDraft {
    let get = |k: &str| props.get(k).filter(|v| !v.is_empty()).cloned();
    EventDraft {
        external_id: get("UID"),
        title: get("SUMMARY"),
        start_time: get("DTSTART").and_then(|raw| parse_ics_datetime(&raw)),
        venue_name: get("LOCATION"),
        url: get("URL"),
        description: get("DESCRIPTION"),
        category: get("CATEGORIES").map(|c| c.split(',').next().unwrap_or("").trim().to_lowercase()),
        ..Default::default()
    }
}

fn unescape(value: &str) -> String {
    value
        .replace("\\n", " ")
        .replace("\\N", " ")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

/// `20250131T190000Z`, `20250131T190000` (taken as UTC) or `20250131`.
pub fn parse_ics_datetime(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Some(stripped) = raw.strip_suffix('Z') {
        let dt = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S").ok()?;
        return Some(to_iso_z(&dt.and_utc()));
    }
    if raw.contains('T') {
        let dt = NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S").ok()?;
        return Some(to_iso_z(&dt.and_utc()));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y%m%d").ok()?;
    Some(to_iso_z(&day.and_hms_opt(0, 0, 0)?.and_utc()))
}
