use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw event data as returned by a provider, before normalization.
pub type RawEvent = serde_json::Value;

/// The canonical normalized event.
///
/// Built fresh by the normalizer on every search; it has no identity beyond
/// one request/response cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub category: String,
    /// `YYYY-MM-DDTHH:MM:SSZ`
    pub start_time: Option<String>,
    pub city: Option<String>,
    /// ISO 3166-1 alpha-2, uppercase.
    pub country: Option<String>,
    pub venue_name: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub currency: Option<String>,
    pub min_price: Option<f64>,
}

impl EventRecord {
    /// Parsed `start_time`, if any.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// How a provider wants its date window expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateWindowStyle {
    /// No date parameters at all.
    None,
    /// `days_ahead` + `start_in_days`.
    Relative,
    /// Absolute `start` / `end` datetimes.
    Absolute,
    /// Accepts both forms.
    Both,
}

/// The parameters a provider declares it accepts.
///
/// The fan-out executor only fills the matching [`ProviderArgs`] fields, so
/// providers with different shapes share one call path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamSet {
    pub location: bool,
    pub date_window: DateWindowStyle,
    pub keyword: bool,
    pub pagination: bool,
}

impl ParamSet {
    /// City/country only.
    pub const fn location_only() -> Self {
        Self {
            location: true,
            date_window: DateWindowStyle::None,
            keyword: false,
            pagination: false,
        }
    }

    pub const fn with_window(mut self, style: DateWindowStyle) -> Self {
        self.date_window = style;
        self
    }

    pub const fn with_keyword(mut self) -> Self {
        self.keyword = true;
        self
    }

    pub const fn with_pagination(mut self) -> Self {
        self.pagination = true;
        self
    }

    pub fn accepts_relative_window(&self) -> bool {
        matches!(self.date_window, DateWindowStyle::Relative | DateWindowStyle::Both)
    }

    pub fn accepts_absolute_window(&self) -> bool {
        matches!(self.date_window, DateWindowStyle::Absolute | DateWindowStyle::Both)
    }
}

impl Default for ParamSet {
    fn default() -> Self {
        Self::location_only()
    }
}

/// Absolute search window in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SearchWindow {
    /// Start at 00:00:00Z of `today + start_in_days`, end at 23:59:59Z of
    /// `today + start_in_days + days_ahead`.
    pub fn from_relative(now: DateTime<Utc>, start_in_days: i64, days_ahead: i64) -> Self {
        let today = now.date_naive();
        let start_day = today + Duration::days(start_in_days);
        let end_day = today + Duration::days(start_in_days + days_ahead);
        let end_time = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        Self {
            start: start_day.and_time(NaiveTime::MIN).and_utc(),
            end: end_day.and_time(end_time).and_utc(),
        }
    }

    pub fn start_iso(&self) -> String {
        to_iso_z(&self.start)
    }

    pub fn end_iso(&self) -> String {
        to_iso_z(&self.end)
    }
}

/// Format a UTC datetime as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn to_iso_z(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Arguments handed to one provider call.
///
/// Fields a provider did not declare in its [`ParamSet`] stay `None`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderArgs {
    pub city: Option<String>,
    pub country: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub days_ahead: Option<i64>,
    pub start_in_days: Option<i64>,
    pub query: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ProviderArgs {
    pub fn city_or_empty(&self) -> &str {
        self.city.as_deref().unwrap_or("")
    }

    pub fn country_or_empty(&self) -> &str {
        self.country.as_deref().unwrap_or("")
    }
}

/// The full common parameter set for one logical search.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    pub city: String,
    pub country: String,
    pub window: SearchWindow,
    pub days_ahead: i64,
    pub start_in_days: i64,
    pub query: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl SearchCriteria {
    /// Reduce the common parameter set to what `params` declares.
    pub fn args_for(&self, params: &ParamSet) -> ProviderArgs {
        let mut args = ProviderArgs::default();
        if params.location {
            args.city = Some(self.city.clone());
            args.country = Some(self.country.clone());
        }
        if params.accepts_absolute_window() {
            args.start = Some(self.window.start);
            args.end = Some(self.window.end);
        }
        if params.accepts_relative_window() {
            args.days_ahead = Some(self.days_ahead);
            args.start_in_days = Some(self.start_in_days);
        }
        if params.keyword {
            args.query = self.query.clone();
        }
        if params.pagination {
            args.limit = Some(self.limit);
            args.offset = Some(self.offset);
        }
        args
    }
}
