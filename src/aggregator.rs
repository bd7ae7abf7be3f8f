//! The aggregation facade: validate → fan out → normalize → dedupe → sort →
//! paginate, with a debug block describing how the search went.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::config::Settings;
use crate::dedupe::{dedupe, DedupConfig, DedupStats};
use crate::error::{AggregatorError, Result};
use crate::fanout;
use crate::metrics;
use crate::normalize::Normalizer;
use crate::providers::{self, ProviderModule};
use crate::rank::{paginate, sort_events, SortPolicy};
use crate::registry::{panic_message, ProviderInfo, ProviderRegistry, RegistryDiagnostics};
use crate::types::{EventRecord, SearchCriteria, SearchWindow};

pub const DEFAULT_DAYS_AHEAD: i64 = 60;
pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_DAYS: i64 = 3650;
pub const MAX_LIMIT: usize = 500;

fn default_days_ahead() -> i64 {
    DEFAULT_DAYS_AHEAD
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_sort() -> String {
    "date".to_string()
}

/// Accepts either a list or a single comma-separated string.
fn comma_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrCsv {
        List(Vec<String>),
        Csv(String),
    }

    let items = match ListOrCsv::deserialize(deserializer)? {
        ListOrCsv::List(items) => items,
        ListOrCsv::Csv(raw) => raw.split(',').map(String::from).collect(),
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// One logical search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub city: String,
    pub country: String,
    #[serde(default = "default_days_ahead")]
    pub days_ahead: i64,
    #[serde(default)]
    pub start_in_days: i64,
    #[serde(default)]
    pub include_mock: bool,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// `date`, `price_asc`, `price_desc` or `relevance`.
    #[serde(default = "default_sort")]
    pub sort: String,
    /// Interest keywords used by the `relevance` sort.
    #[serde(default, deserialize_with = "comma_list")]
    pub interests: Vec<String>,
}

impl SearchRequest {
    pub fn new(city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            country: country.into(),
            days_ahead: DEFAULT_DAYS_AHEAD,
            start_in_days: 0,
            include_mock: false,
            query: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
            sort: default_sort(),
            interests: Vec::new(),
        }
    }

    /// Check the request and return the trimmed city, the uppercased
    /// country and the sort policy.
    pub fn validate(&self) -> Result<(String, String, SortPolicy)> {
        let city = self.city.trim();
        if city.is_empty() {
            return Err(AggregatorError::invalid("city must not be empty"));
        }
        let country = self.country.trim();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AggregatorError::invalid(format!(
                "country must be a 2-letter ISO code, got '{}'",
                self.country
            )));
        }
        if !(1..=MAX_DAYS).contains(&self.days_ahead) {
            return Err(AggregatorError::invalid(format!(
                "days_ahead must be between 1 and {MAX_DAYS}"
            )));
        }
        if !(0..=MAX_DAYS).contains(&self.start_in_days) {
            return Err(AggregatorError::invalid(format!(
                "start_in_days must be between 0 and {MAX_DAYS}"
            )));
        }
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(AggregatorError::invalid(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        let policy = SortPolicy::parse_with_interests(&self.sort, &self.interests)
            .map_err(|e| AggregatorError::invalid(e.to_string()))?;

        Ok((city.to_string(), country.to_ascii_uppercase(), policy))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowInfo {
    pub start: String,
    pub end: String,
}

/// Always populated, also when every provider succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub provider_errors: BTreeMap<String, String>,
    pub window: WindowInfo,
    pub discovered: Vec<String>,
    pub limit: usize,
    pub offset: usize,
    pub normalization_dropped: usize,
    pub dedup: DedupStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Items on this page.
    pub count: usize,
    /// Items before pagination.
    pub total: usize,
    pub items: Vec<EventRecord>,
    pub providers_used: Vec<String>,
    pub debug: DebugInfo,
}

type CatalogFn = dyn Fn() -> Vec<ProviderModule> + Send + Sync;

/// Entry point shared by the HTTP layer and the CLI.
///
/// Owns the provider registry; [`Aggregator::reload`] swaps in a freshly
/// discovered one without disturbing searches already in flight.
pub struct Aggregator {
    settings: Settings,
    catalog: Arc<CatalogFn>,
    registry: RwLock<Arc<ProviderRegistry>>,
}

impl Aggregator {
    /// Discover the built-in catalog plus manifests.
    pub fn new(settings: Settings) -> Self {
        Self::with_catalog(settings, providers::catalog)
    }

    /// Discover `catalog()` (plus manifests) instead of the built-in catalog.
    pub fn with_catalog<F>(settings: Settings, catalog: F) -> Self
    where
        F: Fn() -> Vec<ProviderModule> + Send + Sync + 'static,
    {
        let registry = ProviderRegistry::discover_from(catalog(), Some(&settings.provider_dir), &settings);
        Self {
            settings,
            catalog: Arc::new(catalog),
            registry: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The current registry snapshot.
    pub fn registry(&self) -> Arc<ProviderRegistry> {
        match self.registry.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Re-run discovery and replace the registry.
    pub fn reload(&self) -> Arc<ProviderRegistry> {
        let fresh = Arc::new(ProviderRegistry::discover_from(
            (self.catalog)(),
            Some(&self.settings.provider_dir),
            &self.settings,
        ));
        match self.registry.write() {
            Ok(mut guard) => *guard = Arc::clone(&fresh),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&fresh),
        }
        info!(loaded = fresh.adapters().len(), "provider registry reloaded");
        fresh
    }

    pub fn list_providers(&self, include_mock: bool) -> Vec<ProviderInfo> {
        self.registry().list(include_mock)
    }

    pub fn diagnostics(&self) -> RegistryDiagnostics {
        self.registry().diagnostics()
    }

    #[instrument(skip(self, request), fields(city = %request.city, country = %request.country))]
    pub async fn search_events(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let (city, country, policy) = request.validate().map_err(|e| {
            warn!("rejected search request: {}", e);
            metrics::aggregate::record_rejected();
            e
        })?;

        let window = SearchWindow::from_relative(Utc::now(), request.start_in_days, request.days_ahead);
        let criteria = SearchCriteria {
            city,
            country: country.clone(),
            window,
            days_ahead: request.days_ahead,
            start_in_days: request.start_in_days,
            query: request
                .query
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(String::from),
            limit: request.limit,
            offset: request.offset,
        };

        let registry = self.registry();
        let adapters = registry.active(request.include_mock);
        let fan = fanout::execute(&adapters, &criteria).await;

        let dedup_config = DedupConfig::from(&self.settings);
        let (page, dropped, dedup) = guard_stage("post-processing", || {
            let (records, dropped) = Normalizer::new(Some(country.as_str())).normalize_all(&fan.items);
            let (mut records, dedup) = dedupe(records, &dedup_config);
            sort_events(&mut records, &policy);
            (paginate(records, request.offset, request.limit), dropped, dedup)
        })?;

        let response = SearchResponse {
            count: page.items.len(),
            total: page.total,
            items: page.items,
            providers_used: fan.attempted,
            debug: DebugInfo {
                provider_errors: fan.errors,
                window: WindowInfo {
                    start: window.start_iso(),
                    end: window.end_iso(),
                },
                discovered: registry.discovery().discovered.clone(),
                limit: request.limit,
                offset: request.offset,
                normalization_dropped: dropped,
                dedup,
            },
        };

        let elapsed = started.elapsed();
        metrics::aggregate::record_search(elapsed.as_secs_f64(), dropped, dedup.total());
        info!(
            total = response.total,
            count = response.count,
            failed = response.debug.provider_errors.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "search completed"
        );
        Ok(response)
    }

    /// Blocking variant for callers without a runtime.
    ///
    /// Must not be called from inside a tokio runtime; doing so returns
    /// [`AggregatorError::Internal`].
    pub fn search_events_sync(&self, request: &SearchRequest) -> Result<SearchResponse> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(AggregatorError::Internal(
                "search_events_sync called from within an async runtime".into(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AggregatorError::Internal(format!("failed to start runtime: {e}")))?;
        runtime.block_on(self.search_events(request))
    }
}

/// Run one facade stage, turning a panic into [`AggregatorError::Internal`].
fn guard_stage<T>(stage: &str, f: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(stage, "search stage panicked: {}", message);
        AggregatorError::Internal(format!("{stage} panicked: {message}"))
    })
}
