//! Concurrent fan-out over the active providers.
//!
//! Every provider call is its own future and all of them are awaited together;
//! a failing or panicking provider only costs its own items.

use anyhow::anyhow;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::metrics;
use crate::providers::SearchCall;
use crate::registry::{panic_message, ProviderAdapter};
use crate::types::{RawEvent, SearchCriteria};

/// Settled result of one provider call.
#[derive(Debug)]
pub struct ProviderOutcome {
    pub key: String,
    pub items: Vec<RawEvent>,
    pub error: Option<String>,
}

/// Merged result of a whole fan-out.
#[derive(Debug, Default)]
pub struct FanOutResult {
    /// Successful items of every provider, concatenated.
    pub items: Vec<RawEvent>,
    /// Provider key → error summary, for the providers that failed.
    pub errors: BTreeMap<String, String>,
    /// Keys of every provider that was called.
    pub attempted: Vec<String>,
}

/// Call every adapter with the arguments it declares and wait for all of them.
#[instrument(skip_all, fields(providers = adapters.len(), city = %criteria.city))]
pub async fn execute(adapters: &[ProviderAdapter], criteria: &SearchCriteria) -> FanOutResult {
    let outcomes = join_all(adapters.iter().map(|a| run_provider(a, criteria))).await;

    let mut result = FanOutResult::default();
    for outcome in outcomes {
        result.attempted.push(outcome.key.clone());
        if let Some(error) = outcome.error {
            result.errors.insert(outcome.key, error);
        }
        result.items.extend(outcome.items);
    }

    info!(
        attempted = result.attempted.len(),
        failed = result.errors.len(),
        items = result.items.len(),
        "fan-out finished"
    );
    result
}

/// Run one provider to completion, never propagating its failure.
pub async fn run_provider(adapter: &ProviderAdapter, criteria: &SearchCriteria) -> ProviderOutcome {
    let args = criteria.args_for(&adapter.params);
    let started = Instant::now();

    let result = match &adapter.call {
        SearchCall::Blocking(provider) => {
            let provider = Arc::clone(provider);
            match tokio::task::spawn_blocking(move || provider.search(&args)).await {
                Ok(r) => r,
                Err(e) if e.is_panic() => Err(anyhow!(
                    "provider panicked: {}",
                    panic_message(e.into_panic().as_ref())
                )),
                Err(e) => Err(anyhow!("provider task failed: {}", e)),
            }
        }
        SearchCall::Async(provider) => {
            match AssertUnwindSafe(provider.search(&args)).catch_unwind().await {
                Ok(r) => r,
                Err(payload) => Err(anyhow!("provider panicked: {}", panic_message(payload.as_ref()))),
            }
        }
    };
    let elapsed = started.elapsed();

    match result {
        Ok(raw) => {
            let items = prepare_items(adapter, raw, criteria.query.as_deref());
            info!(
                provider = %adapter.key,
                items = items.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "provider finished"
            );
            metrics::provider::record_success(&adapter.key, elapsed.as_secs_f64(), items.len());
            ProviderOutcome {
                key: adapter.key.clone(),
                items,
                error: None,
            }
        }
        Err(e) => {
            let message = format!("{e:#}");
            warn!(
                provider = %adapter.key,
                elapsed_ms = elapsed.as_millis() as u64,
                "provider failed: {}",
                message
            );
            metrics::provider::record_error(&adapter.key, elapsed.as_secs_f64());
            ProviderOutcome {
                key: adapter.key.clone(),
                items: Vec::new(),
                error: Some(message),
            }
        }
    }
}

/// Drop non-object items, default `source` to the provider key and apply the
/// keyword filter for providers that cannot filter themselves.
fn prepare_items(adapter: &ProviderAdapter, raw: Vec<RawEvent>, query: Option<&str>) -> Vec<RawEvent> {
    let needle = query
        .map(str::trim)
        .filter(|q| !q.is_empty() && !adapter.params.keyword)
        .map(str::to_lowercase);

    raw.into_iter()
        .filter_map(|mut item| {
            let Value::Object(map) = &mut item else {
                debug!(provider = %adapter.key, "discarding non-object item");
                return None;
            };
            let has_source = map
                .get("source")
                .and_then(Value::as_str)
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            if !has_source {
                map.insert("source".into(), Value::String(adapter.key.clone()));
            }
            Some(item)
        })
        .filter(|item| needle.as_deref().map_or(true, |q| matches_keyword(item, q)))
        .collect()
}

fn matches_keyword(item: &RawEvent, needle: &str) -> bool {
    ["title", "category", "description"].iter().any(|field| {
        item.get(*field)
            .and_then(Value::as_str)
            .map(|v| v.to_lowercase().contains(needle))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AsyncSearch, SearchFn};
    use crate::types::{DateWindowStyle, ParamSet, ProviderArgs, SearchWindow};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    fn criteria(query: Option<&str>) -> SearchCriteria {
        SearchCriteria {
            city: "Vilnius".into(),
            country: "LT".into(),
            window: SearchWindow::from_relative(Utc::now(), 0, 30),
            days_ahead: 30,
            start_in_days: 0,
            query: query.map(String::from),
            limit: 50,
            offset: 0,
        }
    }

    fn listing(_: &ProviderArgs) -> anyhow::Result<Vec<RawEvent>> {
        Ok(vec![
            json!({"title": "Jazz Night", "category": "music"}),
            json!({"title": "Food Fair", "source": "upstream"}),
            json!("not an object"),
        ])
    }

    fn failing(_: &ProviderArgs) -> anyhow::Result<Vec<RawEvent>> {
        Err(anyhow!("connection refused").context("fetching listings"))
    }

    fn panicking(_: &ProviderArgs) -> anyhow::Result<Vec<RawEvent>> {
        panic!("parser bug")
    }

    fn blocking(key: &str, params: ParamSet, f: SearchFn) -> ProviderAdapter {
        ProviderAdapter::new(key, key, params, SearchCall::from(f))
    }

    /// Echoes back which arguments it was given.
    struct ArgsEcho;

    #[async_trait]
    impl AsyncSearch for ArgsEcho {
        async fn search(&self, args: &ProviderArgs) -> anyhow::Result<Vec<RawEvent>> {
            Ok(vec![json!({
                "title": "echo",
                "has_start": args.start.is_some(),
                "has_days_ahead": args.days_ahead.is_some(),
                "query": args.query,
            })])
        }
    }

    struct AsyncPanic;

    #[async_trait]
    impl AsyncSearch for AsyncPanic {
        async fn search(&self, _args: &ProviderArgs) -> anyhow::Result<Vec<RawEvent>> {
            panic!("async parser bug")
        }
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let adapters = vec![
            blocking("alpha", ParamSet::location_only(), listing),
            blocking("broken", ParamSet::location_only(), failing),
            blocking("gamma", ParamSet::location_only(), listing),
        ];
        let result = execute(&adapters, &criteria(None)).await;

        assert_eq!(result.attempted, vec!["alpha", "broken", "gamma"]);
        assert_eq!(result.items.len(), 4);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors["broken"], "fetching listings: connection refused");
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let adapters = vec![
            blocking("sync_panic", ParamSet::location_only(), panicking),
            ProviderAdapter::new("async_panic", "x", ParamSet::location_only(), SearchCall::from_async(AsyncPanic)),
            blocking("fine", ParamSet::location_only(), listing),
        ];
        let result = execute(&adapters, &criteria(None)).await;

        assert!(result.errors["sync_panic"].starts_with("provider panicked"));
        assert!(result.errors["sync_panic"].contains("parser bug"));
        assert!(result.errors["async_panic"].contains("async parser bug"));
        assert_eq!(result.items.len(), 2);
    }

    #[tokio::test]
    async fn source_defaults_to_provider_key() {
        let adapters = vec![blocking("alpha", ParamSet::location_only(), listing)];
        let result = execute(&adapters, &criteria(None)).await;

        assert_eq!(result.items[0]["source"], "alpha");
        assert_eq!(result.items[1]["source"], "upstream");
    }

    #[tokio::test]
    async fn keyword_fallback_only_for_non_keyword_providers() {
        let adapters = vec![
            blocking("plain", ParamSet::location_only(), listing),
            blocking("smart", ParamSet::location_only().with_keyword(), listing),
        ];
        let result = execute(&adapters, &criteria(Some("MUSIC"))).await;

        let from = |key: &str| result.items.iter().filter(|i| i["source"] == key).count();
        // "plain" is filtered on category; "smart" is trusted to have filtered
        assert_eq!(from("plain"), 1);
        assert_eq!(result.items.iter().filter(|i| i["source"] == "upstream").count(), 1);
    }

    #[tokio::test]
    async fn arguments_follow_declared_params() {
        let adapters = vec![
            ProviderAdapter::new(
                "absolute",
                "absolute",
                ParamSet::location_only().with_window(DateWindowStyle::Absolute),
                SearchCall::from_async(ArgsEcho),
            ),
            ProviderAdapter::new(
                "relative",
                "relative",
                ParamSet::location_only()
                    .with_window(DateWindowStyle::Relative)
                    .with_keyword(),
                SearchCall::from_async(ArgsEcho),
            ),
        ];
        let result = execute(&adapters, &criteria(Some("echo"))).await;
        let absolute = result.items.iter().find(|i| i["source"] == "absolute").unwrap();
        let relative = result.items.iter().find(|i| i["source"] == "relative").unwrap();

        assert_eq!(absolute["has_start"], true);
        assert_eq!(absolute["has_days_ahead"], false);
        assert!(absolute["query"].is_null());
        assert_eq!(relative["has_start"], false);
        assert_eq!(relative["has_days_ahead"], true);
        assert_eq!(relative["query"], "echo");
    }
}
