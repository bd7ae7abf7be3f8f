//! Metrics for the aggregation engine.
//!
//! Names live in [`MetricName`] so call sites never spell metric strings by
//! hand. Recording goes through the small per-phase modules below
//! (`discovery`, `provider`, `aggregate`). When no recorder is installed the
//! `metrics` macros are no-ops, so library users and tests don't need to call
//! [`init_metrics`].

use std::fmt;
use std::sync::{Once, OnceLock};
use tracing::{info, warn};

static INIT: Once = Once::new();
static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// All metric names used in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Discovery
    DiscoveryRuns,
    DiscoveryLoaded,
    DiscoverySkipped,
    DiscoveryErrored,

    // Provider fan-out
    ProviderCalls,
    ProviderDuration,
    ProviderItems,

    // Aggregation
    SearchRequests,
    SearchRejected,
    SearchDuration,
    NormalizationDropped,
    DuplicatesRemoved,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::DiscoveryRuns => "socialite_discovery_runs_total",
            MetricName::DiscoveryLoaded => "socialite_discovery_loaded",
            MetricName::DiscoverySkipped => "socialite_discovery_skipped",
            MetricName::DiscoveryErrored => "socialite_discovery_errored",

            MetricName::ProviderCalls => "socialite_provider_calls_total",
            MetricName::ProviderDuration => "socialite_provider_duration_seconds",
            MetricName::ProviderItems => "socialite_provider_items_total",

            MetricName::SearchRequests => "socialite_search_requests_total",
            MetricName::SearchRejected => "socialite_search_rejected_total",
            MetricName::SearchDuration => "socialite_search_duration_seconds",
            MetricName::NormalizationDropped => "socialite_normalization_dropped_total",
            MetricName::DuplicatesRemoved => "socialite_duplicates_removed_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus recorder once and keep its handle for `/metrics`.
///
/// Idempotent; later calls are no-ops.
pub fn init_metrics() {
    INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                if HANDLE.set(handle).is_err() {
                    warn!("Prometheus handle was already set");
                }
                info!("Prometheus recorder installed");
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
            }
        }
    });
}

/// Render the current metrics in Prometheus text format.
///
/// Returns `None` when [`init_metrics`] has not been called.
pub fn render() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}

pub mod discovery {
    use super::MetricName;

    pub fn record_run(loaded: usize, skipped: usize, errored: usize) {
        ::metrics::counter!(MetricName::DiscoveryRuns.as_str()).increment(1);
        ::metrics::gauge!(MetricName::DiscoveryLoaded.as_str()).set(loaded as f64);
        ::metrics::gauge!(MetricName::DiscoverySkipped.as_str()).set(skipped as f64);
        ::metrics::gauge!(MetricName::DiscoveryErrored.as_str()).set(errored as f64);
    }
}

pub mod provider {
    use super::MetricName;

    pub fn record_success(provider: &str, duration_secs: f64, items: usize) {
        ::metrics::counter!(
            MetricName::ProviderCalls.as_str(),
            "provider" => provider.to_string(),
            "outcome" => "ok"
        )
        .increment(1);
        ::metrics::histogram!(MetricName::ProviderDuration.as_str(), "provider" => provider.to_string())
            .record(duration_secs);
        ::metrics::counter!(MetricName::ProviderItems.as_str(), "provider" => provider.to_string())
            .increment(items as u64);
    }

    pub fn record_error(provider: &str, duration_secs: f64) {
        ::metrics::counter!(
            MetricName::ProviderCalls.as_str(),
            "provider" => provider.to_string(),
            "outcome" => "error"
        )
        .increment(1);
        ::metrics::histogram!(MetricName::ProviderDuration.as_str(), "provider" => provider.to_string())
            .record(duration_secs);
    }
}

pub mod aggregate {
    use super::MetricName;

    pub fn record_search(duration_secs: f64, dropped: usize, duplicates: usize) {
        ::metrics::counter!(MetricName::SearchRequests.as_str()).increment(1);
        ::metrics::histogram!(MetricName::SearchDuration.as_str()).record(duration_secs);
        ::metrics::counter!(MetricName::NormalizationDropped.as_str()).increment(dropped as u64);
        ::metrics::counter!(MetricName::DuplicatesRemoved.as_str()).increment(duplicates as u64);
    }

    pub fn record_rejected() {
        ::metrics::counter!(MetricName::SearchRejected.as_str()).increment(1);
    }
}
