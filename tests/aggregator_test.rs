use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

use socialite::aggregator::{Aggregator, SearchRequest};
use socialite::config::Settings;
use socialite::providers::{self, ModuleExports, ProviderModule};
use socialite::types::{to_iso_z, DateWindowStyle, ParamSet, ProviderArgs, RawEvent};

fn settings_without_manifests() -> Settings {
    Settings {
        provider_dir: "/nonexistent/providers.d".into(),
        ..Settings::default()
    }
}

fn vilnius() -> SearchRequest {
    SearchRequest {
        days_ahead: 30,
        include_mock: true,
        ..SearchRequest::new("Vilnius", "LT")
    }
}

fn concerts(_: &ProviderArgs) -> Result<Vec<RawEvent>> {
    let at = to_iso_z(&(Utc::now() + Duration::days(5)));
    Ok(vec![
        json!({"title": "Symphony Evening", "start_time": at, "venue_name": "Philharmonic", "url": "https://tickets.example/sym"}),
        json!({"title": "Organ Recital", "start_time": at, "venue_name": "Cathedral"}),
    ])
}

fn theatre(_: &ProviderArgs) -> Result<Vec<RawEvent>> {
    Ok(vec![json!({
        "name": "Hamlet",
        "startDate": to_iso_z(&(Utc::now() + Duration::days(9))),
        "location": {"name": "Youth Theatre"},
        "offers": {"price": "18,00", "priceCurrency": "eur"},
    })])
}

fn unreachable_api(_: &ProviderArgs) -> Result<Vec<RawEvent>> {
    Err(anyhow!("connection timed out"))
}

/// The same concert as `concerts`, listed by a second source.
fn resale(_: &ProviderArgs) -> Result<Vec<RawEvent>> {
    let at = to_iso_z(&(Utc::now() + Duration::days(5)));
    Ok(vec![
        json!({"title": "Symphony Evening", "start_time": at, "venue_name": "Philharmonic", "url": "https://tickets.example/sym"}),
        json!({"title": "Organ Recital!", "start_time": at, "venue_name": "Cathedral", "url": "https://resale.example/organ"}),
    ])
}

fn numbered(_: &ProviderArgs) -> Result<Vec<RawEvent>> {
    let base = Utc::now() + Duration::days(1);
    Ok((1..=25)
        .map(|i| {
            json!({
                "title": format!("Event {i:02}"),
                "start_time": to_iso_z(&(base + Duration::hours(i))),
                "url": format!("https://numbers.example/{i}"),
            })
        })
        .collect())
}

fn module(name: &str, f: providers::SearchFn) -> ProviderModule {
    ProviderModule::new(name, ParamSet::location_only(), ModuleExports::function(f))
}

#[tokio::test]
async fn test_mock_only_search_end_to_end() -> Result<()> {
    let aggregator = Aggregator::with_catalog(settings_without_manifests(), || {
        vec![providers::mock_local::module()]
    });

    let response = aggregator.search_events(&vilnius()).await?;

    assert_eq!(response.count, 2);
    assert_eq!(response.total, 2);
    assert_eq!(response.items[0].title, "Vilnius Street Food Festival");
    assert_eq!(response.items[0].min_price, Some(0.0));
    assert_eq!(response.items[1].title, "Vilnius Live Jazz Night");
    assert_eq!(response.items[0].source, "mock_local");
    assert_eq!(response.items[0].country.as_deref(), Some("LT"));
    assert_eq!(response.providers_used, vec!["mock_local"]);
    assert!(response.debug.provider_errors.is_empty());
    assert_eq!(response.debug.limit, 50);
    Ok(())
}

#[tokio::test]
async fn test_mock_excluded_unless_requested() -> Result<()> {
    let aggregator = Aggregator::with_catalog(settings_without_manifests(), || {
        vec![providers::mock_local::module(), module("concerts", concerts)]
    });

    let request = SearchRequest {
        include_mock: false,
        ..vilnius()
    };
    let response = aggregator.search_events(&request).await?;

    assert_eq!(response.providers_used, vec!["concerts"]);
    assert!(response.items.iter().all(|e| e.source == "concerts"));
    Ok(())
}

#[tokio::test]
async fn test_one_failing_provider_does_not_sink_the_search() -> Result<()> {
    let aggregator = Aggregator::with_catalog(settings_without_manifests(), || {
        vec![
            module("concerts", concerts),
            module("broken_api", unreachable_api),
            module("theatre", theatre),
        ]
    });

    let response = aggregator.search_events(&vilnius()).await?;

    assert_eq!(response.total, 3);
    assert_eq!(response.debug.provider_errors.len(), 1);
    assert_eq!(response.debug.provider_errors["broken_api"], "connection timed out");
    assert_eq!(response.providers_used.len(), 3);

    let hamlet = response.items.iter().find(|e| e.title == "Hamlet").expect("theatre item");
    assert_eq!(hamlet.min_price, Some(18.0));
    assert_eq!(hamlet.currency.as_deref(), Some("EUR"));
    assert_eq!(hamlet.venue_name.as_deref(), Some("Youth Theatre"));
    Ok(())
}

#[tokio::test]
async fn test_cross_provider_duplicates_collapse() -> Result<()> {
    let aggregator = Aggregator::with_catalog(settings_without_manifests(), || {
        vec![module("concerts", concerts), module("resale", resale)]
    });

    let response = aggregator.search_events(&vilnius()).await?;

    assert_eq!(response.total, 2);
    assert_eq!(response.debug.dedup.exact_removed, 1);
    assert_eq!(response.debug.dedup.fuzzy_removed, 1);
    // the first provider's listing wins
    assert!(response.items.iter().all(|e| e.source == "concerts"));
    Ok(())
}

#[tokio::test]
async fn test_pagination_slices_sorted_results() -> Result<()> {
    let aggregator = Aggregator::with_catalog(settings_without_manifests(), || {
        vec![module("numbers", numbered)]
    });

    let request = SearchRequest {
        limit: 10,
        offset: 10,
        ..vilnius()
    };
    let response = aggregator.search_events(&request).await?;

    assert_eq!(response.total, 25);
    assert_eq!(response.count, 10);
    let titles: Vec<_> = response.items.iter().map(|e| e.title.as_str()).collect();
    let expected: Vec<String> = (11..=20).map(|i| format!("Event {i:02}")).collect();
    assert_eq!(titles, expected);

    let past_end = SearchRequest {
        offset: 40,
        ..vilnius()
    };
    let response = aggregator.search_events(&past_end).await?;
    assert_eq!(response.count, 0);
    assert_eq!(response.total, 25);
    Ok(())
}

#[tokio::test]
async fn test_keyword_filter_reaches_every_provider() -> Result<()> {
    let aggregator = Aggregator::with_catalog(settings_without_manifests(), || {
        vec![
            providers::mock_local::module(),
            module("concerts", concerts),
            module("theatre", theatre),
        ]
    });

    let request = SearchRequest {
        query: Some("jazz".into()),
        ..vilnius()
    };
    let response = aggregator.search_events(&request).await?;

    assert_eq!(response.total, 1);
    assert_eq!(response.items[0].title, "Vilnius Live Jazz Night");
    Ok(())
}

#[test]
fn test_discovery_reads_manifest_directory() -> Result<()> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("city_calendar.toml"),
        "key = \"city_calendar\"\nname = \"City Calendar\"\nkind = \"ics\"\nurls = []\n",
    )?;
    fs::write(dir.path().join("legacy.toml"), "key = \"legacy\"\nkind = \"rss\"\n")?;
    fs::write(dir.path().join("broken.toml"), "kind = \"ics")?;
    fs::write(
        dir.path().join("shadow.toml"),
        "key = \"mock_local\"\nkind = \"jsonld\"\nurls = []\n",
    )?;

    let settings = Settings {
        provider_dir: dir.path().to_path_buf(),
        ..Settings::default()
    };
    let aggregator = Aggregator::with_catalog(settings, || vec![providers::mock_local::module()]);
    let diagnostics = aggregator.diagnostics();
    let discovery = &diagnostics.discovery;

    assert_eq!(discovery.loaded, vec!["city_calendar", "mock_local"]);
    assert_eq!(discovery.discovered.len(), 5);

    let skipped: Vec<_> = discovery.skipped.iter().map(|s| (s.module.as_str(), s.reason.as_str())).collect();
    assert_eq!(
        skipped,
        vec![
            ("manifest:legacy", "no search function"),
            ("manifest:shadow", "duplicate provider key 'mock_local'"),
        ]
    );
    assert_eq!(discovery.errored.len(), 1);
    assert_eq!(discovery.errored[0].module, "manifest:broken");

    let calendar = diagnostics.providers.iter().find(|p| p.key == "city_calendar").expect("loaded");
    assert_eq!(calendar.name, "City Calendar");
    assert!(calendar.is_async);

    // a second discovery run over the same inputs produces the same ledger
    let reloaded = aggregator.reload();
    assert_eq!(reloaded.discovery(), discovery);
    Ok(())
}

#[test]
fn test_module_declares_relative_window_only() {
    let params = ParamSet::location_only()
        .with_window(DateWindowStyle::Relative)
        .with_keyword();
    let relative = ProviderModule::new("relative", params, ModuleExports::function(concerts));
    assert!(relative.params.accepts_relative_window());
    assert!(!relative.params.accepts_absolute_window());
}
