//! Provider registry: discovers provider modules and resolves each into one
//! uniform [`ProviderAdapter`].
//!
//! Discovery never fails. Modules without a usable export are *skipped*,
//! modules whose constructor errors (or panics) are *errored*, and both are
//! recorded with a reason in [`DiscoveryDiagnostics`]. The registry is
//! immutable once built; re-discovery builds a fresh one.

use serde::Serialize;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::metrics;
use crate::providers::{self, manifest, ProviderModule, SearchCall};
use crate::types::ParamSet;

const NO_SEARCH_FUNCTION: &str = "no search function";

/// A discovered provider, ready to be called by the fan-out executor.
#[derive(Debug, Clone)]
pub struct ProviderAdapter {
    pub key: String,
    pub display_name: String,
    /// Module the adapter was resolved from.
    pub module: String,
    pub params: ParamSet,
    pub call: SearchCall,
}

impl ProviderAdapter {
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        params: ParamSet,
        call: SearchCall,
    ) -> Self {
        let key = key.into();
        Self {
            module: key.clone(),
            key,
            display_name: display_name.into(),
            params,
            call,
        }
    }

    pub fn is_async(&self) -> bool {
        self.call.is_async()
    }

    pub fn is_mock(&self) -> bool {
        providers::is_mock_key(&self.key)
    }
}

/// `{key, name}` as listed to UIs and operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    pub key: String,
    pub name: String,
    pub module: String,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryIssue {
    pub module: String,
    pub reason: String,
}

/// Ledger of one discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryDiagnostics {
    /// Every module seen, in discovery order.
    pub discovered: Vec<String>,
    /// Keys of the adapters that loaded.
    pub loaded: Vec<String>,
    pub skipped: Vec<DiscoveryIssue>,
    pub errored: Vec<DiscoveryIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryDiagnostics {
    pub providers: Vec<AdapterInfo>,
    pub discovery: DiscoveryDiagnostics,
}

enum Resolution {
    Loaded(SearchCall),
    Skipped(String),
    Errored(String),
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    adapters: Vec<ProviderAdapter>,
    discovery: DiscoveryDiagnostics,
}

impl ProviderRegistry {
    /// Discover the compiled-in catalog plus the manifests in
    /// `settings.provider_dir`.
    pub fn discover(settings: &Settings) -> Self {
        Self::discover_from(providers::catalog(), Some(&settings.provider_dir), settings)
    }

    /// Discover an explicit module list, optionally followed by a manifest
    /// directory.
    pub fn discover_from(
        modules: Vec<ProviderModule>,
        manifest_dir: Option<&Path>,
        settings: &Settings,
    ) -> Self {
        let mut discovery = DiscoveryDiagnostics::default();
        let mut modules = modules;
        let mut broken_manifests = Vec::new();

        if let Some(dir) = manifest_dir {
            let scan = manifest::load_manifests(dir);
            modules.extend(scan.modules);
            broken_manifests = scan.errored;
        }

        let mut adapters: Vec<ProviderAdapter> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for module in &modules {
            discovery.discovered.push(module.name.clone());
            let key = module.resolved_key();

            match resolve(module, settings) {
                Resolution::Loaded(call) => {
                    if !seen.insert(key.clone()) {
                        warn!(module = %module.name, "duplicate provider key '{}'", key);
                        discovery.skipped.push(DiscoveryIssue {
                            module: module.name.clone(),
                            reason: format!("duplicate provider key '{key}'"),
                        });
                        continue;
                    }
                    debug!(module = %module.name, key = %key, is_async = call.is_async(), "provider loaded");
                    adapters.push(ProviderAdapter {
                        key,
                        display_name: module.resolved_display_name(),
                        module: module.name.clone(),
                        params: module.params,
                        call,
                    });
                }
                Resolution::Skipped(reason) => {
                    debug!(module = %module.name, "provider skipped: {}", reason);
                    discovery.skipped.push(DiscoveryIssue {
                        module: module.name.clone(),
                        reason,
                    });
                }
                Resolution::Errored(reason) => {
                    warn!(module = %module.name, "provider failed to load: {}", reason);
                    discovery.errored.push(DiscoveryIssue {
                        module: module.name.clone(),
                        reason,
                    });
                }
            }
        }

        for (module, reason) in broken_manifests {
            discovery.discovered.push(module.clone());
            discovery.errored.push(DiscoveryIssue { module, reason });
        }

        adapters.sort_by(|a, b| a.key.cmp(&b.key));
        discovery.loaded = adapters.iter().map(|a| a.key.clone()).collect();

        info!(
            discovered = discovery.discovered.len(),
            loaded = discovery.loaded.len(),
            skipped = discovery.skipped.len(),
            errored = discovery.errored.len(),
            "provider discovery finished"
        );
        metrics::discovery::record_run(
            discovery.loaded.len(),
            discovery.skipped.len(),
            discovery.errored.len(),
        );

        Self { adapters, discovery }
    }

    pub fn adapters(&self) -> &[ProviderAdapter] {
        &self.adapters
    }

    pub fn get(&self, key: &str) -> Option<&ProviderAdapter> {
        self.adapters.iter().find(|a| a.key == key)
    }

    /// Adapters taking part in a search; mock sources only when asked for.
    pub fn active(&self, include_mock: bool) -> Vec<ProviderAdapter> {
        self.adapters
            .iter()
            .filter(|a| include_mock || !a.is_mock())
            .cloned()
            .collect()
    }

    pub fn list(&self, include_mock: bool) -> Vec<ProviderInfo> {
        self.adapters
            .iter()
            .filter(|a| include_mock || !a.is_mock())
            .map(|a| ProviderInfo {
                key: a.key.clone(),
                name: a.display_name.clone(),
            })
            .collect()
    }

    pub fn discovery(&self) -> &DiscoveryDiagnostics {
        &self.discovery
    }

    pub fn diagnostics(&self) -> RegistryDiagnostics {
        RegistryDiagnostics {
            providers: self
                .adapters
                .iter()
                .map(|a| AdapterInfo {
                    key: a.key.clone(),
                    name: a.display_name.clone(),
                    module: a.module.clone(),
                    is_async: a.is_async(),
                })
                .collect(),
            discovery: self.discovery.clone(),
        }
    }
}

/// Resolve a module's exports in priority order: function, class, factory.
fn resolve(module: &ProviderModule, settings: &Settings) -> Resolution {
    let exports = &module.exports;
    if let Some(search) = exports.search {
        return Resolution::Loaded(SearchCall::from(search));
    }
    let Some(ctor) = exports.class.as_ref().or(exports.factory.as_ref()) else {
        return Resolution::Skipped(NO_SEARCH_FUNCTION.to_string());
    };

    match panic::catch_unwind(AssertUnwindSafe(|| ctor(settings))) {
        Ok(Ok(call)) => Resolution::Loaded(call),
        Ok(Err(e)) => Resolution::Errored(format!("{e:#}")),
        Err(payload) => Resolution::Errored(format!(
            "constructor panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ModuleExports;
    use crate::types::{ProviderArgs, RawEvent};
    use anyhow::anyhow;

    fn empty(_: &ProviderArgs) -> anyhow::Result<Vec<RawEvent>> {
        Ok(Vec::new())
    }

    fn modules() -> Vec<ProviderModule> {
        vec![
            ProviderModule::new("zeta", ParamSet::location_only(), ModuleExports::function(empty)),
            ProviderModule::new("mock_feed", ParamSet::location_only(), ModuleExports::function(empty)),
            ProviderModule::new("helpers", ParamSet::location_only(), ModuleExports::default()),
            ProviderModule::new(
                "needs_key",
                ParamSet::location_only(),
                ModuleExports::class(|_| Err(anyhow!("missing configuration: API_KEY"))),
            ),
            ProviderModule::new(
                "explodes",
                ParamSet::location_only(),
                ModuleExports::factory(|_| panic!("boom")),
            ),
            ProviderModule::new("zeta_again", ParamSet::location_only(), ModuleExports::function(empty))
                .with_key("zeta"),
        ]
    }

    #[test]
    fn discovery_classifies_modules() {
        let registry = ProviderRegistry::discover_from(modules(), None, &Settings::default());
        let d = registry.discovery();

        assert_eq!(d.discovered.len(), 6);
        assert_eq!(d.loaded, vec!["mock_feed", "zeta"]);
        assert_eq!(
            d.skipped,
            vec![
                DiscoveryIssue {
                    module: "helpers".into(),
                    reason: "no search function".into()
                },
                DiscoveryIssue {
                    module: "zeta_again".into(),
                    reason: "duplicate provider key 'zeta'".into()
                },
            ]
        );
        assert_eq!(d.errored.len(), 2);
        assert_eq!(d.errored[0].reason, "missing configuration: API_KEY");
        assert!(d.errored[1].reason.contains("boom"));
        assert_eq!(registry.get("zeta").unwrap().module, "zeta");
    }

    #[test]
    fn rediscovery_is_idempotent() {
        let settings = Settings::default();
        let first = ProviderRegistry::discover_from(modules(), None, &settings);
        let second = ProviderRegistry::discover_from(modules(), None, &settings);
        assert_eq!(first.discovery(), second.discovery());
    }

    #[test]
    fn mock_providers_are_opt_in() {
        let registry = ProviderRegistry::discover_from(modules(), None, &Settings::default());
        let keys = |infos: Vec<ProviderInfo>| infos.into_iter().map(|i| i.key).collect::<Vec<_>>();

        assert_eq!(keys(registry.list(false)), vec!["zeta"]);
        assert_eq!(keys(registry.list(true)), vec!["mock_feed", "zeta"]);
        assert_eq!(registry.active(false).len(), 1);
    }

    #[test]
    fn builtin_catalog_without_credentials() {
        let settings = Settings {
            provider_dir: "/nonexistent/providers.d".into(),
            ..Settings::default()
        };
        let registry = ProviderRegistry::discover(&settings);
        let d = registry.discovery();

        assert!(d.loaded.contains(&"mock_local".to_string()));
        assert!(d.loaded.contains(&"ics".to_string()));
        assert!(d.loaded.contains(&"web".to_string()));
        let errored: Vec<_> = d.errored.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(errored, vec!["ticketmaster", "seatgeek", "eventbrite"]);

        let diag = registry.diagnostics();
        let mock = diag.providers.iter().find(|p| p.key == "mock_local").unwrap();
        assert_eq!(mock.name, "Mock (Local)");
        assert!(!mock.is_async);
    }
}
