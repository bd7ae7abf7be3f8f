//! Provider abstraction and the compiled-in provider catalog.
//!
//! A provider is anything that can turn [`ProviderArgs`] into raw event
//! dictionaries. Implementations come in three shapes, mirroring how
//! providers grew over time:
//!
//! - a plain function ([`ModuleExports::search`]), always blocking;
//! - a "class": a constructor that builds an instance ([`ModuleExports::class`]);
//! - a factory that returns an instance ([`ModuleExports::factory`]).
//!
//! Instances are either [`BlockingSearch`] or [`AsyncSearch`]. The registry
//! resolves every module to a single [`SearchCall`] once at discovery time, so
//! the fan-out executor never has to care which shape it was.

pub mod base;
pub mod eventbrite;
pub mod ics_feed;
pub mod manifest;
pub mod mock_local;
pub mod seatgeek;
pub mod ticketmaster;
pub mod web;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::Settings;
use crate::types::{ParamSet, ProviderArgs, RawEvent};

/// A provider whose search blocks the calling thread (scrapers, blocking HTTP).
///
/// Run on the blocking pool by the fan-out executor.
pub trait BlockingSearch: Send + Sync {
    fn search(&self, args: &ProviderArgs) -> Result<Vec<RawEvent>>;
}

/// A provider whose search is a future, awaited alongside the others.
#[async_trait]
pub trait AsyncSearch: Send + Sync {
    async fn search(&self, args: &ProviderArgs) -> Result<Vec<RawEvent>>;
}

/// Module-level search function.
pub type SearchFn = fn(&ProviderArgs) -> Result<Vec<RawEvent>>;

/// Builds a provider instance. Errors here mark the module as errored.
pub type Constructor = Arc<dyn Fn(&Settings) -> Result<SearchCall> + Send + Sync>;

/// The resolved, uniform way to call a provider.
#[derive(Clone)]
pub enum SearchCall {
    Blocking(Arc<dyn BlockingSearch>),
    Async(Arc<dyn AsyncSearch>),
}

impl SearchCall {
    pub fn blocking(provider: impl BlockingSearch + 'static) -> Self {
        SearchCall::Blocking(Arc::new(provider))
    }

    pub fn from_async(provider: impl AsyncSearch + 'static) -> Self {
        SearchCall::Async(Arc::new(provider))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, SearchCall::Async(_))
    }
}

impl fmt::Debug for SearchCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchCall::Blocking(_) => f.write_str("SearchCall::Blocking"),
            SearchCall::Async(_) => f.write_str("SearchCall::Async"),
        }
    }
}

/// Wraps a module-level [`SearchFn`] as a blocking provider.
struct FnSearch(SearchFn);

impl BlockingSearch for FnSearch {
    fn search(&self, args: &ProviderArgs) -> Result<Vec<RawEvent>> {
        (self.0)(args)
    }
}

impl From<SearchFn> for SearchCall {
    fn from(f: SearchFn) -> Self {
        SearchCall::blocking(FnSearch(f))
    }
}

/// What a provider module exposes. Any combination may be set; discovery
/// resolves them in field order.
#[derive(Clone, Default)]
pub struct ModuleExports {
    pub search: Option<SearchFn>,
    pub class: Option<Constructor>,
    pub factory: Option<Constructor>,
}

impl ModuleExports {
    pub fn function(f: SearchFn) -> Self {
        Self {
            search: Some(f),
            ..Self::default()
        }
    }

    pub fn class<F>(ctor: F) -> Self
    where
        F: Fn(&Settings) -> Result<SearchCall> + Send + Sync + 'static,
    {
        Self {
            class: Some(Arc::new(ctor)),
            ..Self::default()
        }
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&Settings) -> Result<SearchCall> + Send + Sync + 'static,
    {
        Self {
            factory: Some(Arc::new(factory)),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.search.is_none() && self.class.is_none() && self.factory.is_none()
    }
}

/// One discoverable provider module.
#[derive(Clone)]
pub struct ProviderModule {
    /// Module name as recorded in discovery diagnostics.
    pub name: String,
    /// Provider key; defaults to `name`.
    pub key: Option<String>,
    /// Human friendly name; defaults to the title-cased module name.
    pub display_name: Option<String>,
    pub params: ParamSet,
    pub exports: ModuleExports,
}

impl ProviderModule {
    pub fn new(name: impl Into<String>, params: ParamSet, exports: ModuleExports) -> Self {
        Self {
            name: name.into(),
            key: None,
            display_name: None,
            params,
            exports,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn resolved_key(&self) -> String {
        self.key.clone().unwrap_or_else(|| self.name.clone())
    }

    pub fn resolved_display_name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| title_case(&self.name))
    }
}

impl fmt::Debug for ProviderModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderModule")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// `mock_local` → `Mock Local`
fn title_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// All compiled-in provider modules.
pub fn catalog() -> Vec<ProviderModule> {
    vec![
        mock_local::module(),
        ticketmaster::module(),
        seatgeek::module(),
        eventbrite::module(),
        ics_feed::module(),
        web::module(),
    ]
}

/// True for test/mock sources, which are excluded unless explicitly requested.
pub fn is_mock_key(key: &str) -> bool {
    key.to_lowercase().contains("mock")
}
