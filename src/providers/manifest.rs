//! Feed providers declared as TOML manifests in a directory.
//!
//! ```toml
//! key = "vilnius_ics"
//! name = "Vilnius City Calendar"
//! kind = "ics"            # or "jsonld"
//! urls = ["https://vilnius.example/events.ics"]
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::ics_feed::{self, IcsFeedProvider};
use super::web::WebProvider;
use super::{ModuleExports, ProviderModule, SearchCall};
use crate::types::ParamSet;

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderManifest {
    pub key: Option<String>,
    pub name: Option<String>,
    pub kind: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Result of scanning a manifest directory.
#[derive(Debug, Default)]
pub struct ManifestScan {
    pub modules: Vec<ProviderModule>,
    /// `(module, reason)` for manifests that could not be read or parsed.
    pub errored: Vec<(String, String)>,
}

/// Read every `*.toml` file in `dir`, in file name order.
///
/// A missing directory yields an empty scan.
pub fn load_manifests(dir: &Path) -> ManifestScan {
    let mut scan = ManifestScan::default();
    if !dir.is_dir() {
        debug!("manifest directory {} not present", dir.display());
        return scan;
    }

    let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("toml"))
            .collect(),
        Err(e) => {
            warn!("failed to read manifest directory {}: {}", dir.display(), e);
            scan.errored.push((dir.display().to_string(), e.to_string()));
            return scan;
        }
    };
    paths.sort();

    for path in paths {
        let module_name = module_name_for(&path);
        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| toml::from_str::<ProviderManifest>(&content).map_err(|e| e.to_string()));
        match parsed {
            Ok(manifest) => scan.modules.push(module_from_manifest(&module_name, manifest)),
            Err(reason) => {
                warn!("invalid provider manifest {}: {}", path.display(), reason);
                scan.errored.push((module_name, reason));
            }
        }
    }
    scan
}

fn module_name_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed");
    format!("manifest:{stem}")
}

/// Turn a manifest into a provider module. Unknown kinds export nothing, so
/// discovery skips them.
pub fn module_from_manifest(module_name: &str, manifest: ProviderManifest) -> ProviderModule {
    let key = manifest
        .key
        .clone()
        .unwrap_or_else(|| module_name.trim_start_matches("manifest:").to_string());
    let urls = manifest.urls;

    let (params, exports) = match manifest.kind.as_deref() {
        Some("ics") => (
            ics_feed::params(),
            ModuleExports::class(move |settings| {
                Ok(SearchCall::from_async(IcsFeedProvider::new(urls.clone(), settings)?))
            }),
        ),
        Some("jsonld") => (
            ParamSet::location_only(),
            ModuleExports::class(move |settings| {
                Ok(SearchCall::blocking(WebProvider::new(urls.clone(), settings)))
            }),
        ),
        other => {
            debug!(module = module_name, kind = ?other, "manifest has no usable kind");
            (ParamSet::location_only(), ModuleExports::default())
        }
    };

    let mut module = ProviderModule::new(module_name, params, exports).with_key(key);
    if let Some(name) = manifest.name {
        module = module.with_display_name(name);
    }
    module
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::io::Write;

    fn write(dir: &Path, file: &str, body: &str) {
        let mut f = fs::File::create(dir.join(file)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn missing_directory_is_empty() {
        let scan = load_manifests(Path::new("/definitely/not/here"));
        assert!(scan.modules.is_empty());
        assert!(scan.errored.is_empty());
    }

    #[test]
    fn loads_manifests_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "b_pages.toml",
            "key = \"city_pages\"\nkind = \"jsonld\"\nurls = [\"https://city.example/\"]\n",
        );
        write(
            dir.path(),
            "a_calendar.toml",
            "key = \"city_ics\"\nname = \"City Calendar\"\nkind = \"ics\"\nurls = []\n",
        );
        write(dir.path(), "c_broken.toml", "key = [unterminated");
        write(dir.path(), "notes.txt", "ignored");

        let scan = load_manifests(dir.path());
        let names: Vec<_> = scan.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["manifest:a_calendar", "manifest:b_pages"]);
        assert_eq!(scan.modules[0].resolved_key(), "city_ics");
        assert_eq!(scan.modules[0].resolved_display_name(), "City Calendar");
        assert!(scan.modules[0].params.keyword);

        assert_eq!(scan.errored.len(), 1);
        assert_eq!(scan.errored[0].0, "manifest:c_broken");
    }

    #[test]
    fn kinds_resolve_to_constructors() {
        let settings = Settings::default();
        let manifest = |kind: Option<&str>| ProviderManifest {
            key: None,
            name: None,
            kind: kind.map(String::from),
            urls: vec![],
        };

        let ics = module_from_manifest("manifest:feeds", manifest(Some("ics")));
        assert_eq!(ics.resolved_key(), "feeds");
        let ctor = ics.exports.class.clone().unwrap();
        assert!(ctor(&settings).unwrap().is_async());

        let pages = module_from_manifest("manifest:pages", manifest(Some("jsonld")));
        let ctor = pages.exports.class.clone().unwrap();
        assert!(!ctor(&settings).unwrap().is_async());

        assert!(module_from_manifest("manifest:x", manifest(Some("rss"))).exports.is_empty());
        assert!(module_from_manifest("manifest:y", manifest(None)).exports.is_empty());
    }
}
