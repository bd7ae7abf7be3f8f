use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "socialite.toml";
pub const DEFAULT_PROVIDER_DIR: &str = "providers.d";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 88.0;
pub const DEFAULT_DATE_TOLERANCE_DAYS: i64 = 1;
pub const DEFAULT_PORT: u16 = 8000;

/// Runtime settings.
///
/// Values come from an optional TOML file first, then environment variables
/// (after `.env` is loaded) override them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ticketmaster_api_key: Option<String>,
    pub seatgeek_client_id: Option<String>,
    pub seatgeek_client_secret: Option<String>,
    pub eventbrite_token: Option<String>,
    pub ics_urls: Vec<String>,
    pub web_discovery_urls: Vec<String>,
    pub provider_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub fuzzy_threshold: f64,
    pub date_tolerance_days: i64,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ticketmaster_api_key: None,
            seatgeek_client_id: None,
            seatgeek_client_secret: None,
            eventbrite_token: None,
            ics_urls: Vec::new(),
            web_discovery_urls: Vec::new(),
            provider_dir: PathBuf::from(DEFAULT_PROVIDER_DIR),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            date_tolerance_days: DEFAULT_DATE_TOLERANCE_DAYS,
            port: DEFAULT_PORT,
        }
    }
}

impl Settings {
    /// Load `.env`, the TOML file (`$SOCIALITE_CONFIG` or `socialite.toml` if
    /// present), then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let config_path = std::env::var("SOCIALITE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let base = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        base.with_env(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Apply overrides from a variable lookup. Split out from [`Settings::load`]
    /// so tests can feed a map instead of the process environment.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("TICKETMASTER_API_KEY") {
            self.ticketmaster_api_key = Some(v.trim().to_string());
        }
        if let Some(v) = non_empty("SEATGEEK_CLIENT_ID") {
            self.seatgeek_client_id = Some(v.trim().to_string());
        }
        if let Some(v) = non_empty("SEATGEEK_CLIENT_SECRET") {
            self.seatgeek_client_secret = Some(v.trim().to_string());
        }
        if let Some(v) = non_empty("EVENTBRITE_TOKEN") {
            self.eventbrite_token = Some(v.trim().to_string());
        }
        if let Some(v) = non_empty("ICS_URLS") {
            self.ics_urls = parse_list(&v);
        }
        if let Some(v) = non_empty("WEB_DISCOVERY_URLS") {
            self.web_discovery_urls = parse_list(&v);
        }
        if let Some(v) = non_empty("SOCIALITE_PROVIDER_DIR") {
            self.provider_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = non_empty("SOCIALITE_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_value("SOCIALITE_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = non_empty("SOCIALITE_FUZZY_THRESHOLD") {
            self.fuzzy_threshold = parse_value("SOCIALITE_FUZZY_THRESHOLD", &v)?;
        }
        if let Some(v) = non_empty("SOCIALITE_DATE_TOLERANCE_DAYS") {
            self.date_tolerance_days = parse_value("SOCIALITE_DATE_TOLERANCE_DAYS", &v)?;
        }
        if let Some(v) = non_empty("SOCIALITE_PORT") {
            self.port = parse_value("SOCIALITE_PORT", &v)?;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.fuzzy_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "fuzzy_threshold".to_string(),
                message: format!("{} is outside 0..=100", self.fuzzy_threshold),
            });
        }
        if self.date_tolerance_days < 0 {
            return Err(ConfigError::InvalidValue {
                key: "date_tolerance_days".to_string(),
                message: "must not be negative".to_string(),
            });
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "http_timeout_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Accept a JSON array or a comma-separated string.
pub fn parse_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<String>>(trimmed) {
            return values
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
        }
    }
    trimmed
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parse_list_accepts_json_and_commas() {
        assert_eq!(
            parse_list(r#"["https://a.example/cal.ics", " https://b.example "]"#),
            vec!["https://a.example/cal.ics", "https://b.example"]
        );
        assert_eq!(parse_list("a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_list("  ").is_empty());
    }

    #[test]
    fn env_overrides_defaults() {
        let settings = Settings::default()
            .with_env(env(&[
                ("TICKETMASTER_API_KEY", " tm-key "),
                ("EVENTBRITE_TOKEN", "eb-token"),
                ("ICS_URLS", "https://a.example/x.ics"),
                ("SOCIALITE_FUZZY_THRESHOLD", "90"),
                ("SOCIALITE_PORT", "9000"),
            ]))
            .unwrap();

        assert_eq!(settings.ticketmaster_api_key.as_deref(), Some("tm-key"));
        assert_eq!(settings.eventbrite_token.as_deref(), Some("eb-token"));
        assert_eq!(settings.ics_urls, vec!["https://a.example/x.ics"]);
        assert_eq!(settings.fuzzy_threshold, 90.0);
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.date_tolerance_days, DEFAULT_DATE_TOLERANCE_DAYS);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let settings = Settings::default()
            .with_env(env(&[("TICKETMASTER_API_KEY", "   ")]))
            .unwrap();
        assert!(settings.ticketmaster_api_key.is_none());
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Settings::default()
            .with_env(env(&[("SOCIALITE_HTTP_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = Settings::default()
            .with_env(env(&[("SOCIALITE_FUZZY_THRESHOLD", "140")]))
            .unwrap_err();
        assert!(err.to_string().contains("fuzzy_threshold"));
    }

    #[test]
    fn toml_file_supplies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("socialite.toml");
        fs::write(
            &path,
            "ics_urls = [\"https://cal.example/feed.ics\"]\nfuzzy_threshold = 85.0\n",
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.ics_urls.len(), 1);
        assert_eq!(settings.fuzzy_threshold, 85.0);
        assert_eq!(settings.http_timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS);
    }
}
