use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{PipelineError, Result};
use crate::pipeline::ingestion::retry::RetryPolicy;
use crate::types::Entity;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_COUNTRY: &str = "France";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub entities: Vec<Entity>,
    pub ingestion: IngestionConfig,
    pub enrichment: EnrichmentConfig,
    pub endpoints: Endpoints,
    pub storage: StorageConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Pause between two entities, in seconds
    pub delay_secs: f64,
    pub batch_size: Option<usize>,
    pub track_limit: u32,
    pub track_retry: RetryPolicy,
    pub weather_retry: RetryPolicy,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub retry: RetryPolicy,
    pub pacing_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub lastfm_url: String,
    pub openweather_url: String,
    pub soundcharts_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entities: vec![Entity::new("Paris", "France"), Entity::new("Nice", "France")],
            ingestion: IngestionConfig::default(),
            enrichment: EnrichmentConfig::default(),
            endpoints: Endpoints::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            delay_secs: 2.0,
            batch_size: None,
            track_limit: 10,
            track_retry: RetryPolicy::default(),
            weather_retry: RetryPolicy::default(),
            http_timeout_secs: 30,
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry: RetryPolicy::catalog(),
            pacing_ms: 1_000,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            lastfm_url: LASTFM_API_URL.to_string(),
            openweather_url: OPENWEATHER_API_URL.to_string(),
            soundcharts_url: SOUNDCHARTS_API_URL.to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_prefix: "music_weather.log".to_string(),
        }
    }
}

impl Config {
    /// Load from `path`, or from `config.toml` when no path is given. An
    /// explicit path must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        match fs::read_to_string(&path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.entities.is_empty() {
            return Err(PipelineError::Config("no entities configured".to_string()));
        }
        if !self.ingestion.delay_secs.is_finite() || self.ingestion.delay_secs < 0.0 {
            return Err(PipelineError::Config(format!(
                "invalid ingestion delay: {}",
                self.ingestion.delay_secs
            )));
        }
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `CITIES`, `COUNTRIES`, `INGESTION_DELAY`, `BATCH_SIZE`, `DATA_DIR`
    /// and `METRICS_PORT` from `lookup`. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cities = get("CITIES");
        let countries = get("COUNTRIES");
        if cities.is_some() || countries.is_some() {
            let cities = cities.unwrap_or_else(|| {
                self.entities
                    .iter()
                    .map(|e| e.city.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            });
            let countries = countries.unwrap_or_else(|| DEFAULT_COUNTRY.to_string());
            self.entities = parse_entity_lists(&cities, &countries)?;
        }
        if let Some(delay) = get("INGESTION_DELAY") {
            self.ingestion.delay_secs = parse_value("INGESTION_DELAY", &delay)?;
        }
        if let Some(size) = get("BATCH_SIZE") {
            self.ingestion.batch_size = Some(parse_value("BATCH_SIZE", &size)?);
        }
        if let Some(dir) = get("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir.trim());
        }
        if let Some(port) = get("METRICS_PORT") {
            self.metrics.port = Some(parse_value("METRICS_PORT", &port)?);
        }
        self.validate()
    }

    pub fn ingestion_delay(&self) -> Duration {
        Duration::from_secs_f64(self.ingestion.delay_secs)
    }

    pub fn catalog_pacing(&self) -> Duration {
        Duration::from_millis(self.enrichment.pacing_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.ingestion.http_timeout_secs)
    }

    pub fn data_dir(&self) -> &Path {
        &self.storage.data_dir
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.storage.data_dir.join(RAW_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.storage.data_dir.join(REPORTS_DIR)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| PipelineError::Config(format!("invalid {} '{}': {}", key, value, e)))
}

/// Zip comma-separated city and country lists. A single country applies to
/// every city; any other length mismatch is an error.
pub fn parse_entity_lists(cities: &str, countries: &str) -> Result<Vec<Entity>> {
    let split = |s: &str| -> Vec<String> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect()
    };
    let cities = split(cities);
    let countries = split(countries);
    if cities.is_empty() {
        return Err(PipelineError::Config("city list is empty".to_string()));
    }
    match countries.len() {
        1 => Ok(cities
            .into_iter()
            .map(|city| Entity::new(city, countries[0].clone()))
            .collect()),
        n if n == cities.len() => Ok(cities
            .into_iter()
            .zip(countries)
            .map(|(city, country)| Entity::new(city, country))
            .collect()),
        n => Err(PipelineError::Config(format!(
            "{} cities but {} countries; give one country or one per city",
            cities.len(),
            n
        ))),
    }
}

/// API credentials, read from the environment only
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub lastfm_api_key: Option<String>,
    pub openweather_api_key: Option<String>,
    pub soundcharts_api_key: Option<String>,
    pub soundcharts_app_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PrimaryCredentials {
    pub lastfm_api_key: String,
    pub openweather_api_key: String,
}

#[derive(Debug, Clone)]
pub struct CatalogCredentials {
    pub app_id: String,
    pub api_key: String,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            lastfm_api_key: get(LASTFM_API_KEY_VAR),
            openweather_api_key: get(OPENWEATHER_API_KEY_VAR),
            soundcharts_api_key: get(SOUNDCHARTS_API_KEY_VAR),
            soundcharts_app_id: get(SOUNDCHARTS_APP_ID_VAR),
        }
    }

    /// Both primary source keys, or every missing variable name.
    pub fn validate_primary(&self) -> Result<PrimaryCredentials> {
        match (&self.lastfm_api_key, &self.openweather_api_key) {
            (Some(lastfm), Some(weather)) => Ok(PrimaryCredentials {
                lastfm_api_key: lastfm.clone(),
                openweather_api_key: weather.clone(),
            }),
            (lastfm, weather) => {
                let mut missing = Vec::new();
                if lastfm.is_none() {
                    missing.push(LASTFM_API_KEY_VAR);
                }
                if weather.is_none() {
                    missing.push(OPENWEATHER_API_KEY_VAR);
                }
                Err(PipelineError::MissingCredentials(missing))
            }
        }
    }

    pub fn validate_enrichment(&self) -> Result<CatalogCredentials> {
        match (&self.soundcharts_app_id, &self.soundcharts_api_key) {
            (Some(app_id), Some(api_key)) => Ok(CatalogCredentials {
                app_id: app_id.clone(),
                api_key: api_key.clone(),
            }),
            (app_id, api_key) => {
                let mut missing = Vec::new();
                if api_key.is_none() {
                    missing.push(SOUNDCHARTS_API_KEY_VAR);
                }
                if app_id.is_none() {
                    missing.push(SOUNDCHARTS_APP_ID_VAR);
                }
                Err(PipelineError::MissingCredentials(missing))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.entities.len(), 2);
        assert_eq!(config.ingestion_delay(), Duration::from_secs(2));
        assert_eq!(config.ingestion.track_limit, 10);
        assert_eq!(config.ingestion.track_retry.max_attempts, 2);
        assert_eq!(config.enrichment.retry.max_attempts, 1);
        assert_eq!(config.raw_dir(), PathBuf::from("data").join("raw"));
    }

    #[test]
    fn toml_sections_are_partial() {
        let config = Config::from_toml_str(
            r#"
            entities = [{ city = "Lyon", country = "France" }]

            [ingestion]
            delay_secs = 0.5

            [ingestion.weather_retry]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.entities, vec![Entity::new("Lyon", "France")]);
        assert_eq!(config.ingestion.delay_secs, 0.5);
        assert_eq!(config.ingestion.weather_retry.max_attempts, 3);
        assert_eq!(config.ingestion.weather_retry.timeout_ms, 10_000);
        assert_eq!(config.ingestion.track_limit, 10);
    }

    #[test]
    fn single_country_is_broadcast() {
        let entities = parse_entity_lists("Paris, Nice ,Lyon", "France").unwrap();
        assert_eq!(entities.len(), 3);
        assert!(entities.iter().all(|e| e.country == "France"));
        assert_eq!(entities[1].city, "Nice");
    }

    #[test]
    fn mismatched_lists_are_rejected() {
        assert!(parse_entity_lists("Paris,Berlin,Rome", "France,Germany").is_err());
        assert!(parse_entity_lists("", "France").is_err());
        let pairs = parse_entity_lists("Paris,Berlin", "France,Germany").unwrap();
        assert_eq!(pairs[1], Entity::new("Berlin", "Germany"));
    }

    #[test]
    fn environment_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("CITIES", "Madrid,Sevilla"),
                ("COUNTRIES", "Spain"),
                ("INGESTION_DELAY", "1.5"),
                ("BATCH_SIZE", "1"),
                ("DATA_DIR", "/tmp/mw"),
                ("METRICS_PORT", ""),
            ]))
            .unwrap();
        assert_eq!(config.entities[0], Entity::new("Madrid", "Spain"));
        assert_eq!(config.ingestion.delay_secs, 1.5);
        assert_eq!(config.ingestion.batch_size, Some(1));
        assert_eq!(config.data_dir(), Path::new("/tmp/mw"));
        assert_eq!(config.metrics.port, None);

        let mut bad = Config::default();
        assert!(bad.apply_overrides(lookup(&[("BATCH_SIZE", "many")])).is_err());
    }

    #[test]
    fn missing_credentials_are_all_reported() {
        let creds = Credentials::from_lookup(lookup(&[("LASTFM_API_KEY", "  ")]));
        match creds.validate_primary() {
            Err(PipelineError::MissingCredentials(missing)) => {
                assert_eq!(missing, vec!["LASTFM_API_KEY", "OPENWEATHER_API_KEY"])
            }
            other => panic!("unexpected: {:?}", other),
        }

        let creds = Credentials::from_lookup(lookup(&[
            ("LASTFM_API_KEY", "a"),
            ("OPENWEATHER_API_KEY", "b"),
            ("SOUNDCHARTS_APP_ID", "app"),
        ]));
        assert!(creds.validate_primary().is_ok());
        assert!(matches!(
            creds.validate_enrichment(),
            Err(PipelineError::MissingCredentials(m)) if m == vec!["SOUNDCHARTS_API_KEY"]
        ));
    }
}
