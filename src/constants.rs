/// Source names used in logs, metrics labels and anomaly detail
pub const TRACK_SOURCE: &str = "lastfm";
pub const WEATHER_SOURCE: &str = "openweather";
pub const CATALOG_SOURCE: &str = "soundcharts";

// Anomaly tags recorded against an ingestion attempt
pub const TRACK_SOURCE_FAILURE: &str = "TRACK_SOURCE_FAILURE";
pub const WEATHER_SOURCE_FAILURE: &str = "WEATHER_SOURCE_FAILURE";

/// Written into every raw snapshot's metadata block
pub const SNAPSHOT_DATA_SOURCE: &str = "lastfm_weather_ingestor";
/// Written into every batch report's metadata block
pub const INGESTION_SYSTEM: &str = "RawDataIngestor";

// Default endpoints
pub const LASTFM_API_URL: &str = "http://ws.audioscrobbler.com/2.0/";
pub const OPENWEATHER_API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const SOUNDCHARTS_API_URL: &str = "https://customer.api.soundcharts.com";

// Credential environment variables
pub const LASTFM_API_KEY_VAR: &str = "LASTFM_API_KEY";
pub const OPENWEATHER_API_KEY_VAR: &str = "OPENWEATHER_API_KEY";
pub const SOUNDCHARTS_API_KEY_VAR: &str = "SOUNDCHARTS_API_KEY";
pub const SOUNDCHARTS_APP_ID_VAR: &str = "SOUNDCHARTS_APP_ID";

// Layout under the data root
pub const RAW_DIR: &str = "raw";
pub const REPORTS_DIR: &str = "ingestion_reports";
pub const INGESTION_DB: &str = "ingestion_metadata.db";
pub const PROCESSED_DB: &str = "processed_music_weather.db";

pub const USER_AGENT: &str = concat!("music_weather/", env!("CARGO_PKG_VERSION"));
