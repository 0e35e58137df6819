use async_trait::async_trait;
use std::sync::Arc;

use crate::app::ports::{EntitySource, Fetched, HttpClientPort, HttpRequest};
use crate::constants::WEATHER_SOURCE;
use crate::error::FetchError;
use crate::pipeline::ingestion::payloads::{WeatherReading, WeatherResponse};

/// OpenWeather current conditions, keyed by city. Metric units, French
/// descriptions.
pub struct OpenWeatherCurrent {
    http: Arc<dyn HttpClientPort>,
    base_url: String,
    api_key: String,
}

impl OpenWeatherCurrent {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl EntitySource for OpenWeatherCurrent {
    type Payload = WeatherReading;

    fn source_name(&self) -> &'static str {
        WEATHER_SOURCE
    }

    async fn fetch_once(&self, city: &str) -> Result<Fetched<Self::Payload>, FetchError> {
        let request = HttpRequest::new(&self.base_url)
            .query("q", city)
            .query("appid", &self.api_key)
            .query("units", "metric")
            .query("lang", "fr");
        let raw = self.http.get(request).await?.into_json()?;
        let payload = serde_json::from_value::<WeatherResponse>(raw.clone())
            .map_err(|e| FetchError::InvalidStructure(e.to_string()))?
            .validate()?;
        Ok(Fetched { raw, payload })
    }
}
