use async_trait::async_trait;
use std::sync::Arc;

use crate::app::ports::{EntitySource, Fetched, HttpClientPort, HttpRequest};
use crate::constants::TRACK_SOURCE;
use crate::error::FetchError;
use crate::pipeline::ingestion::payloads::{TopTracksResponse, TrackEntry};

/// Last.fm `geo.gettoptracks`, keyed by country
pub struct LastFmTopTracks {
    http: Arc<dyn HttpClientPort>,
    base_url: String,
    api_key: String,
    limit: u32,
}

impl LastFmTopTracks {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        limit: u32,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            limit,
        }
    }
}

#[async_trait]
impl EntitySource for LastFmTopTracks {
    type Payload = Vec<TrackEntry>;

    fn source_name(&self) -> &'static str {
        TRACK_SOURCE
    }

    async fn fetch_once(&self, country: &str) -> Result<Fetched<Self::Payload>, FetchError> {
        let request = HttpRequest::new(&self.base_url)
            .query("method", "geo.gettoptracks")
            .query("country", country)
            .query("api_key", &self.api_key)
            .query("format", "json")
            .query("limit", self.limit.to_string());
        let raw = self.http.get(request).await?.into_json()?;
        let payload = serde_json::from_value::<TopTracksResponse>(raw.clone())
            .map_err(|e| FetchError::InvalidStructure(e.to_string()))?
            .validate()?;
        Ok(Fetched { raw, payload })
    }
}
