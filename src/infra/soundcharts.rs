use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;

use crate::app::ports::{CatalogPort, HttpClientPort, HttpRequest};
use crate::error::FetchError;
use crate::types::CatalogSong;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Option<Vec<SearchItem>>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SongResponse {
    #[serde(default)]
    object: Option<CatalogSong>,
}

/// Soundcharts song search and song details
pub struct SoundchartsCatalog {
    http: Arc<dyn HttpClientPort>,
    base_url: String,
    app_id: String,
    api_key: String,
}

impl SoundchartsCatalog {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        base_url: impl Into<String>,
        app_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            app_id: app_id.into(),
            api_key: api_key.into(),
        }
    }

    /// `segments` are percent-encoded, so track names with `/` or spaces
    /// stay a single path segment.
    fn url(&self, segments: &[&str]) -> Result<String, FetchError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| FetchError::Network(format!("invalid catalog URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::Network("catalog URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }

    fn request(&self, url: String) -> HttpRequest {
        HttpRequest::new(url)
            .header("x-app-id", &self.app_id)
            .header("x-api-key", &self.api_key)
    }
}

#[async_trait]
impl CatalogPort for SoundchartsCatalog {
    async fn search_song(
        &self,
        track_name: &str,
        artist_name: &str,
    ) -> Result<Option<String>, FetchError> {
        let url = self.url(&["api", "v2", "song", "search", track_name])?;
        let request = self
            .request(url)
            .query("offset", "0")
            .query("limit", "1")
            .query("artist", artist_name);
        let body = self.http.get(request).await?.into_json()?;
        let response: SearchResponse = serde_json::from_value(body)
            .map_err(|e| FetchError::InvalidStructure(e.to_string()))?;
        Ok(response
            .items
            .unwrap_or_default()
            .into_iter()
            .find_map(|item| item.uuid.filter(|u| !u.is_empty())))
    }

    async fn song_details(&self, uuid: &str) -> Result<CatalogSong, FetchError> {
        let url = self.url(&["api", "v2.25", "song", uuid])?;
        let body = self.http.get(self.request(url)).await?.into_json()?;
        let response: SongResponse = serde_json::from_value(body)
            .map_err(|e| FetchError::InvalidStructure(e.to_string()))?;
        response
            .object
            .ok_or_else(|| FetchError::InvalidStructure("missing 'object'".to_string()))
    }
}
