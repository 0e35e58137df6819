use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchError;
use crate::types::CatalogSong;

// Ingest-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, request: HttpRequest) -> Result<HttpGetResult, FetchError>;
}

#[derive(Clone, Debug, Default)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl HttpGetResult {
    /// Non-2xx statuses are attempt failures; otherwise the body must be JSON.
    pub fn into_json(self) -> Result<Value, FetchError> {
        if !(200..300).contains(&self.status) {
            return Err(FetchError::Status(self.status));
        }
        serde_json::from_slice(&self.bytes)
            .map_err(|e| FetchError::InvalidStructure(format!("body is not JSON: {}", e)))
    }
}

/// A validated response: the raw body as received plus its typed view.
#[derive(Clone, Debug)]
pub struct Fetched<T> {
    pub raw: Value,
    pub payload: T,
}

/// One of the primary providers, fetched by key (country or city).
///
/// `fetch_once` performs a single attempt and returns an error for any
/// network failure, non-2xx status or structurally invalid body. Retrying
/// and degrading to "unavailable" is the caller's job (see
/// `pipeline::ingestion::retry`).
#[async_trait]
pub trait EntitySource: Send + Sync {
    type Payload: Send;

    fn source_name(&self) -> &'static str;

    async fn fetch_once(&self, key: &str) -> Result<Fetched<Self::Payload>, FetchError>;
}

/// Tertiary catalog used by the enrichment phase
#[async_trait]
pub trait CatalogPort: Send + Sync {
    /// External identifier of the best match, `None` when nothing matches.
    async fn search_song(
        &self,
        track_name: &str,
        artist_name: &str,
    ) -> Result<Option<String>, FetchError>;

    async fn song_details(&self, uuid: &str) -> Result<CatalogSong, FetchError>;
}
