#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use music_weather::app::ports::{CatalogPort, EntitySource, Fetched};
use music_weather::error::FetchError;
use music_weather::pipeline::ingestion::payloads::{
    TopTracksResponse, TrackEntry, WeatherReading, WeatherResponse,
};
use music_weather::pipeline::ingestion::retry::RetryPolicy;
use music_weather::storage::{EtlHealth, SqliteStorage, Storage, StoreError};
use music_weather::types::{
    CatalogSong, EnrichmentRecord, EtlRunStats, TrackFeatureRecord, TrackKey,
};

/// Two quick attempts, so failing sources don't slow the suite down
pub fn quick_policy() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1), Duration::from_secs(2))
}

pub fn top_tracks_body(tracks: Value) -> Value {
    json!({ "tracks": { "track": tracks, "@attr": { "country": "France" } } })
}

pub fn weather_body(condition: &str, temp: f64) -> Value {
    json!({
        "weather": [{ "main": condition, "description": "ciel dégagé" }],
        "main": { "temp": temp, "humidity": 55 },
        "wind": { "speed": 4.1 },
        "name": "Paris"
    })
}

pub fn tracks_fetched(raw: Value) -> Fetched<Vec<TrackEntry>> {
    let payload = serde_json::from_value::<TopTracksResponse>(raw.clone())
        .expect("top tracks body")
        .validate()
        .expect("valid top tracks");
    Fetched { raw, payload }
}

pub fn weather_fetched(raw: Value) -> Fetched<WeatherReading> {
    let payload = serde_json::from_value::<WeatherResponse>(raw.clone())
        .expect("weather body")
        .validate()
        .expect("valid weather");
    Fetched { raw, payload }
}

/// Source answering per key from a fixed table; unknown keys fail with a
/// network error. Counts every attempt.
pub struct FakeSource<P> {
    name: &'static str,
    responses: Mutex<HashMap<String, Result<Fetched<P>, FetchError>>>,
    calls: AtomicUsize,
}

impl<P: Clone + Send + Sync + 'static> FakeSource<P> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            responses: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn respond(self, key: &str, response: Result<Fetched<P>, FetchError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(key.to_string(), response);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: Clone + Send + Sync + 'static> EntitySource for FakeSource<P> {
    type Payload = P;

    fn source_name(&self) -> &'static str {
        self.name
    }

    async fn fetch_once(&self, key: &str) -> Result<Fetched<P>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Network(format!("no route to {}", key))))
    }
}

/// Catalog keyed by track name. Tracks not in the table have no match.
#[derive(Default)]
pub struct FakeCatalog {
    songs: HashMap<String, (String, Value)>,
    failing: bool,
    pub searches: AtomicUsize,
}

impl FakeCatalog {
    pub fn with_song(mut self, track_name: &str, uuid: &str, song: Value) -> Self {
        self.songs
            .insert(track_name.to_string(), (uuid.to_string(), song));
        self
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogPort for FakeCatalog {
    async fn search_song(
        &self,
        track_name: &str,
        _artist_name: &str,
    ) -> Result<Option<String>, FetchError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(FetchError::Network("connection reset".into()));
        }
        Ok(self.songs.get(track_name).map(|(uuid, _)| uuid.clone()))
    }

    async fn song_details(&self, uuid: &str) -> Result<CatalogSong, FetchError> {
        let (_, song) = self
            .songs
            .values()
            .find(|(id, _)| id == uuid)
            .ok_or(FetchError::Status(404))?;
        serde_json::from_value(song.clone())
            .map_err(|e| FetchError::InvalidStructure(e.to_string()))
    }
}

/// Processed store that becomes unusable whenever a record for
/// `failing_city` is written.
pub struct FailingStorage {
    inner: SqliteStorage,
    failing_city: String,
}

impl FailingStorage {
    pub fn new(failing_city: &str) -> Self {
        Self {
            inner: SqliteStorage::open_in_memory().expect("in-memory store"),
            failing_city: failing_city.to_string(),
        }
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn upsert_track_feature(&self, record: &TrackFeatureRecord) -> Result<(), StoreError> {
        if record.city == self.failing_city {
            return Err(StoreError::Fatal("disk I/O error".into()));
        }
        self.inner.upsert_track_feature(record).await
    }

    async fn track_features(
        &self,
        snapshot_ref: Option<&str>,
    ) -> Result<Vec<TrackFeatureRecord>, StoreError> {
        self.inner.track_features(snapshot_ref).await
    }

    async fn distinct_tracks(&self) -> Result<Vec<TrackKey>, StoreError> {
        self.inner.distinct_tracks().await
    }

    async fn record_etl_run(&self, stats: &EtlRunStats) -> Result<(), StoreError> {
        self.inner.record_etl_run(stats).await
    }

    async fn etl_health(&self) -> Result<EtlHealth, StoreError> {
        self.inner.etl_health().await
    }

    async fn enrichment_exists(&self, key: &TrackKey) -> Result<bool, StoreError> {
        self.inner.enrichment_exists(key).await
    }

    async fn upsert_enrichment(&self, record: &EnrichmentRecord) -> Result<(), StoreError> {
        self.inner.upsert_enrichment(record).await
    }

    async fn enrichment_count(&self, key: &TrackKey) -> Result<u64, StoreError> {
        self.inner.enrichment_count(key).await
    }
}

pub fn memory_storage() -> Arc<dyn Storage> {
    Arc::new(SqliteStorage::open_in_memory().expect("in-memory store"))
}

/// Write a snapshot document the way the ingestion side lays it out.
pub fn write_snapshot(
    dir: &Path,
    file_name: &str,
    city: &str,
    tracks: Option<Value>,
    weather: Option<Value>,
) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let doc = json!({
        "metadata": {
            "city": city,
            "country": "France",
            "ingestion_timestamp": "2025-03-14T09:26:53.000Z",
            "data_source": "lastfm_weather_ingestor"
        },
        "lastfm_data": tracks,
        "weather_data": weather
    });
    let path = dir.join(file_name);
    fs::write(&path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
    path
}
