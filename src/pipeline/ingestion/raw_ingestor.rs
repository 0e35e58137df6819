use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::ingest_log::IngestionLog;
use super::payloads::{TrackEntry, WeatherReading};
use super::retry::{fetch_with_retry, RetryPolicy, SourceOutcome};
use super::snapshot_store::{RawSnapshot, RawSnapshotStore};
use crate::app::ports::{EntitySource, Fetched};
use crate::error::Result;
use crate::metrics::IngestionMetrics;
use crate::types::{Anomaly, AnomalyKind, Entity, IngestionOutcome, IngestionStatus};

pub type TrackSource = dyn EntitySource<Payload = Vec<TrackEntry>>;
pub type WeatherSource = dyn EntitySource<Payload = WeatherReading>;

/// Stages of one ingestion attempt, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStage {
    FetchTracks,
    FetchWeather,
    PersistSnapshot,
    Classify,
    Log,
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestionStage::FetchTracks => "FETCH_TRACKS",
            IngestionStage::FetchWeather => "FETCH_WEATHER",
            IngestionStage::PersistSnapshot => "PERSIST_SNAPSHOT",
            IngestionStage::Classify => "CLASSIFY",
            IngestionStage::Log => "LOG",
        };
        f.write_str(name)
    }
}

/// Drives one entity through fetch, persist, classify and log.
pub struct RawDataIngestor {
    tracks: Arc<TrackSource>,
    weather: Arc<WeatherSource>,
    snapshots: RawSnapshotStore,
    log: Arc<IngestionLog>,
    track_policy: RetryPolicy,
    weather_policy: RetryPolicy,
}

fn take_payload<T>(
    outcome: SourceOutcome<Fetched<T>>,
    kind: AnomalyKind,
    source: &str,
    anomalies: &mut Vec<Anomaly>,
) -> Option<Fetched<T>> {
    match outcome {
        SourceOutcome::Available { data, .. } => Some(data),
        SourceOutcome::Unavailable {
            attempts,
            last_error,
        } => {
            anomalies.push(Anomaly {
                kind,
                detail: format!(
                    "{} unavailable after {} attempt(s): {}",
                    source, attempts, last_error
                ),
            });
            None
        }
    }
}

impl RawDataIngestor {
    pub fn new(
        tracks: Arc<TrackSource>,
        weather: Arc<WeatherSource>,
        snapshots: RawSnapshotStore,
        log: Arc<IngestionLog>,
    ) -> Self {
        Self {
            tracks,
            weather,
            snapshots,
            log,
            track_policy: RetryPolicy::default(),
            weather_policy: RetryPolicy::default(),
        }
    }

    pub fn with_policies(mut self, track_policy: RetryPolicy, weather_policy: RetryPolicy) -> Self {
        self.track_policy = track_policy;
        self.weather_policy = weather_policy;
        self
    }

    pub fn log(&self) -> &Arc<IngestionLog> {
        &self.log
    }

    /// Ingest one entity. Source failures become anomalies on the returned
    /// outcome; only internal faults (snapshot or log unwritable) are `Err`.
    pub async fn ingest(&self, entity: &Entity) -> Result<IngestionOutcome> {
        let span = info_span!("ingest", city = %entity.city, country = %entity.country);
        self.ingest_inner(entity).instrument(span).await
    }

    async fn ingest_inner(&self, entity: &Entity) -> Result<IngestionOutcome> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut anomalies = Vec::new();

        debug!(stage = %IngestionStage::FetchTracks, "entering stage");
        let tracks = take_payload(
            fetch_with_retry(&*self.tracks, &entity.country, &self.track_policy).await,
            AnomalyKind::TrackSourceFailure,
            self.tracks.source_name(),
            &mut anomalies,
        );

        debug!(stage = %IngestionStage::FetchWeather, "entering stage");
        let weather = take_payload(
            fetch_with_retry(&*self.weather, &entity.city, &self.weather_policy).await,
            AnomalyKind::WeatherSourceFailure,
            self.weather.source_name(),
            &mut anomalies,
        );

        let track_ok = tracks.is_some();
        let weather_ok = weather.is_some();
        let records_ingested = tracks.as_ref().map_or(0, |t| t.payload.len());
        let track_raw: Option<Value> = tracks.map(|t| t.raw);
        let weather_raw: Option<Value> = weather.map(|w| w.raw);

        debug!(stage = %IngestionStage::PersistSnapshot, "entering stage");
        let persisted = self
            .snapshots
            .persist(entity, started_at, track_raw, weather_raw);
        let snapshot: RawSnapshot = match persisted {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.log_fatal(entity, started_at, clock, IngestionStage::PersistSnapshot, &e);
                return Err(e);
            }
        };
        IngestionMetrics::record_snapshot_bytes(snapshot.bytes);

        debug!(stage = %IngestionStage::Classify, "entering stage");
        let status = IngestionStatus::classify(track_ok, weather_ok);
        let outcome = IngestionOutcome {
            entity: entity.clone(),
            status,
            success: status != IngestionStatus::Failure,
            records_ingested,
            anomalies,
            snapshot_ref: snapshot.path,
            snapshot_sha256: snapshot.sha256,
            started_at,
            duration_secs: clock.elapsed().as_secs_f64(),
        };

        debug!(stage = %IngestionStage::Log, "entering stage");
        if let Err(e) = self.log.append(&outcome) {
            self.log_fatal(entity, started_at, clock, IngestionStage::Log, &e);
            return Err(e);
        }

        IngestionMetrics::record_entity(status.as_str(), records_ingested, outcome.duration_secs);
        match status {
            IngestionStatus::Success => info!(records = records_ingested, "ingestion succeeded"),
            _ => warn!(
                status = %status,
                records = records_ingested,
                anomalies = outcome.anomalies.len(),
                "ingestion degraded"
            ),
        }
        Ok(outcome)
    }

    fn log_fatal(
        &self,
        entity: &Entity,
        started_at: DateTime<Utc>,
        clock: Instant,
        stage: IngestionStage,
        err: &crate::error::PipelineError,
    ) {
        error!(%stage, error = %err, "ingestion aborted");
        let message = format!("{}: {}", stage, err);
        if let Err(log_err) =
            self.log
                .append_failure(entity, started_at, clock.elapsed().as_secs_f64(), &message)
        {
            warn!(error = %log_err, "could not record failed ingestion");
        }
    }
}
