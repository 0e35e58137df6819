use async_trait::async_trait;
use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

use crate::types::{EnrichmentRecord, EtlRunStats, TrackFeatureRecord, TrackKey};

pub mod sqlite;

pub use sqlite::SqliteStorage;

/// Processed-store failures, split by how far they reach.
///
/// `Constraint` and `Serialization` concern a single row: the caller skips
/// it and keeps going. `Fatal` means the store itself is unusable and the
/// enclosing operation has to stop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_row_level(&self) -> bool {
        !matches!(self, StoreError::Fatal(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(e.to_string())
            }
            rusqlite::Error::ToSqlConversionFailure(_)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => {
                StoreError::Serialization(e.to_string())
            }
            _ => StoreError::Fatal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Aggregate over every recorded ETL run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtlHealth {
    pub total_runs: u64,
    pub avg_success_rate: f64,
    pub total_records_loaded: u64,
    pub first_run: Option<String>,
    pub last_run: Option<String>,
}

/// Processed store: derived track features, ETL accounting and catalog
/// enrichment.
#[async_trait]
pub trait Storage: Send + Sync {
    // Track features
    async fn upsert_track_feature(&self, record: &TrackFeatureRecord) -> Result<(), StoreError>;
    async fn track_features(
        &self,
        snapshot_ref: Option<&str>,
    ) -> Result<Vec<TrackFeatureRecord>, StoreError>;
    async fn distinct_tracks(&self) -> Result<Vec<TrackKey>, StoreError>;

    // ETL accounting
    async fn record_etl_run(&self, stats: &EtlRunStats) -> Result<(), StoreError>;
    async fn etl_health(&self) -> Result<EtlHealth, StoreError>;

    // Enrichment
    async fn enrichment_exists(&self, key: &TrackKey) -> Result<bool, StoreError>;
    async fn upsert_enrichment(&self, record: &EnrichmentRecord) -> Result<(), StoreError>;
    async fn enrichment_count(&self, key: &TrackKey) -> Result<u64, StoreError>;
}
