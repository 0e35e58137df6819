use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::metrics::EtlMetrics;
use crate::pipeline::processing::enrich::{EnrichmentSummary, TrackEnricher};
use crate::pipeline::processing::extract::{extract_snapshot, ExtractError};
use crate::pipeline::processing::load::EtlLoader;
use crate::pipeline::processing::transform::transform_snapshot;
use crate::storage::Storage;
use crate::types::EtlRunStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EtlStatus {
    Success,
    ExtractionFailed,
    InvalidData,
    TransformationFailed,
    LoadFailed,
}

impl EtlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EtlStatus::Success => "SUCCESS",
            EtlStatus::ExtractionFailed => "EXTRACTION_FAILED",
            EtlStatus::InvalidData => "INVALID_DATA",
            EtlStatus::TransformationFailed => "TRANSFORMATION_FAILED",
            EtlStatus::LoadFailed => "LOAD_FAILED",
        }
    }
}

impl fmt::Display for EtlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running ETL over one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtlResult {
    pub snapshot_ref: String,
    pub status: EtlStatus,
    pub records_extracted: usize,
    pub records_transformed: usize,
    pub records_loaded: usize,
    pub success_rate: f64,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EtlResult {
    fn failed(snapshot_ref: String, status: EtlStatus, error: String) -> Self {
        Self {
            snapshot_ref,
            status,
            records_extracted: 0,
            records_transformed: 0,
            records_loaded: 0,
            success_rate: 0.0,
            duration_secs: 0.0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == EtlStatus::Success
    }
}

/// Extract, derive and load one snapshot; optionally enrich afterwards.
pub struct EtlPipeline {
    loader: EtlLoader,
    enricher: Option<TrackEnricher>,
}

impl EtlPipeline {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            loader: EtlLoader::new(storage),
            enricher: None,
        }
    }

    pub fn with_enricher(mut self, enricher: TrackEnricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn enrichment_enabled(&self) -> bool {
        self.enricher.is_some()
    }

    pub async fn run_for_snapshot(&self, path: &Path) -> EtlResult {
        let span = info_span!("etl", snapshot = %path.display());
        let result = self.run_inner(path).instrument(span).await;
        EtlMetrics::record_run(result.status.as_str(), result.records_loaded, result.duration_secs);
        result
    }

    async fn run_inner(&self, path: &Path) -> EtlResult {
        let clock = Instant::now();
        let snapshot_ref = path.to_string_lossy().into_owned();

        let snapshot = match extract_snapshot(path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let status = match e {
                    ExtractError::Unreadable(_) => EtlStatus::ExtractionFailed,
                    ExtractError::NoPayload => EtlStatus::InvalidData,
                };
                warn!(%status, error = %e, "extraction failed");
                let mut result = EtlResult::failed(snapshot_ref, status, e.to_string());
                result.duration_secs = clock.elapsed().as_secs_f64();
                return result;
            }
        };

        debug!(
            tracks = snapshot.track_count(),
            has_weather = snapshot.weather.is_some(),
            "snapshot extracted"
        );
        let transformed = transform_snapshot(&snapshot);
        let records_extracted = transformed.records_extracted;
        let records_transformed = transformed.records.len();
        if records_transformed == 0 {
            warn!(records_extracted, "no record survived transformation");
            let mut result = EtlResult::failed(
                snapshot_ref,
                EtlStatus::TransformationFailed,
                format!("0 of {} tracks usable", records_extracted),
            );
            result.records_extracted = records_extracted;
            result.duration_secs = clock.elapsed().as_secs_f64();
            return result;
        }

        let report = self.loader.load(&transformed.records).await;
        EtlMetrics::record_rejected_rows(report.rejected.len());
        let mut error = report.fatal.as_ref().map(ToString::to_string);
        let mut status = if error.is_some() || report.loaded == 0 {
            EtlStatus::LoadFailed
        } else {
            EtlStatus::Success
        };
        if status == EtlStatus::LoadFailed && error.is_none() {
            error = Some(format!("0 of {} records loaded", report.processed));
        }

        let stats = EtlRunStats {
            snapshot_ref: snapshot_ref.clone(),
            status: status.as_str().to_string(),
            records_extracted,
            records_transformed,
            records_loaded: report.loaded,
            success_rate: report.success_rate(),
            duration_secs: clock.elapsed().as_secs_f64(),
            processed_at: Utc::now(),
        };
        if let Err(e) = self.loader.record_run(&stats).await {
            error!(error = %e, "could not record ETL run stats");
            if !e.is_row_level() {
                status = EtlStatus::LoadFailed;
                error.get_or_insert_with(|| e.to_string());
            }
        }

        let result = EtlResult {
            snapshot_ref,
            status,
            records_extracted,
            records_transformed,
            records_loaded: report.loaded,
            success_rate: stats.success_rate,
            duration_secs: clock.elapsed().as_secs_f64(),
            error,
        };
        if result.is_success() {
            info!(
                extracted = result.records_extracted,
                transformed = result.records_transformed,
                loaded = result.records_loaded,
                "snapshot processed"
            );
        } else {
            warn!(status = %result.status, error = ?result.error, "snapshot load failed");
        }
        result
    }

    /// Enrich every distinct track in the processed store. `None` when no
    /// catalog is configured.
    pub async fn run_enrichment(&self) -> Option<EnrichmentSummary> {
        let enricher = self.enricher.as_ref()?;
        Some(enricher.enrich_all().instrument(info_span!("enrichment")).await)
    }
}
