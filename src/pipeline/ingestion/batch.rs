use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::rate_limiter::RateLimiter;
use super::raw_ingestor::RawDataIngestor;
use crate::constants::INGESTION_SYSTEM;
use crate::error::{PipelineError, Result};
use crate::metrics::IngestionMetrics;
use crate::pipeline::Shutdown;
use crate::types::{Entity, IngestionOutcome, IngestionStatus};

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub report_timestamp: String,
    pub batch_id: String,
    pub ingestion_system: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub total_entities: usize,
    pub processed: usize,
    pub successful: usize,
    pub partial_failures: usize,
    pub failed: usize,
    /// Entities with at least one source available, as a percentage of processed
    pub success_rate: f64,
    pub total_records: usize,
    pub total_anomalies: usize,
    pub duration_secs: f64,
    pub interrupted: bool,
    /// Fatal error that ended the batch early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub city: String,
    pub country: String,
    pub success: bool,
    pub status: IngestionStatus,
    pub records_ingested: usize,
    pub anomalies_count: usize,
    pub snapshot_ref: String,
}

impl From<&IngestionOutcome> for EntitySummary {
    fn from(outcome: &IngestionOutcome) -> Self {
        Self {
            city: outcome.entity.city.clone(),
            country: outcome.entity.country.clone(),
            success: outcome.success,
            status: outcome.status,
            records_ingested: outcome.records_ingested,
            anomalies_count: outcome.anomalies.len(),
            snapshot_ref: outcome.snapshot_ref.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub metadata: ReportMetadata,
    pub batch_statistics: BatchStats,
    pub city_results: Vec<EntitySummary>,
}

/// A finished batch and where its report landed
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub report: BatchReport,
    /// `None` when the report could not be written; the batch itself still counts
    pub report_path: Option<PathBuf>,
}

fn summarize(outcomes: &[IngestionOutcome], total_entities: usize) -> BatchStats {
    let processed = outcomes.len();
    let count = |s: IngestionStatus| outcomes.iter().filter(|o| o.status == s).count();
    let succeeded = outcomes.iter().filter(|o| o.success).count();
    BatchStats {
        total_entities,
        processed,
        successful: count(IngestionStatus::Success),
        partial_failures: count(IngestionStatus::PartialFailure),
        failed: count(IngestionStatus::Failure),
        success_rate: if processed > 0 {
            succeeded as f64 / processed as f64 * 100.0
        } else {
            0.0
        },
        total_records: outcomes.iter().map(|o| o.records_ingested).sum(),
        total_anomalies: outcomes.iter().map(|o| o.anomalies.len()).sum(),
        ..Default::default()
    }
}

/// Iterates the configured entities one at a time, pausing between them.
pub struct BatchIngestor {
    ingestor: RawDataIngestor,
    limiter: RateLimiter,
    reports_dir: PathBuf,
    shutdown: Shutdown,
}

impl BatchIngestor {
    pub fn new(
        ingestor: RawDataIngestor,
        delay: Duration,
        reports_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ingestor,
            limiter: RateLimiter::new(delay),
            reports_dir: reports_dir.into(),
            shutdown: Shutdown::default(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Ingest the first `batch_size` entities (all when `None`).
    ///
    /// Source failures never stop the batch. A fatal ingestion error does:
    /// the report for the entities done so far is persisted, then the error
    /// is returned.
    pub async fn run_batch(
        &self,
        entities: &[Entity],
        batch_size: Option<usize>,
    ) -> Result<BatchRun> {
        let selected = &entities[..batch_size.unwrap_or(entities.len()).min(entities.len())];
        let batch_id = Uuid::new_v4().to_string();
        let clock = Instant::now();
        info!(%batch_id, entities = selected.len(), "starting ingestion batch");

        let mut outcomes = Vec::with_capacity(selected.len());
        let mut interrupted = false;
        let mut fatal: Option<PipelineError> = None;

        for entity in selected {
            if self.shutdown.is_requested() {
                warn!(%batch_id, "interrupt received, stopping before {}", entity);
                interrupted = true;
                break;
            }
            let _pace = self.limiter.acquire().await;
            match self.ingestor.ingest(entity).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(
                        %batch_id,
                        entity = %entity,
                        error = %e,
                        "fatal ingestion error, stopping batch"
                    );
                    fatal = Some(e);
                    break;
                }
            }
        }

        let mut stats = summarize(&outcomes, selected.len());
        stats.duration_secs = clock.elapsed().as_secs_f64();
        stats.interrupted = interrupted;
        stats.aborted = fatal.as_ref().map(ToString::to_string);
        IngestionMetrics::record_batch(stats.processed, stats.successful + stats.partial_failures);

        let report = BatchReport {
            metadata: ReportMetadata {
                report_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                batch_id,
                ingestion_system: INGESTION_SYSTEM.to_string(),
            },
            batch_statistics: stats,
            city_results: outcomes.iter().map(EntitySummary::from).collect(),
        };
        let report_path = match write_report(&self.reports_dir, &report) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "could not write batch report");
                None
            }
        };

        if let Some(e) = fatal {
            return Err(e);
        }
        let s = &report.batch_statistics;
        info!(
            processed = s.processed,
            successful = s.successful,
            partial = s.partial_failures,
            failed = s.failed,
            records = s.total_records,
            "ingestion batch finished"
        );
        Ok(BatchRun {
            report,
            report_path,
        })
    }
}

pub fn write_report(dir: &Path, report: &BatchReport) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "batch_report_{}.json",
        Utc::now().format("%Y%m%d_%H%M%S_%3f")
    ));
    fs::write(&path, serde_json::to_vec_pretty(report)?)?;
    Ok(path)
}
