use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::metrics::EtlMetrics;
use crate::pipeline::etl::{EtlPipeline, EtlResult};
use crate::pipeline::ingestion::snapshot_store::list_snapshot_files;
use crate::pipeline::processing::enrich::EnrichmentSummary;
use crate::pipeline::processing::extract::check_loadable;
use crate::pipeline::Shutdown;
use crate::storage::{EtlHealth, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Stop after the first successfully processed file
    FirstSuccess,
    ProcessAll,
}

#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub valid: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EtlBatchStatus {
    Completed,
    NoFilesFound,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtlBatchReport {
    pub status: EtlBatchStatus,
    pub mode: BatchMode,
    pub files_discovered: usize,
    pub files_skipped: usize,
    pub total_files: usize,
    pub successes: usize,
    pub failures: usize,
    pub total_records_loaded: usize,
    /// successes / total_files × 100
    pub success_rate: f64,
    pub duration_secs: f64,
    pub results: Vec<EtlResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentSummary>,
}

/// Health of the processed store, or why it could not be read
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EtlHealthReport {
    Available(EtlHealth),
    Unavailable { error: String },
}

/// Discovers snapshot files and drives the ETL pipeline over them, one file
/// at a time.
pub struct EtlOrchestrator {
    pipeline: EtlPipeline,
    storage: Arc<dyn Storage>,
    raw_dir: PathBuf,
    shutdown: Shutdown,
}

impl EtlOrchestrator {
    pub fn new(
        pipeline: EtlPipeline,
        storage: Arc<dyn Storage>,
        raw_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pipeline,
            storage,
            raw_dir: raw_dir.into(),
            shutdown: Shutdown::default(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// Candidate files in filename order; invalid ones are skipped with a
    /// warning.
    pub fn discover_snapshots(&self) -> Result<Discovery> {
        let mut discovery = Discovery::default();
        for path in list_snapshot_files(&self.raw_dir)? {
            match check_loadable(&path) {
                Ok(()) => discovery.valid.push(path),
                Err(reason) => {
                    warn!(file = %path.display(), %reason, "skipping snapshot");
                    EtlMetrics::record_skipped_file();
                    discovery.skipped.push((path, reason));
                }
            }
        }
        info!(
            valid = discovery.valid.len(),
            skipped = discovery.skipped.len(),
            dir = %self.raw_dir.display(),
            "snapshot discovery finished"
        );
        Ok(discovery)
    }

    pub async fn run_batch(&self, mode: BatchMode) -> Result<EtlBatchReport> {
        let clock = Instant::now();
        let discovery = self.discover_snapshots()?;
        let files_discovered = discovery.valid.len() + discovery.skipped.len();

        let mut results = Vec::new();
        let mut interrupted = false;
        for path in &discovery.valid {
            if self.shutdown.is_requested() {
                warn!("interrupt received, stopping before {}", path.display());
                interrupted = true;
                break;
            }
            let result = self.pipeline.run_for_snapshot(path).await;
            let stop = mode == BatchMode::FirstSuccess && result.is_success();
            results.push(result);
            if stop {
                break;
            }
        }

        let total_files = results.len();
        let successes = results.iter().filter(|r| r.is_success()).count();
        let status = if interrupted {
            EtlBatchStatus::Interrupted
        } else if discovery.valid.is_empty() {
            EtlBatchStatus::NoFilesFound
        } else {
            EtlBatchStatus::Completed
        };

        let enrichment = if interrupted || !self.pipeline.enrichment_enabled() {
            None
        } else {
            self.pipeline.run_enrichment().await
        };

        let report = EtlBatchReport {
            status,
            mode,
            files_discovered,
            files_skipped: discovery.skipped.len(),
            total_files,
            successes,
            failures: total_files - successes,
            total_records_loaded: results.iter().map(|r| r.records_loaded).sum(),
            success_rate: if total_files > 0 {
                successes as f64 / total_files as f64 * 100.0
            } else {
                0.0
            },
            duration_secs: clock.elapsed().as_secs_f64(),
            results,
            enrichment,
        };
        info!(
            status = ?report.status,
            total = report.total_files,
            successes = report.successes,
            failures = report.failures,
            loaded = report.total_records_loaded,
            "ETL batch finished"
        );
        Ok(report)
    }

    pub async fn health(&self) -> EtlHealthReport {
        match self.storage.etl_health().await {
            Ok(health) => EtlHealthReport::Available(health),
            Err(e) => {
                error!(error = %e, "ETL health query failed");
                EtlHealthReport::Unavailable {
                    error: e.to_string(),
                }
            }
        }
    }
}
