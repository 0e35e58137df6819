//! Phase-organized pipeline metrics
//!
//! Recording is always safe: without an installed recorder the `metrics`
//! macros are no-ops, so library code and tests record unconditionally and
//! only the binary decides whether to expose a Prometheus endpoint.

use std::net::SocketAddr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Install the Prometheus exporter on `0.0.0.0:<port>`. Idempotent.
pub fn init_metrics(port: u16) {
    INIT.call_once(|| {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let builder =
            metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install() {
            Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
            Err(e) => warn!("Prometheus exporter install failed: {}", e),
        }
    });
}

/// Source fetch attempts (tracks, weather, catalog)
pub struct SourcesMetrics;

impl SourcesMetrics {
    pub fn record_attempt_success(source: &str, attempt: u32) {
        ::metrics::counter!("sources_attempts_success_total", "source" => source.to_string())
            .increment(1);
        if attempt > 1 {
            ::metrics::counter!("sources_recovered_total", "source" => source.to_string())
                .increment(1);
        }
    }

    pub fn record_attempt_error(source: &str, error_type: &'static str) {
        ::metrics::counter!(
            "sources_attempts_error_total",
            "source" => source.to_string(),
            "error_type" => error_type
        )
        .increment(1);
    }

    pub fn record_unavailable(source: &str) {
        ::metrics::counter!("sources_unavailable_total", "source" => source.to_string())
            .increment(1);
    }
}

/// Raw ingestion phase
pub struct IngestionMetrics;

impl IngestionMetrics {
    pub fn record_entity(status: &'static str, records: usize, duration_secs: f64) {
        ::metrics::counter!("ingestion_entities_total", "status" => status).increment(1);
        ::metrics::counter!("ingestion_records_total").increment(records as u64);
        ::metrics::histogram!("ingestion_entity_duration_seconds").record(duration_secs);
    }

    pub fn record_snapshot_bytes(bytes: usize) {
        ::metrics::histogram!("ingestion_snapshot_bytes").record(bytes as f64);
    }

    pub fn record_batch(total: usize, successes: usize) {
        ::metrics::counter!("ingestion_batches_total").increment(1);
        ::metrics::gauge!("ingestion_last_batch_entities").set(total as f64);
        ::metrics::gauge!("ingestion_last_batch_successes").set(successes as f64);
    }
}

/// Per-snapshot ETL phase
pub struct EtlMetrics;

impl EtlMetrics {
    pub fn record_run(status: &'static str, records_loaded: usize, duration_secs: f64) {
        ::metrics::counter!("etl_runs_total", "status" => status).increment(1);
        ::metrics::counter!("etl_records_loaded_total").increment(records_loaded as u64);
        ::metrics::histogram!("etl_run_duration_seconds").record(duration_secs);
    }

    pub fn record_rejected_rows(count: usize) {
        if count > 0 {
            ::metrics::counter!("etl_rows_rejected_total").increment(count as u64);
        }
    }

    pub fn record_skipped_file() {
        ::metrics::counter!("etl_files_skipped_total").increment(1);
    }
}

/// Catalog enrichment phase
pub struct EnrichmentMetrics;

impl EnrichmentMetrics {
    pub fn record_lookup(outcome: &'static str) {
        ::metrics::counter!("enrichment_lookups_total", "outcome" => outcome).increment(1);
    }
}
