//! Best-effort catalog enrichment of the tracks already in the processed
//! store. Nothing here can fail the primary ETL result: every problem ends up
//! as a counter in [`EnrichmentSummary`].

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};

use crate::app::ports::CatalogPort;
use crate::constants::CATALOG_SOURCE;
use crate::metrics::EnrichmentMetrics;
use crate::pipeline::ingestion::rate_limiter::RateLimiter;
use crate::pipeline::ingestion::retry::{with_retry, RetryPolicy, SourceOutcome};
use crate::pipeline::Shutdown;
use crate::storage::Storage;
use crate::types::TrackKey;

/// Counters for one enrichment pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichmentSummary {
    pub candidates: usize,
    pub skipped_existing: usize,
    pub enriched: usize,
    pub not_found: usize,
    pub failed: usize,
    pub interrupted: bool,
    /// Set when the pass stopped early because the store was unusable
    pub error: Option<String>,
}

enum LookupOutcome {
    Enriched,
    NotFound,
    Failed,
}

pub struct TrackEnricher {
    catalog: Arc<dyn CatalogPort>,
    storage: Arc<dyn Storage>,
    policy: RetryPolicy,
    limiter: RateLimiter,
    refresh: bool,
    shutdown: Shutdown,
}

impl TrackEnricher {
    pub fn new(catalog: Arc<dyn CatalogPort>, storage: Arc<dyn Storage>) -> Self {
        Self {
            catalog,
            storage,
            policy: RetryPolicy::catalog(),
            limiter: RateLimiter::new(Duration::from_secs(1)),
            refresh: false,
            shutdown: Shutdown::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_pacing(mut self, interval: Duration) -> Self {
        self.limiter = RateLimiter::new(interval);
        self
    }

    /// Re-query tracks that already have an enrichment row.
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub async fn enrich_all(&self) -> EnrichmentSummary {
        let mut summary = EnrichmentSummary::default();
        let candidates = match self.storage.distinct_tracks().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "cannot list tracks for enrichment");
                summary.error = Some(e.to_string());
                return summary;
            }
        };
        summary.candidates = candidates.len();
        info!(candidates = summary.candidates, refresh = self.refresh, "starting enrichment");

        for key in &candidates {
            if self.shutdown.is_requested() {
                summary.interrupted = true;
                break;
            }
            if !self.refresh {
                match self.storage.enrichment_exists(key).await {
                    Ok(true) => {
                        summary.skipped_existing += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) if e.is_row_level() => {
                        warn!(track = %key, error = %e, "enrichment lookup failed");
                        summary.failed += 1;
                        continue;
                    }
                    Err(e) => {
                        summary.error = Some(e.to_string());
                        break;
                    }
                }
            }

            let span = info_span!("enrich", track = %key.track_name, artist = %key.artist_name);
            match self.enrich_one(key).instrument(span).await {
                Ok(LookupOutcome::Enriched) => summary.enriched += 1,
                Ok(LookupOutcome::NotFound) => summary.not_found += 1,
                Ok(LookupOutcome::Failed) => summary.failed += 1,
                Err(message) => {
                    summary.failed += 1;
                    summary.error = Some(message);
                    break;
                }
            }
        }

        info!(
            enriched = summary.enriched,
            skipped = summary.skipped_existing,
            not_found = summary.not_found,
            failed = summary.failed,
            "enrichment finished"
        );
        summary
    }

    /// `Err` only for a store-level failure that should end the pass.
    async fn enrich_one(&self, key: &TrackKey) -> Result<LookupOutcome, String> {
        let _pace = self.limiter.acquire().await;

        let uuid = match with_retry(&self.policy, CATALOG_SOURCE, |_| {
            self.catalog.search_song(&key.track_name, &key.artist_name)
        })
        .await
        {
            SourceOutcome::Available { data: Some(uuid), .. } => uuid,
            SourceOutcome::Available { data: None, .. } => {
                info!("no catalog match");
                EnrichmentMetrics::record_lookup("not_found");
                return Ok(LookupOutcome::NotFound);
            }
            SourceOutcome::Unavailable { last_error, .. } => {
                warn!(error = %last_error, "catalog search failed");
                EnrichmentMetrics::record_lookup("failed");
                return Ok(LookupOutcome::Failed);
            }
        };

        let details = with_retry(&self.policy, CATALOG_SOURCE, |_| {
            self.catalog.song_details(&uuid)
        })
        .await;
        let song = match details {
            SourceOutcome::Available { data, .. } => data,
            SourceOutcome::Unavailable { last_error, .. } => {
                warn!(%uuid, error = %last_error, "catalog details failed");
                EnrichmentMetrics::record_lookup("failed");
                return Ok(LookupOutcome::Failed);
            }
        };

        let record = song.into_record(key, &uuid);
        match self.storage.upsert_enrichment(&record).await {
            Ok(()) => {
                info!(%uuid, "track enriched");
                EnrichmentMetrics::record_lookup("enriched");
                Ok(LookupOutcome::Enriched)
            }
            Err(e) if e.is_row_level() => {
                warn!(%uuid, error = %e, "enrichment row rejected");
                EnrichmentMetrics::record_lookup("failed");
                Ok(LookupOutcome::Failed)
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
