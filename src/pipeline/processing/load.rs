use std::sync::Arc;
use tracing::{error, warn};

use crate::storage::{Storage, StoreError};
use crate::types::{EtlRunStats, TrackFeatureRecord};

/// Outcome of one load loop
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub processed: usize,
    pub loaded: usize,
    pub rejected: Vec<String>,
    /// Set when the loop stopped early on a store-level failure
    pub fatal: Option<StoreError>,
}

impl LoadReport {
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.loaded as f64 / self.processed as f64
        }
    }
}

pub struct EtlLoader {
    storage: Arc<dyn Storage>,
}

impl EtlLoader {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Upsert every record. A bad row is logged and skipped; only a
    /// store-level failure stops the loop.
    pub async fn load(&self, records: &[TrackFeatureRecord]) -> LoadReport {
        let mut report = LoadReport {
            processed: records.len(),
            ..Default::default()
        };
        for record in records {
            if let Err(reason) = record.check_invariants() {
                warn!(track = %record.key(), %reason, "row rejected");
                report.rejected.push(format!("{}: {}", record.key(), reason));
                continue;
            }
            match self.storage.upsert_track_feature(record).await {
                Ok(()) => report.loaded += 1,
                Err(e) if e.is_row_level() => {
                    warn!(track = %record.key(), error = %e, "row rejected by store");
                    report.rejected.push(format!("{}: {}", record.key(), e));
                }
                Err(e) => {
                    error!(track = %record.key(), error = %e, "store failure, aborting load");
                    report.fatal = Some(e);
                    break;
                }
            }
        }
        report
    }

    pub async fn record_run(&self, stats: &EtlRunStats) -> Result<(), StoreError> {
        self.storage.record_etl_run(stats).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use crate::types::MoodCategory;

    fn record(track: &str, listeners: i64) -> TrackFeatureRecord {
        TrackFeatureRecord {
            city: "Lyon".into(),
            country: "France".into(),
            track_name: track.into(),
            artist_name: "Artist".into(),
            listeners,
            playcount: 0,
            rank: 1,
            weather_condition: "Rain".into(),
            weather_description: "pluie".into(),
            temperature: 7.0,
            humidity: 90.0,
            wind_speed: 5.0,
            mood_category: MoodCategory::Sad,
            popularity_score: 0.0,
            source_snapshot_ref: "s.json".into(),
        }
    }

    #[tokio::test]
    async fn bad_rows_are_skipped_not_fatal() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let loader = EtlLoader::new(storage.clone());
        let report = loader
            .load(&[record("One", 10), record("Two", -1), record("Three", 5)])
            .await;
        assert_eq!(report.processed, 3);
        assert_eq!(report.loaded, 2);
        assert_eq!(report.rejected.len(), 1);
        assert!(report.fatal.is_none());
        assert!((report.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(storage.track_features(None).await.unwrap().len(), 2);
    }

    #[test]
    fn empty_load_has_zero_rate() {
        assert_eq!(LoadReport::default().success_rate(), 0.0);
    }
}
