use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::constants::INGESTION_DB;
use crate::error::Result;
use crate::types::{Entity, IngestionOutcome, IngestionStatus};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS ingestion_log (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        city                 TEXT NOT NULL,
        country              TEXT NOT NULL,
        ingestion_timestamp  TEXT NOT NULL,
        status               TEXT NOT NULL
                             CHECK (status IN ('success', 'partial_failure', 'failure')),
        records_ingested     INTEGER NOT NULL DEFAULT 0,
        anomaly_count        INTEGER NOT NULL DEFAULT 0,
        anomalies            TEXT NOT NULL DEFAULT '[]',
        snapshot_path        TEXT,
        snapshot_sha256      TEXT,
        processing_time_secs REAL NOT NULL DEFAULT 0,
        error_message        TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_ingestion_log_entity
        ON ingestion_log (city, country, ingestion_timestamp);
"#;

/// Aggregate view over every logged ingestion attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionHealth {
    pub total_ingestions: u64,
    pub successes: u64,
    pub partial_failures: u64,
    pub failures: u64,
    /// Percentage of attempts that were fully successful
    pub success_rate: f64,
    pub avg_processing_time_secs: f64,
    pub total_records: u64,
    pub total_anomalies: u64,
    pub first_ingestion: Option<String>,
    pub last_ingestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionLogEntry {
    pub city: String,
    pub country: String,
    pub ingestion_timestamp: String,
    pub status: String,
    pub records_ingested: u64,
    pub anomalies: Vec<String>,
    pub snapshot_path: Option<String>,
    pub error_message: Option<String>,
}

/// Append-only log of ingestion attempts, kept in its own database so that
/// operational metadata never mixes with transformed data.
pub struct IngestionLog {
    conn: Mutex<Connection>,
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl IngestionLog {
    pub fn open_at_root<P: AsRef<Path>>(data_root: P) -> Result<Self> {
        let root = data_root.as_ref();
        std::fs::create_dir_all(root)?;
        let conn = Connection::open(root.join(INGESTION_DB))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, outcome: &IngestionOutcome) -> Result<i64> {
        let anomalies: Vec<String> = outcome.anomalies.iter().map(ToString::to_string).collect();
        let anomalies_json = serde_json::to_string(&anomalies)?;
        let snapshot_path = outcome.snapshot_ref.to_string_lossy().into_owned();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO ingestion_log (
                city, country, ingestion_timestamp, status, records_ingested,
                anomaly_count, anomalies, snapshot_path, snapshot_sha256, processing_time_secs
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                outcome.entity.city,
                outcome.entity.country,
                timestamp(outcome.started_at),
                outcome.status.as_str(),
                outcome.records_ingested as i64,
                anomalies.len() as i64,
                anomalies_json,
                snapshot_path,
                outcome.snapshot_sha256,
                outcome.duration_secs,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record an attempt that died on an internal fault.
    pub fn append_failure(
        &self,
        entity: &Entity,
        started_at: DateTime<Utc>,
        duration_secs: f64,
        error_message: &str,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO ingestion_log (
                city, country, ingestion_timestamp, status, processing_time_secs, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entity.city,
                entity.country,
                timestamp(started_at),
                IngestionStatus::Failure.as_str(),
                duration_secs,
                error_message,
            ],
        )?;
        Ok(())
    }

    pub fn health(&self) -> Result<IngestionHealth> {
        let conn = self.conn();
        let health = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'partial_failure' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failure' THEN 1 ELSE 0 END), 0),
                COALESCE(AVG(processing_time_secs), 0.0),
                COALESCE(SUM(records_ingested), 0),
                COALESCE(SUM(anomaly_count), 0),
                MIN(ingestion_timestamp),
                MAX(ingestion_timestamp)
             FROM ingestion_log",
            [],
            |row| {
                let total: i64 = row.get(0)?;
                let successes: i64 = row.get(1)?;
                Ok(IngestionHealth {
                    total_ingestions: total as u64,
                    successes: successes as u64,
                    partial_failures: row.get::<_, i64>(2)? as u64,
                    failures: row.get::<_, i64>(3)? as u64,
                    success_rate: if total > 0 {
                        successes as f64 / total as f64 * 100.0
                    } else {
                        0.0
                    },
                    avg_processing_time_secs: row.get(4)?,
                    total_records: row.get::<_, i64>(5)? as u64,
                    total_anomalies: row.get::<_, i64>(6)? as u64,
                    first_ingestion: row.get(7)?,
                    last_ingestion: row.get(8)?,
                })
            },
        )?;
        Ok(health)
    }

    /// Most recent attempts first
    pub fn recent(&self, limit: usize) -> Result<Vec<IngestionLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT city, country, ingestion_timestamp, status, records_ingested,
                    anomalies, snapshot_path, error_message
             FROM ingestion_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let anomalies: String = row.get(5)?;
            Ok(IngestionLogEntry {
                city: row.get(0)?,
                country: row.get(1)?,
                ingestion_timestamp: row.get(2)?,
                status: row.get(3)?,
                records_ingested: row.get::<_, i64>(4)? as u64,
                anomalies: serde_json::from_str(&anomalies).unwrap_or_default(),
                snapshot_path: row.get(6)?,
                error_message: row.get(7)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Anomaly, AnomalyKind};
    use std::path::PathBuf;

    fn outcome(city: &str, status: IngestionStatus, anomalies: Vec<Anomaly>) -> IngestionOutcome {
        IngestionOutcome {
            entity: Entity::new(city, "France"),
            status,
            success: status != IngestionStatus::Failure,
            records_ingested: if status == IngestionStatus::Failure { 0 } else { 10 },
            anomalies,
            snapshot_ref: PathBuf::from(format!("data/raw/{}.json", city)),
            snapshot_sha256: "abc".to_string(),
            started_at: Utc::now(),
            duration_secs: 1.5,
        }
    }

    #[test]
    fn health_on_empty_log_is_zeroed() {
        let log = IngestionLog::open_in_memory().unwrap();
        let health = log.health().unwrap();
        assert_eq!(health.total_ingestions, 0);
        assert_eq!(health.success_rate, 0.0);
        assert_eq!(health.first_ingestion, None);
    }

    #[test]
    fn health_aggregates_statuses_and_anomalies() {
        let log = IngestionLog::open_in_memory().unwrap();
        log.append(&outcome("Paris", IngestionStatus::Success, vec![])).unwrap();
        log.append(&outcome(
            "Nice",
            IngestionStatus::PartialFailure,
            vec![Anomaly {
                kind: AnomalyKind::WeatherSourceFailure,
                detail: "unexpected HTTP status 500".into(),
            }],
        ))
        .unwrap();
        log.append_failure(&Entity::new("Lyon", "France"), Utc::now(), 0.2, "disk full")
            .unwrap();

        let health = log.health().unwrap();
        assert_eq!(health.total_ingestions, 3);
        assert_eq!(health.successes, 1);
        assert_eq!(health.partial_failures, 1);
        assert_eq!(health.failures, 1);
        assert_eq!(health.total_records, 20);
        assert_eq!(health.total_anomalies, 1);
        assert!((health.success_rate - 100.0 / 3.0).abs() < 1e-9);

        let recent = log.recent(10).unwrap();
        assert_eq!(recent[0].city, "Lyon");
        assert_eq!(recent[0].error_message.as_deref(), Some("disk full"));
        assert_eq!(recent[1].anomalies, vec!["WEATHER_SOURCE_FAILURE: unexpected HTTP status 500"]);
    }
}
