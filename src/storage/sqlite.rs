use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{EtlHealth, Storage, StoreError};
use crate::constants::PROCESSED_DB;
use crate::error::Result as PipelineResult;
use crate::types::{
    AudioFeatures, EnrichmentRecord, EtlRunStats, MoodCategory, TrackFeatureRecord, TrackKey,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS processed_tracks (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        city                TEXT NOT NULL,
        country             TEXT NOT NULL,
        track_name          TEXT NOT NULL,
        artist_name         TEXT NOT NULL,
        listeners           INTEGER NOT NULL CHECK (listeners >= 0),
        playcount           INTEGER NOT NULL CHECK (playcount >= 0),
        rank                INTEGER NOT NULL,
        weather_condition   TEXT NOT NULL,
        weather_description TEXT NOT NULL,
        temperature         REAL NOT NULL,
        humidity            REAL NOT NULL,
        wind_speed          REAL NOT NULL,
        mood_category       TEXT NOT NULL
                            CHECK (mood_category IN
                                ('happy', 'sad', 'energetic', 'calm', 'romantic', 'neutral')),
        popularity_score    REAL NOT NULL CHECK (popularity_score BETWEEN 0.0 AND 1.2),
        source_snapshot_ref TEXT NOT NULL,
        processed_at        TEXT NOT NULL,
        UNIQUE (source_snapshot_ref, city, track_name, artist_name)
    );
    CREATE INDEX IF NOT EXISTS idx_city_weather ON processed_tracks (city, weather_condition);
    CREATE INDEX IF NOT EXISTS idx_mood_weather
        ON processed_tracks (mood_category, weather_condition);

    CREATE TABLE IF NOT EXISTS etl_stats (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_ref        TEXT NOT NULL,
        status              TEXT NOT NULL,
        records_extracted   INTEGER NOT NULL,
        records_transformed INTEGER NOT NULL,
        records_loaded      INTEGER NOT NULL,
        success_rate        REAL NOT NULL,
        duration_secs       REAL NOT NULL,
        processed_at        TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS soundcharts_tracks (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        track_name        TEXT NOT NULL,
        artist_name       TEXT NOT NULL,
        uuid              TEXT,
        release_date      TEXT,
        image_url         TEXT,
        credit_name       TEXT,
        isrc              TEXT,
        isrc_country_code TEXT,
        isrc_country_name TEXT,
        genres            TEXT NOT NULL DEFAULT '[]',
        labels            TEXT NOT NULL DEFAULT '[]',
        acousticness      REAL,
        danceability      REAL,
        energy            REAL,
        instrumentalness  REAL,
        key               INTEGER,
        liveness          REAL,
        loudness          REAL,
        mode              INTEGER,
        speechiness       REAL,
        tempo             REAL,
        time_signature    INTEGER,
        valence           REAL,
        enriched_at       TEXT NOT NULL,
        UNIQUE (track_name, artist_name)
    );
    CREATE INDEX IF NOT EXISTS idx_soundcharts_uuid ON soundcharts_tracks (uuid);
"#;

const TRACK_COLUMNS: &str = "city, country, track_name, artist_name, listeners, playcount, rank,
    weather_condition, weather_description, temperature, humidity, wind_speed,
    mood_category, popularity_score, source_snapshot_ref";

/// SQLite-backed processed store. One connection, opened once and reused for
/// the lifetime of the value.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_at_root<P: AsRef<Path>>(data_root: P) -> PipelineResult<Self> {
        Self::open(data_root.as_ref().join(PROCESSED_DB))
    }

    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> PipelineResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<TrackFeatureRecord> {
    let mood: String = row.get(12)?;
    let mood_category = mood.parse::<MoodCategory>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            12,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    Ok(TrackFeatureRecord {
        city: row.get(0)?,
        country: row.get(1)?,
        track_name: row.get(2)?,
        artist_name: row.get(3)?,
        listeners: row.get(4)?,
        playcount: row.get(5)?,
        rank: row.get(6)?,
        weather_condition: row.get(7)?,
        weather_description: row.get(8)?,
        temperature: row.get(9)?,
        humidity: row.get(10)?,
        wind_speed: row.get(11)?,
        mood_category,
        popularity_score: row.get(13)?,
        source_snapshot_ref: row.get(14)?,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn upsert_track_feature(&self, record: &TrackFeatureRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO processed_tracks ({}, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT (source_snapshot_ref, city, track_name, artist_name) DO UPDATE SET
                country = excluded.country,
                listeners = excluded.listeners,
                playcount = excluded.playcount,
                rank = excluded.rank,
                weather_condition = excluded.weather_condition,
                weather_description = excluded.weather_description,
                temperature = excluded.temperature,
                humidity = excluded.humidity,
                wind_speed = excluded.wind_speed,
                mood_category = excluded.mood_category,
                popularity_score = excluded.popularity_score,
                processed_at = excluded.processed_at",
            TRACK_COLUMNS
        );
        self.conn().execute(
            &sql,
            params![
                record.city,
                record.country,
                record.track_name,
                record.artist_name,
                record.listeners,
                record.playcount,
                record.rank,
                record.weather_condition,
                record.weather_description,
                record.temperature,
                record.humidity,
                record.wind_speed,
                record.mood_category.as_str(),
                record.popularity_score,
                record.source_snapshot_ref,
                now(),
            ],
        )?;
        Ok(())
    }

    async fn track_features(
        &self,
        snapshot_ref: Option<&str>,
    ) -> Result<Vec<TrackFeatureRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM processed_tracks
             WHERE ?1 IS NULL OR source_snapshot_ref = ?1
             ORDER BY source_snapshot_ref, rank, id",
            TRACK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![snapshot_ref], track_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    async fn distinct_tracks(&self) -> Result<Vec<TrackKey>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT track_name, artist_name FROM processed_tracks
             ORDER BY track_name, artist_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TrackKey::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    async fn record_etl_run(&self, stats: &EtlRunStats) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO etl_stats (
                snapshot_ref, status, records_extracted, records_transformed, records_loaded,
                success_rate, duration_secs, processed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                stats.snapshot_ref,
                stats.status,
                stats.records_extracted as i64,
                stats.records_transformed as i64,
                stats.records_loaded as i64,
                stats.success_rate,
                stats.duration_secs,
                stats.processed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;
        debug!(snapshot = %stats.snapshot_ref, status = %stats.status, "ETL run recorded");
        Ok(())
    }

    async fn etl_health(&self) -> Result<EtlHealth, StoreError> {
        let health = self.conn().query_row(
            "SELECT COUNT(*), COALESCE(AVG(success_rate), 0.0), COALESCE(SUM(records_loaded), 0),
                    MIN(processed_at), MAX(processed_at)
             FROM etl_stats",
            [],
            |row| {
                Ok(EtlHealth {
                    total_runs: row.get::<_, i64>(0)? as u64,
                    avg_success_rate: row.get(1)?,
                    total_records_loaded: row.get::<_, i64>(2)? as u64,
                    first_run: row.get(3)?,
                    last_run: row.get(4)?,
                })
            },
        )?;
        Ok(health)
    }

    async fn enrichment_exists(&self, key: &TrackKey) -> Result<bool, StoreError> {
        Ok(self.enrichment_count(key).await? > 0)
    }

    async fn upsert_enrichment(&self, record: &EnrichmentRecord) -> Result<(), StoreError> {
        let AudioFeatures {
            acousticness,
            danceability,
            energy,
            instrumentalness,
            key,
            liveness,
            loudness,
            mode,
            speechiness,
            tempo,
            time_signature,
            valence,
        } = &record.audio;
        let release = &record.release;
        // one row per processed spelling; spellings resolving to the same uuid
        // each keep their own row so the skip-list holds for both
        self.conn().execute(
            "INSERT INTO soundcharts_tracks (
                track_name, artist_name, uuid,
                release_date, image_url, credit_name,
                isrc, isrc_country_code, isrc_country_name,
                genres, labels,
                acousticness, danceability, energy, instrumentalness, key, liveness,
                loudness, mode, speechiness, tempo, time_signature, valence,
                enriched_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                       ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
             ON CONFLICT (track_name, artist_name) DO UPDATE SET
                uuid = excluded.uuid,
                release_date = excluded.release_date,
                image_url = excluded.image_url,
                credit_name = excluded.credit_name,
                isrc = excluded.isrc,
                isrc_country_code = excluded.isrc_country_code,
                isrc_country_name = excluded.isrc_country_name,
                genres = excluded.genres,
                labels = excluded.labels,
                acousticness = excluded.acousticness,
                danceability = excluded.danceability,
                energy = excluded.energy,
                instrumentalness = excluded.instrumentalness,
                key = excluded.key,
                liveness = excluded.liveness,
                loudness = excluded.loudness,
                mode = excluded.mode,
                speechiness = excluded.speechiness,
                tempo = excluded.tempo,
                time_signature = excluded.time_signature,
                valence = excluded.valence,
                enriched_at = excluded.enriched_at",
            params![
                record.track_name,
                record.artist_name,
                record.external_uuid,
                release.release_date,
                release.image_url,
                release.credit_name,
                release.isrc,
                release.isrc_country_code,
                release.isrc_country_name,
                release.genres,
                release.labels,
                acousticness,
                danceability,
                energy,
                instrumentalness,
                key,
                liveness,
                loudness,
                mode,
                speechiness,
                tempo,
                time_signature,
                valence,
                record.enriched_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;
        Ok(())
    }

    async fn enrichment_count(&self, key: &TrackKey) -> Result<u64, StoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM soundcharts_tracks WHERE track_name = ?1 AND artist_name = ?2",
            params![key.track_name, key.artist_name],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReleaseMetadata;

    fn record(track: &str, listeners: i64, snapshot: &str) -> TrackFeatureRecord {
        TrackFeatureRecord {
            city: "Paris".into(),
            country: "France".into(),
            track_name: track.into(),
            artist_name: "Artist".into(),
            listeners,
            playcount: 100,
            rank: 1,
            weather_condition: "Clear".into(),
            weather_description: "ciel dégagé".into(),
            temperature: 18.0,
            humidity: 40.0,
            wind_speed: 2.0,
            mood_category: MoodCategory::Neutral,
            popularity_score: 0.5,
            source_snapshot_ref: snapshot.into(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_snapshot() {
        let store = SqliteStorage::open_in_memory().unwrap();
        store.upsert_track_feature(&record("Song", 10, "a.json")).await.unwrap();
        store.upsert_track_feature(&record("Song", 20, "a.json")).await.unwrap();
        store.upsert_track_feature(&record("Song", 30, "b.json")).await.unwrap();

        let a = store.track_features(Some("a.json")).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].listeners, 20);
        assert_eq!(store.track_features(None).await.unwrap().len(), 2);
        assert_eq!(store.distinct_tracks().await.unwrap(), vec![TrackKey::new("Song", "Artist")]);
    }

    #[tokio::test]
    async fn negative_counts_are_row_level_constraint_errors() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let err = store
            .upsert_track_feature(&record("Bad", -5, "a.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(err.is_row_level());
    }

    #[tokio::test]
    async fn etl_health_aggregates_runs() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let empty = store.etl_health().await.unwrap();
        assert_eq!(empty.total_runs, 0);
        assert_eq!(empty.last_run, None);

        for (loaded, rate) in [(10, 1.0), (5, 0.5)] {
            store
                .record_etl_run(&EtlRunStats {
                    snapshot_ref: "a.json".into(),
                    status: "SUCCESS".into(),
                    records_extracted: 10,
                    records_transformed: 10,
                    records_loaded: loaded,
                    success_rate: rate,
                    duration_secs: 0.1,
                    processed_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let health = store.etl_health().await.unwrap();
        assert_eq!(health.total_runs, 2);
        assert_eq!(health.total_records_loaded, 15);
        assert!((health.avg_success_rate - 0.75).abs() < 1e-9);
        assert!(health.first_run.is_some());
    }

    #[tokio::test]
    async fn enrichment_updates_in_place_per_track() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let key = TrackKey::new("Flowers", "Miley Cyrus");
        let mut enrichment = EnrichmentRecord {
            track_name: key.track_name.clone(),
            artist_name: key.artist_name.clone(),
            external_uuid: Some("uuid-1".into()),
            audio: AudioFeatures {
                energy: Some(0.7),
                ..Default::default()
            },
            release: ReleaseMetadata {
                genres: "[]".into(),
                labels: "[]".into(),
                ..Default::default()
            },
            enriched_at: Utc::now(),
        };
        assert!(!store.enrichment_exists(&key).await.unwrap());
        store.upsert_enrichment(&enrichment).await.unwrap();
        enrichment.external_uuid = Some("uuid-2".into());
        store.upsert_enrichment(&enrichment).await.unwrap();
        assert_eq!(store.enrichment_count(&key).await.unwrap(), 1);
        assert!(store.enrichment_exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn spellings_sharing_a_uuid_keep_their_own_rows() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let release = ReleaseMetadata {
            genres: "[]".into(),
            labels: "[]".into(),
            ..Default::default()
        };
        for artist in ["Beyoncé", "Beyonce"] {
            store
                .upsert_enrichment(&EnrichmentRecord {
                    track_name: "Halo".into(),
                    artist_name: artist.into(),
                    external_uuid: Some("uuid-halo".into()),
                    audio: AudioFeatures::default(),
                    release: release.clone(),
                    enriched_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        for artist in ["Beyoncé", "Beyonce"] {
            let key = TrackKey::new("Halo", artist);
            assert_eq!(store.enrichment_count(&key).await.unwrap(), 1);
        }
    }
}
