use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{TRACK_SOURCE_FAILURE, WEATHER_SOURCE_FAILURE};

/// A (city, country) pair driving one ingestion cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub city: String,
    pub country: String,
}

impl Entity {
    pub fn new(city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            country: country.into(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.city, self.country)
    }
}

/// Classification of one ingestion attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Success,
    PartialFailure,
    Failure,
}

impl IngestionStatus {
    pub fn classify(track_source_ok: bool, weather_source_ok: bool) -> Self {
        match (track_source_ok, weather_source_ok) {
            (true, true) => IngestionStatus::Success,
            (false, false) => IngestionStatus::Failure,
            _ => IngestionStatus::PartialFailure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Success => "success",
            IngestionStatus::PartialFailure => "partial_failure",
            IngestionStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    #[serde(rename = "TRACK_SOURCE_FAILURE")]
    TrackSourceFailure,
    #[serde(rename = "WEATHER_SOURCE_FAILURE")]
    WeatherSourceFailure,
}

impl AnomalyKind {
    pub fn tag(&self) -> &'static str {
        match self {
            AnomalyKind::TrackSourceFailure => TRACK_SOURCE_FAILURE,
            AnomalyKind::WeatherSourceFailure => WEATHER_SOURCE_FAILURE,
        }
    }
}

/// A tagged source failure observed during one ingestion attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub detail: String,
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.tag(), self.detail)
    }
}

/// Result of driving one entity through the ingestion state machine
#[derive(Debug, Clone, Serialize)]
pub struct IngestionOutcome {
    pub entity: Entity,
    pub status: IngestionStatus,
    /// False only when both sources were unavailable
    pub success: bool,
    pub records_ingested: usize,
    pub anomalies: Vec<Anomaly>,
    pub snapshot_ref: PathBuf,
    pub snapshot_sha256: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoodCategory {
    Happy,
    Sad,
    Energetic,
    Calm,
    Romantic,
    Neutral,
}

impl MoodCategory {
    pub const ALL: [MoodCategory; 6] = [
        MoodCategory::Happy,
        MoodCategory::Sad,
        MoodCategory::Energetic,
        MoodCategory::Calm,
        MoodCategory::Romantic,
        MoodCategory::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoodCategory::Happy => "happy",
            MoodCategory::Sad => "sad",
            MoodCategory::Energetic => "energetic",
            MoodCategory::Calm => "calm",
            MoodCategory::Romantic => "romantic",
            MoodCategory::Neutral => "neutral",
        }
    }
}

impl fmt::Display for MoodCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoodCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoodCategory::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown mood category '{}'", s))
    }
}

/// One ranked track paired with the city's weather at snapshot time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFeatureRecord {
    pub city: String,
    pub country: String,
    pub track_name: String,
    pub artist_name: String,
    pub listeners: i64,
    pub playcount: i64,
    pub rank: i64,
    pub weather_condition: String,
    pub weather_description: String,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub mood_category: MoodCategory,
    pub popularity_score: f64,
    pub source_snapshot_ref: String,
}

impl TrackFeatureRecord {
    pub fn key(&self) -> TrackKey {
        TrackKey::new(&self.track_name, &self.artist_name)
    }

    /// Load-time invariants. Violations reject the row; nothing is clamped.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.listeners < 0 {
            return Err(format!("listeners must be >= 0, got {}", self.listeners));
        }
        if self.playcount < 0 {
            return Err(format!("playcount must be >= 0, got {}", self.playcount));
        }
        if !(0.0..=1.2).contains(&self.popularity_score) {
            return Err(format!(
                "popularity_score out of range: {}",
                self.popularity_score
            ));
        }
        Ok(())
    }
}

/// Per-snapshot ETL accounting row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlRunStats {
    pub snapshot_ref: String,
    pub status: String,
    pub records_extracted: usize,
    pub records_transformed: usize,
    pub records_loaded: usize,
    pub success_rate: f64,
    pub duration_secs: f64,
    pub processed_at: DateTime<Utc>,
}

/// Natural key of a track across snapshots
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub track_name: String,
    pub artist_name: String,
}

impl TrackKey {
    pub fn new(track_name: impl Into<String>, artist_name: impl Into<String>) -> Self {
        Self {
            track_name: track_name.into(),
            artist_name: artist_name.into(),
        }
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.track_name, self.artist_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub acousticness: Option<f64>,
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub key: Option<i64>,
    pub liveness: Option<f64>,
    pub loudness: Option<f64>,
    pub mode: Option<i64>,
    pub speechiness: Option<f64>,
    pub tempo: Option<f64>,
    pub time_signature: Option<i64>,
    pub valence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    pub release_date: Option<String>,
    pub image_url: Option<String>,
    pub credit_name: Option<String>,
    pub isrc: Option<String>,
    pub isrc_country_code: Option<String>,
    pub isrc_country_name: Option<String>,
    /// JSON array text as returned by the catalog
    pub genres: String,
    /// JSON array text as returned by the catalog
    pub labels: String,
}

/// Catalog attributes attached to a track by the enrichment phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub track_name: String,
    pub artist_name: String,
    pub external_uuid: Option<String>,
    pub audio: AudioFeatures,
    pub release: ReleaseMetadata,
    pub enriched_at: DateTime<Utc>,
}

/// Song detail object as served by the catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSong {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub credit_name: Option<String>,
    #[serde(default)]
    pub isrc: Option<CatalogIsrc>,
    #[serde(default)]
    pub genres: Option<Value>,
    #[serde(default)]
    pub labels: Option<Value>,
    #[serde(default)]
    pub audio: Option<CatalogAudio>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogIsrc {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogAudio {
    #[serde(default)]
    pub acousticness: Option<f64>,
    #[serde(default)]
    pub danceability: Option<f64>,
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub instrumentalness: Option<f64>,
    #[serde(default)]
    pub key: Option<f64>,
    #[serde(default)]
    pub liveness: Option<f64>,
    #[serde(default)]
    pub loudness: Option<f64>,
    #[serde(default)]
    pub mode: Option<f64>,
    #[serde(default)]
    pub speechiness: Option<f64>,
    #[serde(default)]
    pub tempo: Option<f64>,
    #[serde(default)]
    pub time_signature: Option<f64>,
    #[serde(default)]
    pub valence: Option<f64>,
}

fn integral(value: Option<f64>) -> Option<i64> {
    value.filter(|v| v.is_finite()).map(|v| v.round() as i64)
}

fn json_list(value: Option<Value>) -> String {
    match value {
        Some(v @ Value::Array(_)) => v.to_string(),
        _ => "[]".to_string(),
    }
}

impl CatalogSong {
    pub fn into_record(self, key: &TrackKey, matched_uuid: &str) -> EnrichmentRecord {
        let audio = self.audio.unwrap_or_default();
        let isrc = self.isrc.unwrap_or_default();
        EnrichmentRecord {
            track_name: key.track_name.clone(),
            artist_name: key.artist_name.clone(),
            external_uuid: Some(self.uuid.unwrap_or_else(|| matched_uuid.to_string())),
            audio: AudioFeatures {
                acousticness: audio.acousticness,
                danceability: audio.danceability,
                energy: audio.energy,
                instrumentalness: audio.instrumentalness,
                key: integral(audio.key),
                liveness: audio.liveness,
                loudness: audio.loudness,
                mode: integral(audio.mode),
                speechiness: audio.speechiness,
                tempo: audio.tempo,
                time_signature: integral(audio.time_signature),
                valence: audio.valence,
            },
            release: ReleaseMetadata {
                release_date: self.release_date,
                image_url: self.image_url,
                credit_name: self.credit_name,
                isrc: isrc.value,
                isrc_country_code: isrc.country_code,
                isrc_country_name: isrc.country_name,
                genres: json_list(self.genres),
                labels: json_list(self.labels),
            },
            enriched_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_covers_all_source_combinations() {
        assert_eq!(IngestionStatus::classify(true, true), IngestionStatus::Success);
        assert_eq!(IngestionStatus::classify(true, false), IngestionStatus::PartialFailure);
        assert_eq!(IngestionStatus::classify(false, true), IngestionStatus::PartialFailure);
        assert_eq!(IngestionStatus::classify(false, false), IngestionStatus::Failure);
    }

    #[test]
    fn mood_category_parses_its_own_names() {
        for mood in MoodCategory::ALL {
            assert_eq!(mood.as_str().parse::<MoodCategory>().unwrap(), mood);
        }
        assert!("melancholic".parse::<MoodCategory>().is_err());
    }

    #[test]
    fn anomaly_display_carries_the_tag() {
        let anomaly = Anomaly {
            kind: AnomalyKind::WeatherSourceFailure,
            detail: "unexpected HTTP status 503".to_string(),
        };
        assert_eq!(
            anomaly.to_string(),
            "WEATHER_SOURCE_FAILURE: unexpected HTTP status 503"
        );
    }

    #[test]
    fn catalog_song_maps_to_record() {
        let song: CatalogSong = serde_json::from_value(json!({
            "uuid": "7d534228-5165-11e9-9375-549f35161576",
            "releaseDate": "2023-01-13T00:00:00+00:00",
            "creditName": "Miley Cyrus",
            "isrc": { "value": "USSM12209777", "countryCode": "US", "countryName": "United States" },
            "genres": [{ "root": "pop", "sub": [] }],
            "audio": { "energy": 0.68, "key": 0, "mode": 1.0, "timeSignature": 4, "tempo": 117.99 }
        }))
        .unwrap();
        let record = song.into_record(&TrackKey::new("Flowers", "Miley Cyrus"), "ignored");
        assert_eq!(
            record.external_uuid.as_deref(),
            Some("7d534228-5165-11e9-9375-549f35161576")
        );
        assert_eq!(record.audio.energy, Some(0.68));
        assert_eq!(record.audio.mode, Some(1));
        assert_eq!(record.audio.time_signature, Some(4));
        assert_eq!(record.audio.valence, None);
        assert_eq!(record.release.isrc_country_code.as_deref(), Some("US"));
        assert_eq!(record.release.genres, r#"[{"root":"pop","sub":[]}]"#);
        assert_eq!(record.release.labels, "[]");
    }

    #[test]
    fn matched_uuid_is_the_fallback_identifier() {
        let record =
            CatalogSong::default().into_record(&TrackKey::new("A", "B"), "uuid-from-search");
        assert_eq!(record.external_uuid.as_deref(), Some("uuid-from-search"));
    }
}
