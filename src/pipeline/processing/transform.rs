use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::extract::ExtractedSnapshot;
use super::features::{mood_category, popularity_score};
use crate::pipeline::ingestion::payloads::{TrackEntry, WeatherReading};
use crate::pipeline::ingestion::snapshot_store::SnapshotMetadata;
use crate::types::TrackFeatureRecord;

/// Records derived from one snapshot plus the reasons entries were dropped
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub records_extracted: usize,
    pub records: Vec<TrackFeatureRecord>,
    pub dropped: Vec<String>,
}

/// Build the feature record for the track at `position` (0-based) in the
/// ranked list.
pub fn build_record(
    entry: &TrackEntry,
    position: usize,
    weather: &WeatherReading,
    metadata: &SnapshotMetadata,
    snapshot_ref: &str,
) -> Result<TrackFeatureRecord, String> {
    let track_name = entry.track_name().ok_or("missing track name")?;
    let artist_name = entry.artist_name().ok_or("missing artist name")?;
    let listeners = entry.listeners()?;
    let playcount = entry.playcount()?;
    let rank = entry.rank().unwrap_or(position as i64 + 1);

    Ok(TrackFeatureRecord {
        city: metadata.city.clone(),
        country: metadata.country.clone(),
        track_name: track_name.to_string(),
        artist_name: artist_name.to_string(),
        listeners,
        playcount,
        rank,
        weather_condition: weather.condition.clone(),
        weather_description: weather.description.clone(),
        temperature: weather.temperature,
        humidity: weather.humidity,
        wind_speed: weather.wind_speed,
        mood_category: mood_category(track_name, artist_name),
        popularity_score: popularity_score(listeners, playcount),
        source_snapshot_ref: snapshot_ref.to_string(),
    })
}

fn parse_entry(raw: &Value) -> Result<TrackEntry, String> {
    TrackEntry::deserialize(raw).map_err(|e| format!("malformed entry: {}", e))
}

pub fn transform_snapshot(snapshot: &ExtractedSnapshot) -> TransformOutput {
    let entries: &[Value] = snapshot.tracks.as_deref().unwrap_or_default();
    let weather = snapshot
        .weather
        .as_ref()
        .map(|w| w.reading())
        .unwrap_or_else(WeatherReading::unknown);

    let mut output = TransformOutput {
        records_extracted: entries.len(),
        ..Default::default()
    };
    for (position, raw) in entries.iter().enumerate() {
        let built = parse_entry(raw).and_then(|entry| {
            build_record(
                &entry,
                position,
                &weather,
                &snapshot.metadata,
                &snapshot.snapshot_ref,
            )
        });
        match built {
            Ok(record) => output.records.push(record),
            Err(reason) => {
                debug!(position, %reason, "track dropped");
                output.dropped.push(format!("track #{}: {}", position + 1, reason));
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MoodCategory;
    use serde_json::json;

    fn metadata() -> SnapshotMetadata {
        SnapshotMetadata {
            city: "Paris".into(),
            country: "France".into(),
            ingestion_timestamp: "2025-03-14T09:26:53.000Z".into(),
            data_source: "lastfm_weather_ingestor".into(),
        }
    }

    fn snapshot(tracks: Value, weather: Option<Value>) -> ExtractedSnapshot {
        ExtractedSnapshot {
            snapshot_ref: "data/raw/Paris_France.json".into(),
            metadata: metadata(),
            tracks: Some(tracks.as_array().cloned().unwrap()),
            weather: weather.map(|w| serde_json::from_value(w).unwrap()),
        }
    }

    #[test]
    fn derives_features_and_pairs_weather() {
        let snap = snapshot(
            json!([{
                "name": "Summer Party",
                "artist": { "name": "DJ Sun" },
                "listeners": "20000",
                "playcount": "40000",
                "@attr": { "rank": "0" }
            }]),
            Some(json!({
                "weather": [{ "main": "Clear", "description": "ciel dégagé" }],
                "main": { "temp": 21.3, "humidity": 40 },
                "wind": { "speed": 3.6 }
            })),
        );
        let out = transform_snapshot(&snap);
        assert_eq!(out.records_extracted, 1);
        let record = &out.records[0];
        assert_eq!(record.mood_category, MoodCategory::Happy);
        assert_eq!(record.popularity_score, 1.2);
        assert_eq!(record.rank, 0);
        assert_eq!(record.weather_condition, "Clear");
        assert_eq!(record.temperature, 21.3);
        assert_eq!(record.city, "Paris");
        assert_eq!(record.source_snapshot_ref, "data/raw/Paris_France.json");
    }

    #[test]
    fn missing_weather_falls_back_to_unknown() {
        let snap = snapshot(json!([{ "name": "A", "artist": { "name": "B" } }]), None);
        let out = transform_snapshot(&snap);
        let record = &out.records[0];
        assert_eq!(record.weather_condition, "Unknown");
        assert_eq!(record.weather_description, "Unknown");
        assert_eq!(record.humidity, 0.0);
        // absent counts default to zero, rank falls back to position
        assert_eq!(record.listeners, 0);
        assert_eq!(record.rank, 1);
    }

    #[test]
    fn drops_unnamed_and_unparseable_tracks() {
        let snap = snapshot(
            json!([
                { "name": "", "artist": { "name": "B" } },
                { "name": "A", "artist": {} },
                { "name": "C", "artist": { "name": "D" }, "listeners": "n/a" },
                { "name": "G", "artist": { "name": "H" }, "playcount": [1, 2] },
                { "name": "E", "artist": { "name": "F" }, "listeners": "12" }
            ]),
            None,
        );
        let out = transform_snapshot(&snap);
        assert_eq!(out.records_extracted, 5);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.dropped.len(), 4);
        assert!(out.dropped[0].contains("missing track name"));
        assert!(out.dropped[1].contains("missing artist name"));
        assert!(out.dropped[3].contains("malformed entry"));
        assert_eq!(out.records[0].rank, 5);
    }
}
