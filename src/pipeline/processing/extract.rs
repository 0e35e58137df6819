use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use crate::pipeline::ingestion::payloads::WeatherResponse;
use crate::pipeline::ingestion::snapshot_store::{SnapshotDocument, SnapshotMetadata};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// File missing, unreadable or not a snapshot document
    #[error("snapshot unreadable: {0}")]
    Unreadable(String),

    /// Readable, but neither source payload is present
    #[error("snapshot has no source payload")]
    NoPayload,
}

/// A persisted snapshot read back from disk.
///
/// Track entries stay as raw JSON so that one malformed entry is dropped at
/// transform time instead of failing the whole snapshot.
#[derive(Debug, Clone)]
pub struct ExtractedSnapshot {
    pub snapshot_ref: String,
    pub metadata: SnapshotMetadata,
    pub tracks: Option<Vec<Value>>,
    pub weather: Option<WeatherResponse>,
}

impl ExtractedSnapshot {
    pub fn track_count(&self) -> usize {
        self.tracks.as_ref().map_or(0, Vec::len)
    }
}

fn track_entries(value: Option<Value>) -> Result<Option<Vec<Value>>, ExtractError> {
    let section = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(section @ Value::Object(_)) => section,
        Some(_) => return Err(ExtractError::Unreadable("malformed 'lastfm_data'".to_string())),
    };
    match section.pointer("/tracks/track") {
        None | Some(Value::Null) => Ok(Some(Vec::new())),
        Some(Value::Array(entries)) => Ok(Some(entries.clone())),
        Some(_) => Err(ExtractError::Unreadable(
            "malformed 'lastfm_data': track list is not an array".to_string(),
        )),
    }
}

fn typed<T: serde::de::DeserializeOwned>(
    field: &str,
    value: Option<Value>,
) -> Result<Option<T>, ExtractError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|e| ExtractError::Unreadable(format!("malformed '{}': {}", field, e))),
    }
}

pub fn extract_snapshot(path: &Path) -> Result<ExtractedSnapshot, ExtractError> {
    let document =
        SnapshotDocument::from_path(path).map_err(|e| ExtractError::Unreadable(e.to_string()))?;
    let tracks = track_entries(document.lastfm_data)?;
    let weather: Option<WeatherResponse> = typed("weather_data", document.weather_data)?;
    if tracks.is_none() && weather.is_none() {
        return Err(ExtractError::NoPayload);
    }
    Ok(ExtractedSnapshot {
        snapshot_ref: path.to_string_lossy().into_owned(),
        metadata: document.metadata,
        tracks,
        weather,
    })
}

/// Discovery-time gate: a file is worth extracting only if it carries a
/// non-empty track list and a weather section.
pub fn check_loadable(path: &Path) -> Result<(), String> {
    let bytes = std::fs::read(path).map_err(|e| format!("unreadable: {}", e))?;
    let doc: Value = serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON: {}", e))?;
    if !doc.get("metadata").map_or(false, Value::is_object) {
        return Err("missing metadata".to_string());
    }
    let has_tracks = doc
        .pointer("/lastfm_data/tracks/track")
        .and_then(Value::as_array)
        .map_or(false, |list| !list.is_empty());
    if !has_tracks {
        return Err("missing or empty track list".to_string());
    }
    if !doc.get("weather_data").map_or(false, Value::is_object) {
        return Err("missing weather section".to_string());
    }
    Ok(())
}
