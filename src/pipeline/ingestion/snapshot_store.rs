use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::SNAPSHOT_DATA_SOURCE;
use crate::error::{PipelineError, Result};
use crate::types::Entity;

const MAX_NAME_COLLISIONS: u32 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub city: String,
    pub country: String,
    pub ingestion_timestamp: String,
    pub data_source: String,
}

/// On-disk layout of one raw snapshot. Payloads are the source bodies exactly
/// as received, or null when the source was unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub metadata: SnapshotMetadata,
    #[serde(default)]
    pub lastfm_data: Option<Value>,
    #[serde(default)]
    pub weather_data: Option<Value>,
}

impl SnapshotDocument {
    pub fn new(
        entity: &Entity,
        timestamp: DateTime<Utc>,
        tracks: Option<Value>,
        weather: Option<Value>,
    ) -> Self {
        Self {
            metadata: SnapshotMetadata {
                city: entity.city.clone(),
                country: entity.country.clone(),
                ingestion_timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                data_source: SNAPSHOT_DATA_SOURCE.to_string(),
            },
            lastfm_data: tracks,
            weather_data: weather,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// A snapshot that made it to disk
#[derive(Debug, Clone)]
pub struct RawSnapshot {
    pub entity: Entity,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: usize,
}

/// Write-once store of raw snapshots, one JSON file per ingestion attempt.
pub struct RawSnapshotStore {
    dir: PathBuf,
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn snapshot_file_stem(entity: &Entity, timestamp: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        sanitize(&entity.city),
        sanitize(&entity.country),
        timestamp.format("%Y%m%d_%H%M%S_%3f")
    )
}

impl RawSnapshotStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Persist one snapshot. Files are created exclusively; a name collision
    /// gets a `-N` suffix instead of overwriting the earlier file.
    pub fn persist(
        &self,
        entity: &Entity,
        timestamp: DateTime<Utc>,
        tracks: Option<Value>,
        weather: Option<Value>,
    ) -> Result<RawSnapshot> {
        let document = SnapshotDocument::new(entity, timestamp, tracks, weather);
        let bytes = serde_json::to_vec_pretty(&document)?;
        let sha256 = hex::encode(Sha256::digest(&bytes));

        let stem = snapshot_file_stem(entity, timestamp);
        let (path, file) = self.create_exclusive(&stem)?;
        write_or_discard(&path, file, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "raw snapshot written");

        Ok(RawSnapshot {
            entity: entity.clone(),
            timestamp,
            path,
            sha256,
            bytes: bytes.len(),
        })
    }

    fn create_exclusive(&self, stem: &str) -> Result<(PathBuf, fs::File)> {
        for n in 0..MAX_NAME_COLLISIONS {
            let name = if n == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}-{}.json", stem, n)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(PipelineError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("too many snapshots named {}", stem),
        )))
    }

    /// Every `*.json` file in the store, in filename order. A missing
    /// directory is an empty store.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        list_snapshot_files(&self.dir)
    }
}

/// Write `bytes` to the freshly created `path`; on failure the partial file is
/// removed so no truncated snapshot is left behind.
fn write_or_discard<W: Write>(path: &Path, mut file: W, bytes: &[u8]) -> std::io::Result<()> {
    let written = file.write_all(bytes).and_then(|()| file.flush());
    if written.is_err() {
        drop(file);
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove partial snapshot");
        }
    }
    written
}

pub fn list_snapshot_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
