//! Typed views over the two primary source payloads.
//!
//! Every field is optional so that any JSON object deserializes; the
//! `validate` methods are the single place where "unknown shape" becomes a
//! typed failure. Business logic reads through the accessors below and never
//! indexes into raw JSON.

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Last.fm `geo.gettoptracks` response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopTracksResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracks: Option<TracksSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracksSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<Vec<TrackEntry>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artist: Option<ArtistRef>,
    #[serde(default)]
    pub listeners: Option<Count>,
    #[serde(default)]
    pub playcount: Option<Count>,
    #[serde(default, rename = "@attr")]
    pub attr: Option<RankAttr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtistRef {
    Plain(String),
    Named {
        #[serde(default)]
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankAttr {
    #[serde(default)]
    pub rank: Option<Count>,
}

/// Last.fm sends counts as decimal strings; accept numbers too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Count {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Count {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Count::Int(n) => Some(*n),
            Count::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Count::Float(_) => None,
            Count::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl TopTracksResponse {
    pub fn track_list(&self) -> Option<&[TrackEntry]> {
        self.tracks.as_ref()?.track.as_deref()
    }

    pub fn validate(self) -> Result<Vec<TrackEntry>, FetchError> {
        if let Some(code) = self.error {
            return Err(FetchError::InvalidStructure(format!(
                "source error {}: {}",
                code,
                self.message.unwrap_or_default()
            )));
        }
        let section = self
            .tracks
            .ok_or_else(|| FetchError::InvalidStructure("missing 'tracks'".to_string()))?;
        section
            .track
            .ok_or_else(|| FetchError::InvalidStructure("missing 'tracks.track'".to_string()))
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// A count field that is absent defaults to 0; one that is present but not an
/// integer is an error.
fn count_or_zero(field: &'static str, value: Option<&Count>) -> Result<i64, String> {
    match value {
        None => Ok(0),
        Some(c) => c
            .as_i64()
            .ok_or_else(|| format!("unparseable {}: {:?}", field, c)),
    }
}

impl TrackEntry {
    pub fn track_name(&self) -> Option<&str> {
        non_blank(self.name.as_deref())
    }

    pub fn artist_name(&self) -> Option<&str> {
        match self.artist.as_ref()? {
            ArtistRef::Plain(name) => non_blank(Some(name)),
            ArtistRef::Named { name } => non_blank(name.as_deref()),
        }
    }

    pub fn listeners(&self) -> Result<i64, String> {
        count_or_zero("listeners", self.listeners.as_ref())
    }

    pub fn playcount(&self) -> Result<i64, String> {
        count_or_zero("playcount", self.playcount.as_ref())
    }

    pub fn rank(&self) -> Option<i64> {
        self.attr.as_ref()?.rank.as_ref()?.as_i64()
    }
}

/// OpenWeather current-weather response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeatherResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<Vec<WeatherCondition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<WeatherMain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind: Option<Wind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeatherCondition {
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeatherMain {
    #[serde(default)]
    pub temp: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Wind {
    #[serde(default)]
    pub speed: Option<f64>,
}

/// The single weather observation paired with every track of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    pub condition: String,
    pub description: String,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
}

impl WeatherReading {
    pub fn unknown() -> Self {
        Self {
            condition: "Unknown".to_string(),
            description: "Unknown".to_string(),
            temperature: 0.0,
            humidity: 0.0,
            wind_speed: 0.0,
        }
    }
}

impl WeatherResponse {
    pub fn is_empty(&self) -> bool {
        self.weather.is_none() && self.main.is_none() && self.wind.is_none() && self.name.is_none()
    }

    fn first_condition(&self) -> Option<&WeatherCondition> {
        self.weather.as_ref()?.first()
    }

    /// Strict check applied at fetch time.
    pub fn validate(self) -> Result<WeatherReading, FetchError> {
        if self
            .first_condition()
            .and_then(|c| non_blank(c.main.as_deref()))
            .is_none()
        {
            return Err(FetchError::InvalidStructure(
                "missing 'weather[0].main'".to_string(),
            ));
        }
        if self.main.as_ref().and_then(|m| m.temp).is_none() {
            return Err(FetchError::InvalidStructure("missing 'main.temp'".to_string()));
        }
        Ok(self.reading())
    }

    /// Lenient view used at extraction: absent fields fall back to
    /// "Unknown" / 0.
    pub fn reading(&self) -> WeatherReading {
        let condition = self.first_condition();
        let main = self.main.as_ref();
        WeatherReading {
            condition: condition
                .and_then(|c| non_blank(c.main.as_deref()))
                .unwrap_or("Unknown")
                .to_string(),
            description: condition
                .and_then(|c| non_blank(c.description.as_deref()))
                .unwrap_or("Unknown")
                .to_string(),
            temperature: main.and_then(|m| m.temp).unwrap_or(0.0),
            humidity: main.and_then(|m| m.humidity).unwrap_or(0.0),
            wind_speed: self.wind.as_ref().and_then(|w| w.speed).unwrap_or(0.0),
        }
    }
}
