use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Vegetation index selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexKind {
    #[serde(rename = "NDVI")]
    Ndvi,
    #[serde(rename = "EVI")]
    Evi,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Ndvi => "NDVI",
            IndexKind::Evi => "EVI",
        }
    }

    /// Whether the index needs the blue band in addition to red and NIR
    pub fn needs_blue(&self) -> bool {
        matches!(self, IndexKind::Evi)
    }

    pub fn parse(name: &str) -> MonitorResult<Self> {
        match name.to_uppercase().as_str() {
            "NDVI" => Ok(IndexKind::Ndvi),
            "EVI" => Ok(IndexKind::Evi),
            other => Err(MonitorError::InvalidInput(format!("Unknown index: {}", other))),
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-band asset URLs of a scene
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BandUrls {
    pub red: String,
    pub nir: String,
    #[serde(default)]
    pub blue: Option<String>,
}

/// One catalog acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub id: String,
    pub datetime: DateTime<Utc>,
    pub cloud_cover: f64,
    pub collection: String,
    pub bands: BandUrls,
}

/// Vegetated-area statistics over the valid cells of an NDVI raster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageStats {
    pub valid_pixels: usize,
    pub vegetated_pixels: usize,
    pub vegetated_fraction: f64,
    pub vegetated_percent: f64,
    pub vegetated_area_hectares: f64,
    pub total_area_hectares: f64,
}

/// Daily weather covariates
///
/// Field aliases cover the column names produced by the archive client and by
/// exported report tables, so every source lands on one typed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    #[serde(alias = "date_only", alias = "datetime", deserialize_with = "deserialize_day")]
    pub date: NaiveDate,
    #[serde(default, alias = "temperature_mean", alias = "temperature_deg_c", alias = "temp_c")]
    pub temperature: Option<f64>,
    #[serde(default, alias = "humidity_mean", alias = "humidity_pct")]
    pub humidity: Option<f64>,
    #[serde(default, alias = "cloudcover_mean", alias = "cloudcover_pct")]
    pub cloudcover: Option<f64>,
    #[serde(default, alias = "wind_speed_mean", alias = "wind_speed_mps")]
    pub wind_speed: Option<f64>,
    #[serde(default, alias = "clarity_index", alias = "clarity_pct")]
    pub clarity: Option<f64>,
}

impl WeatherRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            temperature: None,
            humidity: None,
            cloudcover: None,
            wind_speed: None,
            clarity: None,
        }
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp and keeps the calendar day
fn deserialize_day<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_day(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", raw)))
}

pub(crate) fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(day);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// One entry of the index time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub scene_id: String,
    pub date: DateTime<Utc>,
    pub cloud_cover: f64,
    pub collection: String,
    #[serde(default)]
    pub ndvi: Option<f64>,
    #[serde(default)]
    pub evi: Option<f64>,
    #[serde(default)]
    pub coverage: Option<CoverageStats>,
    #[serde(default)]
    pub weather: Option<WeatherRecord>,
}

impl TimeSeriesPoint {
    pub fn from_scene(scene: &SceneRecord) -> Self {
        Self {
            scene_id: scene.id.clone(),
            date: scene.datetime,
            cloud_cover: scene.cloud_cover,
            collection: scene.collection.clone(),
            ndvi: None,
            evi: None,
            coverage: None,
            weather: None,
        }
    }

    pub fn index_value(&self, kind: IndexKind) -> Option<f64> {
        match kind {
            IndexKind::Ndvi => self.ndvi,
            IndexKind::Evi => self.evi,
        }
    }

    pub fn has_any_index(&self) -> bool {
        self.ndvi.is_some() || self.evi.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// Outcome of one anomaly signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyFinding {
    pub key: String,
    pub title: String,
    pub triggered: bool,
    pub severity: Severity,
    pub detected_at: Option<DateTime<Utc>>,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl AnomalyFinding {
    pub fn new(key: &str, title: &str) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            triggered: false,
            severity: Severity::Info,
            detected_at: None,
            details: BTreeMap::new(),
        }
    }

    pub fn detail<V: Into<serde_json::Value>>(&mut self, name: &str, value: V) {
        self.details.insert(name.to_string(), value.into());
    }

    /// Reason recorded when the signal could not be evaluated
    pub fn reason(&self) -> Option<&str> {
        self.details.get("reason").and_then(|v| v.as_str())
    }
}

/// Error types for vegetation monitoring
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Invalid area of interest: {0}")]
    InvalidAoi(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Catalog query failed: {0}")]
    CatalogQueryFailed(String),

    #[error("Raster read failed for {url}: {reason}")]
    RasterReadFailed { url: String, reason: String },

    #[error("Empty read window for {url}")]
    EmptyWindow { url: String },

    #[error("Cache I/O failure: {0}")]
    CacheIo(String),

    #[error("All workers failed: {0}")]
    AllWorkersFailed(String),

    #[error("Weather archive error: {0}")]
    Weather(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MonitorError {
    /// Faults local to one request, scene or cache entry
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            MonitorError::InvalidAoi(_)
                | MonitorError::InvalidGeometry(_)
                | MonitorError::InvalidInput(_)
                | MonitorError::AllWorkersFailed(_)
        )
    }
}

/// Result type for monitoring operations
pub type MonitorResult<T> = Result<T, MonitorError>;
