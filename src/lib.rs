//! Canopy: vegetation index time series and anomaly detection
//!
//! Turns an area of interest and a date range into an NDVI/EVI time series
//! computed from Harmonized Landsat Sentinel-2 tiles, then flags anomalous
//! trajectories against daily weather covariates.

pub mod config;
pub mod core;
pub mod io;
pub mod monitor;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use config::MonitorConfig;
pub use core::anomaly::{detect, AnomalyDetector, AnomalyReport, ChartSeries};
pub use core::aoi::{normalize_bbox, AreaOfInterest};
pub use core::index::{IndexEngine, IndexResult};
pub use core::processor::{ProgressSink, ProgressUpdate, SceneProcessor};
pub use io::catalog::{CatalogBackend, DatasetSelector, SceneCatalog, SceneQuery};
pub use io::raster::RasterSource;
pub use monitor::{Monitor, MonitorRun};
pub use types::{
    AnomalyFinding, BandUrls, CoverageStats, IndexKind, MonitorError, MonitorResult, SceneRecord,
    Severity, TimeSeriesPoint, WeatherRecord,
};
