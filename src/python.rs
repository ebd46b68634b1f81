//! Python bindings

use crate::config::MonitorConfig;
use crate::core::aoi::AreaOfInterest;
use crate::io::catalog::DatasetSelector;
use crate::monitor::Monitor;
use crate::types::{BandUrls, IndexKind, MonitorError, SceneRecord, TimeSeriesPoint, WeatherRecord};
use chrono::NaiveDate;
use numpy::{PyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

type Bbox = (f64, f64, f64, f64);

impl From<MonitorError> for PyErr {
    fn from(e: MonitorError) -> Self {
        if e.is_recoverable() {
            PyRuntimeError::new_err(e.to_string())
        } else {
            PyValueError::new_err(e.to_string())
        }
    }
}

fn json_err(e: serde_json::Error) -> PyErr {
    PyValueError::new_err(format!("Invalid JSON: {}", e))
}

fn parse_date(value: &str) -> PyResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| PyValueError::new_err(format!("Invalid date '{}': {}", value, e)))
}

fn aoi_from(bbox: Bbox) -> PyResult<AreaOfInterest> {
    Ok(AreaOfInterest::new(bbox.0, bbox.1, bbox.2, bbox.3)?)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(normalize_bbox, m)?)?;
    m.add_function(wrap_pyfunction!(detect_anomalies, m)?)?;
    m.add_class::<PyMonitor>()?;
    Ok(())
}

/// Sorted, validated (min_lon, min_lat, max_lon, max_lat)
#[pyfunction]
fn normalize_bbox(bbox: Bbox) -> PyResult<Bbox> {
    let [a, b, c, d] = crate::core::aoi::normalize_bbox([bbox.0, bbox.1, bbox.2, bbox.3])?;
    Ok((a, b, c, d))
}

/// Anomaly report as JSON for a JSON list of points and optional weather rows
#[pyfunction]
#[pyo3(signature = (points_json, weather_json=None))]
fn detect_anomalies(points_json: &str, weather_json: Option<&str>) -> PyResult<String> {
    let points: Vec<TimeSeriesPoint> = serde_json::from_str(points_json).map_err(json_err)?;
    let weather: Option<Vec<WeatherRecord>> = weather_json
        .map(serde_json::from_str)
        .transpose()
        .map_err(json_err)?;
    let report = crate::core::anomaly::detect(&points, weather.as_deref());
    serde_json::to_string(&report).map_err(json_err)
}

/// Python wrapper for Monitor
#[pyclass(name = "Monitor")]
struct PyMonitor {
    inner: Monitor,
}

#[pymethods]
impl PyMonitor {
    #[new]
    #[pyo3(signature = (config_path=None))]
    fn new(config_path: Option<String>) -> PyResult<Self> {
        let config = match config_path {
            Some(path) => MonitorConfig::from_json_file(path)?,
            None => MonitorConfig::from_env(),
        };
        Ok(PyMonitor {
            inner: Monitor::from_config(config)?,
        })
    }

    /// Scene records as a JSON list
    #[pyo3(signature = (bbox, start, end, max_cloud_cover=30.0, dataset="both", token=None))]
    fn find_scenes(
        &self,
        py: Python<'_>,
        bbox: Bbox,
        start: &str,
        end: &str,
        max_cloud_cover: f64,
        dataset: &str,
        token: Option<String>,
    ) -> PyResult<String> {
        let query = self.inner.scene_query(
            aoi_from(bbox)?,
            parse_date(start)?,
            parse_date(end)?,
            max_cloud_cover,
            DatasetSelector::parse(dataset)?,
        )?;
        let scenes = py.allow_threads(|| self.inner.find_scenes(&query, token.as_deref()))?;
        serde_json::to_string(&scenes).map_err(json_err)
    }

    /// (values, valid mask, mean) or None when the scene cannot be used
    #[pyo3(signature = (kind, red, nir, bbox, blue=None, token=None))]
    #[allow(clippy::too_many_arguments, clippy::type_complexity)]
    fn compute_index(
        &self,
        py: Python<'_>,
        kind: &str,
        red: String,
        nir: String,
        bbox: Bbox,
        blue: Option<String>,
        token: Option<String>,
    ) -> PyResult<Option<(Py<PyArray2<f32>>, Py<PyArray2<bool>>, f64)>> {
        let kind = IndexKind::parse(kind)?;
        let aoi = aoi_from(bbox)?;
        let bands = BandUrls { red, nir, blue };

        let result = py.allow_threads(|| {
            self.inner
                .engine()
                .compute_index(kind, &bands, &aoi, token.as_deref())
        });

        Ok(result.map(|r| {
            let values: Py<PyArray2<f32>> = r.raster.values().to_pyarray(py).into();
            let valid: Py<PyArray2<bool>> = r.raster.valid().to_pyarray(py).into();
            (values, valid, r.mean)
        }))
    }

    /// Time-series points as JSON for a JSON list of scene records
    #[pyo3(signature = (scenes_json, bbox, token=None))]
    fn process_all(
        &self,
        py: Python<'_>,
        scenes_json: &str,
        bbox: Bbox,
        token: Option<String>,
    ) -> PyResult<String> {
        let scenes: Vec<SceneRecord> = serde_json::from_str(scenes_json).map_err(json_err)?;
        let aoi = aoi_from(bbox)?;
        let points = py.allow_threads(|| self.inner.process_all(&scenes, &aoi, token.as_deref()))?;
        serde_json::to_string(&points).map_err(json_err)
    }

    fn __repr__(&self) -> String {
        format!(
            "Monitor(cache_root='{}', worker_cap={})",
            self.inner.config().cache_root.display(),
            self.inner.config().worker_cap
        )
    }
}
