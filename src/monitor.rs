//! End-to-end monitoring pipeline over injectable collaborators

use crate::config::MonitorConfig;
use crate::core::anomaly::{AnomalyDetector, AnomalyReport};
use crate::core::aoi::AreaOfInterest;
use crate::core::index::{IndexEngine, IndexResult};
use crate::core::processor::{LogProgress, ProgressSink, SceneProcessor};
use crate::io::catalog::{CatalogBackend, DatasetSelector, SceneCatalog, SceneQuery, StacCatalogClient};
use crate::io::index_cache::IndexCache;
use crate::io::raster::{GdalRasterSource, RasterSource};
use crate::io::scene_cache::SceneCache;
use crate::io::weather::{attach_weather, WeatherClient};
use crate::types::{IndexKind, MonitorError, MonitorResult, SceneRecord, TimeSeriesPoint, WeatherRecord};
use chrono::{Duration, NaiveDate};
use std::sync::Arc;

/// Output of a full monitoring run
#[derive(Debug, Clone)]
pub struct MonitorRun {
    pub scene_count: usize,
    pub points: Vec<TimeSeriesPoint>,
    pub weather: Vec<WeatherRecord>,
    pub report: AnomalyReport,
    /// Set when the catalog could not be queried and the run fell back to no scenes
    pub catalog_error: Option<String>,
    /// Set when weather was configured but could not be fetched
    pub weather_error: Option<String>,
}

pub struct Monitor {
    config: MonitorConfig,
    catalog: SceneCatalog,
    processor: SceneProcessor,
    weather: Option<WeatherClient>,
    detector: AnomalyDetector,
}

impl Monitor {
    /// Production wiring: STAC catalog, GDAL rasters and the Open-Meteo archive
    pub fn from_config(config: MonitorConfig) -> MonitorResult<Self> {
        let backend = Arc::new(StacCatalogClient::from_config(&config)?);
        let source = Arc::new(GdalRasterSource::new(config.tile_timeout_secs));
        let weather = match WeatherClient::from_config(&config) {
            Ok(client) => Some(client),
            Err(e) => {
                log::warn!("Weather covariates disabled: {}", e);
                None
            }
        };
        Ok(Self::new(config, backend, source, weather))
    }

    /// Wire caller-supplied collaborators; caches live under `config.cache_root`
    pub fn new(
        config: MonitorConfig,
        backend: Arc<dyn CatalogBackend>,
        source: Arc<dyn RasterSource>,
        weather: Option<WeatherClient>,
    ) -> Self {
        let scene_cache = SceneCache::new(
            config.scene_cache_dir(),
            Duration::seconds(config.scene_cache_ttl_secs as i64),
            config.scene_memory_entries,
        );
        let engine = Arc::new(IndexEngine::new(source, IndexCache::new(config.index_cache_dir())));
        log::info!(
            "Monitor ready: cache at {}, up to {} worker(s)",
            config.cache_root.display(),
            config.worker_cap
        );

        Self {
            catalog: SceneCatalog::new(backend, scene_cache),
            processor: SceneProcessor::new(engine),
            weather,
            detector: AnomalyDetector::default(),
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SceneCatalog {
        &self.catalog
    }

    pub fn engine(&self) -> &IndexEngine {
        self.processor.engine()
    }

    /// Scene query with the start date clamped to the configured look-back limit
    pub fn scene_query(
        &self,
        aoi: AreaOfInterest,
        start: NaiveDate,
        end: NaiveDate,
        max_cloud_cover: f64,
        dataset: DatasetSelector,
    ) -> MonitorResult<SceneQuery> {
        let earliest = end - Duration::days(self.config.days_back_limit as i64);
        let start = if start < earliest {
            log::info!("Clamping start date {} to {}", start, earliest);
            earliest
        } else {
            start
        };
        SceneQuery::new(aoi.normalize()?, start, end, max_cloud_cover, dataset)
    }

    pub fn find_scenes(&self, query: &SceneQuery, token: Option<&str>) -> MonitorResult<Vec<SceneRecord>> {
        self.catalog.find_scenes(query, token)
    }

    pub fn compute_index(
        &self,
        kind: IndexKind,
        scene: &SceneRecord,
        aoi: &AreaOfInterest,
        token: Option<&str>,
    ) -> Option<IndexResult> {
        self.engine().compute_index(kind, &scene.bands, aoi, token)
    }

    pub fn process_all(
        &self,
        scenes: &[SceneRecord],
        aoi: &AreaOfInterest,
        token: Option<&str>,
    ) -> MonitorResult<Vec<TimeSeriesPoint>> {
        self.process_all_with_progress(scenes, aoi, token, &LogProgress)
    }

    pub fn process_all_with_progress(
        &self,
        scenes: &[SceneRecord],
        aoi: &AreaOfInterest,
        token: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> MonitorResult<Vec<TimeSeriesPoint>> {
        self.processor.process_all(
            scenes,
            &self.config.index_kinds(),
            aoi,
            token,
            self.config.worker_budget(scenes.len()),
            progress,
        )
    }

    /// Daily weather at the AOI centroid
    pub fn fetch_weather(
        &self,
        aoi: &AreaOfInterest,
        start: NaiveDate,
        end: NaiveDate,
    ) -> MonitorResult<Vec<WeatherRecord>> {
        let client = self
            .weather
            .as_ref()
            .ok_or_else(|| MonitorError::Weather("no weather client configured".to_string()))?;
        let (lon, lat) = aoi.centroid();
        client.fetch_daily(lat, lon, start, end)
    }

    pub fn detect(&self, points: &[TimeSeriesPoint], weather: Option<&[WeatherRecord]>) -> AnomalyReport {
        self.detector.detect(points, weather)
    }

    /// Scenes, index series, weather and anomalies for one query
    ///
    /// Catalog and weather failures degrade to empty inputs and are recorded
    /// on the run; only a failed scene batch is returned as an error.
    pub fn run(&self, query: &SceneQuery, token: Option<&str>) -> MonitorResult<MonitorRun> {
        let (scenes, catalog_error) = match self.catalog.find_scenes(query, token) {
            Ok(scenes) => (scenes, None),
            Err(e) => {
                log::warn!("Continuing without scenes: {}", e);
                (Vec::new(), Some(e.to_string()))
            }
        };
        let mut points = self.process_all(&scenes, &query.aoi, token)?;

        let (weather, weather_error) = if self.weather.is_some() {
            match self.fetch_weather(&query.aoi, query.start, query.end) {
                Ok(records) => (records, None),
                Err(e) => {
                    log::warn!("Continuing without weather: {}", e);
                    (Vec::new(), Some(e.to_string()))
                }
            }
        } else {
            (Vec::new(), None)
        };
        attach_weather(&mut points, &weather);

        let report = self.detect(&points, Some(&weather));
        Ok(MonitorRun {
            scene_count: scenes.len(),
            points,
            weather,
            report,
            catalog_error,
            weather_error,
        })
    }
}
