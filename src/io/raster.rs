//! Band raster access with masked windowed reads

use crate::core::window::{CoordinateTransform, PixelWindow, RasterGrid};
use crate::types::{MonitorError, MonitorResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::Dataset;
use ndarray::{s, Array2};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Band values with a parallel validity mask (`true` = usable cell)
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedBand {
    pub values: Array2<f32>,
    pub valid: Array2<bool>,
}

impl MaskedBand {
    pub fn new(values: Array2<f32>, valid: Array2<bool>) -> MonitorResult<Self> {
        if values.dim() != valid.dim() {
            return Err(MonitorError::InvalidInput(format!(
                "mask shape {:?} does not match values {:?}",
                valid.dim(),
                values.dim()
            )));
        }
        Ok(Self { values, valid })
    }

    /// Every finite cell is valid
    pub fn from_values(values: Array2<f32>) -> Self {
        let valid = values.mapv(f32::is_finite);
        Self { values, valid }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An opened single-band raster
pub trait BandDataset {
    fn grid(&self) -> MonitorResult<RasterGrid>;

    /// Transform from WGS84 lon/lat into this raster's CRS
    fn geographic_transform(&self) -> MonitorResult<Box<dyn CoordinateTransform>>;

    fn read_masked(&self, window: &PixelWindow) -> MonitorResult<MaskedBand>;
}

/// Opens band rasters by URL
pub trait RasterSource: Send + Sync {
    fn open(&self, url: &str, token: Option<&str>) -> MonitorResult<Box<dyn BandDataset>>;
}

/// GDAL-backed source reading remote COGs through `/vsicurl/`
pub struct GdalRasterSource {
    timeout_secs: u64,
}

impl GdalRasterSource {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    fn vsi_path(url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            format!("/vsicurl/{}", url)
        } else {
            url.to_string()
        }
    }

    /// Per-thread HTTP options so concurrent workers do not share headers
    fn configure_http(&self, token: Option<&str>) -> MonitorResult<()> {
        use gdal::config::set_thread_local_config_option;

        set_thread_local_config_option("GDAL_DISABLE_READDIR_ON_OPEN", "EMPTY_DIR")?;
        set_thread_local_config_option("GDAL_HTTP_MULTIRANGE", "YES")?;
        set_thread_local_config_option("GDAL_HTTP_TIMEOUT", &self.timeout_secs.to_string())?;
        match token {
            Some(t) if !t.is_empty() => {
                set_thread_local_config_option(
                    "GDAL_HTTP_HEADERS",
                    &format!("Authorization: Bearer {}", t),
                )?;
            }
            _ => set_thread_local_config_option("GDAL_HTTP_HEADERS", "")?,
        }
        Ok(())
    }
}

impl Default for GdalRasterSource {
    fn default() -> Self {
        Self::new(60)
    }
}

impl RasterSource for GdalRasterSource {
    fn open(&self, url: &str, token: Option<&str>) -> MonitorResult<Box<dyn BandDataset>> {
        self.configure_http(token)?;
        let path = Self::vsi_path(url);
        log::debug!("Opening band raster: {}", path);

        let dataset = Dataset::open(&path).map_err(|e| MonitorError::RasterReadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(GdalBand {
            url: url.to_string(),
            dataset,
        }))
    }
}

struct GdalBand {
    url: String,
    dataset: Dataset,
}

impl GdalBand {
    fn read_failed(&self, reason: impl std::fmt::Display) -> MonitorError {
        MonitorError::RasterReadFailed {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

impl BandDataset for GdalBand {
    fn grid(&self) -> MonitorResult<RasterGrid> {
        let (width, height) = self.dataset.raster_size();
        let geo_transform = self.dataset.geo_transform().map_err(|e| self.read_failed(e))?;
        Ok(RasterGrid::new(width, height, geo_transform))
    }

    fn geographic_transform(&self) -> MonitorResult<Box<dyn CoordinateTransform>> {
        let target = self.dataset.spatial_ref()?;
        let source = SpatialRef::from_epsg(4326)?;
        source.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        target.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        let transform = CoordTransform::new(&source, &target)?;
        Ok(Box::new(GdalTransform { inner: transform }))
    }

    fn read_masked(&self, window: &PixelWindow) -> MonitorResult<MaskedBand> {
        let band = self.dataset.rasterband(1).map_err(|e| self.read_failed(e))?;
        let no_data = band.no_data_value();

        let buffer = band
            .read_as::<f32>(
                (window.col_off as isize, window.row_off as isize),
                (window.width, window.height),
                (window.width, window.height),
                None,
            )
            .map_err(|e| self.read_failed(e))?;

        let values = Array2::from_shape_vec((window.height, window.width), buffer.data)
            .map_err(|e| self.read_failed(format!("failed to reshape band data: {}", e)))?;

        let valid = nodata_mask(&values, no_data);

        log::debug!(
            "Read {}x{} window at ({}, {}) from {}",
            window.width,
            window.height,
            window.col_off,
            window.row_off,
            self.url
        );
        MaskedBand::new(values, valid)
    }
}

struct GdalTransform {
    inner: CoordTransform,
}

impl CoordinateTransform for GdalTransform {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> MonitorResult<()> {
        let mut zs = vec![0.0; xs.len()];
        self.inner.transform_coords(xs, ys, &mut zs)?;
        Ok(())
    }
}

/// Raster held in memory, addressed by URL
///
/// Used to serve pre-fetched bands and as a stand-in for remote storage.
#[derive(Debug, Clone)]
pub struct InMemoryRaster {
    pub grid: RasterGrid,
    pub band: MaskedBand,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeoReference {
    /// Raster CRS is WGS84 lon/lat
    Geographic,
    /// Raster CRS is a fixed scale/offset of lon/lat
    Affine { scale: [f64; 2], offset: [f64; 2] },
}

#[derive(Default)]
pub struct InMemoryRasterSource {
    rasters: HashMap<String, (Arc<InMemoryRaster>, GeoReference)>,
    opens: AtomicUsize,
}

impl InMemoryRasterSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: &str, raster: InMemoryRaster) {
        self.rasters
            .insert(url.to_string(), (Arc::new(raster), GeoReference::Geographic));
    }

    pub fn insert_with_reference(&mut self, url: &str, raster: InMemoryRaster, reference: GeoReference) {
        self.rasters.insert(url.to_string(), (Arc::new(raster), reference));
    }

    pub fn len(&self) -> usize {
        self.rasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rasters.is_empty()
    }

    /// Number of `open` calls served so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl RasterSource for InMemoryRasterSource {
    fn open(&self, url: &str, _token: Option<&str>) -> MonitorResult<Box<dyn BandDataset>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (raster, reference) = self
            .rasters
            .get(url)
            .cloned()
            .ok_or_else(|| MonitorError::RasterReadFailed {
                url: url.to_string(),
                reason: "not found".to_string(),
            })?;
        Ok(Box::new(MemoryBand {
            url: url.to_string(),
            raster,
            reference,
        }))
    }
}

struct MemoryBand {
    url: String,
    raster: Arc<InMemoryRaster>,
    reference: GeoReference,
}

struct AffineTransform {
    scale: [f64; 2],
    offset: [f64; 2],
}

impl CoordinateTransform for AffineTransform {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> MonitorResult<()> {
        for x in xs.iter_mut() {
            *x = *x * self.scale[0] + self.offset[0];
        }
        for y in ys.iter_mut() {
            *y = *y * self.scale[1] + self.offset[1];
        }
        Ok(())
    }
}

impl BandDataset for MemoryBand {
    fn grid(&self) -> MonitorResult<RasterGrid> {
        Ok(self.raster.grid)
    }

    fn geographic_transform(&self) -> MonitorResult<Box<dyn CoordinateTransform>> {
        Ok(match self.reference {
            GeoReference::Geographic => Box::new(crate::core::window::IdentityTransform),
            GeoReference::Affine { scale, offset } => Box::new(AffineTransform { scale, offset }),
        })
    }

    fn read_masked(&self, window: &PixelWindow) -> MonitorResult<MaskedBand> {
        let (rows, cols) = self.raster.band.dim();
        if window.row_off + window.height > rows || window.col_off + window.width > cols {
            return Err(MonitorError::RasterReadFailed {
                url: self.url.clone(),
                reason: format!("window {:?} outside {}x{} raster", window, cols, rows),
            });
        }
        let rows = window.row_off..window.row_off + window.height;
        let cols = window.col_off..window.col_off + window.width;
        MaskedBand::new(
            self.raster.band.values.slice(s![rows.clone(), cols.clone()]).to_owned(),
            self.raster.band.valid.slice(s![rows, cols]).to_owned(),
        )
    }
}

/// Valid-cell mask: finite and not equal to the band's nodata value
///
/// A non-finite nodata value (NaN for most float COGs) is covered by the
/// finiteness check alone.
pub fn nodata_mask(values: &Array2<f32>, no_data: Option<f64>) -> Array2<bool> {
    let no_data = no_data.filter(|nd| nd.is_finite());
    values.mapv(|v| v.is_finite() && no_data.map_or(true, |nd| (v as f64 - nd).abs() > f64::EPSILON))
}
