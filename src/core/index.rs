//! NDVI/EVI computation over masked band windows

use crate::core::aoi::AreaOfInterest;
use crate::core::window::resolve_window;
use crate::io::index_cache::IndexCache;
use crate::io::raster::{MaskedBand, RasterSource};
use crate::types::{BandUrls, CoverageStats, IndexKind, MonitorError, MonitorResult};
use ndarray::{Array2, Zip};
use std::sync::Arc;

/// NDVI at or above this value counts as vegetated
pub const VEGETATION_THRESHOLD: f32 = 0.35;
/// Ground area of one 30 m pixel
pub const PIXEL_AREA_M2: f64 = 900.0;
const M2_PER_HECTARE: f64 = 10_000.0;

const EVI_GAIN: f32 = 2.5;
const EVI_C1: f32 = 6.0;
const EVI_C2: f32 = 7.5;
const EVI_L: f32 = 1.0;

/// Index values with validity mask; invalid cells hold NaN
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRaster {
    kind: IndexKind,
    values: Array2<f32>,
    valid: Array2<bool>,
}

impl IndexRaster {
    pub fn new(kind: IndexKind, values: Array2<f32>, valid: Array2<bool>) -> MonitorResult<Self> {
        if values.dim() != valid.dim() {
            return Err(MonitorError::InvalidInput(format!(
                "index mask shape {:?} does not match values {:?}",
                valid.dim(),
                values.dim()
            )));
        }
        let values = Zip::from(&values)
            .and(&valid)
            .map_collect(|&v, &ok| if ok { v } else { f32::NAN });
        Ok(Self { kind, values, valid })
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn valid(&self) -> &Array2<bool> {
        &self.valid
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&ok| ok).count()
    }

    pub fn valid_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.values
            .iter()
            .zip(self.valid.iter())
            .filter(|(_, &ok)| ok)
            .map(|(&v, _)| v)
    }

    /// Mean over valid cells, `None` when there are none
    pub fn mean(&self) -> Option<f64> {
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for v in self.valid_values() {
            sum += v as f64;
            count += 1;
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

/// Successful index computation for one scene
#[derive(Debug, Clone, PartialEq)]
pub struct IndexResult {
    pub raster: IndexRaster,
    pub mean: f64,
    /// Present for NDVI only
    pub coverage: Option<CoverageStats>,
}

impl IndexResult {
    pub fn from_raster(raster: IndexRaster) -> Option<Self> {
        let mean = raster.mean()?;
        let coverage = match raster.kind() {
            IndexKind::Ndvi => coverage_stats(&raster),
            IndexKind::Evi => None,
        };
        Some(Self {
            raster,
            mean,
            coverage,
        })
    }
}

fn ndvi_cell(nir: &f32, red: &f32) -> f32 {
    let denom = nir + red;
    if denom == 0.0 {
        f32::NAN
    } else {
        (nir - red) / denom
    }
}

fn evi_cell(nir: &f32, red: &f32, blue: &f32) -> f32 {
    let denom = nir + EVI_C1 * red - EVI_C2 * blue + EVI_L;
    if denom == 0.0 {
        f32::NAN
    } else {
        EVI_GAIN * (nir - red) / denom
    }
}

fn check_shapes(bands: &[&MaskedBand]) -> MonitorResult<()> {
    let dim = bands[0].dim();
    if let Some(other) = bands.iter().find(|b| b.dim() != dim) {
        return Err(MonitorError::InvalidInput(format!(
            "band shapes differ: {:?} vs {:?}",
            dim,
            other.dim()
        )));
    }
    Ok(())
}

/// A cell is valid when every band is valid there and the result is finite
fn combine_mask(values: &Array2<f32>, bands: &[&MaskedBand]) -> Array2<bool> {
    let mut valid = values.mapv(f32::is_finite);
    for band in bands {
        Zip::from(&mut valid)
            .and(&band.valid)
            .for_each(|ok, &band_ok| *ok = *ok && band_ok);
    }
    valid
}

/// NDVI = (nir - red) / (nir + red)
pub fn ndvi(nir: &MaskedBand, red: &MaskedBand) -> MonitorResult<IndexRaster> {
    check_shapes(&[nir, red])?;

    #[cfg(feature = "parallel")]
    let values = Zip::from(&nir.values).and(&red.values).par_map_collect(ndvi_cell);

    #[cfg(not(feature = "parallel"))]
    let values = Zip::from(&nir.values).and(&red.values).map_collect(ndvi_cell);

    let valid = combine_mask(&values, &[nir, red]);
    IndexRaster::new(IndexKind::Ndvi, values, valid)
}

/// EVI = 2.5 (nir - red) / (nir + 6 red - 7.5 blue + 1)
pub fn evi(nir: &MaskedBand, red: &MaskedBand, blue: &MaskedBand) -> MonitorResult<IndexRaster> {
    check_shapes(&[nir, red, blue])?;

    #[cfg(feature = "parallel")]
    let values = Zip::from(&nir.values)
        .and(&red.values)
        .and(&blue.values)
        .par_map_collect(evi_cell);

    #[cfg(not(feature = "parallel"))]
    let values = Zip::from(&nir.values)
        .and(&red.values)
        .and(&blue.values)
        .map_collect(evi_cell);

    let valid = combine_mask(&values, &[nir, red, blue]);
    IndexRaster::new(IndexKind::Evi, values, valid)
}

/// Vegetated share and area of the valid cells
pub fn coverage_stats(raster: &IndexRaster) -> Option<CoverageStats> {
    let valid_pixels = raster.valid_count();
    if valid_pixels == 0 {
        return None;
    }
    let vegetated_pixels = raster
        .valid_values()
        .filter(|&v| v >= VEGETATION_THRESHOLD)
        .count();
    let vegetated_fraction = vegetated_pixels as f64 / valid_pixels as f64;

    Some(CoverageStats {
        valid_pixels,
        vegetated_pixels,
        vegetated_fraction,
        vegetated_percent: vegetated_fraction * 100.0,
        vegetated_area_hectares: vegetated_pixels as f64 * PIXEL_AREA_M2 / M2_PER_HECTARE,
        total_area_hectares: valid_pixels as f64 * PIXEL_AREA_M2 / M2_PER_HECTARE,
    })
}

/// Reads scene bands and computes indices, backed by the index cache
pub struct IndexEngine {
    source: Arc<dyn RasterSource>,
    cache: Option<IndexCache>,
}

impl IndexEngine {
    pub fn new(source: Arc<dyn RasterSource>, cache: IndexCache) -> Self {
        Self {
            source,
            cache: Some(cache),
        }
    }

    pub fn without_cache(source: Arc<dyn RasterSource>) -> Self {
        Self { source, cache: None }
    }

    pub fn cache(&self) -> Option<&IndexCache> {
        self.cache.as_ref()
    }

    /// Compute `kind` for one scene; `None` when the scene cannot be used
    ///
    /// Read failures, empty windows, shape mismatches and all-masked results
    /// are logged and reported as `None`.
    pub fn compute_index(
        &self,
        kind: IndexKind,
        bands: &BandUrls,
        aoi: &AreaOfInterest,
        token: Option<&str>,
    ) -> Option<IndexResult> {
        let fingerprint = IndexCache::fingerprint(kind, bands, aoi);

        if let Some(cache) = &self.cache {
            if let Some(raster) = cache.get(kind, &fingerprint) {
                log::debug!("{} cache hit: {}", kind, fingerprint);
                return IndexResult::from_raster(raster);
            }
        }

        let raster = match self.compute_raster(kind, bands, aoi, token) {
            Ok(raster) => raster,
            Err(e) => {
                log::warn!("{} computation skipped: {}", kind, e);
                return None;
            }
        };

        let result = match IndexResult::from_raster(raster) {
            Some(result) => result,
            None => {
                log::info!("{} has no valid cells over the AOI", kind);
                return None;
            }
        };

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&fingerprint, &result.raster, result.mean) {
                log::warn!("Failed to cache {} result: {}", kind, e);
            }
        }

        Some(result)
    }

    fn compute_raster(
        &self,
        kind: IndexKind,
        bands: &BandUrls,
        aoi: &AreaOfInterest,
        token: Option<&str>,
    ) -> MonitorResult<IndexRaster> {
        let red = self.read_band(&bands.red, aoi, token)?;
        let nir = self.read_band(&bands.nir, aoi, token)?;

        match kind {
            IndexKind::Ndvi => ndvi(&nir, &red),
            IndexKind::Evi => {
                let blue_url = bands.blue.as_deref().ok_or_else(|| {
                    MonitorError::InvalidInput("EVI requires a blue band".to_string())
                })?;
                let blue = self.read_band(blue_url, aoi, token)?;
                evi(&nir, &red, &blue)
            }
        }
    }

    fn read_band(
        &self,
        url: &str,
        aoi: &AreaOfInterest,
        token: Option<&str>,
    ) -> MonitorResult<MaskedBand> {
        let dataset = self.source.open(url, token)?;
        let grid = dataset.grid()?;
        let transform = dataset.geographic_transform()?;

        let window = resolve_window(&grid, transform.as_ref(), aoi).ok_or_else(|| {
            MonitorError::EmptyWindow {
                url: url.to_string(),
            }
        })?;

        let band = dataset.read_masked(&window)?;
        if band.is_empty() {
            return Err(MonitorError::EmptyWindow {
                url: url.to_string(),
            });
        }
        Ok(band)
    }
}
