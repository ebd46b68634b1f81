use approx::assert_abs_diff_eq;
use canopy::core::aoi::AreaOfInterest;
use canopy::core::index::IndexEngine;
use canopy::core::window::RasterGrid;
use canopy::io::index_cache::IndexCache;
use canopy::io::raster::{InMemoryRaster, InMemoryRasterSource, MaskedBand};
use canopy::{BandUrls, IndexKind};
use ndarray::Array2;
use std::sync::Arc;
use tempfile::TempDir;

const SIZE: usize = 40;

/// 0.25 degree pixels over lon 10..20, lat 36..46
fn grid() -> RasterGrid {
    RasterGrid::new(SIZE, SIZE, [10.0, 0.25, 0.0, 46.0, 0.0, -0.25])
}

fn constant(value: f32) -> InMemoryRaster {
    InMemoryRaster {
        grid: grid(),
        band: MaskedBand::from_values(Array2::from_elem((SIZE, SIZE), value)),
    }
}

fn bands(id: &str) -> BandUrls {
    BandUrls {
        red: format!("mem://{}/B04", id),
        nir: format!("mem://{}/B8A", id),
        blue: Some(format!("mem://{}/B02", id)),
    }
}

fn source_with(id: &str, red: InMemoryRaster, nir: InMemoryRaster) -> InMemoryRasterSource {
    let urls = bands(id);
    let mut source = InMemoryRasterSource::new();
    source.insert(&urls.red, red);
    source.insert(&urls.nir, nir);
    if let Some(blue) = &urls.blue {
        source.insert(blue, constant(0.05));
    }
    source
}

fn aoi() -> AreaOfInterest {
    AreaOfInterest::new(11.1, 44.1, 11.9, 44.9).unwrap()
}

#[test]
fn test_ndvi_over_window() {
    let _ = env_logger::builder().is_test(true).try_init();
    let source = Arc::new(source_with("a", constant(0.1), constant(0.5)));
    let engine = IndexEngine::without_cache(source);

    let result = engine
        .compute_index(IndexKind::Ndvi, &bands("a"), &aoi(), None)
        .expect("window intersects the raster");

    assert_eq!(result.raster.dim(), (4, 4));
    assert_abs_diff_eq!(result.mean, 0.4 / 0.6, epsilon = 1e-5);

    let coverage = result.coverage.unwrap();
    assert_eq!(coverage.valid_pixels, 16);
    assert_eq!(coverage.vegetated_pixels, 16);
    assert_abs_diff_eq!(coverage.vegetated_percent, 100.0, epsilon = 1e-9);
    assert_abs_diff_eq!(coverage.total_area_hectares, 16.0 * 900.0 / 10_000.0, epsilon = 1e-9);
}

#[test]
fn test_evi_uses_blue_band() {
    let source = Arc::new(source_with("a", constant(0.1), constant(0.5)));
    let engine = IndexEngine::without_cache(source);

    let result = engine
        .compute_index(IndexKind::Evi, &bands("a"), &aoi(), None)
        .unwrap();
    assert_abs_diff_eq!(result.mean, 1.0 / 1.725, epsilon = 1e-5);
    assert!(result.coverage.is_none());

    let mut no_blue = bands("a");
    no_blue.blue = None;
    assert!(engine
        .compute_index(IndexKind::Evi, &no_blue, &aoi(), None)
        .is_none());
}

#[test]
fn test_cache_hit_skips_reads() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(source_with("a", constant(0.1), constant(0.5)));
    let engine = IndexEngine::new(source.clone(), IndexCache::new(dir.path().to_path_buf()));

    let first = engine
        .compute_index(IndexKind::Ndvi, &bands("a"), &aoi(), None)
        .unwrap();
    let opens = source.open_count();
    assert_eq!(opens, 2);

    let second = engine
        .compute_index(IndexKind::Ndvi, &bands("a"), &aoi(), None)
        .unwrap();
    assert_eq!(source.open_count(), opens);
    assert_eq!(first.raster.valid(), second.raster.valid());
    assert_abs_diff_eq!(first.mean, second.mean, epsilon = 1e-12);

    let fp = IndexCache::fingerprint(IndexKind::Ndvi, &bands("a"), &aoi());
    assert!(engine.cache().unwrap().entry_path(IndexKind::Ndvi, &fp).exists());
}

#[test]
fn test_masked_cells_excluded_from_mean() {
    let mut red = constant(0.1);
    // Row/col 4 is the window origin for this AOI
    red.band.values[[4, 4]] = f32::NAN;
    red.band.valid[[4, 4]] = false;
    let mut nir = constant(0.5);
    nir.band.values[[5, 5]] = 0.9;

    let source = Arc::new(source_with("a", red, nir));
    let engine = IndexEngine::without_cache(source);
    let result = engine
        .compute_index(IndexKind::Ndvi, &bands("a"), &aoi(), None)
        .unwrap();

    assert_eq!(result.raster.valid_count(), 15);
    assert!(!result.raster.valid()[[0, 0]]);
    let expected = (14.0 * (0.4 / 0.6) + 0.8 / 1.0) / 15.0;
    assert_abs_diff_eq!(result.mean, expected, epsilon = 1e-5);
}

#[test]
fn test_disjoint_aoi_yields_nothing() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(source_with("a", constant(0.1), constant(0.5)));
    let engine = IndexEngine::new(source, IndexCache::new(dir.path().to_path_buf()));

    let far_away = AreaOfInterest::new(30.0, 10.0, 30.5, 10.5).unwrap();
    assert!(engine
        .compute_index(IndexKind::Ndvi, &bands("a"), &far_away, None)
        .is_none());
    assert!(!dir.path().join("NDVI").exists());
}

#[test]
fn test_band_shape_mismatch_yields_nothing() {
    let coarse = InMemoryRaster {
        grid: RasterGrid::new(SIZE / 2, SIZE / 2, [10.0, 0.5, 0.0, 46.0, 0.0, -0.5]),
        band: MaskedBand::from_values(Array2::from_elem((SIZE / 2, SIZE / 2), 0.5f32)),
    };
    let source = Arc::new(source_with("a", constant(0.1), coarse));
    let engine = IndexEngine::without_cache(source);
    assert!(engine
        .compute_index(IndexKind::Ndvi, &bands("a"), &aoi(), None)
        .is_none());
}

#[test]
fn test_missing_band_yields_nothing() {
    let engine = IndexEngine::without_cache(Arc::new(InMemoryRasterSource::new()));
    assert!(engine
        .compute_index(IndexKind::Ndvi, &bands("missing"), &aoi(), None)
        .is_none());
}
