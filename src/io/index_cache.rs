//! Content-addressable on-disk cache of computed index rasters

use crate::core::aoi::AreaOfInterest;
use crate::core::fingerprint::{fingerprint, SCHEMA_VERSION};
use crate::core::index::IndexRaster;
use crate::types::{BandUrls, IndexKind, MonitorError, MonitorResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct StoredIndex {
    schema: String,
    kind: IndexKind,
    rows: usize,
    cols: usize,
    /// Invalid cells stored as 0
    values: Vec<f32>,
    valid: Vec<bool>,
    mean: f64,
}

/// Index cache rooted at `cache_dir/<KIND>/<fingerprint>.json.gz`
///
/// No expiry: the value for a given (bands, AOI) pair never changes, so
/// entries are only invalidated by a schema version bump.
#[derive(Debug, Clone)]
pub struct IndexCache {
    cache_dir: PathBuf,
}

impl IndexCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Key over the index kind, band URLs, rounded AOI and schema version
    pub fn fingerprint(kind: IndexKind, bands: &BandUrls, aoi: &AreaOfInterest) -> String {
        fingerprint(&json!({
            "index": kind.as_str(),
            "red": bands.red,
            "nir": bands.nir,
            "blue": bands.blue,
            "bbox": aoi.rounded_bounds(),
            "version": SCHEMA_VERSION,
        }))
    }

    pub fn entry_path(&self, kind: IndexKind, fingerprint: &str) -> PathBuf {
        self.cache_dir
            .join(kind.as_str())
            .join(format!("{}.json.gz", fingerprint))
    }

    /// Cached raster, or `None` on a miss
    ///
    /// Unreadable or inconsistent entries are deleted and reported as misses.
    pub fn get(&self, kind: IndexKind, fingerprint: &str) -> Option<IndexRaster> {
        let path = self.entry_path(kind, fingerprint);
        if !path.exists() {
            return None;
        }

        match Self::load(&path, kind) {
            Ok(raster) => Some(raster),
            Err(e) => {
                log::warn!("Discarding cached {} entry {}: {}", kind, path.display(), e);
                if let Err(e) = std::fs::remove_file(&path) {
                    log::debug!("Could not remove {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    fn load(path: &Path, kind: IndexKind) -> MonitorResult<IndexRaster> {
        let file = File::open(path)?;
        let stored: StoredIndex = serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?;

        if stored.schema != SCHEMA_VERSION || stored.kind != kind {
            return Err(MonitorError::CacheIo(format!(
                "schema {} / kind {} does not match",
                stored.schema, stored.kind
            )));
        }

        let shape = (stored.rows, stored.cols);
        let values = Array2::from_shape_vec(shape, stored.values)
            .map_err(|e| MonitorError::CacheIo(format!("bad value shape: {}", e)))?;
        let valid = Array2::from_shape_vec(shape, stored.valid)
            .map_err(|e| MonitorError::CacheIo(format!("bad mask shape: {}", e)))?;
        let raster = IndexRaster::new(kind, values, valid)?;

        let mean = raster
            .mean()
            .ok_or_else(|| MonitorError::CacheIo("entry has no valid cells".to_string()))?;
        let tolerance = 1e-9 * stored.mean.abs().max(1.0);
        if (mean - stored.mean).abs() > tolerance {
            return Err(MonitorError::CacheIo(format!(
                "stored mean {} disagrees with cells ({})",
                stored.mean, mean
            )));
        }

        Ok(raster)
    }

    /// Persist a raster; rasters without valid cells are refused
    pub fn put(&self, fingerprint: &str, raster: &IndexRaster, mean: f64) -> MonitorResult<PathBuf> {
        if raster.valid_count() == 0 {
            return Err(MonitorError::CacheIo(
                "refusing to cache a raster without valid cells".to_string(),
            ));
        }

        let kind = raster.kind();
        let (rows, cols) = raster.dim();
        let stored = StoredIndex {
            schema: SCHEMA_VERSION.to_string(),
            kind,
            rows,
            cols,
            values: raster
                .values()
                .iter()
                .zip(raster.valid().iter())
                .map(|(&v, &ok)| if ok { v } else { 0.0 })
                .collect(),
            valid: raster.valid().iter().copied().collect(),
            mean,
        };

        let path = self.entry_path(kind, fingerprint);
        let dir = path
            .parent()
            .ok_or_else(|| MonitorError::CacheIo(format!("no parent for {}", path.display())))?;
        std::fs::create_dir_all(dir)?;

        // Write-then-rename keeps concurrent writers of the same key from
        // exposing a partial file.
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        let mut encoder = GzEncoder::new(tmp, Compression::default());
        serde_json::to_writer(&mut encoder, &stored)?;
        let mut tmp = encoder.finish()?;
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|e| MonitorError::CacheIo(format!("persist {}: {}", path.display(), e)))?;

        log::debug!("Cached {} raster ({}x{}) at {}", kind, rows, cols, path.display());
        Ok(path)
    }
}
