//! Pixel window resolution for an AOI over a georeferenced raster

use crate::core::aoi::AreaOfInterest;
use crate::types::MonitorResult;
use serde::{Deserialize, Serialize};

/// Points per AOI edge when densifying before reprojection
pub const DENSIFY_POINTS: usize = 21;

/// Extent and georeferencing of a raster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    pub width: usize,
    pub height: usize,
    /// GDAL order: [x_origin, pixel_width, rot_x, y_origin, rot_y, pixel_height]
    pub geo_transform: [f64; 6],
}

impl RasterGrid {
    pub fn new(width: usize, height: usize, geo_transform: [f64; 6]) -> Self {
        Self {
            width,
            height,
            geo_transform,
        }
    }

    /// (left, bottom, right, top) in the raster CRS
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let gt = &self.geo_transform;
        let x0 = gt[0];
        let x1 = gt[0] + self.width as f64 * gt[1];
        let y0 = gt[3];
        let y1 = gt[3] + self.height as f64 * gt[5];
        (x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    pub fn is_north_up(&self) -> bool {
        let gt = &self.geo_transform;
        gt[2] == 0.0 && gt[4] == 0.0 && gt[1] != 0.0 && gt[5] != 0.0
    }
}

/// Integer pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Maps geographic (lon, lat) coordinates into a raster CRS in place
pub trait CoordinateTransform {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> MonitorResult<()>;
}

/// For rasters already in geographic coordinates
pub struct IdentityTransform;

impl CoordinateTransform for IdentityTransform {
    fn transform(&self, _xs: &mut [f64], _ys: &mut [f64]) -> MonitorResult<()> {
        Ok(())
    }
}

/// Boundary of the AOI rectangle with `DENSIFY_POINTS` samples per edge
pub fn densify_bounds(bounds: [f64; 4]) -> (Vec<f64>, Vec<f64>) {
    let [min_x, min_y, max_x, max_y] = bounds;
    let corners = [
        (min_x, min_y),
        (max_x, min_y),
        (max_x, max_y),
        (min_x, max_y),
    ];

    let mut xs = Vec::with_capacity(4 * DENSIFY_POINTS);
    let mut ys = Vec::with_capacity(4 * DENSIFY_POINTS);
    let steps = (DENSIFY_POINTS - 1) as f64;

    for edge in 0..4 {
        let (ax, ay) = corners[edge];
        let (bx, by) = corners[(edge + 1) % 4];
        for i in 0..DENSIFY_POINTS {
            let t = i as f64 / steps;
            xs.push(ax + (bx - ax) * t);
            ys.push(ay + (by - ay) * t);
        }
    }
    (xs, ys)
}

/// Read window covering `aoi` on `grid`, or `None` when there is nothing to read
///
/// Reprojection failures and empty intersections both yield `None`.
pub fn resolve_window(
    grid: &RasterGrid,
    transform: &dyn CoordinateTransform,
    aoi: &AreaOfInterest,
) -> Option<PixelWindow> {
    if grid.width == 0 || grid.height == 0 {
        return None;
    }
    if !grid.is_north_up() {
        log::warn!("Rotated geotransform not supported: {:?}", grid.geo_transform);
        return None;
    }

    let (mut xs, mut ys) = densify_bounds(aoi.bounds());
    if let Err(e) = transform.transform(&mut xs, &mut ys) {
        log::warn!("AOI reprojection failed: {}", e);
        return None;
    }

    let mut left = f64::INFINITY;
    let mut right = f64::NEG_INFINITY;
    let mut bottom = f64::INFINITY;
    let mut top = f64::NEG_INFINITY;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        if x.is_finite() && y.is_finite() {
            left = left.min(x);
            right = right.max(x);
            bottom = bottom.min(y);
            top = top.max(y);
        }
    }
    if !(left.is_finite() && top.is_finite()) {
        log::debug!("AOI reprojected to no finite points");
        return None;
    }

    let (r_left, r_bottom, r_right, r_top) = grid.bounds();
    let left = left.max(r_left);
    let right = right.min(r_right);
    let bottom = bottom.max(r_bottom);
    let top = top.min(r_top);
    if !(left < right && bottom < top) {
        log::debug!("AOI does not intersect raster bounds");
        return None;
    }

    let gt = &grid.geo_transform;
    let col_a = (left - gt[0]) / gt[1];
    let col_b = (right - gt[0]) / gt[1];
    let row_a = (top - gt[3]) / gt[5];
    let row_b = (bottom - gt[3]) / gt[5];

    let col_start = col_a.min(col_b).floor().max(0.0) as usize;
    let col_end = (col_a.max(col_b).ceil() as usize).min(grid.width);
    let row_start = row_a.min(row_b).floor().max(0.0) as usize;
    let row_end = (row_a.max(row_b).ceil() as usize).min(grid.height);

    if col_end <= col_start || row_end <= row_start {
        return None;
    }

    Some(PixelWindow {
        col_off: col_start,
        row_off: row_start,
        width: col_end - col_start,
        height: row_end - row_start,
    })
}
