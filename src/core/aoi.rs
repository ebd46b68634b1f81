//! Area-of-interest validation and geometry handling

use crate::core::fingerprint::round6;
use crate::types::{MonitorError, MonitorResult};
use geo::{BooleanOps, BoundingRect, Centroid, Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;

/// Centre of the default monitoring region (lon, lat)
pub const DEFAULT_CENTER: (f64, f64) = (-122.0926, 47.6046);
/// Half-width of the default region in degrees
pub const DEFAULT_HALF_WIDTH_DEG: f64 = 0.055;

const KM_PER_DEGREE: f64 = 111.0;

/// Normalized geographic bounding box with optional polygon geometry
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
    geometry: Option<MultiPolygon<f64>>,
}

impl AreaOfInterest {
    /// Build from corner coordinates in any order
    pub fn new(lon_a: f64, lat_a: f64, lon_b: f64, lat_b: f64) -> MonitorResult<Self> {
        let [min_lon, min_lat, max_lon, max_lat] = normalize_bbox([lon_a, lat_a, lon_b, lat_b])?;
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
            geometry: None,
        })
    }

    pub fn from_bounds(bounds: [f64; 4]) -> MonitorResult<Self> {
        Self::new(bounds[0], bounds[1], bounds[2], bounds[3])
    }

    /// Square-ish box of `radius_km` around a centre point
    pub fn from_center_radius(lon: f64, lat: f64, radius_km: f64) -> MonitorResult<Self> {
        if !(radius_km.is_finite() && radius_km > 0.0) {
            return Err(MonitorError::InvalidAoi(format!(
                "radius must be positive, got {}",
                radius_km
            )));
        }
        let lat_offset = radius_km / KM_PER_DEGREE;
        let cos_lat = lat.to_radians().cos().abs().max(1e-6);
        let lon_offset = radius_km / (KM_PER_DEGREE * cos_lat);
        Self::new(
            lon - lon_offset,
            lat - lat_offset,
            lon + lon_offset,
            lat + lat_offset,
        )
    }

    /// Default monitoring region
    pub fn default_region() -> MonitorResult<Self> {
        let (lon, lat) = DEFAULT_CENTER;
        Self::new(
            lon - DEFAULT_HALF_WIDTH_DEG,
            lat - DEFAULT_HALF_WIDTH_DEG,
            lon + DEFAULT_HALF_WIDTH_DEG,
            lat + DEFAULT_HALF_WIDTH_DEG,
        )
    }

    /// Derive the AOI from a GeoJSON Polygon, MultiPolygon, GeometryCollection,
    /// Feature or FeatureCollection. Multiple polygons are unioned.
    pub fn from_geojson(value: &Value) -> MonitorResult<Self> {
        let mut polygons = Vec::new();
        collect_polygons(value, &mut polygons)?;

        let mut parts = polygons.into_iter();
        let first = parts
            .next()
            .ok_or_else(|| MonitorError::InvalidGeometry("no polygons found".to_string()))?;

        let mut merged = MultiPolygon::new(vec![first]);
        for polygon in parts {
            merged = merged.union(&MultiPolygon::new(vec![polygon]));
        }

        let rect = merged
            .bounding_rect()
            .ok_or_else(|| MonitorError::InvalidGeometry("geometry has no extent".to_string()))?;

        let mut aoi = Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)?;
        log::debug!(
            "Resolved AOI from {} polygon(s): {:?}",
            merged.0.len(),
            aoi.bounds()
        );
        aoi.geometry = Some(merged);
        Ok(aoi)
    }

    pub fn from_geojson_str(text: &str) -> MonitorResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| MonitorError::InvalidGeometry(format!("not valid JSON: {}", e)))?;
        Self::from_geojson(&value)
    }

    /// Re-validate; normalizing a normalized AOI returns it unchanged
    pub fn normalize(&self) -> MonitorResult<Self> {
        let mut aoi = Self::from_bounds(self.bounds())?;
        aoi.geometry = self.geometry.clone();
        Ok(aoi)
    }

    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub fn bounds(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    /// Bounds rounded to 1e-6 degree, used in cache keys
    pub fn rounded_bounds(&self) -> [f64; 4] {
        self.bounds().map(round6)
    }

    pub fn geometry(&self) -> Option<&MultiPolygon<f64>> {
        self.geometry.as_ref()
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Centroid as (lon, lat); bbox midpoint when there is no usable geometry
    pub fn centroid(&self) -> (f64, f64) {
        if let Some(point) = self.geometry.as_ref().and_then(|g| g.centroid()) {
            return (point.x(), point.y());
        }
        (
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }
}

/// Sort per axis and validate ranges and area
pub fn normalize_bbox(bbox: [f64; 4]) -> MonitorResult<[f64; 4]> {
    if bbox.iter().any(|v| !v.is_finite()) {
        return Err(MonitorError::InvalidAoi(format!(
            "coordinates must be finite: {:?}",
            bbox
        )));
    }

    let min_lon = bbox[0].min(bbox[2]);
    let max_lon = bbox[0].max(bbox[2]);
    let min_lat = bbox[1].min(bbox[3]);
    let max_lat = bbox[1].max(bbox[3]);

    if min_lon < -180.0 || max_lon > 180.0 {
        return Err(MonitorError::InvalidAoi(format!(
            "longitude out of range [-180, 180]: {} .. {}",
            min_lon, max_lon
        )));
    }
    if min_lat < -90.0 || max_lat > 90.0 {
        return Err(MonitorError::InvalidAoi(format!(
            "latitude out of range [-90, 90]: {} .. {}",
            min_lat, max_lat
        )));
    }
    if min_lon == max_lon || min_lat == max_lat {
        return Err(MonitorError::InvalidAoi(
            "bounding box has zero area".to_string(),
        ));
    }

    Ok([min_lon, min_lat, max_lon, max_lat])
}

fn collect_polygons(value: &Value, out: &mut Vec<Polygon<f64>>) -> MonitorResult<()> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| MonitorError::InvalidGeometry("missing \"type\" member".to_string()))?;

    match kind {
        "Polygon" => out.push(parse_polygon(coordinates(value)?)?),
        "MultiPolygon" => {
            let polys = as_array(coordinates(value)?, "MultiPolygon coordinates")?;
            for poly in polys {
                out.push(parse_polygon(poly)?);
            }
        }
        "GeometryCollection" => {
            let geometries = value
                .get("geometries")
                .ok_or_else(|| MonitorError::InvalidGeometry("missing geometries".to_string()))?;
            for geometry in as_array(geometries, "geometries")? {
                collect_polygons(geometry, out)?;
            }
        }
        "Feature" => {
            let geometry = value
                .get("geometry")
                .filter(|g| !g.is_null())
                .ok_or_else(|| MonitorError::InvalidGeometry("feature without geometry".to_string()))?;
            collect_polygons(geometry, out)?;
        }
        "FeatureCollection" => {
            let features = value
                .get("features")
                .ok_or_else(|| MonitorError::InvalidGeometry("missing features".to_string()))?;
            for feature in as_array(features, "features")? {
                collect_polygons(feature, out)?;
            }
        }
        other => {
            return Err(MonitorError::InvalidGeometry(format!(
                "unsupported geometry type: {}",
                other
            )))
        }
    }
    Ok(())
}

fn coordinates(value: &Value) -> MonitorResult<&Value> {
    value
        .get("coordinates")
        .ok_or_else(|| MonitorError::InvalidGeometry("missing coordinates".to_string()))
}

fn as_array<'a>(value: &'a Value, what: &str) -> MonitorResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| MonitorError::InvalidGeometry(format!("{} must be an array", what)))
}

fn parse_polygon(value: &Value) -> MonitorResult<Polygon<f64>> {
    let rings = as_array(value, "polygon rings")?;
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings
        .next()
        .ok_or_else(|| MonitorError::InvalidGeometry("polygon has no rings".to_string()))??;
    let interiors = rings.collect::<MonitorResult<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_ring(value: &Value) -> MonitorResult<LineString<f64>> {
    let positions = as_array(value, "ring")?;
    if positions.len() < 3 {
        return Err(MonitorError::InvalidGeometry(format!(
            "ring needs at least 3 positions, got {}",
            positions.len()
        )));
    }

    let coords = positions
        .iter()
        .map(|pos| {
            let pair = pos.as_array().filter(|p| p.len() >= 2);
            match pair.map(|p| (p[0].as_f64(), p[1].as_f64())) {
                Some((Some(x), Some(y))) => Ok(Coord { x, y }),
                _ => Err(MonitorError::InvalidGeometry(format!(
                    "invalid position: {}",
                    pos
                ))),
            }
        })
        .collect::<MonitorResult<Vec<_>>>()?;

    Ok(LineString::new(coords))
}
