//! Geographic region model: validated WGS84 bounds and UTM zone selection.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Kilometers per degree of latitude (WGS84 mean).
const KM_PER_DEGREE: f64 = 111.32;

/// Precision used when comparing and keying bounds.
///
/// Bounds are quantized to 1e-5 degrees (~1 m) so that regions produced from
/// slightly different floating point paths still share cache entries.
const BOUNDS_QUANTUM: f64 = 1e-5;

/// A geographic region in WGS84 degrees.
///
/// Immutable after construction. Equality and hashing use bounds quantized
/// to [`BOUNDS_QUANTUM`], which also drives cache-key derivation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Region {
    lat_min: f64,
    lat_max: f64,
    lon_min: f64,
    lon_max: f64,
}

impl Region {
    /// Create a region from WGS84 bounds.
    ///
    /// Fails if any bound is outside its geographic range or if a min bound
    /// is not strictly below its max.
    pub fn from_bounds(
        lat_min: f64,
        lat_max: f64,
        lon_min: f64,
        lon_max: f64,
    ) -> Result<Self, RegionError> {
        for (field, value) in [("lat_min", lat_min), ("lat_max", lat_max)] {
            if !value.is_finite() || !(-90.0..=90.0).contains(&value) {
                return Err(RegionError::OutOfRange { field, value });
            }
        }
        for (field, value) in [("lon_min", lon_min), ("lon_max", lon_max)] {
            if !value.is_finite() || !(-180.0..=180.0).contains(&value) {
                return Err(RegionError::OutOfRange { field, value });
            }
        }
        if lat_min >= lat_max {
            return Err(RegionError::InvertedBounds {
                min_field: "lat_min",
                min: lat_min,
                max: lat_max,
            });
        }
        if lon_min >= lon_max {
            return Err(RegionError::InvertedBounds {
                min_field: "lon_min",
                min: lon_min,
                max: lon_max,
            });
        }

        Ok(Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        })
    }

    pub fn lat_min(&self) -> f64 {
        self.lat_min
    }

    pub fn lat_max(&self) -> f64 {
        self.lat_max
    }

    pub fn lon_min(&self) -> f64 {
        self.lon_min
    }

    pub fn lon_max(&self) -> f64 {
        self.lon_max
    }

    /// Center latitude of the region.
    pub fn centroid_lat(&self) -> f64 {
        (self.lat_min + self.lat_max) / 2.0
    }

    /// Center longitude of the region.
    pub fn centroid_lon(&self) -> f64 {
        (self.lon_min + self.lon_max) / 2.0
    }

    /// UTM zone number (1-60) covering the region centroid.
    pub fn utm_zone(&self) -> u32 {
        let zone = ((self.centroid_lon() + 180.0) / 6.0).floor() as i64 + 1;
        zone.clamp(1, 60) as u32
    }

    /// EPSG code for the UTM zone covering the region centroid.
    ///
    /// 326xx for the northern hemisphere, 327xx for the southern.
    pub fn utm_epsg(&self) -> u32 {
        let base = if self.centroid_lat() >= 0.0 {
            32600
        } else {
            32700
        };
        base + self.utm_zone()
    }

    /// UTM zone label such as `"15N"`.
    pub fn utm_zone_label(&self) -> String {
        let hemi = if self.centroid_lat() >= 0.0 { 'N' } else { 'S' };
        format!("{}{}", self.utm_zone(), hemi)
    }

    /// Approximate width in kilometers at the center latitude.
    pub fn width_km(&self) -> f64 {
        let km_per_deg = KM_PER_DEGREE * self.centroid_lat().to_radians().cos();
        (self.lon_max - self.lon_min) * km_per_deg
    }

    /// Approximate height in kilometers.
    pub fn height_km(&self) -> f64 {
        (self.lat_max - self.lat_min) * KM_PER_DEGREE
    }

    /// Approximate area in square kilometers.
    pub fn area_km2(&self) -> f64 {
        self.width_km() * self.height_km()
    }

    /// Quantized rendering of the bounds, used as the region component of
    /// cache keys.
    pub fn bounds_key(&self) -> String {
        format!(
            "{:.5}_{:.5}_{:.5}_{:.5}",
            self.lat_min, self.lat_max, self.lon_min, self.lon_max
        )
    }

    fn quantized(&self) -> [i64; 4] {
        [
            (self.lat_min / BOUNDS_QUANTUM).round() as i64,
            (self.lat_max / BOUNDS_QUANTUM).round() as i64,
            (self.lon_min / BOUNDS_QUANTUM).round() as i64,
            (self.lon_max / BOUNDS_QUANTUM).round() as i64,
        ]
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.quantized() == other.quantized()
    }
}

impl Eq for Region {}

impl Hash for Region {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.quantized().hash(state);
    }
}

/// An axis-aligned bounding box in projected UTM meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtmBbox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl UtmBbox {
    /// Width in meters.
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    /// Height in meters.
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    #[error("{field} = {value} is outside the valid geographic range")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("{min_field} ({min}) must be strictly less than its max bound ({max})")]
    InvertedBounds {
        min_field: &'static str,
        min: f64,
        max: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minneapolis() -> Region {
        Region::from_bounds(44.97, 44.99, -93.28, -93.25).unwrap()
    }

    #[test]
    fn test_rejects_out_of_range_latitude() {
        let err = Region::from_bounds(-91.0, 10.0, 0.0, 1.0).unwrap_err();
        assert!(err.to_string().contains("lat_min"));
    }

    #[test]
    fn test_rejects_inverted_longitude() {
        let err = Region::from_bounds(10.0, 20.0, 5.0, -5.0).unwrap_err();
        assert!(err.to_string().contains("lon_min"));
    }

    #[test]
    fn test_utm_epsg_minneapolis() {
        // Minneapolis is in UTM zone 15 north.
        assert_eq!(minneapolis().utm_epsg(), 32615);
        assert_eq!(minneapolis().utm_zone_label(), "15N");
    }

    #[test]
    fn test_utm_epsg_southern_hemisphere() {
        let sydney = Region::from_bounds(-34.0, -33.8, 151.1, 151.3).unwrap();
        assert_eq!(sydney.utm_epsg(), 32756);
        assert_eq!(sydney.utm_zone_label(), "56S");
    }

    #[test]
    fn test_utm_epsg_is_pure_function_of_centroid() {
        // Regions of different extents with the same centroid select the
        // same zone.
        let wide = Region::from_bounds(44.0, 46.0, -94.0, -92.5).unwrap();
        let narrow = Region::from_bounds(44.9, 45.1, -93.3, -93.2).unwrap();
        assert_eq!(wide.utm_epsg(), narrow.utm_epsg());
    }

    #[test]
    fn test_area_roughly_matches_extent() {
        let r = minneapolis();
        // ~2.2 km tall, ~2.4 km wide at 45 degrees north.
        assert!(r.height_km() > 2.0 && r.height_km() < 2.5);
        assert!(r.width_km() > 2.0 && r.width_km() < 2.7);
        assert!(r.area_km2() > 4.0 && r.area_km2() < 7.0);
    }

    #[test]
    fn test_serde_roundtrip() {
        let r = minneapolis();
        let json = serde_json::to_string(&r).unwrap();
        let back: Region = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn test_equality_ignores_sub_quantum_noise() {
        let a = Region::from_bounds(44.97, 44.99, -93.28, -93.25).unwrap();
        let b = Region::from_bounds(44.970000001, 44.99, -93.28, -93.25).unwrap();
        assert_eq!(a, b);

        let c = Region::from_bounds(44.971, 44.99, -93.28, -93.25).unwrap();
        assert_ne!(a, c);
    }
}
