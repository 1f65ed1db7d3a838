//! Transverse Mercator projection for a single UTM zone.
//!
//! Implements the standard series expansion on the WGS84 ellipsoid
//! (Snyder, "Map Projections - A Working Manual", eqs. 8-9 through 8-25).
//! Accuracy is better than a centimeter anywhere inside a zone, which is far
//! below the cell sizes this core works at.

use geofuse_common::{Region, RegionError, UtmBbox};

/// WGS84 semi-major axis in meters.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// UTM central meridian scale factor.
const K0: f64 = 0.9996;
/// UTM false easting in meters.
const FALSE_EASTING: f64 = 500_000.0;
/// UTM false northing for the southern hemisphere.
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Transverse Mercator transform for one UTM zone.
#[derive(Debug, Clone)]
pub struct UtmProjection {
    epsg: u32,
    north: bool,
    /// Central meridian in radians.
    lon0: f64,
    /// First eccentricity squared.
    e2: f64,
    /// Second eccentricity squared.
    ep2: f64,
    /// e1 constant for the inverse meridian-arc series.
    e1: f64,
}

impl UtmProjection {
    /// Build the projection for a UTM EPSG code (326xx north, 327xx south).
    pub fn for_epsg(epsg: u32) -> Result<Self, ProjectionError> {
        let (north, zone) = match epsg {
            32601..=32660 => (true, epsg - 32600),
            32701..=32760 => (false, epsg - 32700),
            other => return Err(ProjectionError::UnsupportedEpsg(other)),
        };

        let lon0 = ((zone as f64) * 6.0 - 183.0).to_radians();
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let ep2 = e2 / (1.0 - e2);
        let sqrt_1me2 = (1.0 - e2).sqrt();
        let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);

        Ok(Self {
            epsg,
            north,
            lon0,
            e2,
            ep2,
            e1,
        })
    }

    /// Build the projection for the UTM zone covering a region's centroid.
    pub fn for_region(region: &Region) -> Self {
        // Region::utm_epsg always yields a valid 326xx/327xx code.
        Self::for_epsg(region.utm_epsg()).expect("region produced an invalid UTM EPSG")
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Project WGS84 degrees to UTM `(easting, northing)` meters.
    pub fn forward(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let lat = lat_deg.to_radians();
        let lon = lon_deg.to_radians();

        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let tan_lat = lat.tan();

        let n = WGS84_A / (1.0 - self.e2 * sin_lat * sin_lat).sqrt();
        let t = tan_lat * tan_lat;
        let c = self.ep2 * cos_lat * cos_lat;
        let a = (lon - self.lon0) * cos_lat;

        let m = self.meridian_arc(lat);

        let a2 = a * a;
        let a3 = a2 * a;
        let a4 = a3 * a;
        let a5 = a4 * a;
        let a6 = a5 * a;

        let x = K0
            * n
            * (a + (1.0 - t + c) * a3 / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * self.ep2) * a5 / 120.0)
            + FALSE_EASTING;

        let mut y = K0
            * (m + n
                * tan_lat
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * self.ep2) * a6 / 720.0));

        if !self.north {
            y += FALSE_NORTHING_SOUTH;
        }

        (x, y)
    }

    /// Unproject UTM meters back to WGS84 `(lat, lon)` degrees.
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let x = easting - FALSE_EASTING;
        let y = if self.north {
            northing
        } else {
            northing - FALSE_NORTHING_SOUTH
        };

        let m = y / K0;
        let mu = m
            / (WGS84_A
                * (1.0 - self.e2 / 4.0 - 3.0 * self.e2 * self.e2 / 64.0
                    - 5.0 * self.e2 * self.e2 * self.e2 / 256.0));

        let e1 = self.e1;
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let sin_phi1 = phi1.sin();
        let cos_phi1 = phi1.cos();
        let tan_phi1 = phi1.tan();

        let c1 = self.ep2 * cos_phi1 * cos_phi1;
        let t1 = tan_phi1 * tan_phi1;
        let denom = 1.0 - self.e2 * sin_phi1 * sin_phi1;
        let n1 = WGS84_A / denom.sqrt();
        let r1 = WGS84_A * (1.0 - self.e2) / denom.powf(1.5);
        let d = x / (n1 * K0);

        let d2 = d * d;
        let d3 = d2 * d;
        let d4 = d3 * d;
        let d5 = d4 * d;
        let d6 = d5 * d;

        let lat = phi1
            - (n1 * tan_phi1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * self.ep2) * d4 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                        - 252.0 * self.ep2
                        - 3.0 * c1 * c1)
                        * d6
                        / 720.0);

        let lon = self.lon0
            + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * self.ep2 + 24.0 * t1 * t1)
                    * d5
                    / 120.0)
                / cos_phi1;

        (lat.to_degrees(), lon.to_degrees())
    }

    /// UTM bounding box of a region: min/max over all four projected corners.
    pub fn utm_bbox(&self, region: &Region) -> UtmBbox {
        let corners = [
            self.forward(region.lat_min(), region.lon_min()),
            self.forward(region.lat_min(), region.lon_max()),
            self.forward(region.lat_max(), region.lon_min()),
            self.forward(region.lat_max(), region.lon_max()),
        ];

        let mut bbox = UtmBbox {
            x_min: f64::INFINITY,
            y_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_max: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bbox.x_min = bbox.x_min.min(x);
            bbox.y_min = bbox.y_min.min(y);
            bbox.x_max = bbox.x_max.max(x);
            bbox.y_max = bbox.y_max.max(y);
        }
        bbox
    }

    /// Subdivide a region into `tile_size_m` UTM squares.
    ///
    /// Tiles the region's UTM bbox from the southwest corner, clipping the
    /// last row and column to the parent extent; neighbors share edges and
    /// the union of the tiles equals the parent bbox exactly. Indices are
    /// `(tile_x, tile_y)` row-major from the southwest.
    pub fn subdivide(
        &self,
        region: &Region,
        tile_size_m: f64,
    ) -> Result<Vec<RegionTile>, ProjectionError> {
        if !(tile_size_m.is_finite() && tile_size_m > 0.0) {
            return Err(ProjectionError::InvalidTileSize(tile_size_m));
        }

        let bbox = self.utm_bbox(region);
        let nx = (bbox.width() / tile_size_m).ceil().max(1.0) as usize;
        let ny = (bbox.height() / tile_size_m).ceil().max(1.0) as usize;

        let mut tiles = Vec::with_capacity(nx * ny);
        for ty in 0..ny {
            let y0 = bbox.y_min + ty as f64 * tile_size_m;
            let y1 = (y0 + tile_size_m).min(bbox.y_max);
            for tx in 0..nx {
                let x0 = bbox.x_min + tx as f64 * tile_size_m;
                let x1 = (x0 + tile_size_m).min(bbox.x_max);

                let utm = UtmBbox {
                    x_min: x0,
                    y_min: y0,
                    x_max: x1,
                    y_max: y1,
                };
                let region = self.bbox_to_region(&utm)?;
                tiles.push(RegionTile {
                    tile_x: tx,
                    tile_y: ty,
                    utm,
                    region,
                });
            }
        }
        Ok(tiles)
    }

    /// Geographic bbox of a UTM rectangle: min/max over unprojected corners.
    fn bbox_to_region(&self, utm: &UtmBbox) -> Result<Region, ProjectionError> {
        let corners = [
            self.inverse(utm.x_min, utm.y_min),
            self.inverse(utm.x_max, utm.y_min),
            self.inverse(utm.x_min, utm.y_max),
            self.inverse(utm.x_max, utm.y_max),
        ];

        let mut lat_min = f64::INFINITY;
        let mut lat_max = f64::NEG_INFINITY;
        let mut lon_min = f64::INFINITY;
        let mut lon_max = f64::NEG_INFINITY;
        for (lat, lon) in corners {
            lat_min = lat_min.min(lat);
            lat_max = lat_max.max(lat);
            lon_min = lon_min.min(lon);
            lon_max = lon_max.max(lon);
        }

        Region::from_bounds(
            lat_min.clamp(-90.0, 90.0),
            lat_max.clamp(-90.0, 90.0),
            lon_min.clamp(-180.0, 180.0),
            lon_max.clamp(-180.0, 180.0),
        )
        .map_err(ProjectionError::DegenerateTile)
    }

    /// Meridian arc length from the equator to `lat` (radians).
    fn meridian_arc(&self, lat: f64) -> f64 {
        let e2 = self.e2;
        let e4 = e2 * e2;
        let e6 = e4 * e2;

        WGS84_A
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
    }
}

/// One tile of a subdivided region.
#[derive(Debug, Clone)]
pub struct RegionTile {
    /// Column index from the west edge.
    pub tile_x: usize,
    /// Row index from the south edge.
    pub tile_y: usize,
    /// Exact tile extent in UTM meters.
    pub utm: UtmBbox,
    /// Geographic bbox covering the tile.
    pub region: Region,
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("EPSG:{0} is not a UTM code (expected 326xx or 327xx)")]
    UnsupportedEpsg(u32),

    #[error("tile size must be a positive number of meters, got {0}")]
    InvalidTileSize(f64),

    #[error("subdivision produced a degenerate tile: {0}")]
    DegenerateTile(#[source] RegionError),
}
