//! Canonical layer names for the harmonized output grid.

/// Harmonized elevation in meters.
pub const ELEVATION: &str = "elevation";

/// 64-band satellite embedding stack.
pub const EMBEDDING: &str = "embedding";

/// Distance to the nearest road in meters.
pub const ROAD_DISTANCE: &str = "road_distance";

/// Distance to the nearest waterway in meters.
pub const WATER_DISTANCE: &str = "water_distance";

/// Binary building occupancy (1.0 inside a footprint).
pub const BUILDING_MASK: &str = "building_mask";

/// Building height in meters; 0.0 outside footprints and where no height
/// tag was available - `building_mask` is the validity signal.
pub const BUILDING_HEIGHT: &str = "building_height";

/// Land-use category id raster.
pub const LANDUSE: &str = "landuse";

/// Natural-feature category id raster.
pub const NATURAL: &str = "natural";

/// Mosaic of caller-supplied local rasters.
pub const LOCAL: &str = "local";

/// Terrain slope in degrees.
pub const SLOPE: &str = "slope";

/// Terrain aspect in degrees, `[0, 360)`.
pub const ASPECT: &str = "aspect";

/// Discrete Laplacian curvature of elevation.
pub const CURVATURE: &str = "curvature";

/// Local-window standard deviation of elevation.
pub const ROUGHNESS: &str = "roughness";

/// Topographic Position Index.
pub const TPI: &str = "tpi";

/// Topographic Wetness Index.
pub const TWI: &str = "twi";

/// Per-cell data-quality score in `[0, 1]`.
pub const QUALITY: &str = "quality";

/// Number of bands in the embedding stack.
pub const EMBEDDING_BANDS: usize = 64;
