//! Grid processing kernels: source-raster resampling onto a master grid,
//! vector feature rasterization, and the Euclidean distance transform.

pub mod distance;
pub mod rasterize;
pub mod resample;

pub use distance::distance_transform;
pub use rasterize::{burn_polyline, fill_polygon};
pub use resample::{resample_to_spec, sample_bilinear, sample_nearest, threshold_mask, RasterGeo};
