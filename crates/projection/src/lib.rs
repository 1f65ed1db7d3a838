//! Projection support for the harmonization core.
//!
//! All internal distance and area computation happens in UTM meters; user
//! input arrives in WGS84 degrees. This crate provides the transverse
//! Mercator forward/inverse transforms for a single UTM zone.

mod utm;

pub use utm::{ProjectionError, RegionTile, UtmProjection};
