//! Grid harmonization: fuses per-provider fetch results into one
//! spatially aligned, attribute-rich named-layer grid with a per-cell
//! data-quality score.

mod harmonizer;
mod quality;

pub use harmonizer::{
    compute_grid_spec, harmonize, HarmonizeError, HarmonizedGrid, Harmonizer,
};
pub use quality::quality_layer;
