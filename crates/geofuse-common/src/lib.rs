//! Common types and utilities shared across all geofuse crates.

pub mod config;
pub mod error;
pub mod grid;
pub mod layer;
pub mod region;
pub mod source;

pub use config::{
    Credentials, ElevationConfig, EmbeddingConfig, FusionConfig, RetryConfig, VectorConfig,
};
pub use error::FailureKind;
pub use grid::{BandedGrid, Grid2, GridSpec, ResampleMethod};
pub use region::{Region, RegionError, UtmBbox};
pub use source::{ProviderKind, SourceStatus};
