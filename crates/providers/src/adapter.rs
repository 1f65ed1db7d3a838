//! The provider adapter capability set.

use crate::elevation::TileCoord;
use async_trait::async_trait;
use geofuse_common::{BandedGrid, FailureKind, Grid2, GridSpec, ProviderKind, Region};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Tagged outcome of a provider fetch.
///
/// Never an error escaping the adapter boundary: network and remote-service
/// failures arrive here as [`FetchResult::Failure`].
#[derive(Debug)]
pub enum FetchResult {
    /// The provider produced an artifact for the region.
    Success(Artifact),
    /// The region is legitimately empty for this provider (open ocean with
    /// no roads, a gap in source coverage).
    NoData,
    /// The fetch failed; downstream quality degrades instead of aborting.
    Failure(FailureKind, String),
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success(_))
    }
}

/// Raw fetched data, before resampling onto the master grid.
#[derive(Debug)]
pub enum Artifact {
    /// Cached elevation tiles covering the region. A slot without a path is
    /// outside the source's coverage.
    ElevationTiles(Vec<TileSlot>),
    /// Cached band-major embedding container.
    EmbeddingFile(PathBuf),
    /// Cached raw vector query response (JSON).
    VectorFile(PathBuf),
    /// Caller-supplied raster files overlapping the region.
    LocalRasters(Vec<PathBuf>),
}

/// One slippy-map tile slot in an elevation artifact.
#[derive(Debug, Clone)]
pub struct TileSlot {
    pub coord: TileCoord,
    /// `None` when the source has no tile here (coverage edge).
    pub path: Option<PathBuf>,
}

/// A named layer produced by resampling.
#[derive(Debug, Clone)]
pub enum LayerData {
    Single(Grid2),
    Banded(BandedGrid),
}

impl LayerData {
    /// Whether the layer conforms to the grid spec's `(rows, cols)` (or
    /// `(bands, rows, cols)` for banded layers).
    pub fn shape_matches(&self, spec: &GridSpec) -> bool {
        match self {
            LayerData::Single(g) => g.shape() == (spec.rows, spec.cols),
            LayerData::Banded(g) => {
                let (_, rows, cols) = g.shape();
                (rows, cols) == (spec.rows, spec.cols)
            }
        }
    }
}

/// Named layers keyed for the harmonizer's layer collection.
pub type LayerSet = BTreeMap<String, LayerData>;

/// Internal adapter errors surfaced to the harmonizer.
///
/// These indicate a broken artifact or a contract violation, not a remote
/// failure; remote failures are already folded into [`FetchResult`].
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("artifact does not belong to the {0} provider")]
    WrongArtifact(ProviderKind),

    #[error("failed to decode artifact: {0}")]
    Decode(String),

    #[error(transparent)]
    Projection(#[from] projection::ProjectionError),

    #[error(transparent)]
    Cache(#[from] storage::CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability set shared by every data provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which source category this adapter serves.
    fn kind(&self) -> ProviderKind;

    /// Whether the externally supplied credentials allow fetching.
    fn validate_credentials(&self) -> bool;

    /// Deterministic cache key for the request parameters. Identical
    /// inputs always produce identical keys; any parameter difference
    /// (bounds, resolution, year) produces a distinct key.
    fn cache_key(&self, region: &Region, resolution: f64) -> String;

    /// Fetch data for the region, consulting the cache first. All remote
    /// failures are folded into the returned [`FetchResult`].
    async fn fetch(&self, region: &Region, resolution: f64) -> FetchResult;

    /// Resample a fetched artifact onto the master grid.
    fn resample_to_grid(
        &self,
        artifact: &Artifact,
        spec: &GridSpec,
    ) -> Result<LayerSet, ProviderError>;

    /// Correctly shaped substitute layers for a fetch that produced no
    /// data, so downstream code always receives usable arrays.
    fn fallback_layers(&self, spec: &GridSpec) -> LayerSet;
}
