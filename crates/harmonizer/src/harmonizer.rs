//! The harmonization engine.
//!
//! Computes the master grid from a region and requested resolution,
//! classifies provider fetch outcomes, resamples artifacts onto the grid,
//! merges named layers, derives terrain attributes, and scores per-cell
//! data quality. One source failing never aborts the request; only
//! internal contract violations (shape mismatches, invalid construction)
//! raise.

use crate::quality::quality_layer;
use geofuse_common::{layer, GridSpec, ProviderKind, Region, SourceStatus};
use projection::UtmProjection;
use providers::{
    fetch_all, FetchResult, LayerData, LayerSet, ProviderAdapter, ProviderOutcome,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Compute the master grid for a region at the requested resolution.
///
/// The requested resolution is used directly: the grid origin is the
/// region's UTM southwest corner and `rows`/`cols` are the ceiling of the
/// UTM extent over the resolution.
pub fn compute_grid_spec(region: &Region, resolution: f64) -> Result<GridSpec, HarmonizeError> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(HarmonizeError::InvalidResolution(resolution));
    }

    let proj = UtmProjection::for_region(region);
    let bbox = proj.utm_bbox(region);
    Ok(GridSpec {
        origin_x: bbox.x_min,
        origin_y: bbox.y_min,
        cell_size: resolution,
        rows: (bbox.height() / resolution).ceil().max(1.0) as usize,
        cols: (bbox.width() / resolution).ceil().max(1.0) as usize,
        epsg: proj.epsg(),
    })
}

/// The complete harmonized output handed to the presentation layer.
#[derive(Debug)]
pub struct HarmonizedGrid {
    pub spec: GridSpec,
    pub layers: BTreeMap<String, LayerData>,
    pub status: BTreeMap<ProviderKind, SourceStatus>,
}

impl HarmonizedGrid {
    pub fn layer(&self, name: &str) -> Option<&LayerData> {
        self.layers.get(name)
    }
}

/// Orchestrates resampling and alignment of the data streams.
pub struct Harmonizer {
    spec: GridSpec,
    layers: BTreeMap<String, LayerData>,
    presence: BTreeMap<ProviderKind, Vec<bool>>,
    status: BTreeMap<ProviderKind, SourceStatus>,
}

impl Harmonizer {
    pub fn new(region: &Region, resolution: f64) -> Result<Self, HarmonizeError> {
        Ok(Self::from_spec(compute_grid_spec(region, resolution)?))
    }

    pub fn from_spec(spec: GridSpec) -> Self {
        Self {
            spec,
            layers: BTreeMap::new(),
            presence: BTreeMap::new(),
            status: BTreeMap::new(),
        }
    }

    pub fn grid_spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn layer(&self, name: &str) -> Option<&LayerData> {
        self.layers.get(name)
    }

    /// Classify one provider's fetch outcome and merge its layers.
    ///
    /// On success the adapter resamples its artifact onto the grid; on
    /// no-data or failure the adapter's fallback layers keep the layer set
    /// complete and correctly shaped, with degraded quality where data is
    /// missing. Resample errors degrade to an error status; only a shape
    /// mismatch (an adapter contract violation) raises.
    pub fn process_fetch_result(
        &mut self,
        adapter: &dyn ProviderAdapter,
        result: &FetchResult,
    ) -> Result<SourceStatus, HarmonizeError> {
        let kind = adapter.kind();
        let (mut layers, status) = match result {
            FetchResult::Success(artifact) => {
                match adapter.resample_to_grid(artifact, &self.spec) {
                    Ok(layers) => (layers, SourceStatus::Ok),
                    Err(e) => {
                        error!(provider = %kind, error = %e, "resample failed, using fallback");
                        (
                            adapter.fallback_layers(&self.spec),
                            SourceStatus::Error(format!("resample failed: {}", e)),
                        )
                    }
                }
            }
            FetchResult::NoData => {
                debug!(provider = %kind, "no data for region");
                (adapter.fallback_layers(&self.spec), SourceStatus::NoData)
            }
            FetchResult::Failure(fail_kind, reason) => {
                warn!(provider = %kind, kind = ?fail_kind, %reason, "fetch failed");
                (
                    adapter.fallback_layers(&self.spec),
                    SourceStatus::Error(reason.clone()),
                )
            }
        };

        let presence = if status.is_ok() {
            self.presence_and_sanitize(&mut layers)
        } else {
            vec![false; self.spec.len()]
        };

        self.add_layers(layers)?;
        self.presence.insert(kind, presence);
        self.status.insert(kind, status.clone());
        Ok(status)
    }

    /// Per-cell presence from the finiteness of single-band layers; holes
    /// are zero-filled afterwards so downstream math stays finite.
    fn presence_and_sanitize(&self, layers: &mut LayerSet) -> Vec<bool> {
        let mut presence = vec![true; self.spec.len()];
        for data in layers.values_mut() {
            if let LayerData::Single(grid) = data {
                for (p, ok) in presence.iter_mut().zip(grid.finite_mask()) {
                    *p &= ok;
                }
                grid.fill_non_finite(0.0);
            }
        }
        presence
    }

    /// Add named layers, each required to match the grid spec exactly.
    ///
    /// A mismatched shape is a programming error: the call fails and the
    /// layer collection is left unchanged.
    pub fn add_layers(&mut self, layers: LayerSet) -> Result<(), HarmonizeError> {
        for (name, data) in &layers {
            if !data.shape_matches(&self.spec) {
                let actual = match data {
                    LayerData::Single(g) => g.shape(),
                    LayerData::Banded(g) => {
                        let (_, rows, cols) = g.shape();
                        (rows, cols)
                    }
                };
                return Err(HarmonizeError::ShapeMismatch {
                    layer: name.clone(),
                    expected: self.spec.shape(),
                    actual,
                });
            }
        }
        self.layers.extend(layers);
        Ok(())
    }

    /// Derive terrain attribute layers from the harmonized elevation.
    pub fn derive_terrain(&mut self) -> Result<(), HarmonizeError> {
        let elevation = match self.layers.get(layer::ELEVATION) {
            Some(LayerData::Single(grid)) => grid.clone(),
            _ => return Err(HarmonizeError::MissingLayer(layer::ELEVATION.to_string())),
        };
        let cell = self.spec.cell_size;

        let mut derived = LayerSet::new();
        derived.insert(
            layer::SLOPE.to_string(),
            LayerData::Single(terrain::slope(&elevation, cell)),
        );
        derived.insert(
            layer::ASPECT.to_string(),
            LayerData::Single(terrain::aspect(&elevation, cell)),
        );
        derived.insert(
            layer::CURVATURE.to_string(),
            LayerData::Single(terrain::curvature(&elevation)),
        );
        derived.insert(
            layer::ROUGHNESS.to_string(),
            LayerData::Single(terrain::roughness(&elevation, 3)),
        );
        derived.insert(
            layer::TPI.to_string(),
            LayerData::Single(terrain::tpi(&elevation, 3)),
        );
        derived.insert(
            layer::TWI.to_string(),
            LayerData::Single(terrain::twi(&elevation, cell)),
        );
        self.add_layers(derived)
    }

    /// Compute the per-cell quality score from the recorded presence masks.
    pub fn compute_quality(&mut self) {
        let empty = Vec::new();
        let elevation = self
            .presence
            .get(&ProviderKind::Elevation)
            .unwrap_or(&empty);
        let embedding = self
            .presence
            .get(&ProviderKind::Embedding)
            .unwrap_or(&empty);
        let vector = self.presence.get(&ProviderKind::Vector).unwrap_or(&empty);

        let quality = quality_layer(self.spec.rows, self.spec.cols, elevation, embedding, vector);
        self.layers
            .insert(layer::QUALITY.to_string(), LayerData::Single(quality));
    }

    /// Per-provider statuses recorded so far.
    pub fn status(&self) -> &BTreeMap<ProviderKind, SourceStatus> {
        &self.status
    }

    pub fn finish(self) -> HarmonizedGrid {
        HarmonizedGrid {
            spec: self.spec,
            layers: self.layers,
            status: self.status,
        }
    }
}

/// Run the full pipeline: concurrent fetch, harmonization, terrain
/// derivation, and quality scoring.
pub async fn harmonize(
    region: &Region,
    resolution: f64,
    adapters: &[Arc<dyn ProviderAdapter>],
    concurrency: Option<usize>,
) -> Result<HarmonizedGrid, HarmonizeError> {
    let mut harmonizer = Harmonizer::new(region, resolution)?;
    info!(
        epsg = harmonizer.spec.epsg,
        rows = harmonizer.spec.rows,
        cols = harmonizer.spec.cols,
        "computed master grid"
    );

    let outcomes: Vec<ProviderOutcome> =
        fetch_all(adapters, region, resolution, concurrency).await;
    for (adapter, outcome) in adapters.iter().zip(&outcomes) {
        harmonizer.process_fetch_result(adapter.as_ref(), &outcome.result)?;
    }

    if harmonizer.layer(layer::ELEVATION).is_some() {
        harmonizer.derive_terrain()?;
    }
    harmonizer.compute_quality();
    Ok(harmonizer.finish())
}

#[derive(Debug, thiserror::Error)]
pub enum HarmonizeError {
    #[error("resolution must be a positive number of meters, got {0}")]
    InvalidResolution(f64),

    #[error("layer '{layer}' shaped {actual:?} does not match the master grid {expected:?}")]
    ShapeMismatch {
        layer: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("required layer '{0}' is missing")]
    MissingLayer(String),

    #[error(transparent)]
    Projection(#[from] projection::ProjectionError),

    #[error(transparent)]
    Provider(#[from] providers::ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use geofuse_common::{BandedGrid, Grid2};

    fn minneapolis() -> Region {
        Region::from_bounds(44.97, 44.99, -93.28, -93.25).unwrap()
    }

    #[test]
    fn test_grid_spec_minneapolis_10m() {
        let spec = compute_grid_spec(&minneapolis(), 10.0).unwrap();
        assert_eq!(spec.epsg, 32615);
        // ~2.2 km x ~2.4 km at 10 m: on the order of 220 x 240 cells.
        assert!((180..300).contains(&spec.rows), "rows = {}", spec.rows);
        assert!((180..300).contains(&spec.cols), "cols = {}", spec.cols);
        assert_eq!(spec.cell_size, 10.0);
    }

    #[test]
    fn test_grid_spec_rejects_bad_resolution() {
        assert!(compute_grid_spec(&minneapolis(), 0.0).is_err());
        assert!(compute_grid_spec(&minneapolis(), -5.0).is_err());
        assert!(compute_grid_spec(&minneapolis(), f64::NAN).is_err());
    }

    #[test]
    fn test_add_layers_shape_mismatch_is_fatal_and_atomic() {
        let spec = compute_grid_spec(&minneapolis(), 10.0).unwrap();
        let mut h = Harmonizer::from_spec(spec);

        let mut good = LayerSet::new();
        good.insert(
            "first".to_string(),
            LayerData::Single(Grid2::zeros(spec.rows, spec.cols)),
        );
        h.add_layers(good).unwrap();

        // One conforming and one off-by-one layer in the same call.
        let mut mixed = LayerSet::new();
        mixed.insert(
            "ok".to_string(),
            LayerData::Single(Grid2::zeros(spec.rows, spec.cols)),
        );
        mixed.insert(
            "bad".to_string(),
            LayerData::Single(Grid2::zeros(spec.rows + 1, spec.cols)),
        );
        let err = h.add_layers(mixed).unwrap_err();
        assert!(matches!(err, HarmonizeError::ShapeMismatch { .. }));

        // The collection is unchanged: neither layer landed.
        assert!(h.layer("ok").is_none());
        assert!(h.layer("bad").is_none());
        assert!(h.layer("first").is_some());
    }

    #[test]
    fn test_add_layers_checks_banded_shape() {
        let spec = compute_grid_spec(&minneapolis(), 10.0).unwrap();
        let mut h = Harmonizer::from_spec(spec);

        let mut layers = LayerSet::new();
        layers.insert(
            "embedding".to_string(),
            LayerData::Banded(BandedGrid::zeros(64, spec.rows, spec.cols + 1)),
        );
        assert!(h.add_layers(layers).is_err());
    }

    #[test]
    fn test_derive_terrain_requires_elevation() {
        let spec = compute_grid_spec(&minneapolis(), 10.0).unwrap();
        let mut h = Harmonizer::from_spec(spec);
        assert!(matches!(
            h.derive_terrain(),
            Err(HarmonizeError::MissingLayer(_))
        ));
    }

    #[test]
    fn test_quality_without_any_sources_is_zero() {
        let spec = compute_grid_spec(&minneapolis(), 10.0).unwrap();
        let mut h = Harmonizer::from_spec(spec);
        h.compute_quality();
        match h.layer(layer::QUALITY).unwrap() {
            LayerData::Single(q) => assert!(q.as_slice().iter().all(|&v| v == 0.0)),
            LayerData::Banded(_) => panic!("quality must be single-band"),
        }
    }
}
