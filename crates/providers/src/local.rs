//! Local raster adapter: caller-supplied GeoTIFF files.
//!
//! Scans a directory tree for single-band GeoTIFFs whose embedded
//! geotransform overlaps the region and mosaics them onto the master grid
//! (later files win where they overlap). No network, no credentials.

use crate::adapter::{Artifact, FetchResult, LayerData, LayerSet, ProviderAdapter, ProviderError};
use crate::geotiff::GeoRaster;
use async_trait::async_trait;
use geofuse_common::{layer, Grid2, GridSpec, ProviderKind, Region};
use projection::UtmProjection;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Local raster provider.
pub struct LocalRasterAdapter {
    dir: PathBuf,
}

impl LocalRasterAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn is_raster(path: &std::path::Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("tif") | Some("tiff")
        )
    }
}

#[async_trait]
impl ProviderAdapter for LocalRasterAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn validate_credentials(&self) -> bool {
        true
    }

    fn cache_key(&self, region: &Region, resolution: f64) -> String {
        storage::artifact_key(
            "local",
            &format!(
                "local|{}|{}|r{:.2}",
                self.dir.display(),
                region.bounds_key(),
                resolution
            ),
        )
    }

    #[instrument(skip(self, region), fields(provider = "local"))]
    async fn fetch(&self, region: &Region, _resolution: f64) -> FetchResult {
        if !self.dir.exists() {
            debug!(dir = %self.dir.display(), "local raster directory missing");
            return FetchResult::NoData;
        }

        let region_bounds = crate::geotiff::GeoBounds {
            min_lat: region.lat_min(),
            max_lat: region.lat_max(),
            min_lon: region.lon_min(),
            max_lon: region.lon_max(),
        };

        let mut overlapping = Vec::new();
        for entry in WalkDir::new(&self.dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() || !Self::is_raster(path) {
                continue;
            }
            match GeoRaster::decode_with_embedded_bounds(path) {
                Ok(raster) if raster.bounds().intersects(&region_bounds) => {
                    overlapping.push(path.to_path_buf());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable raster");
                }
            }
        }

        if overlapping.is_empty() {
            return FetchResult::NoData;
        }
        info!(count = overlapping.len(), "local rasters overlap region");
        FetchResult::Success(Artifact::LocalRasters(overlapping))
    }

    fn resample_to_grid(
        &self,
        artifact: &Artifact,
        spec: &GridSpec,
    ) -> Result<LayerSet, ProviderError> {
        let Artifact::LocalRasters(paths) = artifact else {
            return Err(ProviderError::WrongArtifact(ProviderKind::Local));
        };

        let proj = UtmProjection::for_epsg(spec.epsg)?;
        let rasters: Vec<GeoRaster> = paths
            .iter()
            .filter_map(|p| match GeoRaster::decode_with_embedded_bounds(p) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "raster dropped during resample");
                    None
                }
            })
            .collect();

        let mut mosaic = Grid2::filled(spec.rows, spec.cols, f32::NAN);
        for row in 0..spec.rows {
            for col in 0..spec.cols {
                let (x, y) = spec.cell_center(row, col);
                let (lat, lon) = proj.inverse(x, y);
                // Later files win where coverage overlaps.
                for raster in &rasters {
                    let v = raster.sample_bilinear(lat, lon);
                    if v.is_finite() {
                        mosaic.set(row, col, v);
                    }
                }
            }
        }

        let mut layers = LayerSet::new();
        layers.insert(layer::LOCAL.to_string(), LayerData::Single(mosaic));
        Ok(layers)
    }

    fn fallback_layers(&self, spec: &GridSpec) -> LayerSet {
        let mut layers = LayerSet::new();
        layers.insert(
            layer::LOCAL.to_string(),
            LayerData::Single(Grid2::zeros(spec.rows, spec.cols)),
        );
        layers
    }
}
