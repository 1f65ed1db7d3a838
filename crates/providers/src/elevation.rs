//! Elevation adapter: slippy-map GeoTIFF terrain tiles.
//!
//! Tiles come from a public z/x/y tree (AWS open-data terrain tiles by
//! default). The adapter computes the covering tile set for a region,
//! serves tiles from the disk cache, fetches misses over the network with
//! retry, and keeps decoded tiles in an in-memory LRU cache. A missing
//! tile at the source's coverage edge is legitimate absence: the affected
//! output cells become NaN and are flagged, never raised.

use crate::adapter::{
    Artifact, FetchResult, LayerData, LayerSet, ProviderAdapter, ProviderError, TileSlot,
};
use crate::geotiff::{GeoBounds, GeoRaster};
use crate::retry::{classify_status, classify_transport, with_retry, RequestError};
use async_trait::async_trait;
use geofuse_common::{layer, ElevationConfig, FusionConfig, Grid2, GridSpec, ProviderKind, Region, RetryConfig};
use lru::LruCache;
use projection::UtmProjection;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Slippy-map tile coordinate (z/x/y, row 0 at the north).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Tile containing a WGS84 coordinate at zoom `z`.
    pub fn from_lat_lon(lat: f64, lon: f64, z: u8) -> Self {
        // Web Mercator latitude limit.
        let lat = lat.clamp(-85.0511, 85.0511);
        let n = (1u32 << z) as f64;

        let x = ((lon + 180.0) / 360.0 * n).floor();
        let lat_rad = lat.to_radians();
        let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n).floor();

        let max = (1u32 << z) - 1;
        Self {
            z,
            x: (x.max(0.0) as u32).min(max),
            y: (y.max(0.0) as u32).min(max),
        }
    }

    /// Geographic bounds of this tile.
    pub fn bounds(&self) -> GeoBounds {
        let n = (1u32 << self.z) as f64;
        let min_lon = self.x as f64 / n * 360.0 - 180.0;
        let max_lon = (self.x + 1) as f64 / n * 360.0 - 180.0;
        let max_lat = (PI * (1.0 - 2.0 * self.y as f64 / n)).sinh().atan().to_degrees();
        let min_lat = (PI * (1.0 - 2.0 * (self.y + 1) as f64 / n))
            .sinh()
            .atan()
            .to_degrees();
        GeoBounds {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    fn url(&self, base: &str) -> String {
        format!("{}/{}/{}/{}.tif", base, self.z, self.x, self.y)
    }

    fn key(&self) -> String {
        storage::artifact_key("elev_tile", &format!("{}_{}_{}", self.z, self.x, self.y))
    }
}

/// Elevation tile provider.
pub struct ElevationAdapter {
    client: reqwest::Client,
    cache: Arc<storage::DiskCache>,
    config: ElevationConfig,
    retry: RetryConfig,
    credentials_ok: bool,
    /// Decoded tiles kept in memory across resample calls.
    decoded: Mutex<LruCache<TileCoord, Arc<GeoRaster>>>,
}

impl ElevationAdapter {
    pub fn new(
        cache: Arc<storage::DiskCache>,
        config: &FusionConfig,
        credentials_ok: bool,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.elevation.tile_cache_capacity.max(1)).expect("non-zero");
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            cache,
            config: config.elevation.clone(),
            retry: config.retry.clone(),
            credentials_ok,
            decoded: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Covering tile set for a region, west-to-east then north-to-south.
    fn covering_tiles(&self, region: &Region) -> Vec<TileCoord> {
        let z = self.config.zoom;
        let nw = TileCoord::from_lat_lon(region.lat_max(), region.lon_min(), z);
        let se = TileCoord::from_lat_lon(region.lat_min(), region.lon_max(), z);

        let mut tiles = Vec::new();
        for y in nw.y..=se.y {
            for x in nw.x..=se.x {
                tiles.push(TileCoord { z, x, y });
            }
        }
        tiles
    }

    /// Fetch one tile: disk cache first, then the network.
    ///
    /// `Ok(None)` means the source has no tile here (coverage edge).
    async fn fetch_tile(&self, coord: TileCoord) -> Result<Option<std::path::PathBuf>, RequestError> {
        let key = coord.key();
        if let Some(path) = self.cache.get(&key) {
            return Ok(Some(path));
        }

        let url = coord.url(&self.config.tile_endpoint);
        let body = with_retry(&self.retry, "elevation tile", || {
            let url = url.clone();
            let client = self.client.clone();
            async move {
                let response = client.get(&url).send().await.map_err(|e| classify_transport(&e))?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    // Outside source coverage; not an error.
                    return Ok(None);
                }
                if let Some(err) = classify_status(response.status(), "elevation tile") {
                    return Err(err);
                }
                let bytes = response.bytes().await.map_err(|e| classify_transport(&e))?;
                Ok(Some(bytes))
            }
        })
        .await?;

        let Some(bytes) = body else {
            debug!(?coord, "tile outside source coverage");
            return Ok(None);
        };

        let path = self
            .cache
            .put(
                &key,
                ProviderKind::Elevation,
                "tif",
                &bytes,
                storage::DiskCache::default_ttl_days(ProviderKind::Elevation),
                serde_json::json!({"z": coord.z, "x": coord.x, "y": coord.y}),
            )
            .map_err(|e| RequestError::Transient(format!("cache write failed: {}", e)))?;
        Ok(Some(path))
    }

    /// Decode a tile through the in-memory LRU.
    fn decoded_tile(&self, slot: &TileSlot) -> Option<Arc<GeoRaster>> {
        let path = slot.path.as_ref()?;
        {
            let mut cache = self.decoded.lock().unwrap();
            if let Some(raster) = cache.get(&slot.coord) {
                return Some(raster.clone());
            }
        }

        match GeoRaster::decode(path, slot.coord.bounds()) {
            Ok(raster) => {
                let raster = Arc::new(raster);
                self.decoded
                    .lock()
                    .unwrap()
                    .put(slot.coord, raster.clone());
                Some(raster)
            }
            Err(e) => {
                // A tile that no longer decodes is dropped from the cache so
                // the next fetch replaces it; its cells stay flagged.
                warn!(?slot.coord, error = %e, "cached tile failed to decode, discarding");
                self.cache.invalidate(&slot.coord.key());
                None
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for ElevationAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Elevation
    }

    fn validate_credentials(&self) -> bool {
        self.credentials_ok
    }

    fn cache_key(&self, region: &Region, resolution: f64) -> String {
        storage::artifact_key(
            "elev",
            &format!(
                "elevation|{}|r{:.2}|z{}",
                region.bounds_key(),
                resolution,
                self.config.zoom
            ),
        )
    }

    #[instrument(skip(self, region), fields(provider = "elevation"))]
    async fn fetch(&self, region: &Region, _resolution: f64) -> FetchResult {
        if !self.credentials_ok {
            return FetchResult::Failure(
                geofuse_common::FailureKind::AuthInvalid,
                "elevation credentials rejected".to_string(),
            );
        }

        let tiles = self.covering_tiles(region);
        info!(count = tiles.len(), zoom = self.config.zoom, "fetching elevation tiles");

        let mut slots = Vec::with_capacity(tiles.len());
        let mut present = 0usize;
        for coord in tiles {
            match self.fetch_tile(coord).await {
                Ok(path) => {
                    if path.is_some() {
                        present += 1;
                    }
                    slots.push(TileSlot { coord, path });
                }
                Err(err) => {
                    return FetchResult::Failure(err.failure_kind(), err.message().to_string())
                }
            }
        }

        if present == 0 {
            // The whole region sits outside source coverage.
            return FetchResult::NoData;
        }
        FetchResult::Success(Artifact::ElevationTiles(slots))
    }

    fn resample_to_grid(
        &self,
        artifact: &Artifact,
        spec: &GridSpec,
    ) -> Result<LayerSet, ProviderError> {
        let Artifact::ElevationTiles(slots) = artifact else {
            return Err(ProviderError::WrongArtifact(ProviderKind::Elevation));
        };

        let proj = UtmProjection::for_epsg(spec.epsg)?;
        let rasters: HashMap<TileCoord, Arc<GeoRaster>> = slots
            .iter()
            .filter_map(|slot| self.decoded_tile(slot).map(|r| (slot.coord, r)))
            .collect();

        let mut elevation = Grid2::filled(spec.rows, spec.cols, f32::NAN);
        for row in 0..spec.rows {
            for col in 0..spec.cols {
                let (x, y) = spec.cell_center(row, col);
                let (lat, lon) = proj.inverse(x, y);
                let coord = TileCoord::from_lat_lon(lat, lon, self.config.zoom);
                if let Some(raster) = rasters.get(&coord) {
                    elevation.set(row, col, raster.sample_bilinear(lat, lon));
                }
            }
        }

        let mut layers = LayerSet::new();
        layers.insert(layer::ELEVATION.to_string(), LayerData::Single(elevation));
        Ok(layers)
    }

    fn fallback_layers(&self, spec: &GridSpec) -> LayerSet {
        let mut layers = LayerSet::new();
        layers.insert(
            layer::ELEVATION.to_string(),
            LayerData::Single(Grid2::zeros(spec.rows, spec.cols)),
        );
        layers
    }
}
