//! Embedding adapter: 64-band annual satellite embedding rasters.
//!
//! The remote service offers two paths: direct synchronous download for
//! small extents, and an asynchronous export job (start, poll, download)
//! for extents above the configured payload threshold. Service
//! initialization is deferred to the first fetch and held as explicit
//! adapter state; an initialization failure degrades this provider only.

use crate::adapter::{Artifact, FetchResult, LayerData, LayerSet, ProviderAdapter, ProviderError};
use crate::embed_grid::EmbedGrid;
use crate::retry::{classify_status, classify_transport, with_retry, RequestError};
use async_trait::async_trait;
use geofuse_common::{
    layer, BandedGrid, EmbeddingConfig, FailureKind, FusionConfig, GridSpec, ProviderKind, Region,
    RetryConfig,
};
use grid_ops::resample_to_spec;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Explicit service-initialization state, transitioned at the start of
/// `fetch` - never at construction time.
#[derive(Debug, Clone)]
enum InitState {
    Uninitialized,
    Ready,
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct ExportStarted {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct ExportStatus {
    state: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Satellite embedding provider.
pub struct EmbeddingAdapter {
    client: reqwest::Client,
    cache: std::sync::Arc<storage::DiskCache>,
    config: EmbeddingConfig,
    retry: RetryConfig,
    credentials_ok: bool,
    state: tokio::sync::Mutex<InitState>,
}

impl EmbeddingAdapter {
    pub fn new(
        cache: std::sync::Arc<storage::DiskCache>,
        config: &FusionConfig,
        credentials_ok: bool,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            cache,
            config: config.embedding.clone(),
            retry: config.retry.clone(),
            credentials_ok,
            state: tokio::sync::Mutex::new(InitState::Uninitialized),
        }
    }

    /// Estimated direct-download payload for a region at a resolution.
    fn payload_estimate(&self, region: &Region, resolution: f64) -> u64 {
        let rows = (region.height_km() * 1000.0 / resolution).ceil().max(1.0) as u64;
        let cols = (region.width_km() * 1000.0 / resolution).ceil().max(1.0) as u64;
        rows * cols * layer::EMBEDDING_BANDS as u64 * 4
    }

    /// Check the service once and record the outcome.
    async fn ensure_ready(&self) -> Result<(), (FailureKind, String)> {
        let mut state = self.state.lock().await;
        match &*state {
            InitState::Ready => return Ok(()),
            InitState::Failed(reason) => {
                return Err((FailureKind::NetworkTransient, reason.clone()))
            }
            InitState::Uninitialized => {}
        }

        let url = format!("{}/status", self.config.endpoint);
        let result = with_retry(&self.retry, "embedding service status", || {
            let client = self.client.clone();
            let url = url.clone();
            async move {
                let response = client.get(&url).send().await.map_err(|e| classify_transport(&e))?;
                match classify_status(response.status(), "embedding service status") {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
        })
        .await;

        match result {
            Ok(()) => {
                *state = InitState::Ready;
                debug!("embedding service ready");
                Ok(())
            }
            Err(err) => {
                let reason = format!("embedding service initialization failed: {}", err.message());
                warn!(%reason, "disabling embedding provider for this request");
                *state = InitState::Failed(reason.clone());
                Err((err.failure_kind(), reason))
            }
        }
    }

    fn query_params(&self, region: &Region, resolution: f64) -> Vec<(&'static str, String)> {
        vec![
            ("west", region.lon_min().to_string()),
            ("south", region.lat_min().to_string()),
            ("east", region.lon_max().to_string()),
            ("north", region.lat_max().to_string()),
            ("year", self.config.year.to_string()),
            ("scale", resolution.to_string()),
        ]
    }

    /// Direct synchronous download for small extents.
    async fn fetch_direct(&self, region: &Region, resolution: f64) -> Result<Vec<u8>, RequestError> {
        let url = format!("{}/embeddings", self.config.endpoint);
        let params = self.query_params(region, resolution);
        with_retry(&self.retry, "embedding download", || {
            let client = self.client.clone();
            let url = url.clone();
            let params = params.clone();
            async move {
                let response = client
                    .get(&url)
                    .query(&params)
                    .send()
                    .await
                    .map_err(|e| classify_transport(&e))?;
                if let Some(err) = classify_status(response.status(), "embedding download") {
                    return Err(err);
                }
                let bytes = response.bytes().await.map_err(|e| classify_transport(&e))?;
                Ok(bytes.to_vec())
            }
        })
        .await
    }

    /// Export-job path: start the job, poll with capped exponential
    /// backoff until the deadline, then download the result.
    async fn fetch_via_export(
        &self,
        region: &Region,
        resolution: f64,
    ) -> Result<Vec<u8>, RequestError> {
        let start_url = format!("{}/exports", self.config.endpoint);
        let body = serde_json::json!({
            "west": region.lon_min(),
            "south": region.lat_min(),
            "east": region.lon_max(),
            "north": region.lat_max(),
            "year": self.config.year,
            "scale": resolution,
        });

        let started: ExportStarted = with_retry(&self.retry, "embedding export start", || {
            let client = self.client.clone();
            let url = start_url.clone();
            let body = body.clone();
            async move {
                let response = client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| classify_transport(&e))?;
                if let Some(err) = classify_status(response.status(), "embedding export start") {
                    return Err(err);
                }
                response.json().await.map_err(|e| classify_transport(&e))
            }
        })
        .await?;

        info!(job_id = %started.job_id, "embedding export started");

        let deadline = tokio::time::Instant::now() + self.config.max_wait;
        let mut interval = self.config.poll_initial;
        let status_url = format!("{}/exports/{}", self.config.endpoint, started.job_id);

        loop {
            if tokio::time::Instant::now() + interval > deadline {
                return Err(RequestError::Transient(format!(
                    "embedding export {} did not finish within {:?}",
                    started.job_id, self.config.max_wait
                )));
            }
            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(self.config.poll_cap);

            let status: ExportStatus = with_retry(&self.retry, "embedding export poll", || {
                let client = self.client.clone();
                let url = status_url.clone();
                async move {
                    let response = client.get(&url).send().await.map_err(|e| classify_transport(&e))?;
                    if let Some(err) = classify_status(response.status(), "embedding export poll") {
                        return Err(err);
                    }
                    response.json().await.map_err(|e| classify_transport(&e))
                }
            })
            .await?;

            match status.state.as_str() {
                "done" => {
                    let url = status.url.ok_or_else(|| {
                        RequestError::Transient("export finished without a result url".into())
                    })?;
                    return with_retry(&self.retry, "embedding export download", || {
                        let client = self.client.clone();
                        let url = url.clone();
                        async move {
                            let response =
                                client.get(&url).send().await.map_err(|e| classify_transport(&e))?;
                            if let Some(err) =
                                classify_status(response.status(), "embedding export download")
                            {
                                return Err(err);
                            }
                            let bytes =
                                response.bytes().await.map_err(|e| classify_transport(&e))?;
                            Ok(bytes.to_vec())
                        }
                    })
                    .await;
                }
                "failed" => {
                    return Err(RequestError::Transient(format!(
                        "embedding export failed: {}",
                        status.error.unwrap_or_else(|| "unknown reason".into())
                    )));
                }
                _ => {
                    debug!(job_id = %started.job_id, state = %status.state, "export pending");
                }
            }
        }
    }

    fn store(
        &self,
        key: &str,
        bytes: &[u8],
        region: &Region,
        resolution: f64,
    ) -> Result<PathBuf, RequestError> {
        // Validate the container before committing it to the cache.
        if let Err(e) = EmbedGrid::decode(bytes) {
            return Err(RequestError::Transient(format!(
                "embedding service returned an invalid container: {}",
                e
            )));
        }
        self.cache
            .put(
                key,
                ProviderKind::Embedding,
                "emb",
                bytes,
                Some(self.config.ttl_days),
                serde_json::json!({
                    "bounds": region.bounds_key(),
                    "year": self.config.year,
                    "scale": resolution,
                }),
            )
            .map_err(|e| RequestError::Transient(format!("cache write failed: {}", e)))
    }
}

#[async_trait]
impl ProviderAdapter for EmbeddingAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Embedding
    }

    fn validate_credentials(&self) -> bool {
        self.credentials_ok
    }

    fn cache_key(&self, region: &Region, resolution: f64) -> String {
        storage::artifact_key(
            "embed",
            &format!(
                "embedding|{}|r{:.2}|y{}",
                region.bounds_key(),
                resolution,
                self.config.year
            ),
        )
    }

    #[instrument(skip(self, region), fields(provider = "embedding"))]
    async fn fetch(&self, region: &Region, resolution: f64) -> FetchResult {
        if !self.credentials_ok {
            return FetchResult::Failure(
                FailureKind::AuthInvalid,
                "embedding credentials rejected".to_string(),
            );
        }
        if let Err((kind, reason)) = self.ensure_ready().await {
            return FetchResult::Failure(kind, reason);
        }

        let key = self.cache_key(region, resolution);
        if let Some(path) = self.cache.get(&key) {
            return FetchResult::Success(Artifact::EmbeddingFile(path));
        }

        let estimate = self.payload_estimate(region, resolution);
        let result = if estimate <= self.config.direct_payload_limit {
            debug!(estimate, "direct embedding download");
            match self.fetch_direct(region, resolution).await {
                // The server can still judge the extent too large; fall
                // through to the export path instead of failing.
                Err(RequestError::TooLarge(reason)) => {
                    info!(%reason, "switching to export path");
                    self.fetch_via_export(region, resolution).await
                }
                other => other,
            }
        } else {
            debug!(estimate, limit = self.config.direct_payload_limit, "payload above direct limit");
            self.fetch_via_export(region, resolution).await
        };

        match result {
            Ok(bytes) => match self.store(&key, &bytes, region, resolution) {
                Ok(path) => FetchResult::Success(Artifact::EmbeddingFile(path)),
                Err(err) => FetchResult::Failure(err.failure_kind(), err.message().to_string()),
            },
            Err(err) => FetchResult::Failure(err.failure_kind(), err.message().to_string()),
        }
    }

    fn resample_to_grid(
        &self,
        artifact: &Artifact,
        spec: &GridSpec,
    ) -> Result<LayerSet, ProviderError> {
        let Artifact::EmbeddingFile(path) = artifact else {
            return Err(ProviderError::WrongArtifact(ProviderKind::Embedding));
        };

        let bytes = std::fs::read(path)?;
        let grid = EmbedGrid::decode(&bytes).map_err(|e| ProviderError::Decode(e.to_string()))?;
        let geo = grid.geo();

        let mut banded = BandedGrid::zeros(grid.bands, spec.rows, spec.cols);
        for band in 0..grid.bands {
            let mut resampled = resample_to_spec(grid.band(band), &geo, spec, self.config.resample);
            // Cells outside the source extent carry no embedding signal.
            resampled.fill_non_finite(0.0);
            let offset = band * spec.rows * spec.cols;
            banded.as_mut_slice()[offset..offset + spec.rows * spec.cols]
                .copy_from_slice(resampled.as_slice());
        }

        let mut layers = LayerSet::new();
        layers.insert(layer::EMBEDDING.to_string(), LayerData::Banded(banded));
        Ok(layers)
    }

    fn fallback_layers(&self, spec: &GridSpec) -> LayerSet {
        let mut layers = LayerSet::new();
        layers.insert(
            layer::EMBEDDING.to_string(),
            LayerData::Banded(BandedGrid::zeros(
                layer::EMBEDDING_BANDS,
                spec.rows,
                spec.cols,
            )),
        );
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn adapter(dir: &TempDir) -> EmbeddingAdapter {
        let cache = Arc::new(storage::DiskCache::open(dir.path()).unwrap());
        EmbeddingAdapter::new(cache, &FusionConfig::default(), true)
    }

    fn region() -> Region {
        Region::from_bounds(44.97, 44.99, -93.28, -93.25).unwrap()
    }

    #[test]
    fn test_payload_estimate_scales_with_resolution() {
        let dir = TempDir::new().unwrap();
        let a = adapter(&dir);
        let r = region();
        let at_10m = a.payload_estimate(&r, 10.0);
        let at_30m = a.payload_estimate(&r, 30.0);
        assert!(at_10m > 5 * at_30m, "{} vs {}", at_10m, at_30m);
    }

    #[test]
    fn test_small_region_prefers_direct_path() {
        let dir = TempDir::new().unwrap();
        let a = adapter(&dir);
        // ~2.2 x 2.4 km at 10 m: about 230x240x64x4 bytes, ~14 MB.
        assert!(a.payload_estimate(&region(), 10.0) <= a.config.direct_payload_limit);
        // The same region at 1 m blows past the limit.
        assert!(a.payload_estimate(&region(), 1.0) > a.config.direct_payload_limit);
    }

    #[test]
    fn test_cache_key_distinct_per_year() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(storage::DiskCache::open(dir.path()).unwrap());
        let mut cfg = FusionConfig::default();
        let a = EmbeddingAdapter::new(cache.clone(), &cfg, true);
        cfg.embedding.year = 2023;
        let b = EmbeddingAdapter::new(cache, &cfg, true);

        let r = region();
        assert_ne!(a.cache_key(&r, 10.0), b.cache_key(&r, 10.0));
        assert_eq!(a.cache_key(&r, 10.0), a.cache_key(&r, 10.0));
    }

    #[test]
    fn test_resample_cached_container_nearest() {
        let dir = TempDir::new().unwrap();
        let a = adapter(&dir);

        // Build a 2-band container over a small UTM extent.
        let data: Vec<f32> = (0..2 * 4 * 4).map(|i| i as f32).collect();
        let grid = EmbedGrid::new(2, 4, 4, 1000.0, 2000.0, 10.0, 32615, data).unwrap();
        let path = dir.path().join("grid.emb");
        std::fs::write(&path, grid.encode()).unwrap();

        let spec = GridSpec {
            origin_x: 1000.0,
            origin_y: 2000.0,
            cell_size: 20.0,
            rows: 2,
            cols: 2,
            epsg: 32615,
        };
        let layers = a
            .resample_to_grid(&Artifact::EmbeddingFile(path), &spec)
            .unwrap();
        match layers.get(layer::EMBEDDING).unwrap() {
            LayerData::Banded(b) => {
                assert_eq!(b.shape(), (2, 2, 2));
                // Nearest sampling picks exact source values.
                assert!(b.as_slice().iter().all(|v| v.is_finite()));
            }
            LayerData::Single(_) => panic!("embedding layer must be banded"),
        }
    }

    #[test]
    fn test_fallback_is_64_band_zeros() {
        let dir = TempDir::new().unwrap();
        let a = adapter(&dir);
        let spec = GridSpec {
            origin_x: 0.0,
            origin_y: 0.0,
            cell_size: 10.0,
            rows: 3,
            cols: 3,
            epsg: 32615,
        };
        match a.fallback_layers(&spec).get(layer::EMBEDDING).unwrap() {
            LayerData::Banded(b) => {
                assert_eq!(b.shape(), (layer::EMBEDDING_BANDS, 3, 3));
                assert!(b.as_slice().iter().all(|&v| v == 0.0));
            }
            LayerData::Single(_) => panic!("embedding fallback must be banded"),
        }
    }
}
