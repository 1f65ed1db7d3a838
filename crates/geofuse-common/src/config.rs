//! Explicit configuration for the harmonization core.
//!
//! The caller constructs one [`FusionConfig`] and passes it to every
//! component that needs it; the core never reads environment variables or
//! credential files itself.

use crate::grid::ResampleMethod;
use std::path::PathBuf;
use std::time::Duration;

/// Retry policy for provider network calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Cap on the exponential delay.
    pub max_delay: Duration,
    /// Longer backoff applied after a rate-limit response.
    pub rate_limit_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            rate_limit_delay: Duration::from_secs(60),
        }
    }
}

/// Elevation tile source configuration.
#[derive(Debug, Clone)]
pub struct ElevationConfig {
    /// Base URL of the z/x/y GeoTIFF tile tree.
    pub tile_endpoint: String,
    /// Slippy-map zoom level to fetch.
    pub zoom: u8,
    /// Decoded tiles held in memory.
    pub tile_cache_capacity: usize,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            tile_endpoint: "https://s3.amazonaws.com/elevation-tiles-prod/geotiff".to_string(),
            zoom: 12,
            tile_cache_capacity: 256,
        }
    }
}

/// Embedding service configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service.
    pub endpoint: String,
    /// Dataset year requested from the service.
    pub year: u16,
    /// Largest payload fetched by direct download; bigger requests go
    /// through the asynchronous export path.
    pub direct_payload_limit: u64,
    /// Initial export poll interval; doubles up to `poll_cap`.
    pub poll_initial: Duration,
    /// Cap on the poll interval.
    pub poll_cap: Duration,
    /// Total wait bound for an export job before the fetch resolves to a
    /// failure.
    pub max_wait: Duration,
    /// How to resample embedding bands onto the master grid. Nearest by
    /// default so semantically unrelated vectors are never blended;
    /// bilinear is an explicit opt-in.
    pub resample: ResampleMethod,
    /// Cache TTL in days (annual dataset).
    pub ttl_days: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://embeddings.example.com/v1".to_string(),
            year: 2024,
            direct_payload_limit: 32 * 1024 * 1024,
            poll_initial: Duration::from_secs(5),
            poll_cap: Duration::from_secs(60),
            max_wait: Duration::from_secs(900),
            resample: ResampleMethod::Nearest,
            ttl_days: 365,
        }
    }
}

/// Vector infrastructure source configuration.
#[derive(Debug, Clone)]
pub struct VectorConfig {
    /// Query endpoints, tried in rotation on failure.
    pub endpoints: Vec<String>,
    /// Cache TTL in days.
    pub ttl_days: u32,
    /// Sentinel written into distance fields when the region has no
    /// features of a category.
    pub max_distance_m: f32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://overpass-api.de/api/interpreter".to_string(),
                "https://overpass.kumi.systems/api/interpreter".to_string(),
            ],
            ttl_days: 30,
            max_distance_m: 5000.0,
        }
    }
}

/// Top-level configuration for a harmonization request.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Root of the on-disk artifact cache.
    pub cache_root: PathBuf,
    pub retry: RetryConfig,
    pub elevation: ElevationConfig,
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("geofuse_cache"),
            retry: RetryConfig::default(),
            elevation: ElevationConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector: VectorConfig::default(),
        }
    }
}

/// Per-provider credential validity, as reported by the external credential
/// manager. The core never reads credential files.
#[derive(Debug, Clone, Copy)]
pub struct Credentials {
    pub elevation_ok: bool,
    pub embedding_ok: bool,
    pub vector_ok: bool,
}

impl Default for Credentials {
    fn default() -> Self {
        // Elevation tiles and the public vector endpoints are unauthenticated.
        Self {
            elevation_ok: true,
            embedding_ok: false,
            vector_ok: true,
        }
    }
}
