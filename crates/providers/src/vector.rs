//! Vector infrastructure adapter.
//!
//! Queries an Overpass-style API for five feature categories (roads,
//! waterways, buildings, land-use, natural) inside the region bbox,
//! rotating across configured endpoints on failure. The raw JSON response
//! is cached as-is; rasterization turns linear features into
//! distance-to-feature fields, building polygons into an occupancy mask
//! plus a height field, and land-use/natural polygons into category-id
//! rasters.

use crate::adapter::{Artifact, FetchResult, LayerData, LayerSet, ProviderAdapter, ProviderError};
use crate::retry::{backoff_delay, classify_status, classify_transport, RequestError};
use async_trait::async_trait;
use geofuse_common::{
    layer, FailureKind, FusionConfig, Grid2, GridSpec, ProviderKind, Region, RetryConfig,
    VectorConfig,
};
use grid_ops::{burn_polyline, distance_transform, fill_polygon};
use projection::UtmProjection;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    geometry: Vec<GeomPoint>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct GeomPoint {
    lat: f64,
    lon: f64,
}

/// Features separated by category, in WGS84 coordinates.
#[derive(Debug, Default)]
struct ParsedFeatures {
    roads: Vec<Vec<(f64, f64)>>,
    waterways: Vec<Vec<(f64, f64)>>,
    buildings: Vec<Building>,
    landuse: Vec<(f32, Vec<(f64, f64)>)>,
    natural: Vec<(f32, Vec<(f64, f64)>)>,
}

#[derive(Debug)]
struct Building {
    outline: Vec<(f64, f64)>,
    height: f32,
}

/// Vector infrastructure provider.
pub struct VectorAdapter {
    client: reqwest::Client,
    cache: std::sync::Arc<storage::DiskCache>,
    config: VectorConfig,
    retry: RetryConfig,
    credentials_ok: bool,
}

impl VectorAdapter {
    pub fn new(
        cache: std::sync::Arc<storage::DiskCache>,
        config: &FusionConfig,
        credentials_ok: bool,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(90))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            cache,
            config: config.vector.clone(),
            retry: config.retry.clone(),
            credentials_ok,
        }
    }

    /// Overpass QL selecting the five feature categories within the bbox.
    fn build_query(region: &Region) -> String {
        let bbox = format!(
            "{},{},{},{}",
            region.lat_min(),
            region.lon_min(),
            region.lat_max(),
            region.lon_max()
        );
        format!(
            "[out:json][timeout:60];(\
             way[\"highway\"]({bbox});\
             way[\"waterway\"]({bbox});\
             way[\"building\"]({bbox});\
             way[\"landuse\"]({bbox});\
             way[\"natural\"]({bbox});\
             );out geom;"
        )
    }

    /// POST the query, rotating endpoints on failure, under the shared
    /// attempt budget and backoff policy.
    async fn query_endpoints(&self, query: &str) -> Result<Vec<u8>, RequestError> {
        let endpoints = &self.config.endpoints;
        if endpoints.is_empty() {
            return Err(RequestError::Transient("no vector endpoints configured".into()));
        }

        let mut last_err = RequestError::Transient("no attempt made".into());
        for attempt in 1..=self.retry.max_attempts {
            let endpoint = &endpoints[((attempt - 1) as usize) % endpoints.len()];
            debug!(%endpoint, attempt, "vector query");

            let result = async {
                let response = self
                    .client
                    .post(endpoint)
                    .form(&[("data", query)])
                    .send()
                    .await
                    .map_err(|e| classify_transport(&e))?;
                if let Some(err) = classify_status(response.status(), "vector query") {
                    return Err(err);
                }
                let bytes = response.bytes().await.map_err(|e| classify_transport(&e))?;
                Ok(bytes.to_vec())
            }
            .await;

            match result {
                Ok(bytes) => return Ok(bytes),
                Err(err @ RequestError::Auth(_)) => return Err(err),
                Err(err) => {
                    if attempt < self.retry.max_attempts {
                        let delay = backoff_delay(&self.retry, &err, attempt);
                        warn!(
                            %endpoint,
                            attempt,
                            delay_secs = delay.as_secs(),
                            error = err.message(),
                            "vector query failed, rotating endpoint"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    fn parse(path: &Path) -> Result<ParsedFeatures, ProviderError> {
        let raw = std::fs::read(path)?;
        let response: OverpassResponse =
            serde_json::from_slice(&raw).map_err(|e| ProviderError::Decode(e.to_string()))?;

        let mut features = ParsedFeatures::default();
        for element in response.elements {
            if element.kind != "way" || element.geometry.is_empty() {
                continue;
            }
            let points: Vec<(f64, f64)> =
                element.geometry.iter().map(|p| (p.lat, p.lon)).collect();

            if element.tags.contains_key("highway") {
                features.roads.push(points);
            } else if element.tags.contains_key("waterway") {
                features.waterways.push(points);
            } else if element.tags.contains_key("building") {
                features.buildings.push(Building {
                    height: building_height(&element.tags),
                    outline: points,
                });
            } else if let Some(value) = element.tags.get("landuse") {
                features
                    .landuse
                    .push((landuse_category_id(value), points));
            } else if let Some(value) = element.tags.get("natural") {
                features
                    .natural
                    .push((natural_category_id(value), points));
            }
        }
        Ok(features)
    }

    fn distance_layer(
        lines: &[Vec<(f64, f64)>],
        proj: &UtmProjection,
        spec: &GridSpec,
        max_distance: f32,
    ) -> Grid2 {
        if lines.is_empty() {
            return Grid2::filled(spec.rows, spec.cols, max_distance);
        }

        let mut mask = Grid2::zeros(spec.rows, spec.cols);
        for line in lines {
            let utm: Vec<(f64, f64)> =
                line.iter().map(|&(lat, lon)| proj.forward(lat, lon)).collect();
            burn_polyline(&mut mask, &utm, spec);
        }

        let mut dist = distance_transform(&mask, spec.cell_size);
        // Features wholly outside the grid leave the mask empty.
        for v in dist.as_mut_slice() {
            if !v.is_finite() {
                *v = max_distance;
            }
        }
        dist
    }
}

/// Building height from tags: an explicit `height` (meters, possibly with
/// a unit suffix), else `building:levels` at 3 m per level, else 0 with
/// the occupancy mask as the validity signal.
fn building_height(tags: &BTreeMap<String, String>) -> f32 {
    if let Some(h) = tags.get("height") {
        let cleaned = h.trim().trim_end_matches('m').trim();
        if let Ok(v) = cleaned.parse::<f32>() {
            return v;
        }
    }
    if let Some(levels) = tags.get("building:levels") {
        if let Ok(v) = levels.trim().parse::<f32>() {
            return v * 3.0;
        }
    }
    0.0
}

/// Stable land-use category ids. 0 means no feature.
fn landuse_category_id(value: &str) -> f32 {
    match value {
        "residential" => 1.0,
        "commercial" => 2.0,
        "industrial" => 3.0,
        "retail" => 4.0,
        "forest" => 5.0,
        "farmland" => 6.0,
        "grass" => 7.0,
        "meadow" => 8.0,
        "orchard" => 9.0,
        "cemetery" => 10.0,
        _ => 99.0,
    }
}

/// Stable natural-feature category ids. 0 means no feature.
fn natural_category_id(value: &str) -> f32 {
    match value {
        "water" => 1.0,
        "wood" => 2.0,
        "scrub" => 3.0,
        "grassland" => 4.0,
        "wetland" => 5.0,
        "sand" => 6.0,
        "bare_rock" => 7.0,
        "beach" => 8.0,
        _ => 99.0,
    }
}

#[async_trait]
impl ProviderAdapter for VectorAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Vector
    }

    fn validate_credentials(&self) -> bool {
        self.credentials_ok
    }

    fn cache_key(&self, region: &Region, resolution: f64) -> String {
        storage::artifact_key(
            "vec",
            &format!("vector|{}|r{:.2}", region.bounds_key(), resolution),
        )
    }

    #[instrument(skip(self, region), fields(provider = "vector"))]
    async fn fetch(&self, region: &Region, resolution: f64) -> FetchResult {
        if !self.credentials_ok {
            return FetchResult::Failure(
                FailureKind::AuthInvalid,
                "vector credentials rejected".to_string(),
            );
        }

        let key = self.cache_key(region, resolution);

        // Two passes at most: a corrupt cached response is discarded and
        // refetched once (self-healing), a corrupt fresh response fails.
        for from_cache in [true, false] {
            let path = match (from_cache, self.cache.get(&key)) {
                (true, Some(path)) => path,
                (true, None) => continue,
                (false, _) => {
                    let query = Self::build_query(region);
                    let bytes = match self.query_endpoints(&query).await {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            return FetchResult::Failure(
                                err.failure_kind(),
                                err.message().to_string(),
                            )
                        }
                    };
                    match self.cache.put(
                        &key,
                        ProviderKind::Vector,
                        "json",
                        &bytes,
                        Some(self.config.ttl_days),
                        serde_json::json!({"bounds": region.bounds_key()}),
                    ) {
                        Ok(path) => path,
                        Err(e) => {
                            return FetchResult::Failure(
                                FailureKind::NetworkTransient,
                                format!("cache write failed: {}", e),
                            )
                        }
                    }
                }
            };

            // An empty element set is a legitimate empty region, not a failure.
            match Self::parse(&path) {
                Ok(features)
                    if features.roads.is_empty()
                        && features.waterways.is_empty()
                        && features.buildings.is_empty()
                        && features.landuse.is_empty()
                        && features.natural.is_empty() =>
                {
                    info!("region has no matching vector features");
                    return FetchResult::NoData;
                }
                Ok(_) => return FetchResult::Success(Artifact::VectorFile(path)),
                Err(e) if from_cache => {
                    warn!(error = %e, "cached vector response unreadable, refetching");
                    self.cache.invalidate(&key);
                }
                Err(e) => {
                    return FetchResult::Failure(FailureKind::CacheCorrupt, e.to_string());
                }
            }
        }
        unreachable!("second pass always returns")
    }

    fn resample_to_grid(
        &self,
        artifact: &Artifact,
        spec: &GridSpec,
    ) -> Result<LayerSet, ProviderError> {
        let Artifact::VectorFile(path) = artifact else {
            return Err(ProviderError::WrongArtifact(ProviderKind::Vector));
        };
        let features = Self::parse(path)?;
        let proj = UtmProjection::for_epsg(spec.epsg)?;
        let max_distance = self.config.max_distance_m;

        let mut layers = LayerSet::new();
        layers.insert(
            layer::ROAD_DISTANCE.to_string(),
            LayerData::Single(Self::distance_layer(&features.roads, &proj, spec, max_distance)),
        );
        layers.insert(
            layer::WATER_DISTANCE.to_string(),
            LayerData::Single(Self::distance_layer(
                &features.waterways,
                &proj,
                spec,
                max_distance,
            )),
        );

        let mut mask = Grid2::zeros(spec.rows, spec.cols);
        let mut height = Grid2::zeros(spec.rows, spec.cols);
        for building in &features.buildings {
            let utm: Vec<(f64, f64)> = building
                .outline
                .iter()
                .map(|&(lat, lon)| proj.forward(lat, lon))
                .collect();
            fill_polygon(&mut mask, &utm, spec, 1.0);
            fill_polygon(&mut height, &utm, spec, building.height);
        }
        layers.insert(layer::BUILDING_MASK.to_string(), LayerData::Single(mask));
        layers.insert(layer::BUILDING_HEIGHT.to_string(), LayerData::Single(height));

        // Later features overwrite earlier ones at ties.
        let mut landuse = Grid2::zeros(spec.rows, spec.cols);
        for (id, outline) in &features.landuse {
            let utm: Vec<(f64, f64)> =
                outline.iter().map(|&(lat, lon)| proj.forward(lat, lon)).collect();
            fill_polygon(&mut landuse, &utm, spec, *id);
        }
        layers.insert(layer::LANDUSE.to_string(), LayerData::Single(landuse));

        let mut natural = Grid2::zeros(spec.rows, spec.cols);
        for (id, outline) in &features.natural {
            let utm: Vec<(f64, f64)> =
                outline.iter().map(|&(lat, lon)| proj.forward(lat, lon)).collect();
            fill_polygon(&mut natural, &utm, spec, *id);
        }
        layers.insert(layer::NATURAL.to_string(), LayerData::Single(natural));

        Ok(layers)
    }

    /// Empty-region substitutes: maximal distance fields, zero masks and
    /// category rasters.
    fn fallback_layers(&self, spec: &GridSpec) -> LayerSet {
        let mut layers = LayerSet::new();
        let max = self.config.max_distance_m;
        layers.insert(
            layer::ROAD_DISTANCE.to_string(),
            LayerData::Single(Grid2::filled(spec.rows, spec.cols, max)),
        );
        layers.insert(
            layer::WATER_DISTANCE.to_string(),
            LayerData::Single(Grid2::filled(spec.rows, spec.cols, max)),
        );
        for name in [
            layer::BUILDING_MASK,
            layer::BUILDING_HEIGHT,
            layer::LANDUSE,
            layer::NATURAL,
        ] {
            layers.insert(
                name.to_string(),
                LayerData::Single(Grid2::zeros(spec.rows, spec.cols)),
            );
        }
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn adapter(dir: &TempDir) -> VectorAdapter {
        let cache = Arc::new(storage::DiskCache::open(dir.path()).unwrap());
        VectorAdapter::new(cache, &FusionConfig::default(), true)
    }

    fn region() -> Region {
        Region::from_bounds(44.97, 44.99, -93.28, -93.25).unwrap()
    }

    /// A response with one road, one building, and one landuse polygon.
    fn sample_response() -> String {
        serde_json::json!({
            "elements": [
                {
                    "type": "way",
                    "tags": {"highway": "residential"},
                    "geometry": [
                        {"lat": 44.975, "lon": -93.275},
                        {"lat": 44.985, "lon": -93.275},
                    ]
                },
                {
                    "type": "way",
                    "tags": {"building": "yes", "height": "12 m"},
                    "geometry": [
                        {"lat": 44.978, "lon": -93.262},
                        {"lat": 44.9795, "lon": -93.262},
                        {"lat": 44.9795, "lon": -93.260},
                        {"lat": 44.978, "lon": -93.260},
                        {"lat": 44.978, "lon": -93.262},
                    ]
                },
                {
                    "type": "way",
                    "tags": {"landuse": "forest"},
                    "geometry": [
                        {"lat": 44.971, "lon": -93.279},
                        {"lat": 44.974, "lon": -93.279},
                        {"lat": 44.974, "lon": -93.276},
                        {"lat": 44.971, "lon": -93.276},
                        {"lat": 44.971, "lon": -93.279},
                    ]
                }
            ]
        })
        .to_string()
    }

    fn spec_for_region() -> GridSpec {
        let r = region();
        let proj = UtmProjection::for_region(&r);
        let bbox = proj.utm_bbox(&r);
        GridSpec {
            origin_x: bbox.x_min,
            origin_y: bbox.y_min,
            cell_size: 10.0,
            rows: (bbox.height() / 10.0).ceil() as usize,
            cols: (bbox.width() / 10.0).ceil() as usize,
            epsg: r.utm_epsg(),
        }
    }

    #[test]
    fn test_query_includes_all_categories() {
        let q = VectorAdapter::build_query(&region());
        for tag in ["highway", "waterway", "building", "landuse", "natural"] {
            assert!(q.contains(tag), "query missing {}", tag);
        }
        assert!(q.contains("out geom"));
    }

    #[test]
    fn test_building_height_tag_parsing() {
        let mut tags = BTreeMap::new();
        tags.insert("height".to_string(), "15.5 m".to_string());
        assert_eq!(building_height(&tags), 15.5);

        let mut tags = BTreeMap::new();
        tags.insert("building:levels".to_string(), "4".to_string());
        assert_eq!(building_height(&tags), 12.0);

        assert_eq!(building_height(&BTreeMap::new()), 0.0);
    }

    #[test]
    fn test_parse_separates_categories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resp.json");
        std::fs::write(&path, sample_response()).unwrap();

        let features = VectorAdapter::parse(&path).unwrap();
        assert_eq!(features.roads.len(), 1);
        assert_eq!(features.buildings.len(), 1);
        assert_eq!(features.landuse.len(), 1);
        assert!(features.waterways.is_empty());
        assert_eq!(features.buildings[0].height, 12.0);
        assert_eq!(features.landuse[0].0, landuse_category_id("forest"));
    }

    #[test]
    fn test_rasterize_road_distance_zero_on_feature() {
        let dir = TempDir::new().unwrap();
        let a = adapter(&dir);
        let path = dir.path().join("resp.json");
        std::fs::write(&path, sample_response()).unwrap();

        let spec = spec_for_region();
        let layers = a
            .resample_to_grid(&Artifact::VectorFile(path), &spec)
            .unwrap();

        let LayerData::Single(road) = layers.get(layer::ROAD_DISTANCE).unwrap() else {
            panic!("road distance must be single-band");
        };
        let values = road.as_slice();
        assert!(values.iter().any(|&v| v == 0.0), "no zero-distance cell");
        assert!(values.iter().all(|v| v.is_finite()));

        // The building mask has interior cells and the height rides on it.
        let LayerData::Single(mask) = layers.get(layer::BUILDING_MASK).unwrap() else {
            panic!()
        };
        let LayerData::Single(height) = layers.get(layer::BUILDING_HEIGHT).unwrap() else {
            panic!()
        };
        let occupied: Vec<usize> = mask
            .as_slice()
            .iter()
            .enumerate()
            .filter(|(_, &v)| v == 1.0)
            .map(|(i, _)| i)
            .collect();
        assert!(!occupied.is_empty());
        for i in occupied {
            assert_eq!(height.as_slice()[i], 12.0);
        }
    }

    #[test]
    fn test_distance_monotone_away_from_road() {
        let dir = TempDir::new().unwrap();
        let a = adapter(&dir);
        let path = dir.path().join("resp.json");
        // Only the north-south road.
        std::fs::write(
            &path,
            serde_json::json!({
                "elements": [{
                    "type": "way",
                    "tags": {"highway": "primary"},
                    "geometry": [
                        {"lat": 44.970, "lon": -93.275},
                        {"lat": 44.990, "lon": -93.275},
                    ]
                }]
            })
            .to_string(),
        )
        .unwrap();

        let spec = spec_for_region();
        let layers = a
            .resample_to_grid(&Artifact::VectorFile(path), &spec)
            .unwrap();
        let LayerData::Single(road) = layers.get(layer::ROAD_DISTANCE).unwrap() else {
            panic!()
        };

        // Walk east along a middle row: distance reaches 0 at the road
        // column and increases monotonically moving away from it.
        let row = spec.rows / 2;
        let road_col = (0..spec.cols)
            .min_by(|&a, &b| {
                road.get(row, a)
                    .partial_cmp(&road.get(row, b))
                    .unwrap()
            })
            .unwrap();
        assert_eq!(road.get(row, road_col), 0.0);

        // Skip any zero plateau where the line burns adjacent cells, then
        // require strict growth.
        let mut col = road_col + 1;
        while col < spec.cols && road.get(row, col) == 0.0 {
            col += 1;
        }
        let mut prev = 0.0;
        while col < spec.cols {
            let v = road.get(row, col);
            assert!(v > prev, "not monotone at col {}", col);
            prev = v;
            col += 1;
        }
    }

    #[test]
    fn test_fallback_uses_max_distance_sentinel() {
        let dir = TempDir::new().unwrap();
        let a = adapter(&dir);
        let spec = spec_for_region();
        let layers = a.fallback_layers(&spec);

        let LayerData::Single(road) = layers.get(layer::ROAD_DISTANCE).unwrap() else {
            panic!()
        };
        assert!(road
            .as_slice()
            .iter()
            .all(|&v| v == a.config.max_distance_m));

        let LayerData::Single(mask) = layers.get(layer::BUILDING_MASK).unwrap() else {
            panic!()
        };
        assert!(mask.as_slice().iter().all(|&v| v == 0.0));
    }

    #[tokio::test]
    async fn test_empty_cached_response_is_no_data() {
        let dir = TempDir::new().unwrap();
        let a = adapter(&dir);
        let r = region();
        let key = a.cache_key(&r, 10.0);
        a.cache
            .put(
                &key,
                ProviderKind::Vector,
                "json",
                br#"{"elements": []}"#,
                Some(30),
                serde_json::Value::Null,
            )
            .unwrap();

        match a.fetch(&r, 10.0).await {
            FetchResult::NoData => {}
            other => panic!("expected NoData, got {:?}", other),
        }
    }

    #[test]
    fn test_category_ids_stable() {
        assert_eq!(landuse_category_id("residential"), 1.0);
        assert_eq!(landuse_category_id("somethingelse"), 99.0);
        assert_eq!(natural_category_id("water"), 1.0);
    }
}
