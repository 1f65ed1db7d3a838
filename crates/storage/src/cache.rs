//! Disk-backed key -> artifact cache with a TTL-aware metadata index.
//!
//! Layout under the cache root:
//! - one subdirectory per provider category holding artifact files,
//! - a single `index.json` recording, per key: creation time, TTL,
//!   provider, and the opaque fetch parameters.
//!
//! Writes are atomic (write-to-temp-then-rename) so a concurrent reader
//! never observes a partially written artifact. Reads validate TTL and
//! artifact integrity; a corrupted artifact is deleted together with its
//! index entry and the read reports a miss, so the next fetch self-heals
//! the cache.

use chrono::{DateTime, Utc};
use geofuse_common::ProviderKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Current metadata index schema version.
pub const SCHEMA_VERSION: u32 = 1;

const INDEX_FILE: &str = "index.json";

/// Build a cache key from a readable prefix and the canonical parameter
/// string. The digest keeps keys filesystem-safe and guarantees that any
/// parameter difference yields a different key.
pub fn artifact_key(prefix: &str, params: &str) -> String {
    let digest = Sha256::digest(params.as_bytes());
    let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}_{}", prefix, hex)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    created: DateTime<Utc>,
    /// `None` means the entry never expires (static datasets).
    ttl_days: Option<u32>,
    provider: ProviderKind,
    /// Artifact file extension, used to locate the file on disk.
    ext: String,
    /// Opaque fetch parameters recorded for diagnostics.
    #[serde(default)]
    params: serde_json::Value,
}

impl IndexEntry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_days {
            None => false,
            Some(days) => {
                let age = now.signed_duration_since(self.created);
                age.num_seconds() > i64::from(days) * 86_400
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    schema_version: u32,
    entries: BTreeMap<String, IndexEntry>,
}

/// Persistent artifact cache.
pub struct DiskCache {
    root: PathBuf,
    entries: Mutex<BTreeMap<String, IndexEntry>>,
}

impl DiskCache {
    /// Open (or create) a cache rooted at `root`.
    ///
    /// An index written by an older schema is migrated in place: provider
    /// and creation timestamps are preserved and missing TTLs are filled
    /// with the provider default.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let index_path = root.join(INDEX_FILE);
        let entries = if index_path.exists() {
            let raw = fs::read_to_string(&index_path)?;
            match serde_json::from_str::<IndexFile>(&raw) {
                Ok(index) if index.schema_version == SCHEMA_VERSION => index.entries,
                Ok(index) => {
                    debug!(
                        from = index.schema_version,
                        to = SCHEMA_VERSION,
                        "migrating cache index schema"
                    );
                    migrate_entries(index.entries)
                }
                Err(_) => {
                    // Pre-versioned index or unreadable JSON: try the legacy
                    // shape, otherwise start over.
                    match serde_json::from_str::<BTreeMap<String, IndexEntry>>(&raw) {
                        Ok(legacy) => {
                            debug!("migrating legacy (unversioned) cache index");
                            migrate_entries(legacy)
                        }
                        Err(e) => {
                            warn!(error = %e, "cache index unreadable, starting empty");
                            BTreeMap::new()
                        }
                    }
                }
            }
        } else {
            BTreeMap::new()
        };

        let cache = Self {
            root,
            entries: Mutex::new(entries),
        };
        cache.save_index()?;
        Ok(cache)
    }

    /// Default TTL for a provider category.
    pub fn default_ttl_days(kind: ProviderKind) -> Option<u32> {
        match kind {
            // Elevation and local rasters are static datasets.
            ProviderKind::Elevation | ProviderKind::Local => None,
            ProviderKind::Embedding => Some(365),
            ProviderKind::Vector => Some(30),
        }
    }

    /// Look up a cached artifact.
    ///
    /// Returns a hit only if the entry exists, has not expired, and the
    /// backing file passes the integrity check. Expired or corrupt entries
    /// are removed and the call reports a miss.
    pub fn get(&self, key: &str) -> Option<PathBuf> {
        let entry = {
            let entries = self.entries.lock().unwrap();
            entries.get(key).cloned()?
        };

        if entry.expired(Utc::now()) {
            debug!(key, "cache entry expired");
            self.remove(key);
            return None;
        }

        let path = self.artifact_path(key, entry.provider, &entry.ext);
        if !artifact_is_sound(&path, &entry.ext) {
            warn!(key, path = %path.display(), "corrupt cache artifact, discarding");
            self.remove(key);
            return None;
        }

        debug!(key, "cache hit");
        Some(path)
    }

    /// Store an artifact and record its metadata.
    ///
    /// The artifact is written to a temporary file and renamed into place
    /// before the index entry is recorded.
    pub fn put(
        &self,
        key: &str,
        kind: ProviderKind,
        ext: &str,
        data: &[u8],
        ttl_days: Option<u32>,
        params: serde_json::Value,
    ) -> Result<PathBuf, CacheError> {
        let dir = self.root.join(kind.as_str());
        fs::create_dir_all(&dir)?;

        let path = self.artifact_path(key, kind, ext);
        let tmp = dir.join(format!("{}.{}.partial", key, ext));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;

        {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(
                key.to_string(),
                IndexEntry {
                    created: Utc::now(),
                    ttl_days,
                    provider: kind,
                    ext: ext.to_string(),
                    params,
                },
            );
        }
        self.save_index()?;

        debug!(key, bytes = data.len(), "cache store");
        Ok(path)
    }

    /// Remove one entry and its artifact. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.remove(key)
    }

    /// Sweep every expired entry. Returns the number removed.
    pub fn clear_stale(&self) -> usize {
        let now = Utc::now();
        let stale: Vec<String> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .filter(|(_, e)| e.expired(now))
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in &stale {
            self.remove(key);
        }
        stale.len()
    }

    /// Number of live index entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, key: &str, kind: ProviderKind, ext: &str) -> PathBuf {
        self.root.join(kind.as_str()).join(format!("{}.{}", key, ext))
    }

    fn remove(&self, key: &str) -> bool {
        let entry = {
            let mut entries = self.entries.lock().unwrap();
            entries.remove(key)
        };
        let Some(entry) = entry else {
            return false;
        };
        let path = self.artifact_path(key, entry.provider, &entry.ext);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key, error = %e, "failed to remove cache artifact");
            }
        }
        if let Err(e) = self.save_index() {
            warn!(error = %e, "failed to persist cache index");
        }
        true
    }

    fn save_index(&self) -> Result<(), CacheError> {
        let index = {
            let entries = self.entries.lock().unwrap();
            IndexFile {
                schema_version: SCHEMA_VERSION,
                entries: entries.clone(),
            }
        };
        let raw = serde_json::to_string_pretty(&index)?;
        let path = self.root.join(INDEX_FILE);
        let tmp = self.root.join(format!("{}.partial", INDEX_FILE));
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn migrate_entries(
    old: BTreeMap<String, IndexEntry>,
) -> BTreeMap<String, IndexEntry> {
    old.into_iter()
        .map(|(key, mut entry)| {
            if entry.ttl_days.is_none() {
                entry.ttl_days = DiskCache::default_ttl_days(entry.provider);
            }
            (key, entry)
        })
        .collect()
}

/// Cheap integrity check: the artifact must exist, be non-empty, and carry
/// the expected leading bytes for its format.
fn artifact_is_sound(path: &Path, ext: &str) -> bool {
    let Ok(mut file) = fs::File::open(path) else {
        return false;
    };
    let mut head = [0u8; 8];
    let Ok(n) = file.read(&mut head) else {
        return false;
    };
    if n == 0 {
        return false;
    }

    match ext {
        "tif" => {
            n >= 4
                && (head[..4] == [0x49, 0x49, 0x2A, 0x00] || head[..4] == [0x4D, 0x4D, 0x00, 0x2A])
        }
        "json" => head[..n]
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .map(|b| *b == b'{' || *b == b'[')
            .unwrap_or(false),
        "emb" => n >= 4 && &head[..4] == b"EMB1",
        _ => true,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache index serialization failed: {0}")]
    Index(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_cache(dir: &TempDir) -> DiskCache {
        DiskCache::open(dir.path()).unwrap()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        let path = cache
            .put(
                "vec_abc",
                ProviderKind::Vector,
                "json",
                br#"{"elements": []}"#,
                Some(30),
                serde_json::json!({"res": 10.0}),
            )
            .unwrap();
        assert!(path.exists());
        assert_eq!(cache.get("vec_abc"), Some(path));
    }

    #[test]
    fn test_miss_on_unknown_key() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        assert_eq!(cache.get("nope"), None);
    }

    #[test]
    fn test_expired_entry_is_removed() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        cache
            .put(
                "vec_old",
                ProviderKind::Vector,
                "json",
                b"[]",
                Some(30),
                serde_json::Value::Null,
            )
            .unwrap();

        // Age the entry past its TTL.
        {
            let mut entries = cache.entries.lock().unwrap();
            let entry = entries.get_mut("vec_old").unwrap();
            entry.created = Utc::now() - Duration::days(31);
        }

        assert_eq!(cache.get("vec_old"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_infinite_ttl_never_expires() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        cache
            .put(
                "elev_x",
                ProviderKind::Elevation,
                "bin",
                b"data",
                None,
                serde_json::Value::Null,
            )
            .unwrap();
        {
            let mut entries = cache.entries.lock().unwrap();
            entries.get_mut("elev_x").unwrap().created = Utc::now() - Duration::days(5000);
        }
        assert!(cache.get("elev_x").is_some());
    }

    #[test]
    fn test_corrupt_artifact_self_heals() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        let path = cache
            .put(
                "vec_bad",
                ProviderKind::Vector,
                "json",
                b"[1, 2]",
                Some(30),
                serde_json::Value::Null,
            )
            .unwrap();

        // Truncate the artifact behind the cache's back.
        fs::write(&path, b"").unwrap();

        assert_eq!(cache.get("vec_bad"), None);
        assert!(!path.exists());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_tif_magic_enforced() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        cache
            .put(
                "elev_t",
                ProviderKind::Elevation,
                "tif",
                b"not a tiff at all",
                None,
                serde_json::Value::Null,
            )
            .unwrap();
        assert_eq!(cache.get("elev_t"), None);

        cache
            .put(
                "elev_ok",
                ProviderKind::Elevation,
                "tif",
                &[0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00],
                None,
                serde_json::Value::Null,
            )
            .unwrap();
        assert!(cache.get("elev_ok").is_some());
    }

    #[test]
    fn test_clear_stale_sweeps_only_expired() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        for key in ["a", "b", "c"] {
            cache
                .put(
                    key,
                    ProviderKind::Vector,
                    "json",
                    b"[]",
                    Some(30),
                    serde_json::Value::Null,
                )
                .unwrap();
        }
        {
            let mut entries = cache.entries.lock().unwrap();
            entries.get_mut("a").unwrap().created = Utc::now() - Duration::days(45);
            entries.get_mut("b").unwrap().created = Utc::now() - Duration::days(400);
        }

        assert_eq!(cache.clear_stale(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_invalidate() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        cache
            .put(
                "k",
                ProviderKind::Vector,
                "json",
                b"[]",
                Some(30),
                serde_json::Value::Null,
            )
            .unwrap();
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open_cache(&dir);
            cache
                .put(
                    "persist",
                    ProviderKind::Embedding,
                    "emb",
                    b"EMB1rest-of-artifact",
                    Some(365),
                    serde_json::Value::Null,
                )
                .unwrap();
        }
        let cache = open_cache(&dir);
        assert!(cache.get("persist").is_some());
    }

    #[test]
    fn test_schema_migration_fills_default_ttl() {
        let dir = TempDir::new().unwrap();
        // Hand-write a version-0 index whose entry has no TTL recorded.
        let old = serde_json::json!({
            "schema_version": 0,
            "entries": {
                "vec_legacy": {
                    "created": Utc::now().to_rfc3339(),
                    "ttl_days": null,
                    "provider": "vector",
                    "ext": "json",
                }
            }
        });
        fs::write(dir.path().join(INDEX_FILE), old.to_string()).unwrap();
        fs::create_dir_all(dir.path().join("vector")).unwrap();
        fs::write(dir.path().join("vector/vec_legacy.json"), b"[]").unwrap();

        let cache = open_cache(&dir);
        let entries = cache.entries.lock().unwrap();
        let entry = entries.get("vec_legacy").expect("entry preserved");
        assert_eq!(entry.ttl_days, Some(30));
        assert_eq!(entry.provider, ProviderKind::Vector);
    }

    #[test]
    fn test_artifact_key_stability_and_distinctness() {
        let a = artifact_key("elev", "44.97000_44.99000_-93.28000_-93.25000|r10");
        let b = artifact_key("elev", "44.97000_44.99000_-93.28000_-93.25000|r10");
        let c = artifact_key("elev", "44.97000_44.99000_-93.28000_-93.25000|r30");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("elev_"));
    }
}
