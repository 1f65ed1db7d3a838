//! Provider identities and per-source fetch status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a data source category.
///
/// Doubles as the cache subdirectory name for artifacts of that source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Terrain elevation tiles.
    Elevation,
    /// Multi-band satellite embedding rasters.
    Embedding,
    /// Vector infrastructure features.
    Vector,
    /// Local raster files supplied by the caller.
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Elevation => "elevation",
            ProviderKind::Embedding => "embedding",
            ProviderKind::Vector => "vector",
            ProviderKind::Local => "local",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one provider for one harmonization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceStatus {
    /// The provider contributed data.
    Ok,
    /// The region is legitimately empty for this provider.
    NoData,
    /// The provider failed; the reason is carried for the caller.
    Error(String),
}

impl SourceStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SourceStatus::Ok)
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Ok => f.write_str("ok"),
            SourceStatus::NoData => f.write_str("noData"),
            SourceStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_cache_subdir() {
        assert_eq!(ProviderKind::Elevation.as_str(), "elevation");
        assert_eq!(ProviderKind::Vector.to_string(), "vector");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SourceStatus::NoData.to_string(), "noData");
        assert_eq!(
            SourceStatus::Error("connect refused".into()).to_string(),
            "error: connect refused"
        );
    }
}
