//! Persistent artifact storage for fetched provider data.

mod cache;

pub use cache::{artifact_key, CacheError, DiskCache, SCHEMA_VERSION};
