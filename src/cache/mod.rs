//! Adapter-local caches
//!
//! All caches are best-effort: a miss costs one extra remote round trip.
//! Content and metadata entries expire after a TTL that is re-checked on
//! every access; directory listings persist until invalidated.

pub mod content;
pub mod listing;
pub mod metadata;

use std::time::Duration;

use serde::Deserialize;

use crate::connector::pagination::DEFAULT_MAX_PAGES;

pub use content::ContentCache;
pub use listing::DirListingCache;
pub use metadata::MetadataCache;

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Lifetime of cached file content (e.g., "30s", "1m")
    #[serde(default = "default_content_ttl", with = "humantime_serde")]
    pub content_ttl: Duration,

    /// Lifetime of cached stat results
    #[serde(default = "default_metadata_ttl", with = "humantime_serde")]
    pub metadata_ttl: Duration,

    /// Ceiling on continuation pages followed by one listing
    #[serde(default = "default_max_list_pages")]
    pub max_list_pages: usize,
}

fn default_content_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_metadata_ttl() -> Duration {
    Duration::from_secs(10)
}

fn default_max_list_pages() -> usize {
    DEFAULT_MAX_PAGES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            content_ttl: default_content_ttl(),
            metadata_ttl: default_metadata_ttl(),
            max_list_pages: default_max_list_pages(),
        }
    }
}

/// Per-backend cache override; unset fields inherit from the top level
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheOverride {
    #[serde(default, with = "humantime_serde")]
    pub content_ttl: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub metadata_ttl: Option<Duration>,

    pub max_list_pages: Option<usize>,
}

impl CacheConfig {
    /// Apply a per-backend override on top of these defaults
    pub fn merged(&self, over: Option<&CacheOverride>) -> CacheConfig {
        let Some(over) = over else {
            return self.clone();
        };
        CacheConfig {
            content_ttl: over.content_ttl.unwrap_or(self.content_ttl),
            metadata_ttl: over.metadata_ttl.unwrap_or(self.metadata_ttl),
            max_list_pages: over.max_list_pages.unwrap_or(self.max_list_pages),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config: CacheConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.content_ttl, Duration::from_secs(30));
        assert_eq!(config.metadata_ttl, Duration::from_secs(10));
        assert_eq!(config.max_list_pages, 100);
    }

    #[test]
    fn test_humantime_durations() {
        let config: CacheConfig =
            serde_yaml::from_str("content_ttl: 1m\nmetadata_ttl: 500ms").unwrap();
        assert_eq!(config.content_ttl, Duration::from_secs(60));
        assert_eq!(config.metadata_ttl, Duration::from_millis(500));
    }

    #[test]
    fn test_override_merges_field_by_field() {
        let base = CacheConfig::default();
        let over: CacheOverride = serde_yaml::from_str("content_ttl: 5s").unwrap();
        let merged = base.merged(Some(&over));
        assert_eq!(merged.content_ttl, Duration::from_secs(5));
        assert_eq!(merged.metadata_ttl, base.metadata_ttl);
        assert_eq!(merged.max_list_pages, base.max_list_pages);
    }
}
