//! TTL cache of stat results

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::connector::Metadata;

#[derive(Debug, Clone)]
struct CachedMetadata {
    metadata: Metadata,
    cached_at: Instant,
}

pub struct MetadataCache {
    entries: DashMap<String, CachedMetadata>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, path: &str) -> Option<Metadata> {
        let entry = self.entries.get(path)?;
        (entry.cached_at.elapsed() < self.ttl).then(|| entry.metadata.clone())
    }

    pub fn store(&self, path: &str, metadata: Metadata) {
        // A zero TTL would make every entry dead on arrival
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(
            path.to_string(),
            CachedMetadata {
                metadata,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, path: &str) {
        self.entries.remove(path);
    }

    pub fn invalidate_prefix(&self, path: &str) {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.entries
            .retain(|key, _| key != path && !key.starts_with(&prefix));
    }
}
