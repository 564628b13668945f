//! Directory listing cache
//!
//! Listings have no TTL: an entry lives until a mutation under the
//! directory invalidates it or the adapter is dropped.

use dashmap::DashMap;

use crate::connector::DirEntry;

#[derive(Default)]
pub struct DirListingCache {
    entries: DashMap<String, Vec<DirEntry>>,
}

impl DirListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dir: &str) -> Option<Vec<DirEntry>> {
        self.entries.get(dir).map(|e| e.clone())
    }

    pub fn store(&self, dir: &str, entries: Vec<DirEntry>) {
        self.entries.insert(dir.to_string(), entries);
    }

    pub fn invalidate(&self, dir: &str) {
        self.entries.remove(dir);
    }

    /// Drop a directory's listing and those of all its descendants
    pub fn invalidate_prefix(&self, dir: &str) {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.entries
            .retain(|key, _| key != dir && !key.starts_with(&prefix));
    }
}
