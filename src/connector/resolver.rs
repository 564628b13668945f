//! Path-to-identifier resolution for ID-addressed backends
//!
//! Backends such as Google Drive address objects by opaque IDs and only
//! support "find the child named X under parent Y" queries. The resolver
//! walks a path one segment at a time from the root ID, caching every
//! resolved prefix so repeated lookups of the same or deeper paths only
//! pay for the segments not seen before.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::connector::{file_name, normalize_path, parent_path};
use crate::error::AdapterError;

/// A child found by a lookup query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    pub id: String,
    pub is_folder: bool,
}

/// Remote "child named `name` under `parent_id`" query
#[async_trait]
pub trait ChildLookup: Send + Sync {
    type Error: From<AdapterError> + Send;

    async fn find_child(&self, parent_id: &str, name: &str) -> Result<Option<ChildRef>, Self::Error>;
}

/// Normalized path prefix -> backend ID
///
/// Every entry's ancestors are also present; `set` refuses entries whose
/// parent is missing and `invalidate` removes whole subtrees. The root is
/// seeded at construction and never evicted.
#[derive(Debug)]
pub struct PathIdCache {
    root_id: String,
    entries: RwLock<HashMap<String, String>>,
}

impl PathIdCache {
    pub fn new(root_id: impl Into<String>) -> Self {
        let root_id = root_id.into();
        let mut entries = HashMap::new();
        entries.insert("/".to_string(), root_id.clone());
        Self {
            root_id,
            entries: RwLock::new(entries),
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.entries.read().get(path).cloned()
    }

    /// Cache `path -> id`; returns false if the parent prefix is not cached
    pub fn set(&self, path: &str, id: impl Into<String>) -> bool {
        if path == "/" {
            return false;
        }
        let mut entries = self.entries.write();
        if !entries.contains_key(&parent_path(path)) {
            return false;
        }
        entries.insert(path.to_string(), id.into());
        true
    }

    /// Remove `path` and every descendant prefix
    pub fn invalidate(&self, path: &str) {
        let subtree = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.entries
            .write()
            .retain(|k, _| k == "/" || (k != path && !k.starts_with(&subtree)));
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Incremental, cached path resolver
#[derive(Debug)]
pub struct IdResolver {
    cache: PathIdCache,
}

impl IdResolver {
    pub fn new(root_id: impl Into<String>) -> Self {
        Self {
            cache: PathIdCache::new(root_id),
        }
    }

    pub fn root_id(&self) -> &str {
        self.cache.root_id()
    }

    /// Resolve a path to a backend ID
    pub async fn resolve<L: ChildLookup>(&self, lookup: &L, path: &Path) -> Result<String, L::Error> {
        let normalized = normalize_path(path)?;
        if let Some(id) = self.cache.get(&normalized) {
            return Ok(id);
        }

        let mut current_id = self.cache.root_id().to_string();
        let mut current_path = String::new();

        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            current_path.push('/');
            current_path.push_str(segment);

            if let Some(id) = self.cache.get(&current_path) {
                current_id = id;
                continue;
            }

            trace!("resolve: querying {} under {}", segment, current_id);
            let child = lookup.find_child(&current_id, segment).await?.ok_or_else(|| {
                AdapterError::not_found(format!("Path not found: {}", current_path))
            })?;

            self.cache.set(&current_path, child.id.clone());
            current_id = child.id;
        }

        Ok(current_id)
    }

    /// Resolve the parent directory of a path, returning its ID and the child name
    pub async fn resolve_parent<L: ChildLookup>(
        &self,
        lookup: &L,
        path: &Path,
    ) -> Result<(String, String), L::Error> {
        let normalized = normalize_path(path)?;
        let name = file_name(&normalized)
            .ok_or_else(|| AdapterError::invalid_argument("No filename"))?
            .to_string();
        let parent_id = self
            .resolve(lookup, Path::new(&parent_path(&normalized)))
            .await?;
        Ok((parent_id, name))
    }

    pub fn invalidate(&self, path: &Path) {
        if let Ok(normalized) = normalize_path(path) {
            self.cache.invalidate(&normalized);
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}
