//! Per-path TTL content cache
//!
//! Entries are whole objects. None of the backends accept partial-object
//! writes, so a write is a read-modify-write of the entire buffer: cost is
//! O(object size) per write, which makes this unsuitable for incremental
//! appends to large objects.

use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Cached object content
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Bytes,
    timestamp: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.timestamp.elapsed() < ttl
    }
}

/// Whole-object byte cache keyed by normalized path
pub struct ContentCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ContentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached bytes, if present and still within the TTL
    pub fn get(&self, path: &str) -> Option<Bytes> {
        let entry = self.entries.get(path)?;
        if entry.is_fresh(self.ttl) {
            Some(entry.data.clone())
        } else {
            trace!("content cache: {} expired", path);
            None
        }
    }

    /// Replace the entry for a path, stamped with the current time
    pub fn store(&self, path: &str, data: Bytes) {
        self.entries.insert(
            path.to_string(),
            CacheEntry {
                data,
                timestamp: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, path: &str) {
        self.entries.remove(path);
    }

    /// Drop every entry at or below a directory path
    pub fn invalidate_prefix(&self, path: &str) {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.entries
            .retain(|key, _| key != path && !key.starts_with(&prefix));
    }

    /// Return fresh cached bytes or fetch, store and return new ones
    pub async fn get_or_fetch<F, Fut, E>(&self, path: &str, fetch: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        if let Some(data) = self.get(path) {
            debug!("content cache hit: {}", path);
            return Ok(data);
        }

        debug!("content cache miss: {}", path);
        let data = fetch().await?;
        self.store(path, data.clone());
        Ok(data)
    }
}

/// Overlay `data` at `offset`, zero-filling any gap past the current end
///
/// # Panics
///
/// If `offset + data.len()` overflows `usize`. Callers bound the range first.
pub fn splice(current: &[u8], data: &[u8], offset: usize) -> Bytes {
    let end = offset + data.len();
    let mut buf = BytesMut::with_capacity(current.len().max(end));
    buf.extend_from_slice(current);
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[offset..end].copy_from_slice(data);
    buf.freeze()
}

/// Slice `size` bytes from `offset`; short at EOF, empty past it
pub fn slice(data: &Bytes, offset: u64, size: u32) -> Bytes {
    let len = data.len() as u64;
    if offset >= len {
        return Bytes::new();
    }
    let end = (offset + size as u64).min(len);
    data.slice(offset as usize..end as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_splice_overwrite_in_place() {
        assert_eq!(&splice(b"hello world", b"WORLD", 6)[..], b"hello WORLD");
    }

    #[test]
    fn test_splice_extends() {
        assert_eq!(&splice(b"abc", b"defg", 2)[..], b"abdefg");
    }

    #[test]
    fn test_splice_zero_fills_gap() {
        assert_eq!(&splice(b"ab", b"z", 5)[..], b"ab\0\0\0z");
    }

    #[test]
    fn test_slice_bounds() {
        let data = Bytes::from_static(b"0123456789");
        assert_eq!(&slice(&data, 2, 3)[..], b"234");
        assert_eq!(&slice(&data, 8, 10)[..], b"89");
        assert!(slice(&data, 10, 1).is_empty());
        assert!(slice(&data, 50, 1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_fetch_respects_ttl() {
        let cache = ContentCache::new(Duration::from_secs(30));
        let counter = AtomicUsize::new(0);
        let fetches = &counter;
        let fetch = move || async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(Bytes::from_static(b"data"))
        };

        cache.get_or_fetch("/a", fetch).await.unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;
        cache.get_or_fetch("/a", fetch).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.get_or_fetch("/a", fetch).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache = ContentCache::new(Duration::from_secs(30));
        let result = cache
            .get_or_fetch("/a", || async { Err::<Bytes, _>("boom") })
            .await;
        assert_eq!(result.unwrap_err(), "boom");
        assert!(cache.get("/a").is_none());
    }

    #[test]
    fn test_invalidate_prefix() {
        let cache = ContentCache::new(Duration::from_secs(30));
        cache.store("/dir/a", Bytes::from_static(b"1"));
        cache.store("/dir/sub/b", Bytes::from_static(b"2"));
        cache.store("/dirty", Bytes::from_static(b"3"));

        cache.invalidate_prefix("/dir");
        assert!(cache.get("/dir/a").is_none());
        assert!(cache.get("/dir/sub/b").is_none());
        assert!(cache.get("/dirty").is_some());
    }
}
