//! Generic filesystem adapter over connector primitives
//!
//! `Adapter` implements the composite filesystem operations once, against
//! the `Connector` primitive set. It owns the content, metadata and
//! listing caches, applies the invariant checks (root handling, file type
//! checks, empty-directory check) and converts every native failure with
//! the connector's `convert_error` exactly once.
//!
//! The adapter takes no per-path locks. Concurrent mutations of the same
//! path, such as two read-modify-write cycles, can interleave.

use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::cache::content::{slice, splice};
use crate::cache::{CacheConfig, ContentCache, DirListingCache, MetadataCache};
use crate::connector::{
    normalize_path, parent_path, Connector, CreateOptions, DirEntry, Metadata, MetadataUpdate,
    DEFAULT_DIR_MODE, DEFAULT_FILE_MODE,
};
use crate::error::{AdapterError, ErrorCode, Result};

/// Uniform filesystem contract exposed to a host VFS runtime
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Registry name of the backend behind this filesystem
    fn backend_name(&self) -> &'static str;

    async fn stat(&self, path: &Path) -> Result<Metadata>;

    /// Whether the path exists; errors other than NotFound propagate
    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn create_file(&self, path: &Path, options: CreateOptions) -> Result<()>;

    async fn mkdir(&self, path: &Path, options: CreateOptions) -> Result<()>;

    async fn unlink(&self, path: &Path) -> Result<()>;

    async fn rmdir(&self, path: &Path) -> Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Read up to `size` bytes at `offset`
    async fn read(&self, path: &Path, offset: u64, size: u32) -> Result<Bytes>;

    /// Write `data` at `offset`, returning the number of bytes written
    async fn write(&self, path: &Path, data: &[u8], offset: u64) -> Result<u32>;

    async fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    /// Update metadata in place; a no-op for backends without the notion
    async fn touch(&self, path: &Path, update: MetadataUpdate) -> Result<()>;
}

/// Composite operations over a single connector
pub struct Adapter<C: Connector> {
    connector: C,
    content: ContentCache,
    metadata: MetadataCache,
    listings: DirListingCache,
    root: Metadata,
}

impl<C: Connector> Adapter<C> {
    pub fn new(connector: C, cache: &CacheConfig) -> Self {
        Self {
            connector,
            content: ContentCache::new(cache.content_ttl),
            metadata: MetadataCache::new(cache.metadata_ttl),
            listings: DirListingCache::new(),
            root: Metadata::directory(SystemTime::now()),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The single conversion point for native errors
    fn convert(&self, err: C::Error) -> AdapterError {
        let err = self.connector.convert_error(err);
        debug!("{}: {}", self.connector.name(), err);
        err
    }

    /// Drop cached state for a mutated path and its parent's listing
    fn invalidate(&self, path: &str) {
        self.content.invalidate(path);
        self.metadata.invalidate(path);
        self.listings.invalidate(path);
        self.listings.invalidate(&parent_path(path));
        self.connector.invalidate(Path::new(path));
    }

    /// Like `invalidate`, but also everything below the path
    fn invalidate_tree(&self, path: &str) {
        self.content.invalidate_prefix(path);
        self.metadata.invalidate_prefix(path);
        self.listings.invalidate_prefix(path);
        self.listings.invalidate(&parent_path(path));
        self.connector.invalidate(Path::new(path));
    }

    /// Drop cached state of every ancestor, which may have been created implicitly
    fn invalidate_ancestors(&self, path: &str) {
        let mut current = path.to_string();
        while current != "/" {
            self.invalidate(&current);
            current = parent_path(&current);
        }
    }

    async fn stat_normalized(&self, path: &str) -> Result<Metadata> {
        if path == "/" {
            return Ok(self.root.clone());
        }
        if let Some(meta) = self.metadata.get(path) {
            trace!("metadata cache hit: {}", path);
            return Ok(meta);
        }

        let meta = self
            .connector
            .stat_remote(Path::new(path))
            .await
            .map_err(|e| self.convert(e))?;
        self.metadata.store(path, meta.clone());
        Ok(meta)
    }

    async fn readdir_normalized(&self, path: &str) -> Result<Vec<DirEntry>> {
        if let Some(entries) = self.listings.get(path) {
            trace!("listing cache hit: {}", path);
            return Ok(entries);
        }

        let entries = self
            .connector
            .list_remote(Path::new(path))
            .await
            .map_err(|e| self.convert(e))?;
        self.listings.store(path, entries.clone());
        Ok(entries)
    }

    async fn fetch(&self, path: &str) -> Result<Bytes> {
        self.content
            .get_or_fetch(path, || self.connector.read_remote(Path::new(path)))
            .await
            .map_err(|e| self.convert(e))
    }
}

/// Largest object a write may grow a file to
pub const MAX_OBJECT_SIZE: u64 = 4 << 30;

/// End offset of a write, rejecting ranges past `MAX_OBJECT_SIZE`
fn write_end(offset: u64, len: usize) -> Result<usize> {
    offset
        .checked_add(len as u64)
        .filter(|end| *end <= MAX_OBJECT_SIZE)
        .and_then(|end| usize::try_from(end).ok())
        .ok_or_else(|| {
            AdapterError::new(
                ErrorCode::MessageTooLarge,
                format!("write of {} bytes at offset {} exceeds the object size limit", len, offset),
            )
        })
}

fn root_busy(op: &str) -> AdapterError {
    AdapterError::new(ErrorCode::Busy, format!("cannot {} the root directory", op))
}

#[async_trait]
impl<C: Connector + 'static> FileSystem for Adapter<C> {
    fn backend_name(&self) -> &'static str {
        self.connector.name()
    }

    async fn stat(&self, path: &Path) -> Result<Metadata> {
        let path = normalize_path(path)?;
        trace!("stat: {}", path);
        self.stat_normalized(&path).await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.code == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_file(&self, path: &Path, options: CreateOptions) -> Result<()> {
        let path = normalize_path(path)?;
        debug!("create_file: {}", path);
        if path == "/" {
            return Err(AdapterError::new(ErrorCode::AlreadyExists, "/"));
        }

        let meta = Metadata::file(0, SystemTime::now())
            .with_mode(options.mode.unwrap_or(DEFAULT_FILE_MODE));
        let result = self
            .connector
            .create_remote(Path::new(&path), &meta)
            .await
            .map_err(|e| self.convert(e));
        self.invalidate(&path);
        result
    }

    async fn mkdir(&self, path: &Path, options: CreateOptions) -> Result<()> {
        let path = normalize_path(path)?;
        debug!("mkdir: {}", path);
        if path == "/" {
            return Err(AdapterError::new(ErrorCode::AlreadyExists, "/"));
        }

        let parent = parent_path(&path);
        let parent_missing = match self.stat_normalized(&parent).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(AdapterError::new(
                    ErrorCode::NotADirectory,
                    format!("{} is not a directory", parent),
                ));
            }
            Ok(_) => false,
            // Backends that create ancestors implicitly decide for themselves
            Err(e) if e.code == ErrorCode::NotFound => true,
            Err(e) => return Err(e),
        };

        let meta = Metadata::directory(SystemTime::now())
            .with_mode(options.mode.unwrap_or(DEFAULT_DIR_MODE));
        let result = self
            .connector
            .create_remote(Path::new(&path), &meta)
            .await
            .map_err(|e| self.convert(e));
        self.invalidate(&path);
        if parent_missing {
            self.invalidate_ancestors(&parent);
        }
        result
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        let path = normalize_path(path)?;
        debug!("unlink: {}", path);

        let meta = self.stat_normalized(&path).await?;
        if meta.is_dir() {
            return Err(AdapterError::new(
                ErrorCode::IsADirectory,
                format!("{} is a directory", path),
            ));
        }

        let result = self
            .connector
            .delete_remote(Path::new(&path))
            .await
            .map_err(|e| self.convert(e));
        self.invalidate(&path);
        result
    }

    async fn rmdir(&self, path: &Path) -> Result<()> {
        let path = normalize_path(path)?;
        debug!("rmdir: {}", path);
        if path == "/" {
            return Err(root_busy("remove"));
        }

        let meta = self.stat_normalized(&path).await?;
        if !meta.is_dir() {
            return Err(AdapterError::new(
                ErrorCode::NotADirectory,
                format!("{} is not a directory", path),
            ));
        }

        let entries = self.readdir_normalized(&path).await?;
        if !entries.is_empty() {
            return Err(AdapterError::new(
                ErrorCode::NotEmpty,
                format!("{} has {} entries", path, entries.len()),
            ));
        }

        let result = self
            .connector
            .delete_remote(Path::new(&path))
            .await
            .map_err(|e| self.convert(e));
        self.invalidate_tree(&path);
        result
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let (from, to) = (normalize_path(from)?, normalize_path(to)?);
        if from == to {
            trace!("rename: {} onto itself", from);
            return Ok(());
        }
        if from == "/" || to == "/" {
            return Err(root_busy("rename"));
        }
        debug!("rename: {} -> {}", from, to);

        let result = self
            .connector
            .move_remote(Path::new(&from), Path::new(&to))
            .await
            .map_err(|e| self.convert(e));
        self.invalidate_tree(&from);
        self.invalidate_tree(&to);
        result
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> Result<Bytes> {
        let path = normalize_path(path)?;
        trace!("read: {} offset={} size={}", path, offset, size);
        if path == "/" {
            return Err(AdapterError::new(ErrorCode::IsADirectory, "/"));
        }

        let data = self.fetch(&path).await?;
        Ok(slice(&data, offset, size))
    }

    async fn write(&self, path: &Path, data: &[u8], offset: u64) -> Result<u32> {
        let path = normalize_path(path)?;
        debug!("write: {} offset={} len={}", path, offset, data.len());
        if path == "/" {
            return Err(AdapterError::new(ErrorCode::IsADirectory, "/"));
        }
        let written = u32::try_from(data.len())
            .map_err(|_| AdapterError::new(ErrorCode::MessageTooLarge, "write exceeds 4 GiB"))?;
        let end = write_end(offset, data.len())?;

        let current = self.fetch(&path).await?;
        let updated = splice(&current, data, end - data.len());

        let result = self
            .connector
            .write_remote(Path::new(&path), updated.clone())
            .await
            .map_err(|e| self.convert(e));
        self.invalidate(&path);
        result?;

        // The remote now holds exactly this buffer
        self.content.store(&path, updated);
        Ok(written)
    }

    async fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let path = normalize_path(path)?;
        trace!("readdir: {}", path);
        self.readdir_normalized(&path).await
    }

    async fn touch(&self, path: &Path, update: MetadataUpdate) -> Result<()> {
        let path = normalize_path(path)?;
        debug!("touch: {} {:?}", path, update);
        if update.is_empty() || path == "/" {
            return Ok(());
        }

        let result = self
            .connector
            .touch_remote(Path::new(&path), &update)
            .await
            .map_err(|e| self.convert(e));
        self.metadata.invalidate(&path);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use parking_lot::Mutex;

    use crate::error::HttpError;

    /// Flat in-memory store: path -> Some(content) for files, None for dirs
    #[derive(Default)]
    struct MapConnector {
        nodes: Mutex<BTreeMap<String, Option<Bytes>>>,
        conversions: Mutex<usize>,
    }

    #[async_trait]
    impl Connector for MapConnector {
        type Error = HttpError;

        fn name(&self) -> &'static str {
            "map"
        }

        fn convert_error(&self, err: HttpError) -> AdapterError {
            *self.conversions.lock() += 1;
            crate::error::convert_http_error(err)
        }

        async fn stat_remote(&self, path: &Path) -> std::result::Result<Metadata, HttpError> {
            match self.nodes.lock().get(&normalize_path(path).unwrap()) {
                Some(Some(data)) => Ok(Metadata::file(data.len() as u64, SystemTime::now())),
                Some(None) => Ok(Metadata::directory(SystemTime::now())),
                None => Err(HttpError::status(404, "missing")),
            }
        }

        async fn create_remote(&self, path: &Path, meta: &Metadata) -> std::result::Result<(), HttpError> {
            let node = if meta.is_dir() { None } else { Some(Bytes::new()) };
            self.nodes.lock().insert(normalize_path(path).unwrap(), node);
            Ok(())
        }

        async fn delete_remote(&self, path: &Path) -> std::result::Result<(), HttpError> {
            self.nodes
                .lock()
                .remove(&normalize_path(path).unwrap())
                .map(|_| ())
                .ok_or_else(|| HttpError::status(404, "missing"))
        }

        async fn move_remote(&self, from: &Path, to: &Path) -> std::result::Result<(), HttpError> {
            let mut nodes = self.nodes.lock();
            let node = nodes
                .remove(&normalize_path(from).unwrap())
                .ok_or_else(|| HttpError::status(404, "missing"))?;
            nodes.insert(normalize_path(to).unwrap(), node);
            Ok(())
        }

        async fn read_remote(&self, path: &Path) -> std::result::Result<Bytes, HttpError> {
            match self.nodes.lock().get(&normalize_path(path).unwrap()) {
                Some(Some(data)) => Ok(data.clone()),
                _ => Err(HttpError::status(404, "missing")),
            }
        }

        async fn write_remote(&self, path: &Path, data: Bytes) -> std::result::Result<(), HttpError> {
            self.nodes.lock().insert(normalize_path(path).unwrap(), Some(data));
            Ok(())
        }

        async fn list_remote(&self, path: &Path) -> std::result::Result<Vec<DirEntry>, HttpError> {
            let dir = normalize_path(path).unwrap();
            let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
            Ok(self
                .nodes
                .lock()
                .iter()
                .filter_map(|(key, node)| {
                    let rest = key.strip_prefix(&prefix)?;
                    if rest.is_empty() || rest.contains('/') {
                        return None;
                    }
                    Some(match node {
                        Some(_) => DirEntry::file(rest),
                        None => DirEntry::directory(rest),
                    })
                })
                .collect())
        }
    }

    fn adapter() -> Adapter<MapConnector> {
        Adapter::new(MapConnector::default(), &CacheConfig::default())
    }

    #[tokio::test]
    async fn test_root_is_synthetic_directory() {
        let fs = adapter();
        assert!(fs.stat(Path::new("/")).await.unwrap().is_dir());
        assert!(fs.stat(Path::new("")).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_not_found_converted_once() {
        let fs = adapter();
        let err = fs.stat(Path::new("/nope")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(*fs.connector().conversions.lock(), 1);
    }

    #[tokio::test]
    async fn test_rename_onto_itself_is_noop() {
        let fs = adapter();
        fs.rename(Path::new("/missing"), Path::new("/missing/"))
            .await
            .unwrap();
        assert_eq!(*fs.connector().conversions.lock(), 0);
    }

    #[tokio::test]
    async fn test_root_mutations_rejected() {
        let fs = adapter();
        assert_eq!(
            fs.rmdir(Path::new("/")).await.unwrap_err().code,
            ErrorCode::Busy
        );
        assert_eq!(
            fs.mkdir(Path::new("/"), CreateOptions::default())
                .await
                .unwrap_err()
                .code,
            ErrorCode::AlreadyExists
        );
        assert_eq!(
            fs.unlink(Path::new("/")).await.unwrap_err().code,
            ErrorCode::IsADirectory
        );
    }

    #[tokio::test]
    async fn test_write_updates_cache() {
        let fs = adapter();
        fs.create_file(Path::new("/f"), CreateOptions::default())
            .await
            .unwrap();
        fs.write(Path::new("/f"), b"abc", 0).await.unwrap();

        // Change the remote behind the adapter's back: the cached buffer wins
        fs.connector()
            .nodes
            .lock()
            .insert("/f".into(), Some(Bytes::from_static(b"zzz")));
        assert_eq!(&fs.read(Path::new("/f"), 0, 10).await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn test_write_to_missing_file_fails() {
        let fs = adapter();
        let err = fs.write(Path::new("/ghost"), b"x", 0).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_write_past_size_limit_rejected() {
        let fs = adapter();
        fs.create_file(Path::new("/f"), CreateOptions::default())
            .await
            .unwrap();

        for offset in [u64::MAX, 1 << 40, MAX_OBJECT_SIZE] {
            let err = fs.write(Path::new("/f"), b"x", offset).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::MessageTooLarge);
        }
        assert_eq!(&fs.read(Path::new("/f"), 0, 10).await.unwrap()[..], b"");
    }

    #[test]
    fn test_write_end() {
        assert_eq!(write_end(0, 3).unwrap(), 3);
        assert_eq!(write_end(MAX_OBJECT_SIZE - 1, 1).unwrap() as u64, MAX_OBJECT_SIZE);
        assert!(write_end(u64::MAX, 1).is_err());
    }

    #[tokio::test]
    async fn test_non_utf8_path_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let fs = adapter();
        let bad = Path::new(OsStr::from_bytes(b"/\xff"));
        let other = Path::new(OsStr::from_bytes(b"/\xfe"));

        assert_eq!(fs.stat(bad).await.unwrap_err().code, ErrorCode::InvalidArgument);
        assert_eq!(
            fs.mkdir(bad, CreateOptions::default()).await.unwrap_err().code,
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            fs.rename(bad, other).await.unwrap_err().code,
            ErrorCode::InvalidArgument
        );
        assert!(fs.connector().nodes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_exists() {
        let fs = adapter();
        fs.mkdir(Path::new("/d"), CreateOptions::default())
            .await
            .unwrap();
        assert!(fs.exists(Path::new("/d")).await.unwrap());
        assert!(!fs.exists(Path::new("/e")).await.unwrap());
    }
}
