pub mod dropbox;
pub mod gdrive;
pub mod pagination;
pub mod registry;
pub mod resolver;
pub mod s3;
pub mod s3_attrs;

use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AdapterError;

/// File type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

/// Default file mode (rw-r--r--)
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Default directory mode (rwxr-xr-x)
pub const DEFAULT_DIR_MODE: u32 = 0o755;

const S_IFMT: u32 = libc::S_IFMT as u32;
const S_IFDIR: u32 = libc::S_IFDIR as u32;
const S_IFREG: u32 = libc::S_IFREG as u32;

/// Metadata snapshot for a file or directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub file_type: FileType,
    /// POSIX permission bits (e.g., 0o644)
    pub mode: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub birthtime: SystemTime,
    pub uid: u32,
    pub gid: u32,
}

impl Metadata {
    pub fn file(size: u64, mtime: SystemTime) -> Self {
        Self {
            file_type: FileType::File,
            mode: DEFAULT_FILE_MODE,
            size,
            atime: mtime,
            mtime,
            ctime: mtime,
            birthtime: mtime,
            uid: 0,
            gid: 0,
        }
    }

    pub fn directory(mtime: SystemTime) -> Self {
        Self {
            file_type: FileType::Directory,
            mode: DEFAULT_DIR_MODE,
            size: 0,
            atime: mtime,
            mtime,
            ctime: mtime,
            birthtime: mtime,
            uid: 0,
            gid: 0,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode & 0o7777;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    /// Type and permission bits combined, as `st_mode`
    pub fn st_mode(&self) -> u32 {
        let kind = match self.file_type {
            FileType::File => S_IFREG,
            FileType::Directory => S_IFDIR,
        };
        kind | (self.mode & 0o7777)
    }

    /// Split an `st_mode` value into file type and permission bits
    pub fn split_st_mode(st_mode: u32) -> (FileType, u32) {
        let file_type = if st_mode & S_IFMT == S_IFDIR {
            FileType::Directory
        } else {
            FileType::File
        };
        (file_type, st_mode & 0o7777)
    }

    /// Apply a partial update in place
    pub fn apply(&mut self, update: &MetadataUpdate) {
        if let Some(mode) = update.mode {
            self.mode = mode & 0o7777;
        }
        if let Some(atime) = update.atime {
            self.atime = atime;
        }
        if let Some(mtime) = update.mtime {
            self.mtime = mtime;
        }
        if let Some(uid) = update.uid {
            self.uid = uid;
        }
        if let Some(gid) = update.gid {
            self.gid = gid;
        }
        self.ctime = SystemTime::now();
    }
}

/// Partial metadata for in-place touch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub mode: Option<u32>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self == &MetadataUpdate::default()
    }
}

/// Options for file and directory creation
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Permission bits; None means use the default for the file type
    pub mode: Option<u32>,
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub file_type: FileType,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_type: FileType::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_type: FileType::Directory,
        }
    }
}

/// Primitive operations a storage backend supplies to the generic adapter
///
/// Connectors are path-based. Every primitive reports failures in the
/// backend's native error shape; the adapter converts them with
/// `convert_error` exactly once before they leave the crate.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Native error type raised by the primitives
    type Error: std::error::Error + Send + Sync + 'static;

    /// Backend name used in logs and the registry
    fn name(&self) -> &'static str;

    /// Map a native error onto the normalized taxonomy
    fn convert_error(&self, err: Self::Error) -> AdapterError;

    /// Get metadata for a non-root path
    async fn stat_remote(&self, path: &Path) -> Result<Metadata, Self::Error>;

    /// Create a file or directory described by `metadata`
    async fn create_remote(&self, path: &Path, metadata: &Metadata) -> Result<(), Self::Error>;

    /// Delete a file or an empty directory
    async fn delete_remote(&self, path: &Path) -> Result<(), Self::Error>;

    /// Move a file or directory
    async fn move_remote(&self, from: &Path, to: &Path) -> Result<(), Self::Error>;

    /// Read the full contents of a file
    async fn read_remote(&self, path: &Path) -> Result<Bytes, Self::Error>;

    /// Replace the full contents of a file
    async fn write_remote(&self, path: &Path, data: Bytes) -> Result<(), Self::Error>;

    /// List a directory in backend order
    async fn list_remote(&self, path: &Path) -> Result<Vec<DirEntry>, Self::Error>;

    /// Update metadata without touching content
    ///
    /// Default implementation is a no-op for backends without the notion
    async fn touch_remote(&self, _path: &Path, _update: &MetadataUpdate) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Drop any backend-local state held for `path` and its descendants
    fn invalidate(&self, _path: &Path) {}
}

/// Normalize a path to a consistent `/a/b` form
///
/// Remote stores name entries with UTF-8 strings, so any other path is
/// rejected rather than mapped onto some unrelated name.
pub fn normalize_path(path: &Path) -> Result<String, AdapterError> {
    let raw = path.to_str().ok_or_else(|| {
        AdapterError::invalid_argument(format!("Path is not valid UTF-8: {:?}", path))
    })?;
    let parts: Vec<&str> = raw
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", parts.join("/")))
    }
}

/// Parent of a normalized path; the root is its own parent
pub fn parent_path(normalized: &str) -> String {
    match normalized.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Final component of a normalized path
pub fn file_name(normalized: &str) -> Option<&str> {
    normalized.rsplit('/').next().filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("")).unwrap(), "/");
        assert_eq!(normalize_path(Path::new("/")).unwrap(), "/");
        assert_eq!(normalize_path(Path::new("a/b")).unwrap(), "/a/b");
        assert_eq!(normalize_path(Path::new("//a/./b/")).unwrap(), "/a/b");
    }

    #[test]
    fn test_normalize_rejects_non_utf8() {
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new(std::ffi::OsStr::from_bytes(b"/\xff"));
        let err = normalize_path(path).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent_path("/a/b/c"), "/a/b");
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(parent_path("/"), "/");
        assert_eq!(file_name("/a/b"), Some("b"));
        assert_eq!(file_name("/"), None);
    }

    #[test]
    fn test_st_mode_roundtrip() {
        let meta = Metadata::directory(SystemTime::UNIX_EPOCH).with_mode(0o750);
        let (kind, perm) = Metadata::split_st_mode(meta.st_mode());
        assert_eq!(kind, FileType::Directory);
        assert_eq!(perm, 0o750);

        let file = Metadata::file(3, SystemTime::UNIX_EPOCH);
        assert_eq!(Metadata::split_st_mode(file.st_mode()).0, FileType::File);
    }

    #[test]
    fn test_apply_update() {
        let mut meta = Metadata::file(0, SystemTime::UNIX_EPOCH);
        let update = MetadataUpdate {
            mode: Some(0o600),
            uid: Some(1000),
            ..Default::default()
        };
        meta.apply(&update);
        assert_eq!(meta.mode, 0o600);
        assert_eq!(meta.uid, 1000);
        assert_eq!(meta.gid, 0);
        assert!(!update.is_empty());
        assert!(MetadataUpdate::default().is_empty());
    }
}
