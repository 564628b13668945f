//! S3 connector implementation
//!
//! This connector provides access to Amazon S3 or S3-compatible storage
//! backends (MinIO, LocalStack, etc.). The bucket is a flat key space;
//! directories are `key/` marker objects or are implied by any key under
//! the prefix. Metadata records ride along as user metadata (see
//! [`s3_attrs`](crate::connector::s3_attrs)).

use std::path::Path;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{Delete, MetadataDirective, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::connector::pagination::{list_all, Page, PageSource, DEFAULT_MAX_PAGES};
use crate::connector::{s3_attrs, Connector, DirEntry, Metadata, MetadataUpdate};
use crate::error::{convert_http_error, AdapterError, HttpError};

/// Maximum keys per DeleteObjects request
const DELETE_BATCH: usize = 1000;

/// S3 connector options
#[derive(Debug, Clone, Deserialize)]
pub struct S3ConnectorConfig {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region
    pub region: Option<String>,

    /// Key prefix selecting a subpath of the bucket
    pub prefix: Option<String>,

    /// Custom endpoint URL (for S3-compatible stores)
    pub endpoint: Option<String>,

    /// Force path-style addressing (for MinIO, LocalStack, etc.)
    #[serde(default)]
    pub force_path_style: bool,

    /// Allowed drift between the mtime attribute and the object's LastModified
    #[serde(default = "default_mtime_tolerance", with = "humantime_serde")]
    pub mtime_tolerance: Duration,
}

fn default_mtime_tolerance() -> Duration {
    Duration::from_secs(5)
}

/// Wrap an SDK error in the native status shape
fn sdk_error<E>(op: &str, err: SdkError<E, HttpResponse>) -> HttpError
where
    E: std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = format!("S3 {} error: {}", op, DisplayErrorContext(&err));
    match status {
        Some(status) => HttpError::status(status, message),
        None => HttpError::Transport(message),
    }
}

fn is_not_found<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response().map(|r| r.status().as_u16()) == Some(404)
}

fn to_system_time(dt: &DateTime) -> Option<SystemTime> {
    let secs = u64::try_from(dt.secs()).ok()?;
    SystemTime::UNIX_EPOCH.checked_add(Duration::new(secs, dt.subsec_nanos()))
}

/// The attribute record an object carries, if any
fn stored_record(info: &ObjectInfo) -> Result<Option<Metadata>, AdapterError> {
    match &info.attrs {
        Some(attrs) => s3_attrs::decode(attrs),
        None => Ok(None),
    }
}

/// What a HEAD (or GET) told us about an object
struct ObjectInfo {
    len: u64,
    last_modified: Option<SystemTime>,
    attrs: Option<std::collections::HashMap<String, String>>,
}

/// One item of a ListObjectsV2 page
enum ListItem {
    Object(String),
    Prefix(String),
}

/// ListObjectsV2 over a fixed prefix
struct ObjectPages<'a> {
    connector: &'a S3Connector,
    prefix: String,
    delimited: bool,
}

impl ObjectPages<'_> {
    async fn fetch(&self, token: Option<&str>) -> Result<Page<ListItem>, HttpError> {
        let mut request = self
            .connector
            .client
            .list_objects_v2()
            .bucket(&self.connector.bucket)
            .prefix(&self.prefix);

        if self.delimited {
            request = request.delimiter("/");
        }
        if let Some(token) = token {
            request = request.continuation_token(token);
        }

        let result = request
            .send()
            .await
            .map_err(|e| sdk_error("ListObjectsV2", e))?;

        let mut entries: Vec<ListItem> = result
            .contents()
            .iter()
            .filter_map(|obj| obj.key())
            .map(|k| ListItem::Object(k.to_string()))
            .collect();
        entries.extend(
            result
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix())
                .map(|p| ListItem::Prefix(p.to_string())),
        );

        Ok(Page::new(
            entries,
            result.is_truncated().unwrap_or(false),
            result.next_continuation_token().map(|s| s.to_string()),
        ))
    }
}

#[async_trait]
impl PageSource for ObjectPages<'_> {
    type Entry = ListItem;
    type Error = HttpError;

    async fn first_page(&self, _path: &str) -> Result<Page<ListItem>, HttpError> {
        self.fetch(None).await
    }

    async fn next_page(&self, cursor: &str) -> Result<Page<ListItem>, HttpError> {
        self.fetch(Some(cursor)).await
    }
}

/// S3 connector for Amazon S3 and S3-compatible storage
pub struct S3Connector {
    client: Client,
    bucket: String,
    prefix: String,
    mtime_tolerance: Duration,
    max_list_pages: usize,
}

impl S3Connector {
    /// Create a new S3 connector from configuration
    pub async fn new(config: S3ConnectorConfig) -> Self {
        let mut sdk_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(Region::new(region.clone()));
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Self::from_client(client, config.bucket, config.prefix.unwrap_or_default())
            .with_mtime_tolerance(config.mtime_tolerance)
    }

    /// Wrap an already-configured client
    pub fn from_client(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            mtime_tolerance: default_mtime_tolerance(),
            max_list_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_mtime_tolerance(mut self, tolerance: Duration) -> Self {
        self.mtime_tolerance = tolerance;
        self
    }

    pub fn with_max_list_pages(mut self, max_pages: usize) -> Self {
        self.max_list_pages = max_pages;
        self
    }

    /// Convert a filesystem path to an S3 key
    fn path_to_key(&self, path: &Path) -> String {
        let path_str = path.to_string_lossy();
        let path_str = path_str.trim_matches('/');

        if path_str.is_empty() {
            self.prefix.clone()
        } else if self.prefix.is_empty() {
            path_str.to_string()
        } else if self.prefix.ends_with('/') {
            format!("{}{}", self.prefix, path_str)
        } else {
            format!("{}/{}", self.prefix, path_str)
        }
    }

    /// Key of the directory marker (and listing prefix) for a path
    fn dir_key(&self, path: &Path) -> String {
        let mut key = self.path_to_key(path);
        if !key.is_empty() && !key.ends_with('/') {
            key.push('/');
        }
        key
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, HttpError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectInfo {
                len: output.content_length().unwrap_or(0).max(0) as u64,
                last_modified: output.last_modified().and_then(to_system_time),
                attrs: output.metadata().cloned(),
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(sdk_error("HeadObject", e)),
        }
    }

    /// Decode and check the attributes of an object
    fn describe(&self, key: &str, info: &ObjectInfo, is_dir: bool) -> Result<Metadata, HttpError> {
        let Some(mut meta) = stored_record(info)? else {
            let mtime = info.last_modified.unwrap_or_else(SystemTime::now);
            return Ok(if is_dir {
                Metadata::directory(mtime)
            } else {
                Metadata::file(info.len, mtime)
            });
        };

        if let Err(e) = s3_attrs::verify(&meta, info.len, info.last_modified, self.mtime_tolerance) {
            warn!("stat: attributes of {} are inconsistent: {}", key, e);
            return Err(e.into());
        }

        if is_dir {
            meta.file_type = crate::connector::FileType::Directory;
        }
        Ok(meta)
    }

    /// Locate the object backing a path: the plain key or the directory marker
    async fn locate(&self, path: &Path) -> Result<Option<(String, ObjectInfo, bool)>, HttpError> {
        let key = self.path_to_key(path);
        if let Some(info) = self.head(&key).await? {
            return Ok(Some((key, info, false)));
        }
        let dir_key = self.dir_key(path);
        if let Some(info) = self.head(&dir_key).await? {
            return Ok(Some((dir_key, info, true)));
        }
        Ok(None)
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        meta: &Metadata,
    ) -> Result<(), HttpError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_metadata(Some(s3_attrs::encode(meta)))
            .send()
            .await
            .map_err(|e| sdk_error("PutObject", e))?;
        Ok(())
    }

    /// Copy one object, carrying its attribute record over re-stamped
    async fn copy(&self, from_key: &str, to_key: &str) -> Result<(), HttpError> {
        let meta = match self.head(from_key).await? {
            Some(info) => stored_record(&info)?,
            None => None,
        };
        self.copy_with(from_key, to_key, meta.as_ref()).await
    }

    /// Server-side copy; with a record, the destination gets it re-stamped
    /// to the copy time since S3 resets LastModified
    async fn copy_with(
        &self,
        from_key: &str,
        to_key: &str,
        meta: Option<&Metadata>,
    ) -> Result<(), HttpError> {
        let copy_source = format!("{}/{}", self.bucket, from_key);
        let mut request = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .key(to_key)
            .copy_source(&copy_source);

        if let Some(meta) = meta {
            request = request
                .metadata_directive(MetadataDirective::Replace)
                .set_metadata(Some(s3_attrs::restamp(meta, SystemTime::now())));
        }

        request
            .send()
            .await
            .map_err(|e| sdk_error("CopyObject", e))?;
        Ok(())
    }

    async fn delete_keys(&self, keys: Vec<String>) -> Result<(), HttpError> {
        for chunk in keys.chunks(DELETE_BATCH) {
            let objects = chunk
                .iter()
                .map(|k| {
                    ObjectIdentifier::builder()
                        .key(k)
                        .build()
                        .map_err(|e| HttpError::Transport(format!("Failed to build delete: {}", e)))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| HttpError::Transport(format!("Failed to build delete: {}", e)))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| sdk_error("DeleteObjects", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for S3Connector {
    type Error = HttpError;

    fn name(&self) -> &'static str {
        "s3"
    }

    fn convert_error(&self, err: HttpError) -> AdapterError {
        convert_http_error(err)
    }

    async fn stat_remote(&self, path: &Path) -> Result<Metadata, HttpError> {
        trace!("stat: path={:?}", path);

        if let Some((key, info, is_dir)) = self.locate(path).await? {
            return self.describe(&key, &info, is_dir);
        }

        // No marker; the directory may still be implied by keys below it
        let dir_key = self.dir_key(path);
        let list_result = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&dir_key)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| sdk_error("ListObjectsV2", e))?;

        if list_result.key_count().unwrap_or(0) > 0 || !list_result.common_prefixes().is_empty() {
            return Ok(Metadata::directory(SystemTime::now()));
        }

        Err(AdapterError::not_found(format!("Path not found: {:?}", path)).into())
    }

    async fn create_remote(&self, path: &Path, metadata: &Metadata) -> Result<(), HttpError> {
        let key = if metadata.is_dir() {
            self.dir_key(path)
        } else {
            self.path_to_key(path)
        };
        debug!("create: path={:?} key={} mode={:o}", path, key, metadata.mode);

        let mut meta = metadata.clone();
        meta.size = 0;
        self.put(&key, Bytes::new(), &meta).await
    }

    async fn delete_remote(&self, path: &Path) -> Result<(), HttpError> {
        let Some((key, _, _)) = self.locate(path).await? else {
            return Err(AdapterError::not_found(format!("Path not found: {:?}", path)).into());
        };
        debug!("delete: path={:?} key={}", path, key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteObject", e))?;
        Ok(())
    }

    async fn move_remote(&self, from: &Path, to: &Path) -> Result<(), HttpError> {
        let from_key = self.path_to_key(from);
        if let Some(info) = self.head(&from_key).await? {
            let to_key = self.path_to_key(to);
            debug!("move: {} -> {}", from_key, to_key);
            let meta = stored_record(&info)?;
            self.copy_with(&from_key, &to_key, meta.as_ref()).await?;
            return self.delete_keys(vec![from_key]).await;
        }

        // Directory: relocate every key under the prefix
        let from_prefix = self.dir_key(from);
        let to_prefix = self.dir_key(to);
        let pages = ObjectPages {
            connector: self,
            prefix: from_prefix.clone(),
            delimited: false,
        };
        let keys: Vec<String> = list_all(&pages, &from_prefix, self.max_list_pages)
            .await?
            .into_iter()
            .filter_map(|item| match item {
                ListItem::Object(k) => Some(k),
                ListItem::Prefix(_) => None,
            })
            .collect();

        if keys.is_empty() {
            return Err(AdapterError::not_found(format!("Path not found: {:?}", from)).into());
        }

        debug!("move: {} keys {} -> {}", keys.len(), from_prefix, to_prefix);
        for key in &keys {
            let rest = key.strip_prefix(&from_prefix).unwrap_or(key);
            self.copy(key, &format!("{}{}", to_prefix, rest)).await?;
        }
        self.delete_keys(keys).await
    }

    async fn read_remote(&self, path: &Path) -> Result<Bytes, HttpError> {
        let key = self.path_to_key(path);
        trace!("read: path={:?} key={}", path, key);

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| sdk_error("GetObject", e))?;

        let info = ObjectInfo {
            len: 0,
            last_modified: result.last_modified().and_then(to_system_time),
            attrs: result.metadata().cloned(),
        };

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| HttpError::Transport(format!("S3 read body error: {}", e)))?
            .into_bytes();

        self.describe(
            &key,
            &ObjectInfo {
                len: body.len() as u64,
                ..info
            },
            false,
        )?;

        Ok(body)
    }

    async fn write_remote(&self, path: &Path, data: Bytes) -> Result<(), HttpError> {
        let key = self.path_to_key(path);
        debug!("write: path={:?} key={} size={}", path, key, data.len());

        let now = SystemTime::now();
        let mut meta = match self.head(&key).await? {
            Some(info) => match info.attrs.as_ref().map(s3_attrs::decode).transpose()? {
                Some(Some(meta)) => meta,
                _ => Metadata::file(info.len, now),
            },
            None => Metadata::file(0, now),
        };
        meta.size = data.len() as u64;
        meta.mtime = now;
        meta.ctime = now;

        self.put(&key, data, &meta).await
    }

    async fn list_remote(&self, path: &Path) -> Result<Vec<DirEntry>, HttpError> {
        let prefix = self.dir_key(path);
        trace!("list: path={:?} prefix={}", path, prefix);

        let pages = ObjectPages {
            connector: self,
            prefix: prefix.clone(),
            delimited: true,
        };
        let items = list_all(&pages, &prefix, self.max_list_pages).await?;

        let entries = items
            .into_iter()
            .filter_map(|item| match item {
                ListItem::Object(key) => {
                    let name = key.strip_prefix(&prefix).unwrap_or(&key);
                    // Skip the directory's own marker and nested keys
                    if name.is_empty() || name.contains('/') {
                        None
                    } else {
                        Some(DirEntry::file(name))
                    }
                }
                ListItem::Prefix(p) => {
                    let name = p.strip_prefix(&prefix).unwrap_or(&p).trim_end_matches('/');
                    (!name.is_empty()).then(|| DirEntry::directory(name))
                }
            })
            .collect();
        Ok(entries)
    }

    async fn touch_remote(&self, path: &Path, update: &MetadataUpdate) -> Result<(), HttpError> {
        let Some((key, info, is_dir)) = self.locate(path).await? else {
            return Err(AdapterError::not_found(format!("Path not found: {:?}", path)).into());
        };
        debug!("touch: path={:?} key={} update={:?}", path, key, update);

        let mut meta = self.describe(&key, &info, is_dir)?;
        meta.apply(update);
        self.copy_with(&key, &key, Some(&meta)).await
    }
}
