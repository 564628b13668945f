//! Google Drive connector implementation
//!
//! This connector provides access to Google Drive using a service account.
//! Drive addresses files by ID, so paths are mapped to file IDs through
//! the incremental [`IdResolver`]. POSIX mode and ownership are kept in
//! the file's `appProperties`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use google_drive3::api::{File, Scope};
use google_drive3::yup_oauth2::{read_service_account_key, ServiceAccountAuthenticator};
use google_drive3::DriveHub;
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::connector::pagination::{list_all, Page, PageSource, DEFAULT_MAX_PAGES};
use crate::connector::resolver::{ChildLookup, ChildRef, IdResolver};
use crate::connector::{
    Connector, DirEntry, Metadata, MetadataUpdate, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE,
};
use crate::error::{convert_http_error, AdapterError, ErrorCode, HttpError};

/// MIME type for Google Drive folders
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// MIME type for uploaded file content
const FILE_MIME_TYPE: &str = "application/octet-stream";

/// Fields to request for file metadata
const FILE_FIELDS: &str =
    "id, name, mimeType, size, modifiedTime, createdTime, viewedByMeTime, appProperties, parents";

/// Fields to request for child lookups
const LOOKUP_FIELDS: &str = "files(id, mimeType)";

/// Fields to request for file list
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType)";

const MODE_PROPERTY: &str = "posix-mode";
const UID_PROPERTY: &str = "posix-uid";
const GID_PROPERTY: &str = "posix-gid";

pub type DriveClient = DriveHub<hyper_rustls::HttpsConnector<HttpConnector>>;

/// Google Drive connector options
#[derive(Debug, Clone, Deserialize)]
pub struct GDriveConnectorConfig {
    /// Path to credentials JSON file
    pub credentials_path: PathBuf,

    /// Root folder ID in Google Drive
    pub root_folder_id: String,
}

/// Whether native TLS roots can be loaded for the Drive client
pub fn tls_roots_available() -> bool {
    hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .is_ok()
}

/// Extract status and message from a Drive JSON error body
fn bad_request_status(value: &serde_json::Value) -> (u16, String) {
    let error = value.get("error");
    let status = error
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_u64())
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(400);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string());
    (status, message)
}

/// Wrap a Drive client error in the native status shape
fn drive_error(op: &str, err: google_drive3::Error) -> HttpError {
    match err {
        google_drive3::Error::BadRequest(value) => {
            let (status, message) = bad_request_status(&value);
            HttpError::status(status, format!("Drive {} error: {}", op, message))
        }
        google_drive3::Error::Failure(response) => HttpError::status(
            response.status().as_u16(),
            format!("Drive {} error: {}", op, response.status()),
        ),
        other => HttpError::Transport(format!("Drive {} error: {}", op, other)),
    }
}

/// Quote a value for a Drive query string
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn to_system_time(dt: Option<&DateTime<Utc>>) -> Option<SystemTime> {
    dt.map(|dt| SystemTime::from(*dt))
}

fn is_folder(file: &File) -> bool {
    file.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
}

/// Convert a Google Drive File to our Metadata
fn file_to_metadata(file: &File) -> Metadata {
    let mtime = to_system_time(file.modified_time.as_ref()).unwrap_or_else(SystemTime::now);

    let mut meta = if is_folder(file) {
        Metadata::directory(mtime)
    } else {
        // size is Option<i64> in the API
        Metadata::file(file.size.unwrap_or(0).max(0) as u64, mtime)
    };

    if let Some(created) = to_system_time(file.created_time.as_ref()) {
        meta.birthtime = created;
    }
    if let Some(viewed) = to_system_time(file.viewed_by_me_time.as_ref()) {
        meta.atime = viewed;
    }

    if let Some(props) = &file.app_properties {
        if let Some(mode) = props.get(MODE_PROPERTY).and_then(|m| u32::from_str_radix(m, 8).ok()) {
            meta.mode = mode & 0o7777;
        }
        if let Some(uid) = props.get(UID_PROPERTY).and_then(|v| v.parse().ok()) {
            meta.uid = uid;
        }
        if let Some(gid) = props.get(GID_PROPERTY).and_then(|v| v.parse().ok()) {
            meta.gid = gid;
        }
    }

    meta
}

/// appProperties carrying the fields Drive has no native slot for
fn posix_properties(mode: Option<u32>, uid: Option<u32>, gid: Option<u32>) -> HashMap<String, String> {
    let mut props = HashMap::new();
    if let Some(mode) = mode {
        props.insert(MODE_PROPERTY.to_string(), format!("{:o}", mode & 0o7777));
    }
    if let Some(uid) = uid {
        props.insert(UID_PROPERTY.to_string(), uid.to_string());
    }
    if let Some(gid) = gid {
        props.insert(GID_PROPERTY.to_string(), gid.to_string());
    }
    props
}

/// Request body and upload MIME type for a new file or folder
fn new_entry(name: String, parent_id: String, metadata: &Metadata) -> (File, &'static str) {
    let (default_mode, mime_type) = if metadata.is_dir() {
        (DEFAULT_DIR_MODE, FOLDER_MIME_TYPE)
    } else {
        (DEFAULT_FILE_MODE, FILE_MIME_TYPE)
    };
    let props = posix_properties(
        (metadata.mode != default_mode).then_some(metadata.mode),
        (metadata.uid != 0).then_some(metadata.uid),
        (metadata.gid != 0).then_some(metadata.gid),
    );

    let file = File {
        name: Some(name),
        parents: Some(vec![parent_id]),
        mime_type: Some(mime_type.to_string()),
        modified_time: Some(DateTime::<Utc>::from(metadata.mtime)),
        app_properties: (!props.is_empty()).then_some(props),
        ..Default::default()
    };
    (file, mime_type)
}

/// Drive accepts duplicate names under one parent, so creates check first
async fn ensure_absent<L: ChildLookup>(
    lookup: &L,
    parent_id: &str,
    name: &str,
) -> Result<(), L::Error> {
    match lookup.find_child(parent_id, name).await? {
        Some(_) => Err(AdapterError::new(
            ErrorCode::AlreadyExists,
            format!("{} already exists", name),
        )
        .into()),
        None => Ok(()),
    }
}

/// files.list over the children of one folder
struct ChildPages<'a> {
    hub: &'a DriveClient,
    query: String,
}

impl ChildPages<'_> {
    async fn fetch(&self, token: Option<&str>) -> Result<Page<File>, HttpError> {
        let mut request = self
            .hub
            .files()
            .list()
            .q(&self.query)
            .add_scope(Scope::Full)
            .param("fields", LIST_FIELDS)
            .page_size(100);

        if let Some(token) = token {
            request = request.page_token(token);
        }

        let (_, list) = request.doit().await.map_err(|e| drive_error("list", e))?;
        let files = list.files.unwrap_or_default();
        let has_more = list.next_page_token.is_some();
        Ok(Page::new(files, has_more, list.next_page_token))
    }
}

#[async_trait]
impl PageSource for ChildPages<'_> {
    type Entry = File;
    type Error = HttpError;

    async fn first_page(&self, _path: &str) -> Result<Page<File>, HttpError> {
        self.fetch(None).await
    }

    async fn next_page(&self, cursor: &str) -> Result<Page<File>, HttpError> {
        self.fetch(Some(cursor)).await
    }
}

/// Google Drive connector
pub struct GDriveConnector {
    hub: Arc<DriveClient>,
    resolver: IdResolver,
    max_list_pages: usize,
}

impl GDriveConnector {
    /// Create a new Google Drive connector from configuration
    pub async fn new(config: GDriveConnectorConfig) -> Result<Self, AdapterError> {
        // hyper-rustls needs a process-wide crypto provider; a second install is harmless
        let _ = rustls::crypto::ring::default_provider().install_default();

        // Load service account credentials
        let creds = read_service_account_key(&config.credentials_path)
            .await
            .map_err(|e| AdapterError::io(format!("Failed to read credentials: {}", e)))?;

        // Create authenticator
        let auth = ServiceAccountAuthenticator::builder(creds)
            .build()
            .await
            .map_err(|e| AdapterError::io(format!("Failed to create authenticator: {}", e)))?;

        // Create HTTPS connector
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| AdapterError::io(format!("Failed to load TLS roots: {}", e)))?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        // Create HTTP client
        let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
            .build(https);

        Ok(Self::from_hub(DriveHub::new(client, auth), config.root_folder_id))
    }

    /// Wrap an already-authenticated Drive hub
    pub fn from_hub(hub: DriveClient, root_folder_id: impl Into<String>) -> Self {
        Self {
            hub: Arc::new(hub),
            resolver: IdResolver::new(root_folder_id),
            max_list_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_list_pages(mut self, max_pages: usize) -> Self {
        self.max_list_pages = max_pages;
        self
    }

    async fn resolve(&self, path: &Path) -> Result<String, HttpError> {
        self.resolver.resolve(self, path).await
    }

    /// Get file metadata by ID
    async fn get_file(&self, file_id: &str) -> Result<File, HttpError> {
        let (_, file) = self
            .hub
            .files()
            .get(file_id)
            .add_scope(Scope::Full)
            .param("fields", FILE_FIELDS)
            .doit()
            .await
            .map_err(|e| drive_error("get", e))?;
        Ok(file)
    }
}

#[async_trait]
impl ChildLookup for GDriveConnector {
    type Error = HttpError;

    async fn find_child(&self, parent_id: &str, name: &str) -> Result<Option<ChildRef>, HttpError> {
        let query = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            escape_query(parent_id),
            escape_query(name)
        );

        let (_, list) = self
            .hub
            .files()
            .list()
            .q(&query)
            .add_scope(Scope::Full)
            .param("fields", LOOKUP_FIELDS)
            .page_size(1)
            .doit()
            .await
            .map_err(|e| drive_error("lookup", e))?;

        let Some(file) = list.files.unwrap_or_default().into_iter().next() else {
            return Ok(None);
        };
        let is_folder = is_folder(&file);
        let id = file
            .id
            .ok_or_else(|| HttpError::Transport("File has no ID".to_string()))?;
        Ok(Some(ChildRef { id, is_folder }))
    }
}

#[async_trait]
impl Connector for GDriveConnector {
    type Error = HttpError;

    fn name(&self) -> &'static str {
        "gdrive"
    }

    fn convert_error(&self, err: HttpError) -> AdapterError {
        convert_http_error(err)
    }

    async fn stat_remote(&self, path: &Path) -> Result<Metadata, HttpError> {
        trace!("stat: {:?}", path);

        let file_id = self.resolve(path).await?;
        let file = self.get_file(&file_id).await?;
        Ok(file_to_metadata(&file))
    }

    async fn create_remote(&self, path: &Path, metadata: &Metadata) -> Result<(), HttpError> {
        debug!("create: {:?} dir={}", path, metadata.is_dir());

        let (parent_id, name) = self.resolver.resolve_parent(self, path).await?;
        ensure_absent(self, &parent_id, &name).await?;

        let (request, mime_type) = new_entry(name, parent_id, metadata);
        let content_type = mime_type
            .parse()
            .map_err(|_| HttpError::Transport(format!("Invalid MIME type {}", mime_type)))?;

        // Folders are created through an empty upload; the MIME type decides the kind
        self.hub
            .files()
            .create(request)
            .add_scope(Scope::Full)
            .param("fields", "id")
            .upload(std::io::Cursor::new(Vec::<u8>::new()), content_type)
            .await
            .map_err(|e| drive_error("create", e))?;
        Ok(())
    }

    async fn delete_remote(&self, path: &Path) -> Result<(), HttpError> {
        debug!("delete: {:?}", path);

        let file_id = self.resolve(path).await?;

        self.hub
            .files()
            .delete(&file_id)
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(|e| drive_error("delete", e))?;

        self.resolver.invalidate(path);
        Ok(())
    }

    async fn move_remote(&self, from: &Path, to: &Path) -> Result<(), HttpError> {
        debug!("move: {:?} -> {:?}", from, to);

        let (file_id, (new_parent_id, new_name)) = futures::try_join!(
            self.resolve(from),
            self.resolver.resolve_parent(self, to)
        )?;

        // Get current parents
        let file = self.get_file(&file_id).await?;
        let current_parents = file.parents.unwrap_or_default().join(",");

        let update = File {
            name: Some(new_name),
            ..Default::default()
        };

        self.hub
            .files()
            .update(update, &file_id)
            .add_parents(&new_parent_id)
            .remove_parents(&current_parents)
            .add_scope(Scope::Full)
            .doit_without_upload()
            .await
            .map_err(|e| drive_error("move", e))?;

        self.resolver.invalidate(from);
        self.resolver.invalidate(to);
        Ok(())
    }

    async fn read_remote(&self, path: &Path) -> Result<Bytes, HttpError> {
        trace!("read: {:?}", path);

        let file_id = self.resolve(path).await?;

        let (response, _) = self
            .hub
            .files()
            .get(&file_id)
            .add_scope(Scope::Full)
            .param("alt", "media")
            .doit()
            .await
            .map_err(|e| drive_error("download", e))?;

        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| HttpError::Transport(format!("Failed to read response body: {}", e)))?;
        Ok(collected.to_bytes())
    }

    async fn write_remote(&self, path: &Path, data: Bytes) -> Result<(), HttpError> {
        debug!("write: {:?} size={}", path, data.len());

        let file_id = self.resolve(path).await?;
        let content_type = FILE_MIME_TYPE
            .parse()
            .map_err(|_| HttpError::Transport(format!("Invalid MIME type {}", FILE_MIME_TYPE)))?;

        self.hub
            .files()
            .update(File::default(), &file_id)
            .add_scope(Scope::Full)
            .upload(std::io::Cursor::new(data), content_type)
            .await
            .map_err(|e| drive_error("upload", e))?;
        Ok(())
    }

    async fn list_remote(&self, path: &Path) -> Result<Vec<DirEntry>, HttpError> {
        trace!("list: {:?}", path);

        let folder_id = self.resolve(path).await?;
        let pages = ChildPages {
            hub: &self.hub,
            query: format!("'{}' in parents and trashed = false", escape_query(&folder_id)),
        };
        let files = list_all(&pages, &folder_id, self.max_list_pages).await?;

        Ok(files
            .into_iter()
            .filter_map(|file| {
                let folder = is_folder(&file);
                file.name.map(|name| {
                    if folder {
                        DirEntry::directory(name)
                    } else {
                        DirEntry::file(name)
                    }
                })
            })
            .collect())
    }

    async fn touch_remote(&self, path: &Path, update: &MetadataUpdate) -> Result<(), HttpError> {
        debug!("touch: {:?} update={:?}", path, update);

        let file_id = self.resolve(path).await?;
        let props = posix_properties(update.mode, update.uid, update.gid);

        let request = File {
            modified_time: update.mtime.map(DateTime::<Utc>::from),
            viewed_by_me_time: update.atime.map(DateTime::<Utc>::from),
            app_properties: (!props.is_empty()).then_some(props),
            ..Default::default()
        };

        self.hub
            .files()
            .update(request, &file_id)
            .add_scope(Scope::Full)
            .doit_without_upload()
            .await
            .map_err(|e| drive_error("touch", e))?;
        Ok(())
    }

    fn invalidate(&self, path: &Path) {
        self.resolver.invalidate(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::FileType;
    use std::time::Duration;

    /// One folder holding a fixed set of names
    struct FixedChildren(&'static [&'static str]);

    #[async_trait]
    impl ChildLookup for FixedChildren {
        type Error = HttpError;

        async fn find_child(&self, _parent_id: &str, name: &str) -> Result<Option<ChildRef>, HttpError> {
            Ok(self.0.contains(&name).then(|| ChildRef {
                id: format!("id-{}", name),
                is_folder: false,
            }))
        }
    }

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("plain"), "plain");
        assert_eq!(escape_query("it's"), "it\\'s");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_folder_metadata() {
        let file = File {
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            ..Default::default()
        };
        let meta = file_to_metadata(&file);
        assert_eq!(meta.file_type, FileType::Directory);
        assert_eq!(meta.mode, DEFAULT_DIR_MODE);
    }

    #[test]
    fn test_file_metadata_with_properties() {
        let modified = DateTime::<Utc>::from(SystemTime::UNIX_EPOCH + Duration::from_secs(1000));
        let created = DateTime::<Utc>::from(SystemTime::UNIX_EPOCH + Duration::from_secs(10));
        let file = File {
            mime_type: Some(FILE_MIME_TYPE.to_string()),
            size: Some(12),
            modified_time: Some(modified),
            created_time: Some(created),
            app_properties: Some(posix_properties(Some(0o600), Some(1000), None)),
            ..Default::default()
        };
        let meta = file_to_metadata(&file);
        assert!(meta.is_file());
        assert_eq!(meta.size, 12);
        assert_eq!(meta.mode, 0o600);
        assert_eq!(meta.uid, 1000);
        assert_eq!(meta.gid, 0);
        assert_eq!(meta.mtime, SystemTime::UNIX_EPOCH + Duration::from_secs(1000));
        assert_eq!(meta.birthtime, SystemTime::UNIX_EPOCH + Duration::from_secs(10));
    }

    #[test]
    fn test_new_file_entry() {
        let meta = Metadata::file(0, SystemTime::UNIX_EPOCH);
        let (file, mime_type) = new_entry("a.txt".into(), "parent".into(), &meta);
        assert_eq!(mime_type, FILE_MIME_TYPE);
        assert_eq!(file.name.as_deref(), Some("a.txt"));
        assert_eq!(file.parents, Some(vec!["parent".to_string()]));
        assert_eq!(file.mime_type.as_deref(), Some(FILE_MIME_TYPE));
        // Default mode and ownership need no properties
        assert!(file.app_properties.is_none());
    }

    #[test]
    fn test_new_folder_entry_keeps_mode() {
        let meta = Metadata::directory(SystemTime::UNIX_EPOCH).with_mode(0o700);
        let (file, mime_type) = new_entry("docs".into(), "root".into(), &meta);
        assert_eq!(mime_type, FOLDER_MIME_TYPE);
        assert!(is_folder(&file));

        let props = file.app_properties.unwrap();
        assert_eq!(props.get(MODE_PROPERTY).map(String::as_str), Some("700"));
    }

    #[tokio::test]
    async fn test_create_refuses_existing_name() {
        let lookup = FixedChildren(&["taken"]);

        let err = ensure_absent(&lookup, "root", "taken").await.unwrap_err();
        assert_eq!(convert_http_error(err).code, ErrorCode::AlreadyExists);
        assert!(ensure_absent(&lookup, "root", "free").await.is_ok());
    }

    #[test]
    fn test_bad_request_status() {
        let body = serde_json::json!({
            "error": { "code": 404, "message": "File not found: abc." }
        });
        let (status, message) = bad_request_status(&body);
        assert_eq!(status, 404);
        assert_eq!(message, "File not found: abc.");

        let converted = convert_http_error(HttpError::status(status, message));
        assert_eq!(converted.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_bad_request_without_code_is_invalid_argument() {
        let body = serde_json::json!({ "unexpected": true });
        let (status, _) = bad_request_status(&body);
        assert_eq!(status, 400);
        assert_eq!(
            convert_http_error(HttpError::status(status, "x")).code,
            ErrorCode::InvalidArgument
        );
    }
}
