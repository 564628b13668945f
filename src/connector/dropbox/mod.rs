//! Dropbox connector implementation
//!
//! Dropbox is a path-addressed tree: folders are created recursively by
//! the service, listings are cursor-paginated, and failures come back as
//! nested tagged unions (see [`error`]). There is no metadata-only update,
//! so `touch` is a no-op.

pub mod api;
pub mod error;

use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::connector::pagination::{list_all, Page, PageSource, DEFAULT_MAX_PAGES};
use crate::connector::{normalize_path, Connector, DirEntry, Metadata};
use crate::error::AdapterError;

use self::api::{DropboxApi, EntryMetadata, HttpDropboxClient, ListFolderResult, WriteMode};
use self::error::DropboxError;

/// Dropbox connector options
#[derive(Debug, Clone, Deserialize)]
pub struct DropboxConnectorConfig {
    /// OAuth2 access token
    pub access_token: String,

    /// Override for the RPC host
    pub api_url: Option<String>,

    /// Override for the content host
    pub content_url: Option<String>,
}

/// Dropbox addresses the root as "" and everything else as "/a/b"
fn to_dropbox_path(path: &Path) -> Result<String, DropboxError> {
    let normalized = normalize_path(path)?;
    if normalized == "/" {
        Ok(String::new())
    } else {
        Ok(normalized)
    }
}

fn parse_time(raw: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(SystemTime::from)
}

fn entry_to_metadata(entry: &EntryMetadata) -> Result<Metadata, DropboxError> {
    match entry {
        EntryMetadata::File {
            size,
            server_modified,
            client_modified,
            ..
        } => {
            let mtime = parse_time(server_modified).unwrap_or_else(SystemTime::now);
            let mut meta = Metadata::file(*size, mtime);
            if let Some(created) = client_modified.as_deref().and_then(parse_time) {
                meta.birthtime = created;
            }
            Ok(meta)
        }
        EntryMetadata::Folder { .. } => Ok(Metadata::directory(SystemTime::now())),
        EntryMetadata::Deleted { name } => {
            Err(AdapterError::not_found(format!("{} was deleted", name)).into())
        }
    }
}

fn page_from(result: ListFolderResult) -> Page<EntryMetadata> {
    Page::new(result.entries, result.has_more, Some(result.cursor))
}

/// list_folder + list_folder/continue
struct FolderPages<'a, A> {
    api: &'a A,
}

#[async_trait]
impl<A: DropboxApi> PageSource for FolderPages<'_, A> {
    type Entry = EntryMetadata;
    type Error = DropboxError;

    async fn first_page(&self, path: &str) -> Result<Page<EntryMetadata>, DropboxError> {
        Ok(page_from(self.api.list_folder(path).await?))
    }

    async fn next_page(&self, cursor: &str) -> Result<Page<EntryMetadata>, DropboxError> {
        Ok(page_from(self.api.list_folder_continue(cursor).await?))
    }
}

/// Dropbox connector
pub struct DropboxConnector<A: DropboxApi = HttpDropboxClient> {
    api: A,
    max_list_pages: usize,
}

impl DropboxConnector<HttpDropboxClient> {
    /// Create a new Dropbox connector from configuration
    pub fn new(config: DropboxConnectorConfig) -> Self {
        let client = HttpDropboxClient::new(config.access_token)
            .with_urls(config.api_url, config.content_url);
        Self::from_api(client)
    }
}

impl<A: DropboxApi> DropboxConnector<A> {
    /// Wrap an already-authenticated API client
    pub fn from_api(api: A) -> Self {
        Self {
            api,
            max_list_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_list_pages(mut self, max_pages: usize) -> Self {
        self.max_list_pages = max_pages;
        self
    }
}

#[async_trait]
impl<A: DropboxApi> Connector for DropboxConnector<A> {
    type Error = DropboxError;

    fn name(&self) -> &'static str {
        "dropbox"
    }

    fn convert_error(&self, err: DropboxError) -> AdapterError {
        error::convert(err)
    }

    async fn stat_remote(&self, path: &Path) -> Result<Metadata, DropboxError> {
        trace!("stat: {:?}", path);
        let entry = self.api.get_metadata(&to_dropbox_path(path)?).await?;
        entry_to_metadata(&entry)
    }

    async fn create_remote(&self, path: &Path, metadata: &Metadata) -> Result<(), DropboxError> {
        let target = to_dropbox_path(path)?;
        debug!("create: {} dir={}", target, metadata.is_dir());

        if metadata.is_dir() {
            self.api.create_folder(&target).await
        } else {
            self.api.upload(&target, Bytes::new(), WriteMode::Add).await
        }
    }

    async fn delete_remote(&self, path: &Path) -> Result<(), DropboxError> {
        let target = to_dropbox_path(path)?;
        debug!("delete: {}", target);
        self.api.delete(&target).await
    }

    async fn move_remote(&self, from: &Path, to: &Path) -> Result<(), DropboxError> {
        let (from, to) = (to_dropbox_path(from)?, to_dropbox_path(to)?);
        debug!("move: {} -> {}", from, to);
        self.api.move_entry(&from, &to).await
    }

    async fn read_remote(&self, path: &Path) -> Result<Bytes, DropboxError> {
        trace!("read: {:?}", path);
        self.api.download(&to_dropbox_path(path)?).await
    }

    async fn write_remote(&self, path: &Path, data: Bytes) -> Result<(), DropboxError> {
        let target = to_dropbox_path(path)?;
        debug!("write: {} size={}", target, data.len());
        self.api.upload(&target, data, WriteMode::Overwrite).await
    }

    async fn list_remote(&self, path: &Path) -> Result<Vec<DirEntry>, DropboxError> {
        let target = to_dropbox_path(path)?;
        trace!("list: {:?}", target);

        let pages = FolderPages { api: &self.api };
        let entries = list_all(&pages, &target, self.max_list_pages).await?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| match entry {
                EntryMetadata::File { name, .. } => Some(DirEntry::file(name)),
                EntryMetadata::Folder { name } => Some(DirEntry::directory(name)),
                EntryMetadata::Deleted { .. } => None,
            })
            .collect())
    }
}
