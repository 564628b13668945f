//! Dropbox API v2 surface used by the connector
//!
//! RPC routes take a JSON body on the API host; content routes take their
//! argument as JSON in the `Dropbox-API-Arg` header on the content host.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::trace;

use super::error::DropboxError;

const API_URL: &str = "https://api.dropboxapi.com";
const CONTENT_URL: &str = "https://content.dropboxapi.com";
const API_ARG_HEADER: &str = "Dropbox-API-Arg";

/// Entry metadata as returned by get_metadata and list_folder
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum EntryMetadata {
    File {
        name: String,
        size: u64,
        server_modified: String,
        #[serde(default)]
        client_modified: Option<String>,
    },
    Folder {
        name: String,
    },
    Deleted {
        name: String,
    },
}

/// One page of a folder listing
#[derive(Debug, Clone, Deserialize)]
pub struct ListFolderResult {
    pub entries: Vec<EntryMetadata>,
    pub cursor: String,
    pub has_more: bool,
}

/// Upload conflict behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail if something already exists at the path
    Add,
    /// Replace an existing file
    Overwrite,
}

impl WriteMode {
    fn as_str(self) -> &'static str {
        match self {
            WriteMode::Add => "add",
            WriteMode::Overwrite => "overwrite",
        }
    }
}

/// Dropbox routes used by the connector
///
/// Paths are Dropbox paths: `""` for the root, otherwise `/a/b`.
#[async_trait]
pub trait DropboxApi: Send + Sync {
    async fn get_metadata(&self, path: &str) -> Result<EntryMetadata, DropboxError>;

    /// Create a folder, including missing ancestors
    async fn create_folder(&self, path: &str) -> Result<(), DropboxError>;

    async fn upload(&self, path: &str, data: Bytes, mode: WriteMode) -> Result<(), DropboxError>;

    async fn download(&self, path: &str) -> Result<Bytes, DropboxError>;

    async fn delete(&self, path: &str) -> Result<(), DropboxError>;

    async fn move_entry(&self, from: &str, to: &str) -> Result<(), DropboxError>;

    async fn list_folder(&self, path: &str) -> Result<ListFolderResult, DropboxError>;

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListFolderResult, DropboxError>;
}

/// Encode a header argument, escaping non-ASCII as `\uXXXX`
fn header_arg(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

/// reqwest-backed Dropbox client holding an already-issued access token
pub struct HttpDropboxClient {
    http: reqwest::Client,
    access_token: String,
    api_url: String,
    content_url: String,
}

impl HttpDropboxClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: access_token.into(),
            api_url: API_URL.to_string(),
            content_url: CONTENT_URL.to_string(),
        }
    }

    /// Point the client at different hosts (proxies, test servers)
    pub fn with_urls(mut self, api_url: Option<String>, content_url: Option<String>) -> Self {
        if let Some(url) = api_url {
            self.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = content_url {
            self.content_url = url.trim_end_matches('/').to_string();
        }
        self
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, DropboxError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DropboxError::from_response(status.as_u16(), &body))
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        route: &str,
        arg: serde_json::Value,
    ) -> Result<T, DropboxError> {
        trace!("dropbox rpc: {} {}", route, arg);
        let response = self
            .http
            .post(format!("{}/2/{}", self.api_url, route))
            .bearer_auth(&self.access_token)
            .json(&arg)
            .send()
            .await?;
        Ok(Self::check(response).await?.json::<T>().await?)
    }

    async fn content(
        &self,
        route: &str,
        arg: serde_json::Value,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response, DropboxError> {
        trace!("dropbox content: {} {}", route, arg);
        let mut request = self
            .http
            .post(format!("{}/2/{}", self.content_url, route))
            .bearer_auth(&self.access_token)
            .header(API_ARG_HEADER, header_arg(&arg));

        // Downloads must not carry a content type
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(body);
        }

        Self::check(request.send().await?).await
    }
}

#[async_trait]
impl DropboxApi for HttpDropboxClient {
    async fn get_metadata(&self, path: &str) -> Result<EntryMetadata, DropboxError> {
        self.rpc("files/get_metadata", json!({ "path": path })).await
    }

    async fn create_folder(&self, path: &str) -> Result<(), DropboxError> {
        self.rpc::<serde_json::Value>(
            "files/create_folder_v2",
            json!({ "path": path, "autorename": false }),
        )
        .await?;
        Ok(())
    }

    async fn upload(&self, path: &str, data: Bytes, mode: WriteMode) -> Result<(), DropboxError> {
        let arg = json!({
            "path": path,
            "mode": mode.as_str(),
            "autorename": false,
            "mute": true,
        });
        self.content("files/upload", arg, Some(data)).await?;
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Bytes, DropboxError> {
        let response = self
            .content("files/download", json!({ "path": path }), None)
            .await?;
        Ok(response.bytes().await?)
    }

    async fn delete(&self, path: &str) -> Result<(), DropboxError> {
        self.rpc::<serde_json::Value>("files/delete_v2", json!({ "path": path }))
            .await?;
        Ok(())
    }

    async fn move_entry(&self, from: &str, to: &str) -> Result<(), DropboxError> {
        self.rpc::<serde_json::Value>(
            "files/move_v2",
            json!({ "from_path": from, "to_path": to, "autorename": false }),
        )
        .await?;
        Ok(())
    }

    async fn list_folder(&self, path: &str) -> Result<ListFolderResult, DropboxError> {
        self.rpc("files/list_folder", json!({ "path": path })).await
    }

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListFolderResult, DropboxError> {
        self.rpc("files/list_folder/continue", json!({ "cursor": cursor }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_arg_escapes_non_ascii() {
        let arg = json!({ "path": "/café" });
        assert_eq!(header_arg(&arg), r#"{"path":"/caf\u00e9"}"#);
    }

    #[test]
    fn test_header_arg_surrogate_pair() {
        let arg = json!({ "path": "/😀" });
        assert_eq!(header_arg(&arg), r#"{"path":"/\ud83d\ude00"}"#);
    }

    #[test]
    fn test_parse_list_page() {
        let body = r#"{
            "entries": [
                {".tag": "folder", "name": "docs", "id": "id:1"},
                {".tag": "file", "name": "a.txt", "size": 3,
                 "server_modified": "2024-01-02T03:04:05Z", "rev": "0123"},
                {".tag": "deleted", "name": "gone"}
            ],
            "cursor": "c1",
            "has_more": true
        }"#;
        let page: ListFolderResult = serde_json::from_str(body).unwrap();
        assert_eq!(page.entries.len(), 3);
        assert!(matches!(
            &page.entries[1],
            EntryMetadata::File { name, size: 3, .. } if name == "a.txt"
        ));
        assert!(page.has_more);
        assert!(matches!(page.entries[0], EntryMetadata::Folder { .. }));
    }
}
