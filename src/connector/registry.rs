//! Backend registration
//!
//! Each backend publishes a descriptor: its name, an options schema, an
//! availability probe and a factory. The registry validates options
//! against the schema before the factory deserializes them into the
//! connector's own config struct.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use tracing::{debug, info};

use crate::adapter::{Adapter, FileSystem};
use crate::cache::CacheConfig;
use crate::config::BackendConfig;
use crate::connector::dropbox::{DropboxConnector, DropboxConnectorConfig};
use crate::connector::gdrive::{self, GDriveConnector, GDriveConnectorConfig};
use crate::connector::s3::{S3Connector, S3ConnectorConfig};
use crate::error::{AdapterError, ErrorCode, Result};

/// Primitive type of a backend option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Bool,
    Integer,
}

impl OptionKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            OptionKind::String => value.is_string(),
            OptionKind::Bool => value.is_bool(),
            OptionKind::Integer => value.is_i64() || value.is_u64(),
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptionKind::String => "string",
            OptionKind::Bool => "bool",
            OptionKind::Integer => "integer",
        };
        f.write_str(name)
    }
}

/// One field of a backend's options schema
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub required: bool,
    pub description: &'static str,
}

impl OptionSpec {
    const fn required(name: &'static str, kind: OptionKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    const fn optional(name: &'static str, kind: OptionKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

/// Builds a filesystem from validated options and resolved cache settings
pub type ConnectorFactory = fn(Value, CacheConfig) -> BoxFuture<'static, Result<Arc<dyn FileSystem>>>;

/// Registration record for one backend
#[derive(Clone)]
pub struct ConnectorDescriptor {
    pub name: &'static str,
    pub options: &'static [OptionSpec],
    /// Whether the backend can run in this process
    pub probe: fn() -> bool,
    pub factory: ConnectorFactory,
}

impl fmt::Debug for ConnectorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorDescriptor")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

const S3_OPTIONS: &[OptionSpec] = &[
    OptionSpec::required("bucket", OptionKind::String, "S3 bucket name"),
    OptionSpec::optional("region", OptionKind::String, "AWS region"),
    OptionSpec::optional("prefix", OptionKind::String, "Key prefix for a subpath of the bucket"),
    OptionSpec::optional("endpoint", OptionKind::String, "Custom endpoint URL"),
    OptionSpec::optional("force_path_style", OptionKind::Bool, "Path-style addressing"),
    OptionSpec::optional(
        "mtime_tolerance",
        OptionKind::String,
        "Allowed mtime attribute drift (e.g. \"5s\")",
    ),
];

const GDRIVE_OPTIONS: &[OptionSpec] = &[
    OptionSpec::required(
        "credentials_path",
        OptionKind::String,
        "Service account key file",
    ),
    OptionSpec::required("root_folder_id", OptionKind::String, "Folder ID mapped to /"),
];

const DROPBOX_OPTIONS: &[OptionSpec] = &[
    OptionSpec::required("access_token", OptionKind::String, "OAuth2 access token"),
    OptionSpec::optional("api_url", OptionKind::String, "RPC host override"),
    OptionSpec::optional("content_url", OptionKind::String, "Content host override"),
];

fn always_available() -> bool {
    true
}

fn parse_options<T: DeserializeOwned>(backend: &str, options: Value) -> Result<T> {
    serde_yaml::from_value(options).map_err(|e| {
        AdapterError::invalid_argument(format!("{} options: {}", backend, e))
    })
}

fn open_s3(options: Value, cache: CacheConfig) -> BoxFuture<'static, Result<Arc<dyn FileSystem>>> {
    Box::pin(async move {
        let config: S3ConnectorConfig = parse_options("s3", options)?;
        let connector = S3Connector::new(config)
            .await
            .with_max_list_pages(cache.max_list_pages);
        Ok(Arc::new(Adapter::new(connector, &cache)) as Arc<dyn FileSystem>)
    })
}

fn open_gdrive(options: Value, cache: CacheConfig) -> BoxFuture<'static, Result<Arc<dyn FileSystem>>> {
    Box::pin(async move {
        let config: GDriveConnectorConfig = parse_options("gdrive", options)?;
        let connector = GDriveConnector::new(config)
            .await?
            .with_max_list_pages(cache.max_list_pages);
        Ok(Arc::new(Adapter::new(connector, &cache)) as Arc<dyn FileSystem>)
    })
}

fn open_dropbox(options: Value, cache: CacheConfig) -> BoxFuture<'static, Result<Arc<dyn FileSystem>>> {
    Box::pin(async move {
        let config: DropboxConnectorConfig = parse_options("dropbox", options)?;
        let connector = DropboxConnector::new(config).with_max_list_pages(cache.max_list_pages);
        Ok(Arc::new(Adapter::new(connector, &cache)) as Arc<dyn FileSystem>)
    })
}

/// Named collection of backend descriptors
#[derive(Debug, Default)]
pub struct Registry {
    connectors: BTreeMap<&'static str, ConnectorDescriptor>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the S3, Google Drive and Dropbox backends
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ConnectorDescriptor {
            name: "s3",
            options: S3_OPTIONS,
            probe: always_available,
            factory: open_s3,
        });
        registry.register(ConnectorDescriptor {
            name: "gdrive",
            options: GDRIVE_OPTIONS,
            probe: gdrive::tls_roots_available,
            factory: open_gdrive,
        });
        registry.register(ConnectorDescriptor {
            name: "dropbox",
            options: DROPBOX_OPTIONS,
            probe: always_available,
            factory: open_dropbox,
        });
        registry
    }

    /// Add or replace a descriptor
    pub fn register(&mut self, descriptor: ConnectorDescriptor) {
        self.connectors.insert(descriptor.name, descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ConnectorDescriptor> {
        self.connectors.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.connectors.keys().copied()
    }

    fn descriptor(&self, name: &str) -> Result<&ConnectorDescriptor> {
        self.get(name)
            .ok_or_else(|| AdapterError::invalid_argument(format!("unknown backend type: {}", name)))
    }

    /// Check options against a backend's schema
    ///
    /// Rejects unknown keys, values of the wrong primitive type and
    /// missing required fields. A null value counts as absent.
    pub fn validate(&self, name: &str, options: &Value) -> Result<()> {
        let descriptor = self.descriptor(name)?;

        let empty = serde_yaml::Mapping::new();
        let map = match options {
            Value::Null => &empty,
            Value::Mapping(map) => map,
            _ => {
                return Err(AdapterError::invalid_argument(format!(
                    "{} options must be a mapping",
                    name
                )))
            }
        };

        for (key, value) in map {
            let key = key.as_str().ok_or_else(|| {
                AdapterError::invalid_argument(format!("{} option keys must be strings", name))
            })?;
            let spec = descriptor
                .options
                .iter()
                .find(|s| s.name == key)
                .ok_or_else(|| {
                    AdapterError::invalid_argument(format!("{}: unknown option {}", name, key))
                })?;
            if !value.is_null() && !spec.kind.matches(value) {
                return Err(AdapterError::invalid_argument(format!(
                    "{}: option {} must be a {}",
                    name, key, spec.kind
                )));
            }
        }

        for spec in descriptor.options.iter().filter(|s| s.required) {
            if map.get(spec.name).map_or(true, Value::is_null) {
                return Err(AdapterError::invalid_argument(format!(
                    "{}: missing required option {}",
                    name, spec.name
                )));
            }
        }

        Ok(())
    }

    /// Validate, probe and build the filesystem for a configured backend
    pub async fn open(&self, backend: &BackendConfig) -> Result<Arc<dyn FileSystem>> {
        let descriptor = self.descriptor(&backend.kind)?;
        self.validate(&backend.kind, &backend.options)?;

        if !(descriptor.probe)() {
            return Err(AdapterError::new(
                ErrorCode::IoError,
                format!("backend {} is not available", backend.kind),
            ));
        }

        debug!("opening backend {} ({})", backend.name, backend.kind);
        let fs = (descriptor.factory)(backend.options.clone(), backend.cache.clone()).await?;
        info!("backend {} ready ({})", backend.name, fs.backend_name());
        Ok(fs)
    }
}
