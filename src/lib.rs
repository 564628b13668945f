//! cloudfs-adapter: a uniform filesystem contract over remote object stores
//!
//! This library exposes an S3-compatible bucket, a Dropbox account and a
//! Google Drive folder through one POSIX-like interface (stat, create,
//! delete, move, read, write, list), normalizing each store's failures
//! into one error taxonomy.
//!
//! # Architecture
//!
//! - **Connectors**: Storage backends implementing the `Connector` trait, a
//!   small set of path-based primitives reporting failures in the
//!   backend's native error shape.
//! - **Adapter**: `Adapter<C>` builds the composite operations (mkdir,
//!   rmdir, unlink, rename, partial read/write) on those primitives once,
//!   and is the single place native errors are converted.
//! - **Caches**: TTL-bounded content and metadata caches plus directory
//!   listing caches owned by each adapter; Drive additionally caches
//!   path-to-ID resolution.
//! - **Registry**: Named backend descriptors with an options schema, an
//!   availability probe and a factory producing `Arc<dyn FileSystem>`.
//!
//! # Example
//!
//! ```no_run
//! use cloudfs_adapter::config::Config;
//! use cloudfs_adapter::connector::registry::Registry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("cloudfs.yaml")?;
//! config.validate()?;
//! cloudfs_adapter::logging::init(&config.logging);
//!
//! let registry = Registry::builtin();
//! for backend in &config.backends {
//!     let fs = registry.open(backend).await?;
//!     let root = fs.readdir(std::path::Path::new("/")).await?;
//!     println!("{}: {} entries", backend.name, root.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod cache;
pub mod config;
pub mod connector;
pub mod env;
pub mod error;
pub mod logging;

pub use adapter::{Adapter, FileSystem};
pub use error::{AdapterError, ErrorCode, Result};
