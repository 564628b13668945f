//! Configuration parsing and structures

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cache::{CacheConfig, CacheOverride};
use crate::env::substitute_env_vars;

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Cache defaults shared by every backend
    #[serde(default)]
    pub cache: CacheConfig,

    /// Configured backend instances
    #[serde(default)]
    pub backends: Vec<RawBackendConfig>,
}

/// Raw backend entry before cache resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawBackendConfig {
    /// Instance name, unique within the file
    pub name: String,

    /// Registry name of the connector (s3, gdrive, dropbox)
    #[serde(rename = "type")]
    pub kind: String,

    /// Connector options, checked against the registry schema
    #[serde(default)]
    pub options: serde_yaml::Value,

    /// Cache settings overriding the top-level defaults
    pub cache: Option<CacheOverride>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Cache defaults as written at the top level
    pub cache: CacheConfig,

    /// Backends with fully resolved cache settings
    pub backends: Vec<BackendConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Backend configuration (resolved)
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub name: String,
    pub kind: String,
    pub options: serde_yaml::Value,
    pub cache: CacheConfig,
}

impl RawConfig {
    /// Resolve raw config by merging backend cache overrides with defaults
    pub fn resolve(self) -> Config {
        let RawConfig {
            logging,
            cache,
            backends,
        } = self;

        let backends = backends
            .into_iter()
            .map(|raw| BackendConfig {
                cache: cache.merged(raw.cache.as_ref()),
                name: raw.name,
                kind: raw.kind,
                options: raw.options,
            })
            .collect();

        Config {
            logging,
            cache,
            backends,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string, expanding `${VAR}` references
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        let raw: RawConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(raw.resolve())
    }

    /// Look up a backend by instance name
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one backend is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Backend name cannot be empty".to_string(),
                ));
            }
            if !names.insert(backend.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate backend name: {}",
                    backend.name
                )));
            }
            if backend.cache.max_list_pages == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Backend {}: max_list_pages must be at least 1",
                    backend.name
                )));
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
logging:
  level: debug

cache:
  content_ttl: 1m
  max_list_pages: 20

backends:
  - name: data
    type: s3
    options:
      bucket: my-bucket
      region: us-east-1
  - name: team
    type: dropbox
    options:
      access_token: abc
    cache:
      content_ttl: 5s
"#;

        let config = Config::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.backends.len(), 2);

        let data = config.backend("data").unwrap();
        assert_eq!(data.kind, "s3");
        assert_eq!(data.options["bucket"].as_str(), Some("my-bucket"));
        assert_eq!(data.cache.content_ttl, Duration::from_secs(60));
        assert_eq!(data.cache.max_list_pages, 20);

        // Override wins for the field it names, defaults fill the rest
        let team = config.backend("team").unwrap();
        assert_eq!(team.cache.content_ttl, Duration::from_secs(5));
        assert_eq!(team.cache.max_list_pages, 20);
        assert_eq!(team.cache.metadata_ttl, Duration::from_secs(10));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_str("backends: []").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.cache.content_ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_empty_backends() {
        let config = Config::from_str("logging: { level: warn }").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_names() {
        let yaml = r#"
backends:
  - { name: a, type: s3, options: { bucket: x } }
  - { name: a, type: dropbox, options: { access_token: y } }
"#;
        let err = Config::from_str(yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate backend name: a"));
    }

    #[test]
    fn test_validate_zero_page_ceiling() {
        let yaml = r#"
backends:
  - name: a
    type: s3
    options: { bucket: x }
    cache: { max_list_pages: 0 }
"#;
        assert!(Config::from_str(yaml).unwrap().validate().is_err());
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("CLOUDFS_TEST_TOKEN", "sekrit");
        let yaml = r#"
backends:
  - name: box
    type: dropbox
    options:
      access_token: "${CLOUDFS_TEST_TOKEN}"
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(
            config.backends[0].options["access_token"].as_str(),
            Some("sekrit")
        );
        std::env::remove_var("CLOUDFS_TEST_TOKEN");
    }

    #[test]
    fn test_unknown_cache_field_rejected() {
        let result = Config::from_str("cache: { ttl: 5s }\nbackends: []");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "backends:\n  - {{ name: d, type: gdrive, options: {{ credentials_path: /k.json, root_folder_id: root }} }}"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.backends[0].kind, "gdrive");
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(..)));
    }
}
