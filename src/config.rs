//! Configuration
//!
//! Settings are layered, later sources winning:
//!
//! ```text
//! defaults ─→ TOML file (--config / SHARDCTL_CONFIG) ─→ SHARDCTL_* env ─→ CLI flags
//! ```
//!
//! Environment keys use `__` between sections, e.g. `SHARDCTL_STORE__PATH`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Backend kind for the metadata store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, discarded on exit
    Memory,
    /// JSON snapshot file
    #[default]
    File,
}

/// Metadata store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Snapshot path for the file backend
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from("data/shardctl.json"),
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            ..Default::default()
        }
    }

    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            backend: StoreBackend::File,
            path: path.as_ref().to_path_buf(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    pub level: String,
    /// Daily rolling log files are written here when set
    pub dir: Option<PathBuf>,
    pub color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            color: true,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            Error::Config(config::ConfigError::Message(format!(
                "Failed to render config: {}",
                e
            )))
        })
    }
}

/// Loads [`Config`] from an optional file plus environment variables
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            file: None,
            env_prefix: "SHARDCTL".to_string(),
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read settings from this TOML file; it must exist.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = prefix.to_string();
        self
    }

    pub fn load(&self) -> Result<Config> {
        let mut builder = config::Config::builder();

        if let Some(file) = &self.file {
            if !file.exists() {
                return Err(Error::MalformedInput(format!(
                    "Configuration file not found: {}",
                    file.display()
                )));
            }
            builder = builder.add_source(
                config::File::from(file.as_path()).format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.store.path, PathBuf::from("data/shardctl.json"));
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.dir.is_none());
    }

    #[test]
    fn test_load_from_toml_file() -> Result<()> {
        let path = std::env::temp_dir().join(format!("shardctl_config_{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[store]\nbackend = \"memory\"\n\n[logging]\nlevel = \"debug\"\n",
        )?;

        let config = ConfigLoader::new()
            .with_env_prefix("SHARDCTL_TEST_UNUSED")
            .with_file(&path)
            .load()?;
        assert_eq!(config.store.backend, StoreBackend::Memory);
        // Unset fields keep their defaults.
        assert_eq!(config.store.path, PathBuf::from("data/shardctl.json"));
        assert_eq!(config.logging.level, "debug");

        std::fs::remove_file(path).ok();
        Ok(())
    }

    #[test]
    fn test_to_toml_renders_and_failures_are_not_user_errors() -> Result<()> {
        let rendered = Config::default().to_toml()?;
        assert!(rendered.contains("[store]"));
        assert!(rendered.contains("backend = \"file\""));
        let parsed: Config = toml::from_str(&rendered)
            .map_err(|e| Error::Config(config::ConfigError::Message(e.to_string())))?;
        assert_eq!(parsed, Config::default());

        // Rendering failures surface as configuration errors (exit code 2).
        let err = Error::Config(config::ConfigError::Message("unrepresentable".into()));
        assert!(!err.is_user_error());
        Ok(())
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/shardctl.toml")
            .load();
        assert!(matches!(result, Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() -> Result<()> {
        let rendered = Config::default().to_toml()?;
        assert!(rendered.contains("[store]"));
        assert!(rendered.contains("backend = \"file\""));
        Ok(())
    }
}
