//! Pluggable sources for the sync configuration.
//!
//! A driver loads and persists one [`SyncConfig`]. The registry mirrors the
//! master config's `config_driver` key; only the `default` TOML-file driver
//! ships, so selecting any other kind fails at startup with a configuration
//! error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::{ConfigDriverKind, ConfigError, SyncConfig};

/// Where the default driver keeps the sync configuration.
pub const DEFAULT_DRIVER_CONFIG_PATH: &str = "driver_config.toml";

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<SyncConfig, ConfigError>;
    async fn update(&self, config: SyncConfig) -> Result<(), ConfigError>;
}

/// The `default` driver: a TOML file on local disk. The sync configuration
/// is read-mostly; a read-write lock serializes concurrent loads against
/// updates.
pub struct FileConfigSource {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load(&self) -> Result<SyncConfig, ConfigError> {
        let _guard = self.lock.read().await;
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigError::Read {
                path: self.path.clone(),
                source,
            })?;
        let config: SyncConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    async fn update(&self, config: SyncConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let raw = toml::to_string_pretty(&config)?;

        let _guard = self.lock.write().await;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), "sync configuration persisted");
        Ok(())
    }
}

/// Resolve the configured driver kind to a source instance.
pub fn make_config_source(
    kind: ConfigDriverKind,
    path: impl Into<PathBuf>,
) -> Result<Arc<dyn ConfigSource>, ConfigError> {
    match kind {
        ConfigDriverKind::Default => Ok(Arc::new(FileConfigSource::new(path))),
        ConfigDriverKind::Vault => Err(ConfigError::Invalid(
            "config driver 'vault' is not registered".into(),
        )),
    }
}
