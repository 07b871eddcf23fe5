//! Master and sync configuration.
//!
//! The master config (`fsyncd.toml`) describes the process: listen address,
//! CORS lists, timeouts, timezone, logging. The sync config
//! (`driver_config.toml`) describes one reconciliation pairing and is loaded
//! through a [`crate::drivers::ConfigSource`] so it can be updated at
//! runtime. All validation failures are fatal at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::{header::HeaderName, HeaderValue, Method};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fsyncd_engine::WallTime;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which config-source driver serves the sync configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfigDriverKind {
    #[default]
    Default,
    Vault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Debug,
    Warn,
    Error,
    Panic,
    Fatal,
}

impl LogLevel {
    /// Directive for the tracing env filter. `panic` and `fatal` collapse to
    /// `error`: tracing has no levels above it.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Panic | LogLevel::Fatal => "error",
        }
    }
}

/// Process-level configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub host: String,
    pub port: String,

    #[serde(default)]
    pub swagger_enabled: bool,
    #[serde(default)]
    pub swagger_port: Option<String>,

    #[serde(default)]
    pub config_driver: ConfigDriverKind,

    /// IANA timezone name the daily schedule is evaluated in.
    pub location: String,

    /// Timeouts in whole seconds.
    #[serde(default = "default_conn_timeout")]
    pub conn_read_timeout: u64,
    #[serde(default = "default_conn_timeout")]
    pub conn_write_timeout: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub graceful_shutdown_timeout: u64,

    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,

    #[serde(default = "default_time_format")]
    pub time_format: String,
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_conn_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_time_format() -> String {
    "%Y-%m-%dT%H:%M:%S%.3f%z".to_string()
}

impl DaemonConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: DaemonConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.port
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid(format!("port is not numeric: '{}'", self.port)))?;

        if self.swagger_enabled {
            let swagger_port = self
                .swagger_port
                .as_deref()
                .ok_or_else(|| ConfigError::Invalid("swagger enabled without a port".into()))?;
            swagger_port.parse::<u16>().map_err(|_| {
                ConfigError::Invalid(format!("swagger_port is not numeric: '{swagger_port}'"))
            })?;
        }

        self.timezone()?;

        if self.graceful_shutdown_timeout == 0 {
            return Err(ConfigError::Invalid(
                "graceful_shutdown_timeout must be positive".into(),
            ));
        }

        // CORS lists feed the control surface verbatim; an entry that cannot
        // parse would otherwise degrade the policy silently
        for origin in &self.allowed_hosts {
            origin.parse::<HeaderValue>().map_err(|_| {
                ConfigError::Invalid(format!("invalid allowed_hosts entry '{origin}'"))
            })?;
        }
        for method in &self.allowed_methods {
            method.parse::<Method>().map_err(|_| {
                ConfigError::Invalid(format!("invalid allowed_methods entry '{method}'"))
            })?;
        }
        for header in &self.allowed_headers {
            header.parse::<HeaderName>().map_err(|_| {
                ConfigError::Invalid(format!("invalid allowed_headers entry '{header}'"))
            })?;
        }

        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.location
            .parse::<Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown location '{}'", self.location)))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_write_timeout)
    }

    pub fn shutdown_window(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout)
    }
}

/// One reconciliation pairing: the two roots, the safety-gate threshold and
/// the daily sync time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub src_path: PathBuf,
    pub dst_path: PathBuf,
    pub max_diff_percent: u8,
    pub sync_time: String,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_sync_paths(&self.src_path, &self.dst_path)?;
        validate_diff_percent(self.max_diff_percent)?;
        self.wall_time()?;
        Ok(())
    }

    pub fn wall_time(&self) -> Result<WallTime, ConfigError> {
        WallTime::parse(&self.sync_time).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Both roots must exist, be directories, and be distinct.
pub fn validate_sync_paths(src: &Path, dst: &Path) -> Result<(), ConfigError> {
    for (label, path) in [("src_path", src), ("dst_path", dst)] {
        if !path.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "{label} does not exist or is not a directory: {}",
                path.display()
            )));
        }
    }
    if src == dst {
        return Err(ConfigError::Invalid(
            "src_path and dst_path must differ".into(),
        ));
    }
    Ok(())
}

pub fn validate_diff_percent(percent: u8) -> Result<(), ConfigError> {
    if percent == 0 || percent > 100 {
        return Err(ConfigError::Invalid(format!(
            "max_diff_percent must be in 1..=100, got {percent}"
        )));
    }
    Ok(())
}
