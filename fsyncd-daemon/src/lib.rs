//! fsyncd process wiring: configuration, config-source drivers, the HTTP
//! control surface, and the schedule-driven sync loop. The reconciliation
//! engine itself lives in `fsyncd-engine`.

pub mod config;
pub mod drivers;
pub mod scheduler;
pub mod server;

pub use config::{ConfigDriverKind, ConfigError, DaemonConfig, LogLevel, SyncConfig};
pub use drivers::{make_config_source, ConfigSource, FileConfigSource};
pub use scheduler::SyncScheduler;
pub use server::{serve, AppState};
