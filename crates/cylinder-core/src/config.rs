//! Configuration file support for cylinder.
//!
//! Loads configuration from `cylinder.toml` in a given directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cylinder_logging::{LogFormat, Logger};
use cylinder_store::StoreConfig;
use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;

/// The config file name
pub const CONFIG_FILE_NAME: &str = "cylinder.toml";

/// Tracker configuration loaded from `cylinder.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    #[serde(default)]
    pub storage: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub view: ViewConfig,
}

/// `[logging]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive for tracing; `RUST_LOG` overrides it
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Append lifecycle events as JSON lines to this file
    pub file: Option<PathBuf>,
    /// Directory for the daily-rolling tracing log
    pub trace_dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            file: None,
            trace_dir: None,
        }
    }
}

/// `[view]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewConfig {
    /// How often live stats are recomputed
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Pause before subscribing again after a subscription ends
    #[serde(default = "default_resubscribe_delay", with = "humantime_serde")]
    pub resubscribe_delay: Duration,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_resubscribe_delay() -> Duration {
    Duration::from_secs(2)
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            resubscribe_delay: default_resubscribe_delay(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from `dir`.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if the file exists and parses successfully
    /// - `Ok(None)` if the file does not exist
    /// - `Err(...)` if the file exists but fails to parse (hard error)
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }

    /// Like [`TrackerConfig::load`], with defaults when the file is absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        Ok(Self::load(dir)?.unwrap_or_default())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber. Keep the returned guard alive
    /// when a trace directory is configured.
    pub fn init_tracing(&self) -> Result<Option<WorkerGuard>> {
        match self.trace_dir {
            Some(ref dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                Ok(Some(cylinder_logging::init_tracing_with_file(
                    &self.level,
                    self.format,
                    dir,
                )))
            }
            None => {
                cylinder_logging::init_tracing(&self.level, self.format);
                Ok(None)
            }
        }
    }

    /// The lifecycle event logger described by this section.
    pub fn logger(&self) -> Result<Logger> {
        match self.file {
            Some(ref path) => Logger::with_file(self.format, path)
                .with_context(|| format!("Failed to open {}", path.display())),
            None => Ok(Logger::new(self.format)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cylinder_store::BackendKind;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(TrackerConfig::load(dir.path()).unwrap().is_none());

        let config = TrackerConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.storage.backend, BackendKind::Json);
        assert_eq!(config.view.tick_interval, Duration::from_secs(1));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_full_file_parses() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
[storage]
backend = "sqlite"
path = "/var/lib/cylinder/sessions.db"

[storage.failover]
enabled = true
fallback_path = "/var/lib/cylinder"
max_failures = 5

[logging]
level = "debug"
format = "json"
file = "/var/log/cylinder/events.jsonl"

[view]
tick_interval = "250ms"
"#,
        )
        .unwrap();

        let config = TrackerConfig::load(dir.path()).unwrap().unwrap();
        assert_eq!(config.storage.backend, BackendKind::Sqlite);
        assert!(config.storage.failover.enabled);
        assert_eq!(config.storage.failover.max_failures, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.view.tick_interval, Duration::from_millis(250));
        assert_eq!(config.view.resubscribe_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_failover_defaults() {
        let config = TrackerConfig::from_toml_str("[storage.failover]\nenabled = true\n").unwrap();
        assert_eq!(config.storage.failover.max_failures, 3);
        assert!(config.storage.failover.fallback_path.is_none());
    }

    #[test]
    fn test_unknown_field_is_hard_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[storage]\nbogus = 1\n").unwrap();

        let err = TrackerConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(TrackerConfig::from_toml_str("[storage]\nbackend = \"redis\"\n").is_err());
    }
}
