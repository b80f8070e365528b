use std::path::PathBuf;

use serde::Deserialize;

/// Storage backend chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process only, nothing persisted
    Memory,
    /// Single JSON document on local disk
    #[default]
    Json,
    /// SQLite database file
    Sqlite,
}

/// `[storage]` section of `cylinder.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Directory for `json`, database file for `sqlite`. Defaults under the
    /// user data directory.
    pub path: Option<PathBuf>,
    /// Rebroadcast changes other processes make to the JSON file
    #[serde(default)]
    pub watch: bool,
    #[serde(default)]
    pub failover: FailoverConfig,
}

/// `[storage.failover]`: optional local JSON fallback behind the primary
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailoverConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Directory for the fallback JSON document
    pub fallback_path: Option<PathBuf>,
    /// Consecutive primary failures before switching to local-only
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

fn default_max_failures() -> u32 {
    3
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fallback_path: None,
            max_failures: default_max_failures(),
        }
    }
}
