//! Runtime configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Prefix for configuration environment variables (`ASHA__PROBE_URL`, ...).
pub const CONFIG_ENV_PREFIX: &str = "ASHA";

pub const DEFAULT_PROBE_URL: &str = "https://clients3.google.com/generate_204";

/// Settings for the on-device core.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    /// SQLite database file
    pub database_path: String,
    /// URL that answers 204 when the network is usable
    pub probe_url: String,
    pub probe_timeout_ms: u64,
    /// Remote ingestion endpoint; without one, sync simulates acceptance
    pub ingest_url: Option<String>,
    pub ingest_timeout_ms: u64,
    /// Flat JSON file written by pre-relational app versions
    pub legacy_store_path: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: "asha_health.db".to_string(),
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_timeout_ms: 3000,
            ingest_url: None,
            ingest_timeout_ms: 15_000,
            legacy_store_path: None,
        }
    }
}

impl CoreConfig {
    /// Load configuration.
    ///
    /// Sources, later ones winning:
    /// 1. Built-in defaults
    /// 2. The YAML file at `path`, if given (must exist)
    /// 3. Environment variables prefixed with `ASHA__`
    pub fn load(path: Option<&Path>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                File::new(&path.to_string_lossy(), FileFormat::Yaml).required(true),
            );
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_timeout_ms)
    }
}
