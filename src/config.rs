//! Configuration
//!
//! Hierarchical configuration loading from:
//! - `inputlayer.toml` (default configuration)
//! - `inputlayer.local.toml` (git-ignored local overrides)
//! - Environment variables (`INPUTLAYER_*` prefix)
//!
//! ## Example
//!
//! ```toml
//! # inputlayer.toml
//! [tables]
//! initial_capacity = 256
//!
//! [tables.general_index]
//! load_factor = 0.75
//!
//! [random]
//! seed = 42
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! INPUTLAYER_TABLES__INITIAL_CAPACITY=1024
//! INPUTLAYER_RANDOM__SEED=7
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tables: TableConfig,
    #[serde(default)]
    pub random: RandomConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage tuning for tuple tables and their indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Initial row-vector capacity reserved per predicate's table.
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Tuning for general (chained multi-row-per-key) indices.
    #[serde(default)]
    pub general_index: GeneralIndexConfig,

    /// Run `reclaim` automatically once a table's tombstoned fraction
    /// exceeds this threshold after a tick, instead of waiting for the
    /// host to call it explicitly. `0.0` disables automatic compaction.
    #[serde(default = "default_auto_reclaim_threshold")]
    pub auto_reclaim_threshold: f64,
}

/// Hash-map growth tuning for [`crate::index::GeneralIndex`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralIndexConfig {
    /// Initial bucket capacity reserved per general index.
    #[serde(default = "default_index_capacity")]
    pub initial_capacity: usize,

    /// Target load factor before the underlying map is encouraged to grow.
    /// Informational only: `std::collections::HashMap` manages its own
    /// growth, so this is read by instrumentation/tests, not enforced.
    #[serde(default = "default_load_factor")]
    pub load_factor: f64,
}

impl Default for GeneralIndexConfig {
    fn default() -> Self {
        GeneralIndexConfig {
            initial_capacity: default_index_capacity(),
            load_factor: default_load_factor(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            initial_capacity: default_initial_capacity(),
            general_index: GeneralIndexConfig::default(),
            auto_reclaim_threshold: default_auto_reclaim_threshold(),
        }
    }
}

/// Seeding for the impure sampling primitives (`PickRandomly`, `RandomElement`,
/// `AssignRandomly`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomConfig {
    /// Fixed seed for reproducible runs. `None` seeds from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for RandomConfig {
    fn default() -> Self {
        RandomConfig { seed: None }
    }
}

/// Logging configuration, read by the host binary/demo to initialize
/// `tracing-subscriber`; the library itself only emits `tracing` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_initial_capacity() -> usize {
    256
}
fn default_index_capacity() -> usize {
    64
}
fn default_load_factor() -> f64 {
    0.75
}
fn default_auto_reclaim_threshold() -> f64 {
    0.0
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. `inputlayer.toml` (base configuration)
    /// 2. `inputlayer.local.toml` (local overrides, git-ignored)
    /// 3. Environment variables (`INPUTLAYER_*` prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("inputlayer.toml"))
            .merge(Toml::file("inputlayer.local.toml"))
            .merge(Env::prefixed("INPUTLAYER_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("INPUTLAYER_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tables: TableConfig::default(),
            random: RandomConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.tables.initial_capacity, 256);
        assert!(config.random.seed.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[tables]"));
        assert!(toml_str.contains("[tables.general_index]"));

        let from_file = Figment::new()
            .merge(Toml::string(&toml_str))
            .extract::<Config>()
            .unwrap();
        assert_eq!(from_file.tables.initial_capacity, config.tables.initial_capacity);
    }
}
