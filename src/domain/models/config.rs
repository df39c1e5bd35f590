use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{IterationPolicy, SeedPolicy};

/// Main configuration structure for iterctl
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Names of the engine settings the guards manipulate
    #[serde(default)]
    pub engine: EngineProfile,

    /// Session variables the SQLite engine keeps in-process
    #[serde(default = "default_session_settings")]
    pub session: BTreeMap<String, String>,

    /// Iteration policy applied when a driver does not choose its own
    #[serde(default)]
    pub controller: ControllerDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            engine: EngineProfile::default(),
            session: default_session_settings(),
            controller: ControllerDefaults::default(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// `SQLite` database URL (`sqlite::memory:` or `sqlite:path/to/file.db`)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Seconds to wait on a locked database before failing
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite:.iterctl/state.db".to_string()
}

const fn default_busy_timeout_secs() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Engine setting names used by the specific guards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineProfile {
    /// Planner optimization toggled by the optimizer guard
    #[serde(default = "default_optimizer_setting")]
    pub optimizer_setting: String,

    /// Flag reporting whether the optimizer setting may be changed
    #[serde(default = "default_optimizer_control_setting")]
    pub optimizer_control_setting: String,

    /// Hash aggregation toggle; absent on engines without one
    #[serde(default = "default_hash_aggregation_setting")]
    pub hash_aggregation_setting: String,

    /// Minimum severity of notices surfaced to the caller
    #[serde(default = "default_log_severity_setting")]
    pub log_severity_setting: String,
}

fn default_optimizer_setting() -> String {
    "automatic_index".to_string()
}

fn default_optimizer_control_setting() -> String {
    "optimizer_control".to_string()
}

fn default_hash_aggregation_setting() -> String {
    "enable_hashagg".to_string()
}

fn default_log_severity_setting() -> String {
    "client_min_messages".to_string()
}

impl Default for EngineProfile {
    fn default() -> Self {
        Self {
            optimizer_setting: default_optimizer_setting(),
            optimizer_control_setting: default_optimizer_control_setting(),
            hash_aggregation_setting: default_hash_aggregation_setting(),
            log_severity_setting: default_log_severity_setting(),
        }
    }
}

/// Session variables every engine session starts with.
pub fn default_session_settings() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("optimizer_control".to_string(), "on".to_string()),
        ("client_min_messages".to_string(), "notice".to_string()),
    ])
}

/// Default iteration policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ControllerDefaults {
    #[serde(default = "default_true")]
    pub temporary: bool,

    #[serde(default)]
    pub truncate_after_update: bool,

    #[serde(default)]
    pub seed: SeedPolicy,

    #[serde(default)]
    pub verbose: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for ControllerDefaults {
    fn default() -> Self {
        Self {
            temporary: true,
            truncate_after_update: false,
            seed: SeedPolicy::None,
            verbose: false,
        }
    }
}

impl From<&ControllerDefaults> for IterationPolicy {
    fn from(defaults: &ControllerDefaults) -> Self {
        Self {
            temporary: defaults.temporary,
            truncate_after_update: defaults.truncate_after_update,
            seed: defaults.seed,
            verbose: defaults.verbose,
        }
    }
}
