use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::services::statement::Ident;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid engine setting name for {field}: `{value}`")]
    InvalidSettingName { field: &'static str, value: String },

    #[error("Invalid session value for `{0}`: {1}")]
    InvalidSessionValue(String, String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .iterctl/config.yaml
    /// 3. .iterctl/local.yaml (optional overrides)
    /// 4. Environment variables (ITERCTL_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".iterctl/config.yaml"))
            .merge(Yaml::file(".iterctl/local.yaml"))
            .merge(Env::prefixed("ITERCTL_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.url.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        let profile = &config.engine;
        for (field, value) in [
            ("optimizer_setting", &profile.optimizer_setting),
            ("optimizer_control_setting", &profile.optimizer_control_setting),
            ("hash_aggregation_setting", &profile.hash_aggregation_setting),
            ("log_severity_setting", &profile.log_severity_setting),
        ] {
            if Ident::parse(value).is_err() || value.contains('.') {
                return Err(ConfigError::InvalidSettingName {
                    field,
                    value: value.clone(),
                });
            }
        }

        if let Some(severity) = config.session.get(&profile.log_severity_setting) {
            severity
                .parse::<crate::domain::models::Severity>()
                .map_err(|e| ConfigError::InvalidSessionValue(profile.log_severity_setting.clone(), e))?;
        }

        Ok(())
    }
}
