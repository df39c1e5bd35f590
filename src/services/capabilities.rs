//! Runtime probe of the engine settings the controller can use.

use serde::Serialize;
use tracing::debug;

use crate::domain::errors::EngineQueryError;
use crate::domain::models::EngineProfile;
use crate::domain::ports::Engine;

use super::guards::parse_switch;

/// Which optional engine settings exist, as observed once per controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCapabilities {
    /// The planner optimizer setting exists.
    pub optimizer: bool,
    /// The optimizer may be changed in this session.
    pub optimizer_settable: bool,
    pub log_severity: bool,
}

impl EngineCapabilities {
    pub async fn probe<E>(engine: &E, profile: &EngineProfile) -> Result<Self, EngineQueryError>
    where
        E: Engine + ?Sized,
    {
        let optimizer = engine
            .get_setting(&profile.optimizer_setting)
            .await?
            .is_some();
        let optimizer_settable = optimizer
            && engine
                .get_setting(&profile.optimizer_control_setting)
                .await?
                .and_then(|v| parse_switch(&v))
                != Some(false);
        let log_severity = engine
            .get_setting(&profile.log_severity_setting)
            .await?
            .is_some();

        let capabilities = Self {
            optimizer,
            optimizer_settable,
            log_severity,
        };
        debug!(?capabilities, "engine capabilities probed");
        Ok(capabilities)
    }
}
