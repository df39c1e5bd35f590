//! Guards for the specific engine settings the controller and algorithms rely on.

use crate::domain::models::{EngineProfile, Severity};

use super::setting_guard::{NamedSettingGuard, Permission};

/// Read an engine switch value (`on`, `1`, `true`, `off`, `fixed`, ...).
pub fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "yes" | "t" => Some(true),
        "off" | "0" | "false" | "no" | "f" | "fixed" => Some(false),
        _ => None,
    }
}

const fn switch_value(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// Turns the planner optimizer on or off.
///
/// The engine may pin the optimizer through a separate control flag; when that flag is
/// off the change is skipped, or rejected if `error_on_fail` is set.
#[derive(Debug, Clone)]
pub struct OptimizerGuard {
    setting: String,
    control_setting: String,
    enabled: bool,
    error_on_fail: bool,
}

impl OptimizerGuard {
    pub fn new(profile: &EngineProfile, enabled: bool) -> Self {
        Self {
            setting: profile.optimizer_setting.clone(),
            control_setting: profile.optimizer_control_setting.clone(),
            enabled,
            error_on_fail: false,
        }
    }

    pub fn with_error_on_fail(mut self, error_on_fail: bool) -> Self {
        self.error_on_fail = error_on_fail;
        self
    }
}

impl NamedSettingGuard for OptimizerGuard {
    fn setting(&self) -> &str {
        &self.setting
    }

    fn requested_value(&self) -> String {
        switch_value(self.enabled).to_string()
    }

    fn error_on_fail(&self) -> bool {
        self.error_on_fail
    }

    fn permission_setting(&self) -> Option<&str> {
        Some(&self.control_setting)
    }

    fn decide(&self, current: Option<&str>, permission: Option<&str>) -> Permission {
        let Some(current) = current else {
            return Permission::Blocked("engine has no optimizer setting".to_string());
        };
        if permission.and_then(parse_switch) == Some(false) {
            return Permission::Blocked(format!(
                "optimizer is fixed by `{}`",
                self.control_setting
            ));
        }
        if parse_switch(current) == Some(self.enabled) {
            Permission::Keep
        } else {
            Permission::Apply
        }
    }
}

/// Turns hash aggregation on or off; a silent no-op on engines without the setting.
#[derive(Debug, Clone)]
pub struct HashAggregationGuard {
    setting: String,
    enabled: bool,
}

impl HashAggregationGuard {
    pub fn new(profile: &EngineProfile, enabled: bool) -> Self {
        Self {
            setting: profile.hash_aggregation_setting.clone(),
            enabled,
        }
    }
}

impl NamedSettingGuard for HashAggregationGuard {
    fn setting(&self) -> &str {
        &self.setting
    }

    fn requested_value(&self) -> String {
        switch_value(self.enabled).to_string()
    }

    fn decide(&self, current: Option<&str>, _permission: Option<&str>) -> Permission {
        match current {
            None => Permission::Blocked("engine has no hash aggregation setting".to_string()),
            Some(v) if parse_switch(v) == Some(self.enabled) => Permission::Keep,
            Some(_) => Permission::Apply,
        }
    }
}

/// Raises the minimum severity of notices surfaced to the caller.
///
/// Never lowers it: a caller that already filters more strictly keeps its setting.
#[derive(Debug, Clone)]
pub struct LogSeverityGuard {
    setting: String,
    minimum: Severity,
    error_on_fail: bool,
}

impl LogSeverityGuard {
    pub fn new(profile: &EngineProfile, minimum: Severity) -> Self {
        Self {
            setting: profile.log_severity_setting.clone(),
            minimum,
            error_on_fail: false,
        }
    }

    pub fn with_error_on_fail(mut self, error_on_fail: bool) -> Self {
        self.error_on_fail = error_on_fail;
        self
    }

    pub const fn minimum(&self) -> Severity {
        self.minimum
    }
}

impl NamedSettingGuard for LogSeverityGuard {
    fn setting(&self) -> &str {
        &self.setting
    }

    fn requested_value(&self) -> String {
        self.minimum.as_str().to_string()
    }

    fn error_on_fail(&self) -> bool {
        self.error_on_fail
    }

    fn decide(&self, current: Option<&str>, _permission: Option<&str>) -> Permission {
        match current {
            None => Permission::Blocked("engine has no notice severity setting".to_string()),
            Some(v) => match v.parse::<Severity>() {
                Ok(severity) if severity >= self.minimum => Permission::Keep,
                _ => Permission::Apply,
            },
        }
    }
}
