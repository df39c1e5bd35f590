//! Scoped engine settings.
//!
//! [`SettingScope`] is the acquisition primitive: `enter` records the current value of a
//! setting and applies the guard's requested value when permitted, `exit` puts the
//! original back. A scope dropped without `exit` restores nothing; the caller's
//! transaction rollback is what reverts a setting on the failure path.
//!
//! [`with_setting`] wraps an operation in a scope.

use std::future::Future;

use tracing::debug;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::ports::Engine;

/// Outcome of a guard's permission/availability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// Apply the requested value.
    Apply,
    /// The setting already has an acceptable value; leave it alone.
    Keep,
    /// The setting cannot be changed. Fatal only when the guard asks for `error_on_fail`.
    Blocked(String),
}

/// A guard bound to one named engine setting.
pub trait NamedSettingGuard: Send + Sync {
    /// Name of the setting this guard changes.
    fn setting(&self) -> &str;

    /// Value to apply for the duration of the scope.
    fn requested_value(&self) -> String;

    /// Fail with a permission error instead of silently skipping a blocked change.
    fn error_on_fail(&self) -> bool {
        false
    }

    /// A separate setting reporting whether [`setting`](Self::setting) may be changed.
    fn permission_setting(&self) -> Option<&str> {
        None
    }

    /// Decide from the current value (`None` if the engine lacks the setting) and the
    /// permission flag's value.
    fn decide(&self, current: Option<&str>, permission: Option<&str>) -> Permission;
}

/// Plain guard: set `setting` to `value`, blocked only when the engine lacks the setting.
#[derive(Debug, Clone)]
pub struct SettingGuard {
    setting: String,
    value: String,
    error_on_fail: bool,
}

impl SettingGuard {
    pub fn new(setting: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            setting: setting.into(),
            value: value.into(),
            error_on_fail: false,
        }
    }

    pub fn with_error_on_fail(mut self, error_on_fail: bool) -> Self {
        self.error_on_fail = error_on_fail;
        self
    }
}

impl NamedSettingGuard for SettingGuard {
    fn setting(&self) -> &str {
        &self.setting
    }

    fn requested_value(&self) -> String {
        self.value.clone()
    }

    fn error_on_fail(&self) -> bool {
        self.error_on_fail
    }

    fn decide(&self, current: Option<&str>, _permission: Option<&str>) -> Permission {
        match current {
            None => Permission::Blocked("engine has no such setting".to_string()),
            Some(v) if v == self.value => Permission::Keep,
            Some(_) => Permission::Apply,
        }
    }
}

/// An entered setting scope.
#[must_use = "a setting scope restores its setting only through `exit`"]
#[derive(Debug)]
pub struct SettingScope<'e, E: Engine + ?Sized> {
    engine: &'e E,
    setting: String,
    original: Option<String>,
    requested: String,
    applied: bool,
}

impl<'e, E: Engine + ?Sized> SettingScope<'e, E> {
    /// Record the current value of the guard's setting, then apply the requested value
    /// if the guard permits it.
    pub async fn enter<G>(engine: &'e E, guard: &G) -> ControlResult<Self>
    where
        G: NamedSettingGuard + ?Sized,
    {
        let setting = guard.setting().to_string();
        let requested = guard.requested_value();
        let original = engine.get_setting(&setting).await?;
        let permission = match guard.permission_setting() {
            Some(flag) => engine.get_setting(flag).await?,
            None => None,
        };

        let applied = match guard.decide(original.as_deref(), permission.as_deref()) {
            Permission::Apply => {
                engine.set_setting(&setting, &requested).await?;
                true
            }
            Permission::Keep => false,
            Permission::Blocked(reason) => {
                if guard.error_on_fail() {
                    return Err(ControlError::ConfigPermission { setting, reason });
                }
                debug!(setting = %setting, reason = %reason, "setting change skipped");
                false
            }
        };

        debug!(
            setting = %setting,
            original = ?original,
            requested = %requested,
            applied,
            "setting scope entered"
        );

        Ok(Self {
            engine,
            setting,
            original,
            requested,
            applied,
        })
    }

    /// Restore the original value if this scope changed it.
    pub async fn exit(self) -> ControlResult<()> {
        if let (true, Some(original)) = (self.applied, self.original.as_deref()) {
            self.engine.set_setting(&self.setting, original).await?;
        }
        debug!(setting = %self.setting, restored = self.applied, "setting scope exited");
        Ok(())
    }

    pub fn setting(&self) -> &str {
        &self.setting
    }

    /// Value observed on entry, `None` when the engine lacks the setting.
    pub fn original(&self) -> Option<&str> {
        self.original.as_deref()
    }

    pub fn requested(&self) -> &str {
        &self.requested
    }

    /// Whether entering changed the setting.
    pub const fn applied(&self) -> bool {
        self.applied
    }
}

/// Run `op` inside a scope of `guard`.
///
/// The setting is restored when `op` succeeds. A failure from `op` is returned unchanged
/// and leaves the setting to the enclosing transaction.
pub async fn with_setting<E, G, F, Fut, T, Er>(engine: &E, guard: &G, op: F) -> Result<T, Er>
where
    E: Engine + ?Sized,
    G: NamedSettingGuard + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, Er>>,
    Er: From<ControlError>,
{
    let scope = SettingScope::enter(engine, guard).await?;
    let value = op().await?;
    scope.exit().await?;
    Ok(value)
}
