//! Domain errors for the iteration controller.

use thiserror::Error;

use crate::domain::models::Lifecycle;

/// Failure reported by the engine's query capability.
///
/// Always fatal to the run. The controller never inspects or wraps it beyond
/// carrying it to the caller.
#[derive(Debug, Error)]
#[error("engine rejected statement `{statement}`: {source}")]
pub struct EngineQueryError {
    pub statement: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl EngineQueryError {
    pub fn new(
        statement: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            statement: statement.into(),
            source: source.into(),
        }
    }
}

/// Problems building a statement from a template and its bindings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatementError {
    #[error("no binding for placeholder `{0}`")]
    UnknownPlaceholder(String),

    #[error("unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),

    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("invalid type expression `{0}`")]
    InvalidTypeExpr(String),

    #[error("fragment `{0}` nests placeholders too deeply")]
    FragmentTooDeep(String),
}

/// Violations of the controller's calling contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("`{operation}` requires an active controller, but it is {lifecycle}")]
    NotActive {
        operation: &'static str,
        lifecycle: Lifecycle,
    },

    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: Lifecycle, to: Lifecycle },

    #[error("dual-state evaluation needs a committed iteration, counter is {iteration}")]
    DualStateNotReady { iteration: i64 },

    #[error("strategy {strategy} cannot use state type {state_type}")]
    StrategyMismatch { strategy: String, state_type: String },

    #[error("transient state log `{0}` must be unqualified or in the temp schema")]
    TransientStateSchema(String),

    #[error("the state log can only be dropped after exit, controller is {0}")]
    StateLogInUse(Lifecycle),

    #[error("invalid statement: {0}")]
    Statement(#[from] StatementError),
}

/// Errors surfaced by guards and the iteration controller.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("setting `{setting}` cannot be changed: {reason}")]
    ConfigPermission { setting: String, reason: String },

    #[error(transparent)]
    EngineQuery(#[from] EngineQueryError),

    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl From<StatementError> for ControlError {
    fn from(err: StatementError) -> Self {
        ControlError::Usage(UsageError::Statement(err))
    }
}

pub type ControlResult<T> = Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_is_a_usage_error() {
        let err: ControlError = StatementError::UnknownPlaceholder("x".to_string()).into();
        assert!(matches!(
            err,
            ControlError::Usage(UsageError::Statement(StatementError::UnknownPlaceholder(_)))
        ));
    }

    #[test]
    fn test_engine_error_display_keeps_statement() {
        let err = EngineQueryError::new("SELECT nope", "no such column: nope");
        let control: ControlError = err.into();
        let rendered = control.to_string();
        assert!(rendered.contains("SELECT nope"));
        assert!(rendered.contains("no such column"));
    }
}
