//! State log shapes, retrieval strategies and iteration policies.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Value;

/// Controller lifecycle: `Uninitialized -> Active -> Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Uninitialized,
    Active,
    Terminated,
}

impl Lifecycle {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Active => "active",
            Lifecycle::Terminated => "terminated",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub const fn can_transition_to(&self, next: Lifecycle) -> bool {
        matches!(
            (self, next),
            (Lifecycle::Uninitialized, Lifecycle::Active) | (Lifecycle::Active, Lifecycle::Terminated)
        )
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of the persisted state.
///
/// Type expressions are engine-side (e.g. `REAL`, `DOUBLE PRECISION`, `BLOB`) and are
/// validated by the statement builder before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    /// One opaque state value stored in the `_state` column.
    Scalar(String),
    /// Several named state columns.
    Columns(Vec<StateColumn>),
}

impl StateType {
    pub fn scalar(type_expr: impl Into<String>) -> Self {
        StateType::Scalar(type_expr.into())
    }

    pub fn columns<N, T>(columns: impl IntoIterator<Item = (N, T)>) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        StateType::Columns(
            columns
                .into_iter()
                .map(|(name, type_expr)| StateColumn {
                    name: name.into(),
                    type_expr: type_expr.into(),
                })
                .collect(),
        )
    }

    /// Names of the state columns, in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        match self {
            StateType::Scalar(_) => vec![STATE_COLUMN],
            StateType::Columns(cols) => cols.iter().map(|c| c.name.as_str()).collect(),
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateType::Scalar(t) => write!(f, "scalar({t})"),
            StateType::Columns(cols) => {
                let parts: Vec<String> = cols
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.type_expr))
                    .collect();
                write!(f, "columns({})", parts.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateColumn {
    pub name: String,
    pub type_expr: String,
}

/// Column holding the iteration key in every state log.
pub const ITERATION_COLUMN: &str = "_iteration";
/// Column holding the state value for scalar state types.
pub const STATE_COLUMN: &str = "_state";

/// One persisted row of the state log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRow {
    pub iteration: i64,
    /// State values in column order; a single entry for scalar state types.
    pub values: Vec<Value>,
}

impl StateRow {
    /// The state of a scalar state log.
    pub fn state(&self) -> &Value {
        self.values.first().unwrap_or(&Value::Null)
    }
}

/// How `evaluate` exposes the state log to expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// The row at the current iteration as a single `_state` value.
    #[default]
    SingleRow,
    /// Every state column of the row at the current iteration, by column name.
    MultiColumn,
    /// `_state_previous` and `_state_current`, the rows at `iteration - 1` and `iteration`.
    DualState,
}

impl Strategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Strategy::SingleRow => "single_row",
            Strategy::MultiColumn => "multi_column",
            Strategy::DualState => "dual_state",
        }
    }

    pub const fn accepts(&self, state_type: &StateType) -> bool {
        match self {
            Strategy::MultiColumn => matches!(state_type, StateType::Columns(_)),
            Strategy::SingleRow | Strategy::DualState => matches!(state_type, StateType::Scalar(_)),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `enter` seeds into a fresh state log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    /// No seed row.
    #[default]
    None,
    /// Seed `(0, NULL)` and treat it as the current state; the first update writes iteration 1.
    Supplement,
    /// Seed `(0, NULL)` with the counter left at -1; the first update replaces the seed row.
    Overwrite,
}

impl SeedPolicy {
    pub const fn seeds(&self) -> bool {
        !matches!(self, SeedPolicy::None)
    }
}

/// Iteration policy flags chosen by the driving algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationPolicy {
    /// Create the state log as a session-scoped temporary relation.
    pub temporary: bool,
    /// Keep only the newest state row after each update.
    pub truncate_after_update: bool,
    pub seed: SeedPolicy,
    /// Echo every statement to the engine as a notice.
    pub verbose: bool,
}

impl Default for IterationPolicy {
    fn default() -> Self {
        Self {
            temporary: true,
            truncate_after_update: false,
            seed: SeedPolicy::None,
            verbose: false,
        }
    }
}
