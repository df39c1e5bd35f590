//! IterationController - drives an in-database iterative computation
//!
//! The controller owns a state log relation `(_iteration, state...)` and an iteration
//! counter. Each round, the driving algorithm asks whether a convergence condition holds
//! (`test`) and, if not, writes the next state (`update`). All work runs as statements
//! against the engine inside the caller's transaction; the controller never begins or
//! commits one.
//!
//! Expressions handed to `evaluate`, `test` and `update` are SQL fragments. They see the
//! argument record as `_args` and the state according to the controller's [`Strategy`]:
//! - single row: `_state`
//! - multi column: each state column by name
//! - dual state: `_state_previous` and `_state_current`
//!
//! They may also use the placeholders `{rel_args}`, `{rel_state}` and `{iteration}` (the
//! counter before the statement runs), plus any bindings supplied by the caller.

use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::errors::{ControlResult, StatementError, UsageError};
use crate::domain::models::{
    Config, EngineProfile, IterationPolicy, Lifecycle, SeedPolicy, Severity, StateRow, StateType,
    Strategy, Value, ITERATION_COLUMN, STATE_COLUMN,
};
use crate::domain::ports::{Engine, RowSet};

use super::capabilities::EngineCapabilities;
use super::guards::{LogSeverityGuard, OptimizerGuard};
use super::setting_guard::with_setting;
use super::statement::{render, Binding, Bindings, Ident, TypeExpr};

const EVALUATE_TEMPLATE: &str = "SELECT ({expression}) AS \"expression\" \
     FROM {rel_args} AS _args \
     LEFT OUTER JOIN ({state_source}) AS _state ON 1";

const SINGLE_ROW_SOURCE: &str =
    "SELECT \"_state\" FROM {rel_state} WHERE \"_iteration\" = {iteration}";

const MULTI_COLUMN_SOURCE: &str =
    "SELECT {state_columns} FROM {rel_state} WHERE \"_iteration\" = {iteration}";

const DUAL_STATE_SOURCE: &str = "SELECT _previous.\"_state\" AS \"_state_previous\", \
     _current.\"_state\" AS \"_state_current\" \
     FROM (SELECT \"_state\" FROM {rel_state} WHERE \"_iteration\" = {iteration} - 1) AS _previous \
     CROSS JOIN (SELECT \"_state\" FROM {rel_state} WHERE \"_iteration\" = {iteration}) AS _current";

const INSERT_SCALAR_TEMPLATE: &str = "INSERT INTO {rel_state} (\"_iteration\", \"_state\") \
     SELECT {next_iteration}, ({expression}) \
     FROM (SELECT 1) AS _anchor \
     LEFT OUTER JOIN {rel_args} AS _args ON 1 \
     LEFT OUTER JOIN ({state_source}) AS _state ON 1";

const INSERT_COLUMNS_TEMPLATE: &str = "INSERT INTO {rel_state} (\"_iteration\", {state_columns}) \
     SELECT {next_iteration}, {expression} \
     FROM (SELECT 1) AS _anchor \
     LEFT OUTER JOIN {rel_args} AS _args ON 1 \
     LEFT OUTER JOIN ({state_source}) AS _state ON 1";

/// Construction inputs for an [`IterationController`].
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Single-row relation holding the algorithm's arguments.
    pub args: Ident,
    /// Relation the state log is written to.
    pub state: Ident,
    pub state_type: StateType,
    pub strategy: Strategy,
    pub policy: IterationPolicy,
    pub profile: EngineProfile,
    /// Extra placeholders available to every expression.
    pub bindings: Bindings,
}

impl ControllerOptions {
    pub fn new(args: &str, state: &str, state_type: StateType) -> Result<Self, StatementError> {
        Ok(Self {
            args: Ident::parse(args)?,
            state: Ident::parse(state)?,
            state_type,
            strategy: Strategy::default(),
            policy: IterationPolicy::default(),
            profile: EngineProfile::default(),
            bindings: Bindings::new(),
        })
    }

    /// Options with the configured engine profile and default iteration policy.
    pub fn from_config(
        args: &str,
        state: &str,
        state_type: StateType,
        config: &Config,
    ) -> Result<Self, StatementError> {
        Ok(Self::new(args, state, state_type)?
            .with_profile(config.engine.clone())
            .with_policy(IterationPolicy::from(&config.controller)))
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_policy(mut self, policy: IterationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_profile(mut self, profile: EngineProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_binding(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.bindings.insert(name, binding);
        self
    }

    pub fn temporary(mut self, temporary: bool) -> Self {
        self.policy.temporary = temporary;
        self
    }

    /// Keep only the newest state row after each update.
    ///
    /// The dual-state strategy keeps the newest two rows instead, since its reads join the
    /// current iteration with the previous one.
    pub fn truncate_after_update(mut self, truncate: bool) -> Self {
        self.policy.truncate_after_update = truncate;
        self
    }

    pub fn seed(mut self, seed: SeedPolicy) -> Self {
        self.policy.seed = seed;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.policy.verbose = verbose;
        self
    }
}

/// Result of [`IterationController::run_to_convergence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Updates performed by this run.
    pub updates: u64,
    /// Counter after the run.
    pub iteration: i64,
    /// Whether the condition held when the run stopped.
    pub converged: bool,
}

/// Iteration controller over one state log.
pub struct IterationController<'e, E: Engine + ?Sized> {
    engine: &'e E,
    options: ControllerOptions,
    /// Relation actually used for the state log, schema-qualified.
    state_relation: Ident,
    state_columns: Vec<Ident>,
    state_definition: String,
    capabilities: EngineCapabilities,
    lifecycle: Lifecycle,
    iteration: i64,
    seed_pending_overwrite: bool,
    run_id: Uuid,
}

impl<E: Engine + ?Sized> std::fmt::Debug for IterationController<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationController")
            .field("state", &self.state_relation)
            .field("lifecycle", &self.lifecycle)
            .field("iteration", &self.iteration)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl<'e, E: Engine + ?Sized> IterationController<'e, E> {
    /// Validate the options and probe the engine once for optional settings.
    pub async fn new(engine: &'e E, options: ControllerOptions) -> ControlResult<Self> {
        if !options.strategy.accepts(&options.state_type) {
            return Err(UsageError::StrategyMismatch {
                strategy: options.strategy.to_string(),
                state_type: options.state_type.to_string(),
            }
            .into());
        }

        if options.policy.temporary
            && options.state.schema().is_some_and(|s| !s.eq_ignore_ascii_case("temp"))
        {
            return Err(UsageError::TransientStateSchema(options.state.to_string()).into());
        }

        let (state_columns, state_definition) = column_layout(&options.state_type)?;
        // Unqualified names would resolve to a temp table first, so pin the schema.
        let schema = if options.policy.temporary { "temp" } else { "main" };
        let state_relation = options.state.in_schema_if_unqualified(schema);
        let capabilities = EngineCapabilities::probe(engine, &options.profile).await?;
        let run_id = Uuid::new_v4();

        debug!(
            %run_id,
            args = %options.args,
            state = %state_relation,
            strategy = %options.strategy,
            "iteration controller created"
        );

        Ok(Self {
            engine,
            options,
            state_relation,
            state_columns,
            state_definition,
            capabilities,
            lifecycle: Lifecycle::Uninitialized,
            iteration: -1,
            seed_pending_overwrite: false,
            run_id,
        })
    }

    /// Current iteration counter; -1 before the first committed iteration.
    pub const fn iteration(&self) -> i64 {
        self.iteration
    }

    pub const fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub const fn capabilities(&self) -> &EngineCapabilities {
        &self.capabilities
    }

    pub const fn strategy(&self) -> Strategy {
        self.options.strategy
    }

    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Relation the state log lives in.
    pub const fn state_relation(&self) -> &Ident {
        &self.state_relation
    }

    /// Create a fresh state log, replacing any previous one under the same name.
    #[instrument(skip_all, fields(run_id = %self.run_id, state = %self.state_relation))]
    pub async fn enter(&mut self) -> ControlResult<()> {
        self.transition(Lifecycle::Active)?;

        if self.capabilities.log_severity {
            let quiet = LogSeverityGuard::new(&self.options.profile, Severity::Warning);
            with_setting(self.engine, &quiet, || self.create_state_log()).await?;
        } else {
            self.create_state_log().await?;
        }

        match self.options.policy.seed {
            SeedPolicy::None => {}
            SeedPolicy::Supplement => self.iteration = 0,
            SeedPolicy::Overwrite => self.seed_pending_overwrite = true,
        }

        self.lifecycle = Lifecycle::Active;
        info!(iteration = self.iteration, seed = ?self.options.policy.seed, "state log created");
        Ok(())
    }

    /// Mark the controller terminated. The state log is left in place.
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub fn exit(&mut self) -> ControlResult<()> {
        self.transition(Lifecycle::Terminated)?;
        self.lifecycle = Lifecycle::Terminated;
        info!(iteration = self.iteration, "iteration controller exited");
        Ok(())
    }

    /// Evaluate `expression` against the argument record and the current state.
    ///
    /// `None` means undetermined: no row came back, or the expression was NULL.
    #[instrument(skip_all, fields(run_id = %self.run_id, iteration = self.iteration))]
    pub async fn evaluate(&self, expression: &str) -> ControlResult<Option<Value>> {
        self.require_active("evaluate")?;

        if self.options.strategy == Strategy::DualState {
            match self.iteration {
                i if i < 0 => {
                    return Err(UsageError::DualStateNotReady { iteration: i }.into());
                }
                0 => return Ok(None),
                _ => {}
            }
        }

        let source = match self.options.strategy {
            Strategy::SingleRow => SINGLE_ROW_SOURCE,
            Strategy::MultiColumn => MULTI_COLUMN_SOURCE,
            Strategy::DualState => DUAL_STATE_SOURCE,
        };
        let bindings = self
            .reserved_bindings(self.iteration)
            .with_fragment("expression", expression)
            .with_fragment("state_source", source);
        let sql = render(EVALUATE_TEMPLATE, &bindings)?;

        let rows = if self.capabilities.optimizer_settable {
            let planner = OptimizerGuard::new(&self.options.profile, false);
            with_setting(self.engine, &planner, || self.query(&sql)).await?
        } else {
            self.query(&sql).await?
        };

        Ok(rows.scalar().cloned().and_then(Value::into_option))
    }

    /// Evaluate `condition` as a boolean. `None` means undetermined; keep iterating.
    ///
    /// The boolean reading happens on the returned value, so text results such as
    /// `'true'` or `'off'` are understood as well as numbers.
    pub async fn test(&self, condition: &str) -> ControlResult<Option<bool>> {
        let value = self.evaluate(condition).await?;
        Ok(value.as_ref().and_then(Value::as_bool))
    }

    /// Write the next iteration's state.
    ///
    /// `new_state` sees the argument record and the state of the current (pre-increment)
    /// iteration. For multi-column state it is a select list with one expression per
    /// state column. The counter advances only once the row is written.
    #[instrument(skip_all, fields(run_id = %self.run_id, iteration = self.iteration))]
    pub async fn update(&mut self, new_state: &str, extra: &Bindings) -> ControlResult<()> {
        self.require_active("update")?;

        let next = self.iteration + 1;
        let mut bindings = self
            .reserved_bindings(self.iteration)
            .with_literal("next_iteration", next)
            .with_fragment("expression", new_state)
            .with_fragment("state_source", self.update_source());
        bindings.fill_from(extra);

        if self.seed_pending_overwrite {
            let sql = render(
                "DELETE FROM {rel_state} WHERE \"_iteration\" = 0",
                &bindings,
            )?;
            self.execute(&sql).await?;
        }

        let template = match self.options.state_type {
            StateType::Scalar(_) => INSERT_SCALAR_TEMPLATE,
            StateType::Columns(_) => INSERT_COLUMNS_TEMPLATE,
        };
        let sql = render(template, &bindings)?;
        self.execute(&sql).await?;

        self.iteration = next;
        self.seed_pending_overwrite = false;

        if self.options.policy.truncate_after_update {
            // Dual-state reads also need the previous row.
            let keep_from = match self.options.strategy {
                Strategy::DualState => self.iteration - 1,
                _ => self.iteration,
            };
            let sql = render(
                "DELETE FROM {rel_state} WHERE \"_iteration\" < {iteration}",
                &self.reserved_bindings(keep_from),
            )?;
            self.execute(&sql).await?;
        }

        debug!(iteration = self.iteration, "state updated");
        Ok(())
    }

    /// Test `condition` and update with `new_state` until the condition holds or
    /// `max_updates` updates have been made.
    pub async fn run_to_convergence(
        &mut self,
        condition: &str,
        new_state: &str,
        max_updates: u64,
    ) -> ControlResult<RunSummary> {
        let mut updates = 0;
        loop {
            let verdict = if self.options.strategy == Strategy::DualState && self.iteration < 1 {
                None
            } else {
                self.test(condition).await?
            };

            if verdict == Some(true) || updates >= max_updates {
                let summary = RunSummary {
                    updates,
                    iteration: self.iteration,
                    converged: verdict == Some(true),
                };
                info!(?summary, "iteration run finished");
                return Ok(summary);
            }

            self.update(new_state, &Bindings::new()).await?;
            updates += 1;
        }
    }

    /// Every row currently in the state log, ordered by iteration.
    pub async fn state_log(&self) -> ControlResult<Vec<StateRow>> {
        if self.lifecycle == Lifecycle::Uninitialized {
            return Err(UsageError::NotActive {
                operation: "state_log",
                lifecycle: self.lifecycle,
            }
            .into());
        }

        let sql = render(
            "SELECT \"_iteration\", {state_columns} FROM {rel_state} ORDER BY \"_iteration\"",
            &self.reserved_bindings(self.iteration),
        )?;
        let rows = self.query(&sql).await?;

        Ok(rows
            .rows
            .into_iter()
            .filter_map(|mut row| {
                if row.is_empty() {
                    return None;
                }
                let iteration = row.remove(0).as_i64()?;
                Some(StateRow {
                    iteration,
                    values: row,
                })
            })
            .collect())
    }

    /// Drop the state log. Only after `exit`.
    pub async fn drop_state_log(&self) -> ControlResult<()> {
        if self.lifecycle != Lifecycle::Terminated {
            return Err(UsageError::StateLogInUse(self.lifecycle).into());
        }
        let sql = render(
            "DROP TABLE IF EXISTS {rel_state}",
            &self.reserved_bindings(self.iteration),
        )?;
        self.execute(&sql).await?;
        info!(state = %self.state_relation, "state log dropped");
        Ok(())
    }

    async fn create_state_log(&self) -> ControlResult<()> {
        let bindings = self.reserved_bindings(self.iteration);

        let drop = render("DROP TABLE IF EXISTS {rel_state}", &bindings)?;
        self.execute(&drop).await?;

        let create = render(
            "CREATE {temporary}TABLE {rel_state} (\
             \"_iteration\" INTEGER PRIMARY KEY CHECK (\"_iteration\" >= 0), \
             {state_definition})",
            &bindings,
        )?;
        self.execute(&create).await?;

        if self.options.policy.seed.seeds() {
            let seed = render(
                "INSERT INTO {rel_state} (\"_iteration\") VALUES (0)",
                &bindings,
            )?;
            self.execute(&seed).await?;
        }
        Ok(())
    }

    /// State lookup used by `update`: always the single row at the current iteration.
    fn update_source(&self) -> &'static str {
        match self.options.state_type {
            StateType::Scalar(_) => SINGLE_ROW_SOURCE,
            StateType::Columns(_) => MULTI_COLUMN_SOURCE,
        }
    }

    /// Controller-owned bindings, then the caller's construction-time bindings.
    fn reserved_bindings(&self, iteration: i64) -> Bindings {
        let temporary = if self.options.policy.temporary {
            "TEMPORARY "
        } else {
            ""
        };
        let mut bindings = Bindings::new()
            .with_ident("rel_args", self.options.args.clone())
            .with_ident("rel_state", self.state_relation.clone())
            .with_literal("iteration", iteration)
            .with("state_columns", Binding::IdentList(self.state_columns.clone()))
            .with_fragment("state_definition", self.state_definition.clone())
            .with_fragment("temporary", temporary);
        bindings.fill_from(&self.options.bindings);
        bindings
    }

    async fn query(&self, sql: &str) -> ControlResult<RowSet> {
        self.trace_statement(sql).await?;
        Ok(self.engine.query(sql).await?)
    }

    async fn execute(&self, sql: &str) -> ControlResult<u64> {
        self.trace_statement(sql).await?;
        Ok(self.engine.execute(sql).await?)
    }

    async fn trace_statement(&self, sql: &str) -> ControlResult<()> {
        debug!(sql, "executing statement");
        if self.options.policy.verbose {
            self.engine.notice(Severity::Notice, sql).await?;
        }
        Ok(())
    }

    fn require_active(&self, operation: &'static str) -> Result<(), UsageError> {
        if self.lifecycle == Lifecycle::Active {
            Ok(())
        } else {
            Err(UsageError::NotActive {
                operation,
                lifecycle: self.lifecycle,
            })
        }
    }

    fn transition(&self, next: Lifecycle) -> Result<(), UsageError> {
        if self.lifecycle.can_transition_to(next) {
            Ok(())
        } else {
            Err(UsageError::InvalidTransition {
                from: self.lifecycle,
                to: next,
            })
        }
    }
}

/// Quoted state column names and the column definitions for `CREATE TABLE`.
fn column_layout(state_type: &StateType) -> Result<(Vec<Ident>, String), StatementError> {
    let columns: Vec<(String, &str)> = match state_type {
        StateType::Scalar(t) => vec![(STATE_COLUMN.to_string(), t.as_str())],
        StateType::Columns(cols) => cols
            .iter()
            .map(|c| (c.name.clone(), c.type_expr.as_str()))
            .collect(),
    };
    if columns.is_empty() {
        return Err(StatementError::InvalidIdentifier(String::new()));
    }

    let mut idents = Vec::with_capacity(columns.len());
    let mut definitions = Vec::with_capacity(columns.len());
    for (name, type_expr) in columns {
        if name == ITERATION_COLUMN || name.contains('.') {
            return Err(StatementError::InvalidIdentifier(name));
        }
        let ident = Ident::parse(&name)?;
        let type_expr = TypeExpr::parse(type_expr)?;
        definitions.push(format!("{} {}", ident.quoted(), type_expr.as_str()));
        idents.push(ident);
    }
    Ok((idents, definitions.join(", ")))
}
