//! Integration tests for the iteration controller against the SQLite engine.

mod common;

use common::{count_rows, engine_with_args};
use iterctl::{
    Bindings, ControlError, ControllerOptions, EngineSettings, IterationController, Lifecycle,
    QueryEngine, SeedPolicy, StateType, Strategy, UsageError, Value,
};

fn scalar_options() -> ControllerOptions {
    ControllerOptions::new("args", "state", StateType::scalar("REAL")).unwrap()
}

#[tokio::test]
async fn test_counter_and_log_size_after_k_updates() {
    let engine = engine_with_args("1.0 AS step").await;
    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();

    ctl.enter().await.unwrap();
    assert_eq!(ctl.iteration(), -1);
    assert_eq!(ctl.lifecycle(), Lifecycle::Active);

    for k in 1..=5 {
        ctl.update("coalesce(_state, 0.0) + _args.step", &Bindings::new())
            .await
            .unwrap();
        assert_eq!(ctl.iteration(), k - 1);
    }

    assert_eq!(count_rows(&engine, "temp.state").await, 5);
    let log = ctl.state_log().await.unwrap();
    let keys: Vec<i64> = log.iter().map(|r| r.iteration).collect();
    assert_eq!(keys, vec![0, 1, 2, 3, 4]);
    assert_eq!(log[4].state(), &Value::Real(5.0));
}

#[tokio::test]
async fn test_truncation_keeps_only_newest_row() {
    let engine = engine_with_args("1.0 AS step").await;
    let options = scalar_options().truncate_after_update(true);
    let mut ctl = IterationController::new(&engine, options).await.unwrap();

    ctl.enter().await.unwrap();
    for _ in 0..4 {
        ctl.update("coalesce(_state, 0.0) + _args.step", &Bindings::new())
            .await
            .unwrap();
        assert_eq!(count_rows(&engine, "temp.state").await, 1);
    }

    assert_eq!(ctl.iteration(), 3);
    assert_eq!(ctl.evaluate("_state").await.unwrap(), Some(Value::Real(4.0)));
}

#[tokio::test]
async fn test_written_state_reads_back_exactly() {
    let engine = engine_with_args("0 AS unused").await;
    let text = ControllerOptions::new("args", "state", StateType::scalar("TEXT")).unwrap();
    let mut ctl = IterationController::new(&engine, text).await.unwrap();
    ctl.enter().await.unwrap();

    let written = "it's {braced} \"quoted\"";
    ctl.update("{value}", &Bindings::new().with_literal("value", written))
        .await
        .unwrap();
    assert_eq!(
        ctl.evaluate("_state").await.unwrap(),
        Some(Value::from(written))
    );

    let mut real = IterationController::new(&engine, scalar_options().temporary(false))
        .await
        .unwrap();
    real.enter().await.unwrap();
    real.update("{value}", &Bindings::new().with_literal("value", 0.1))
        .await
        .unwrap();
    assert_eq!(real.evaluate("_state").await.unwrap(), Some(Value::Real(0.1)));
}

#[tokio::test]
async fn test_repeated_evaluation_is_stable() {
    let engine = engine_with_args("3.0 AS x").await;
    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    ctl.enter().await.unwrap();
    ctl.update("_args.x * 2", &Bindings::new()).await.unwrap();

    let first = ctl.evaluate("_state + _args.x").await.unwrap();
    let second = ctl.evaluate("_state + _args.x").await.unwrap();
    assert_eq!(first, Some(Value::Real(9.0)));
    assert_eq!(first, second);
    assert_eq!(ctl.test("_state > 5").await.unwrap(), Some(true));
    assert_eq!(ctl.test("_state > 5").await.unwrap(), Some(true));
    assert_eq!(ctl.iteration(), 0);
}

#[tokio::test]
async fn test_missing_state_is_undetermined() {
    let engine = engine_with_args("1.0 AS x").await;
    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    ctl.enter().await.unwrap();

    assert_eq!(ctl.evaluate("_state").await.unwrap(), None);
    assert_eq!(ctl.test("_state > 0").await.unwrap(), None);
}

#[tokio::test]
async fn test_empty_argument_relation_yields_no_row() {
    let engine = engine_with_args("1.0 AS x").await;
    engine.execute("DELETE FROM args").await.unwrap();

    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    ctl.enter().await.unwrap();
    assert_eq!(ctl.evaluate("1").await.unwrap(), None);

    ctl.update("7.0", &Bindings::new()).await.unwrap();
    assert_eq!(count_rows(&engine, "temp.state").await, 1);
}

#[tokio::test]
async fn test_dual_state_pairs_previous_and_current() {
    let engine = engine_with_args("1.0 AS step").await;
    let options = scalar_options().with_strategy(Strategy::DualState);
    let mut ctl = IterationController::new(&engine, options).await.unwrap();
    ctl.enter().await.unwrap();

    let err = ctl.evaluate("_state_current").await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::Usage(UsageError::DualStateNotReady { iteration: -1 })
    ));

    ctl.update("1.0", &Bindings::new()).await.unwrap();
    assert_eq!(ctl.iteration(), 0);
    assert_eq!(ctl.evaluate("_state_current").await.unwrap(), None);
    assert_eq!(ctl.test("_state_current > 0").await.unwrap(), None);

    ctl.update("_state * 3", &Bindings::new()).await.unwrap();
    assert_eq!(
        ctl.evaluate("_state_previous").await.unwrap(),
        Some(Value::Real(1.0))
    );
    assert_eq!(
        ctl.evaluate("_state_current").await.unwrap(),
        Some(Value::Real(3.0))
    );
    assert_eq!(
        ctl.test("abs(_state_current - _state_previous) < 0.5")
            .await
            .unwrap(),
        Some(false)
    );
}

#[tokio::test]
async fn test_dual_state_truncation_keeps_previous_row() {
    let engine = engine_with_args("1.0 AS step").await;
    let options = scalar_options()
        .with_strategy(Strategy::DualState)
        .truncate_after_update(true);
    let mut ctl = IterationController::new(&engine, options).await.unwrap();
    ctl.enter().await.unwrap();

    for _ in 0..4 {
        ctl.update("coalesce(_state, 0.0) + _args.step", &Bindings::new())
            .await
            .unwrap();
    }
    assert_eq!(count_rows(&engine, "temp.state").await, 2);
    assert_eq!(
        ctl.evaluate("_state_current - _state_previous").await.unwrap(),
        Some(Value::Real(1.0))
    );
}

#[tokio::test]
async fn test_multi_column_state() {
    let engine = engine_with_args("0.5 AS rate").await;
    let state_type = StateType::columns([("coef", "REAL"), ("loss", "REAL")]);
    let options = ControllerOptions::new("args", "state", state_type)
        .unwrap()
        .with_strategy(Strategy::MultiColumn);
    let mut ctl = IterationController::new(&engine, options).await.unwrap();
    ctl.enter().await.unwrap();

    ctl.update("1.0, 10.0", &Bindings::new()).await.unwrap();
    ctl.update("coef * 2, loss * _args.rate", &Bindings::new())
        .await
        .unwrap();

    assert_eq!(ctl.evaluate("coef").await.unwrap(), Some(Value::Real(2.0)));
    assert_eq!(ctl.evaluate("loss").await.unwrap(), Some(Value::Real(5.0)));
    assert_eq!(ctl.test("loss < 6 AND coef > 1").await.unwrap(), Some(true));

    let log = ctl.state_log().await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].values, vec![Value::Real(2.0), Value::Real(5.0)]);
}

#[tokio::test]
async fn test_strategy_must_match_state_type() {
    let engine = engine_with_args("1 AS x").await;
    let options = scalar_options().with_strategy(Strategy::MultiColumn);
    let err = IterationController::new(&engine, options).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::Usage(UsageError::StrategyMismatch { .. })
    ));
}

#[tokio::test]
async fn test_seed_supplemented_by_first_update() {
    let engine = engine_with_args("1 AS x").await;
    let options = scalar_options().seed(SeedPolicy::Supplement);
    let mut ctl = IterationController::new(&engine, options).await.unwrap();
    ctl.enter().await.unwrap();

    let log = ctl.state_log().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].iteration, 0);
    assert_eq!(log[0].state(), &Value::Null);

    ctl.update("5.0", &Bindings::new()).await.unwrap();

    let keys: Vec<i64> = ctl
        .state_log()
        .await
        .unwrap()
        .iter()
        .map(|r| r.iteration)
        .collect();
    assert_eq!(keys, vec![0, 1]);
    assert_eq!(ctl.iteration(), 1);
    assert_eq!(ctl.test("_state > 4").await.unwrap(), Some(true));
}

#[tokio::test]
async fn test_seed_overwritten_by_first_update() {
    let engine = engine_with_args("1 AS x").await;
    let options = scalar_options().seed(SeedPolicy::Overwrite);
    let mut ctl = IterationController::new(&engine, options).await.unwrap();
    ctl.enter().await.unwrap();
    assert_eq!(ctl.iteration(), -1);
    assert_eq!(count_rows(&engine, "temp.state").await, 1);

    ctl.update("5.0", &Bindings::new()).await.unwrap();

    let log = ctl.state_log().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].iteration, 0);
    assert_eq!(log[0].state(), &Value::Real(5.0));
    assert_eq!(ctl.iteration(), 0);
}

#[tokio::test]
async fn test_operations_require_active_controller() {
    let engine = engine_with_args("1 AS x").await;
    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();

    assert!(matches!(
        ctl.evaluate("1").await,
        Err(ControlError::Usage(UsageError::NotActive {
            operation: "evaluate",
            lifecycle: Lifecycle::Uninitialized,
        }))
    ));
    assert!(matches!(
        ctl.exit(),
        Err(ControlError::Usage(UsageError::InvalidTransition { .. }))
    ));

    ctl.enter().await.unwrap();
    assert!(matches!(
        ctl.enter().await,
        Err(ControlError::Usage(UsageError::InvalidTransition { .. }))
    ));
    assert!(matches!(
        ctl.drop_state_log().await,
        Err(ControlError::Usage(UsageError::StateLogInUse(Lifecycle::Active)))
    ));

    ctl.exit().unwrap();
    assert!(matches!(
        ctl.update("1.0", &Bindings::new()).await,
        Err(ControlError::Usage(UsageError::NotActive {
            operation: "update",
            lifecycle: Lifecycle::Terminated,
        }))
    ));
    assert!(ctl.exit().is_err());
}

#[tokio::test]
async fn test_exit_keeps_state_log_until_dropped() {
    let engine = engine_with_args("1 AS x").await;
    let options = scalar_options().temporary(false);
    let mut ctl = IterationController::new(&engine, options).await.unwrap();
    ctl.enter().await.unwrap();
    ctl.update("2.0", &Bindings::new()).await.unwrap();
    ctl.exit().unwrap();

    assert_eq!(count_rows(&engine, "state").await, 1);
    assert_eq!(ctl.state_log().await.unwrap().len(), 1);

    ctl.drop_state_log().await.unwrap();
    assert!(engine.query("SELECT * FROM state").await.is_err());
}

#[tokio::test]
async fn test_engine_errors_propagate_unchanged() {
    let engine = engine_with_args("1 AS x").await;
    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    ctl.enter().await.unwrap();

    match ctl.evaluate("no_such_column + 1").await {
        Err(ControlError::EngineQuery(err)) => {
            assert!(err.statement.contains("no_such_column"));
            assert!(err.to_string().contains("no such column"));
        }
        other => panic!("expected engine error, got {other:?}"),
    }

    let err = ctl
        .update("no_such_column", &Bindings::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::EngineQuery(_)));
    assert_eq!(ctl.iteration(), -1, "failed update does not advance");
}

#[tokio::test]
async fn test_unbound_placeholder_is_a_usage_error() {
    let engine = engine_with_args("1 AS x").await;
    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    ctl.enter().await.unwrap();

    let err = ctl.update("{missing}", &Bindings::new()).await.unwrap_err();
    assert!(matches!(err, ControlError::Usage(UsageError::Statement(_))));
}

#[tokio::test]
async fn test_enter_replaces_stale_log() {
    let engine = engine_with_args("1 AS x").await;
    engine
        .execute("CREATE TABLE state (leftover TEXT)")
        .await
        .unwrap();
    engine
        .execute("INSERT INTO state VALUES ('old run')")
        .await
        .unwrap();

    let options = scalar_options().temporary(false);
    let mut ctl = IterationController::new(&engine, options).await.unwrap();
    ctl.enter().await.unwrap();
    assert!(ctl.state_log().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_log_leaves_durable_relation_alone() {
    let engine = engine_with_args("1 AS x").await;
    engine
        .execute("CREATE TABLE state (leftover TEXT)")
        .await
        .unwrap();
    engine
        .execute("INSERT INTO state VALUES ('keep me')")
        .await
        .unwrap();

    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    assert_eq!(ctl.state_relation().to_string(), "temp.state");
    ctl.enter().await.unwrap();
    ctl.update("1.0", &Bindings::new()).await.unwrap();

    assert_eq!(count_rows(&engine, "main.state").await, 1);
    assert_eq!(count_rows(&engine, "temp.state").await, 1);
}

#[tokio::test]
async fn test_rollback_discards_state_writes() {
    let engine = engine_with_args("1 AS x").await;
    let options = scalar_options().temporary(false);

    engine.begin().await.unwrap();
    let mut ctl = IterationController::new(&engine, options).await.unwrap();
    ctl.enter().await.unwrap();
    ctl.update("1.0", &Bindings::new()).await.unwrap();
    assert!(ctl.update("broken(", &Bindings::new()).await.is_err());
    engine.rollback().await.unwrap();

    let tables = engine
        .query("SELECT count(*) FROM sqlite_master WHERE name = 'state'")
        .await
        .unwrap();
    assert_eq!(tables.scalar(), Some(&Value::Integer(0)));
}

#[tokio::test]
async fn test_extra_bindings_reach_update() {
    let engine = engine_with_args("1 AS x").await;
    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    ctl.enter().await.unwrap();

    let extra = Bindings::new()
        .with_literal("step", 2.5)
        .with_literal("iteration", 99);
    ctl.update("coalesce(_state, 0) + {step} + {iteration}", &extra)
        .await
        .unwrap();
    // `{iteration}` stays bound to the controller's counter (-1).
    assert_eq!(ctl.evaluate("_state").await.unwrap(), Some(Value::Real(1.5)));
}

#[tokio::test]
async fn test_evaluate_restores_optimizer_setting() {
    let engine = engine_with_args("1 AS x").await;
    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    assert!(ctl.capabilities().optimizer);
    assert!(ctl.capabilities().optimizer_settable);

    ctl.enter().await.unwrap();
    ctl.evaluate("1").await.unwrap();
    assert_eq!(
        engine.get_setting("automatic_index").await.unwrap().as_deref(),
        Some("1")
    );
}

#[tokio::test]
async fn test_verbose_statements_surface_as_notices() {
    let engine = engine_with_args("1 AS x").await;
    let options = scalar_options().verbose(true);
    let mut ctl = IterationController::new(&engine, options).await.unwrap();

    ctl.enter().await.unwrap();
    assert!(
        engine.take_notices().await.is_empty(),
        "housekeeping notices are suppressed"
    );

    ctl.update("1.0", &Bindings::new()).await.unwrap();
    let notices = engine.take_notices().await;
    assert!(notices.iter().any(|n| n.message.starts_with("INSERT INTO")));
}

#[tokio::test]
async fn test_run_to_convergence_newton_sqrt() {
    let engine = engine_with_args("2.0 AS target").await;
    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    ctl.enter().await.unwrap();

    let summary = ctl
        .run_to_convergence(
            "abs(_state * _state - _args.target) < 1e-12",
            "coalesce((_state + _args.target / _state) / 2, 1.0)",
            50,
        )
        .await
        .unwrap();
    ctl.exit().unwrap();

    assert!(summary.converged);
    assert!(summary.updates < 10);
    assert_eq!(summary.iteration, summary.updates as i64 - 1);
    let root = ctl.state_log().await.unwrap().last().unwrap().state().as_f64();
    assert!((root.unwrap() - std::f64::consts::SQRT_2).abs() < 1e-9);
}

#[tokio::test]
async fn test_run_to_convergence_stops_at_limit() {
    let engine = engine_with_args("1 AS x").await;
    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    ctl.enter().await.unwrap();

    let summary = ctl
        .run_to_convergence("0", "coalesce(_state, 0) + 1", 3)
        .await
        .unwrap();
    assert!(!summary.converged);
    assert_eq!(summary.updates, 3);
    assert_eq!(ctl.iteration(), 2);
}

#[tokio::test]
async fn test_fixed_optimizer_skips_guard() {
    let engine = engine_with_args("1 AS x").await;
    engine.set_setting("optimizer_control", "off").await.unwrap();

    let mut ctl = IterationController::new(&engine, scalar_options())
        .await
        .unwrap();
    assert!(ctl.capabilities().optimizer);
    assert!(!ctl.capabilities().optimizer_settable);

    ctl.enter().await.unwrap();
    assert_eq!(ctl.evaluate("_args.x").await.unwrap(), Some(Value::Integer(1)));
    assert_eq!(
        engine.get_setting("automatic_index").await.unwrap().as_deref(),
        Some("1")
    );
}

#[tokio::test]
async fn test_transient_state_outside_temp_schema_is_rejected() {
    let engine = engine_with_args("1 AS x").await;

    let options = ControllerOptions::new("args", "main.state", StateType::scalar("REAL")).unwrap();
    let err = IterationController::new(&engine, options).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::Usage(UsageError::TransientStateSchema(ref name)) if name == "main.state"
    ));

    let options = ControllerOptions::new("args", "temp.state", StateType::scalar("REAL")).unwrap();
    let mut ctl = IterationController::new(&engine, options).await.unwrap();
    ctl.enter().await.unwrap();
    ctl.update("1.0", &Bindings::new()).await.unwrap();
    assert_eq!(count_rows(&engine, "temp.state").await, 1);
    ctl.exit().unwrap();
}

#[tokio::test]
async fn test_durable_state_accepts_main_schema() {
    let engine = engine_with_args("1 AS x").await;
    let options = ControllerOptions::new("args", "main.runs", StateType::scalar("REAL"))
        .unwrap()
        .temporary(false);
    let mut ctl = IterationController::new(&engine, options).await.unwrap();

    ctl.enter().await.unwrap();
    ctl.update("2.0", &Bindings::new()).await.unwrap();
    assert_eq!(count_rows(&engine, "main.runs").await, 1);
}

#[tokio::test]
async fn test_condition_reads_text_booleans() {
    let engine = engine_with_args("1 AS x").await;
    let options = ControllerOptions::new("args", "state", StateType::scalar("TEXT")).unwrap();
    let mut ctl = IterationController::new(&engine, options).await.unwrap();

    ctl.enter().await.unwrap();
    ctl.update("'true'", &Bindings::new()).await.unwrap();
    assert_eq!(ctl.test("_state").await.unwrap(), Some(true));

    ctl.update("'off'", &Bindings::new()).await.unwrap();
    assert_eq!(ctl.test("_state").await.unwrap(), Some(false));

    ctl.update("'undecided'", &Bindings::new()).await.unwrap();
    assert_eq!(ctl.test("_state").await.unwrap(), None);
    assert_eq!(ctl.test("_args.x > 0").await.unwrap(), Some(true));
}
