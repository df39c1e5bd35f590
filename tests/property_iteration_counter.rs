mod common;

use iterctl::services::statement::render;
use iterctl::{Bindings, ControllerOptions, IterationController, QueryEngine, StateType, Value};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: after k updates from counter -1 the counter is k-1, and the log holds
    /// k rows, or one row when history is truncated.
    #[test]
    fn prop_counter_tracks_updates(k in 0i64..12, truncate in any::<bool>()) {
        let (iteration, rows) = runtime().block_on(async {
            let engine = common::engine_with_args("1.0 AS step").await;
            let options = ControllerOptions::new("args", "state", StateType::scalar("REAL"))
                .unwrap()
                .truncate_after_update(truncate);
            let mut ctl = IterationController::new(&engine, options).await.unwrap();
            ctl.enter().await.unwrap();
            for _ in 0..k {
                ctl.update("coalesce(_state, 0.0) + _args.step", &Bindings::new())
                    .await
                    .unwrap();
            }
            (ctl.iteration(), common::count_rows(&engine, "temp.state").await)
        });

        prop_assert_eq!(iteration, k - 1);
        let expected = if truncate { k.min(1) } else { k };
        prop_assert_eq!(rows, expected);
    }

    /// Property: any text bound as a literal reaches the engine as that exact text.
    #[test]
    fn prop_text_literals_are_inert(text in "[ -~]{0,40}") {
        let sql = render(
            "SELECT {value} AS v",
            &Bindings::new().with_literal("value", text.as_str()),
        )
        .unwrap();

        let value = runtime().block_on(async {
            let engine = common::memory_engine().await;
            engine.query(&sql).await.unwrap().scalar().cloned()
        });
        prop_assert_eq!(value, Some(Value::Text(text)));
    }
}
