//! Service layer: statement building, setting guards and the iteration controller.

pub mod capabilities;
pub mod guards;
pub mod iteration_controller;
pub mod setting_guard;
pub mod statement;

pub use capabilities::EngineCapabilities;
pub use guards::{HashAggregationGuard, LogSeverityGuard, OptimizerGuard};
pub use iteration_controller::{ControllerOptions, IterationController, RunSummary};
pub use setting_guard::{with_setting, NamedSettingGuard, Permission, SettingGuard, SettingScope};
pub use statement::{render, Binding, Bindings, Ident, TypeExpr};
