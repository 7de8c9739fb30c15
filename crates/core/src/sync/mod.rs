//! Row-to-role reconciliation: models, diffing, role sync and the engine that drives them.

mod diff_engine;
mod event_dispatcher;
mod reconcile_engine;
mod reconcile_scheduler;
mod role_sync;
mod row_model;
mod row_notification;
mod row_store;

pub use diff_engine::*;
pub use event_dispatcher::*;
pub use reconcile_engine::*;
pub use reconcile_scheduler::*;
pub use role_sync::*;
pub use row_model::*;
pub use row_notification::*;
pub use row_store::*;
