// Task execution: the runner plus its background machinery.

pub mod async_action;
pub mod future;
pub mod runner;

pub use async_action::AsyncAction;
pub use future::{FutureScope, TaskFuture};
pub use runner::{run_adhoc_task, RunResult, Runner};
