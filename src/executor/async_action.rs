// Background actions whose completion is delivered on a channel.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::commands::TaskResult;
use crate::output::errors::TachyonError;
use crate::parser::task::Task;

/// A finished background task, delivered to the runner. Unlike a future,
/// the outcome is not bound to a scope name; the runner only accounts for
/// completion and reports it.
#[derive(Debug)]
pub struct AsyncAction {
    pub task: Arc<Task>,
    pub outcome: Result<TaskResult, TachyonError>,
}

pub type AsyncSender = mpsc::UnboundedSender<AsyncAction>;
pub type AsyncReceiver = mpsc::UnboundedReceiver<AsyncAction>;

pub fn channel() -> (AsyncSender, AsyncReceiver) {
    mpsc::unbounded_channel()
}
