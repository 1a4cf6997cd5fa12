// Deferred results: a future starts its work immediately and latches the
// outcome for whoever reads it later.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::commands::TaskResult;
use crate::executor::runner::RunResult;
use crate::output::errors::TachyonError;
use crate::parser::task::Task;
use crate::runtime::scope::Scope;
use crate::runtime::value::Value;

#[derive(Debug)]
struct FutureInner {
    task: Arc<Task>,
    started: Instant,
    done: watch::Receiver<bool>,
    slot: Mutex<Option<TaskResult>>,
}

/// Handle to a background task's eventual result. Cloneable; all clones
/// share one latch.
#[derive(Debug, Clone)]
pub struct TaskFuture {
    inner: Arc<FutureInner>,
}

impl TaskFuture {
    /// Start the work immediately on a background task. A work error is
    /// recorded into the result rather than surfaced.
    pub fn spawn<F>(task: Arc<Task>, work: F) -> TaskFuture
    where
        F: Future<Output = Result<TaskResult, TachyonError>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let inner = Arc::new(FutureInner {
            task,
            started: Instant::now(),
            done: rx,
            slot: Mutex::new(None),
        });

        let slot = inner.clone();
        tokio::spawn(async move {
            let res = match work.await {
                Ok(res) => res,
                Err(err) => TaskResult::from_error(&err),
            };
            *slot.slot.lock() = Some(res);
            let _ = tx.send(true);
        });

        TaskFuture { inner }
    }

    /// Block until the background task finishes, then yield its result.
    pub async fn value(&self) -> TaskResult {
        let mut rx = self.inner.done.clone();
        loop {
            if *rx.borrow() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }

        self.inner
            .slot
            .lock()
            .clone()
            .unwrap_or_else(|| {
                TaskResult::from_error(&TachyonError::CommandFailure(
                    "future worker vanished".to_string(),
                ))
            })
    }

    /// The result if the work has already finished.
    pub fn try_value(&self) -> Option<TaskResult> {
        self.inner.slot.lock().clone()
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.inner.task
    }

    pub fn started(&self) -> Instant {
        self.inner.started
    }

    pub fn same(&self, other: &TaskFuture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Scope decoration mapping names to futures. Futures shadow the backing
/// scope on lookup; writes go to the backing scope.
pub struct FutureScope {
    parent: Arc<dyn Scope>,
    futures: RwLock<Vec<(String, TaskFuture)>>,
}

impl FutureScope {
    pub fn new(parent: Arc<dyn Scope>) -> Self {
        FutureScope {
            parent,
            futures: RwLock::new(Vec::new()),
        }
    }

    pub fn add_future(&self, name: &str, future: TaskFuture) {
        self.futures.write().push((name.to_string(), future));
    }

    /// Barrier: resolve every registered future, in registration order, and
    /// return their run records.
    pub async fn wait(&self) -> Vec<RunResult> {
        let futures: Vec<(String, TaskFuture)> = self.futures.read().clone();

        let mut results = Vec::with_capacity(futures.len());
        for (_, fut) in futures {
            let res = fut.value().await;
            results.push(RunResult {
                task: fut.task().clone(),
                result: res,
                runtime: fut.started().elapsed(),
            });
        }

        results
    }
}

impl Scope for FutureScope {
    fn get(&self, key: &str) -> Option<Value> {
        let futures = self.futures.read();
        if let Some((_, fut)) = futures.iter().rev().find(|(name, _)| name == key) {
            return Some(Value::Future(fut.clone()));
        }
        drop(futures);
        self.parent.get(key)
    }

    fn set(&self, key: &str, val: Value) {
        self.parent.set(key, val);
    }
}
