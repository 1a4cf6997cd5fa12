// The task scheduler: one driving task per run, background work only at the
// task boundary.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::commands::{CommandEnv, TaskResult};
use crate::environment::{Config, Environment};
use crate::executor::async_action::{self, AsyncAction, AsyncReceiver, AsyncSender};
use crate::executor::future::{FutureScope, TaskFuture};
use crate::output::errors::TachyonError;
use crate::output::reporter::Reporter;
use crate::parser::playbook::Play;
use crate::parser::task::Task;
use crate::runtime::eval::ExprEvaluator;
use crate::runtime::expand::{boolify, expand_vars};
use crate::runtime::scope::{NestedScope, PriorityScope, Scope};
use crate::runtime::value::Value;

/// One recorded task outcome.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub task: Arc<Task>,
    pub result: TaskResult,
    pub runtime: Duration,
}

pub struct Runner {
    plays: Vec<Play>,
    report: Arc<dyn Reporter>,
    pending: HashSet<String>,
    async_tx: AsyncSender,
    async_rx: AsyncReceiver,
    async_started: usize,

    pub results: Vec<RunResult>,
    pub runtime: Duration,
}

impl Runner {
    pub fn new(plays: Vec<Play>, report: Arc<dyn Reporter>) -> Runner {
        let (async_tx, async_rx) = async_action::channel();
        Runner {
            plays,
            report,
            pending: HashSet::new(),
            async_tx,
            async_rx,
            async_started: 0,
            results: Vec::new(),
            runtime: Duration::ZERO,
        }
    }

    /// Run every play in source order. Within a play: tasks, then the
    /// future/async barrier, then notified handlers. Nothing carries across
    /// play boundaries.
    pub async fn run(&mut self, env: &Environment) -> Result<(), TachyonError> {
        let start = Instant::now();

        let outcome = self.run_plays(env).await;
        self.runtime = start.elapsed();

        outcome
    }

    async fn run_plays(&mut self, env: &Environment) -> Result<(), TachyonError> {
        for idx in 0..self.plays.len() {
            let play = self.plays[idx].clone();

            self.report.start_tasks();

            let fs = Arc::new(FutureScope::new(play.vars.clone() as Arc<dyn Scope>));

            let mut fatal = None;
            for task in &play.tasks {
                if let Err(err) = self.run_task(env, task, &fs).await {
                    fatal = Some(err);
                    break;
                }
            }

            self.report.finish_tasks();

            // Barrier: every future and async action of this play completes
            // before anything else happens, even on a fatal error.
            let future_results = fs.wait().await;
            self.results.extend(future_results);
            self.drain_async().await;

            if let Some(err) = fatal {
                return Err(err);
            }

            self.report.start_handlers();

            let hs = Arc::new(FutureScope::new(play.vars.clone() as Arc<dyn Scope>));
            for handler in &play.handlers {
                if self.pending.contains(handler.name()) {
                    self.run_task(env, handler, &hs).await?;
                }
            }

            let handler_results = hs.wait().await;
            self.results.extend(handler_results);
            self.drain_async().await;

            self.report.finish_handlers();
            self.pending.clear();
        }

        Ok(())
    }

    /// Receive exactly as many completions as actions were started.
    async fn drain_async(&mut self) {
        while self.async_started > 0 {
            match self.async_rx.recv().await {
                Some(act) => {
                    self.async_started -= 1;
                    self.report.finish_async(&act);
                }
                None => break,
            }
        }
    }

    async fn run_task(
        &mut self,
        env: &Environment,
        task: &Arc<Task>,
        fs: &Arc<FutureScope>,
    ) -> Result<(), TachyonError> {
        let ps: Arc<dyn Scope> = Arc::new(PriorityScope::new(
            task.include_vars.clone(),
            fs.clone() as Arc<dyn Scope>,
        ));

        let start = Instant::now();

        if let Some(when) = task.when() {
            let when = expand_vars(&*ps, &*env.eval, when).await?;
            if !boolify(&when) {
                return Ok(());
            }
        }

        // creates: an existing path means there is nothing to do
        if let Some(creates) = &task.policy().creates {
            let path = expand_vars(&*ps, &*env.eval, creates).await?;
            if Path::new(&path).exists() {
                let mut res = TaskResult::new(false);
                res.data
                    .set("_result", format!("skipped, {} exists", path));
                self.report.start_task(task, task.command(), task.args());
                self.finish(task, res, start);
                return Ok(());
            }
        }

        // background modes take priority over item loops; an expansion
        // failure here is recorded into the result instead of failing the run
        if task.future().is_some() || task.is_async() {
            let args = match expand_vars(&*ps, &*env.eval, task.args()).await {
                Ok(args) => args,
                Err(err) => {
                    self.report.start_task(task, task.command(), task.args());
                    if let Some(name) = task.future() {
                        let failed = TaskResult::from_error(&err);
                        fs.add_future(
                            name,
                            TaskFuture::spawn(task.clone(), async move { Ok(failed) }),
                        );
                    } else {
                        self.async_started += 1;
                        let _ = self.async_tx.send(AsyncAction {
                            task: task.clone(),
                            outcome: Err(err),
                        });
                    }
                    return Ok(());
                }
            };

            // binding failures abort the run, background or not
            let cmd = env
                .commands
                .make_command(&*ps, &*env.eval, task, &args)
                .await?;
            let ce = CommandEnv::new(env, task);

            self.report.start_task(task, task.command(), &args);

            if let Some(name) = task.future() {
                let eval = env.eval.clone();
                let owner = task.clone();
                let scope = ps.clone();
                let future = TaskFuture::spawn(task.clone(), async move {
                    let res = cmd.run(&ce, &args).await?;
                    apply_policies(&*eval, &owner, &*scope, res).await
                });
                fs.add_future(name, future);
            } else {
                let tx = self.async_tx.clone();
                let eval = env.eval.clone();
                let owner = task.clone();
                let scope = ps.clone();
                self.async_started += 1;
                tokio::spawn(async move {
                    let outcome = match cmd.run(&ce, &args).await {
                        Ok(res) => apply_policies(&*eval, &owner, &*scope, res).await,
                        Err(err) => Err(err),
                    };
                    let _ = tx.send(AsyncAction {
                        task: owner,
                        outcome,
                    });
                });
            }
            return Ok(());
        }

        if let Some(items) = task.items() {
            return self.run_items(env, task, fs, &ps, items, start).await;
        }

        let args = expand_vars(&*ps, &*env.eval, task.args()).await?;
        let cmd = env
            .commands
            .make_command(&*ps, &*env.eval, task, &args)
            .await?;
        let ce = CommandEnv::new(env, task);

        self.report.start_task(task, task.command(), &args);

        let run = cmd.run(&ce, &args).await;
        let (res, err) = match run {
            Ok(res) => (res, None),
            Err(err) => (TaskResult::from_error(&err), Some(err)),
        };
        let res = apply_policies(&*env.eval, task, &*ps, res).await?;

        if let Some(name) = task.register() {
            fs.set(name, res.to_value());
        }

        let failed = res.failed;
        self.finish(task, res, start);

        if failed || err.is_some() {
            if task.policy().ignore_errors {
                return Ok(());
            }
            return Err(err.unwrap_or_else(|| {
                TachyonError::CommandFailure(format!("task '{}' failed", task.name()))
            }));
        }

        for n in task.notify() {
            self.pending.insert(n.clone());
        }

        Ok(())
    }

    /// Sequential per-item runs; the aggregate carries `items`, `results`
    /// and the OR of per-item change flags.
    async fn run_items(
        &mut self,
        env: &Environment,
        task: &Arc<Task>,
        fs: &Arc<FutureScope>,
        ps: &Arc<dyn Scope>,
        items: &[Value],
        start: Instant,
    ) -> Result<(), TachyonError> {
        let mut results = Vec::with_capacity(items.len());
        let mut any_changed = false;
        let mut any_failed = false;

        for item in items {
            let ns = Arc::new(NestedScope::new(Some(ps.clone())));
            ns.set("item", item.clone());

            let args = expand_vars(&*ns, &*env.eval, task.args()).await?;
            let cmd = env
                .commands
                .make_command(&*ns, &*env.eval, task, &args)
                .await?;
            let ce = CommandEnv::new(env, task);

            self.report.start_task(task, task.command(), &args);

            let res = match cmd.run(&ce, &args).await {
                Ok(res) => res,
                Err(err) => TaskResult::from_error(&err),
            };
            let res = apply_policies(&*env.eval, task, &*ns, res).await?;

            any_changed = any_changed || res.changed;
            any_failed = any_failed || res.failed;
            results.push(res);
        }

        let mut res = TaskResult::new(any_changed);
        res.failed = any_failed;
        res.data.set("items", items.len() as i64);
        res.data.set(
            "results",
            Value::List(results.iter().map(TaskResult::to_value).collect()),
        );

        if let Some(name) = task.register() {
            fs.set(name, res.to_value());
        }

        let failed = res.failed;
        self.finish(task, res, start);

        if failed {
            if task.policy().ignore_errors {
                return Ok(());
            }
            return Err(TachyonError::CommandFailure(format!(
                "task '{}' failed",
                task.name()
            )));
        }

        for n in task.notify() {
            self.pending.insert(n.clone());
        }

        Ok(())
    }

    fn finish(&mut self, task: &Arc<Task>, res: TaskResult, start: Instant) {
        self.report.finish_task(task, Some(&res));
        self.results.push(RunResult {
            task: task.clone(),
            result: res,
            runtime: start.elapsed(),
        });
    }
}

/// Post-run policy: manual rc mapping, forced no-change, stamp files.
/// Applied to every command result, whichever way the task was dispatched.
async fn apply_policies(
    eval: &dyn ExprEvaluator,
    task: &Task,
    scope: &dyn Scope,
    mut res: TaskResult,
) -> Result<TaskResult, TachyonError> {
    let policy = task.policy();

    if policy.manual_status {
        if let Some(rc) = res.data.get("rc").and_then(Value::as_int) {
            if policy.ok_rc.contains(&rc) {
                res.failed = false;
                res.changed = false;
            } else if policy.changed_rc.contains(&rc) {
                res.failed = false;
                res.changed = true;
            } else {
                res.failed = true;
            }
        }
    }

    if policy.ignore_changed {
        res.changed = false;
    }

    if let Some(stamp) = &policy.changed_create {
        if res.changed && !res.failed {
            let path = expand_vars(scope, eval, stamp).await?;
            std::fs::write(&path, b"").map_err(|e| {
                TachyonError::io(format!("writing stamp: {}", e), path.clone())
            })?;
        }
    }

    Ok(res)
}

/// Expand, bind and run a single command against a fresh environment.
pub async fn run_adhoc_task(cmd: &str, args: &str) -> Result<TaskResult, TachyonError> {
    let env = Environment::new(Arc::new(NestedScope::root()), Config::default());
    let task = Task::adhoc(cmd, args, env.paths.clone());

    let expanded = expand_vars(&*env.vars, &*env.eval, task.args()).await?;
    let command = env
        .commands
        .make_command(&*env.vars, &*env.eval, &task, &expanded)
        .await?;

    let ce = CommandEnv::new(&env, &task);
    command.run(&ce, &expanded).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adhoc_shell_runs() {
        let res = run_adhoc_task("shell", "echo adhoc").await.unwrap();
        assert!(!res.failed);
        assert_eq!(res.data.get("stdout").unwrap().as_str(), Some("adhoc"));
    }

    #[tokio::test]
    async fn adhoc_unknown_command_errors() {
        let err = run_adhoc_task("warble", "x").await.unwrap_err();
        assert!(matches!(err, TachyonError::UnknownCommand(_)));
    }
}
