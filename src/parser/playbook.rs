// Playbook loading: plays, playbook includes, vars files and task-file
// includes.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;

use crate::environment::Environment;
use crate::output::errors::{io_context, TachyonError};
use crate::parser::roles;
use crate::parser::task::{is_reserved, Task, TaskData};
use crate::paths::Paths;
use crate::runtime::eval::ExprEvaluator;
use crate::runtime::expand::{expand_vars, infer_string, parse_simple_map};
use crate::runtime::scope::{
    import_vars_file, splice_overrides, NestedScope, Scope, Vars,
};
use crate::runtime::value::{yaml_key, Value};

pub(crate) type LoadFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TachyonError>> + Send + 'a>>;

/// Raw yaml shape of a top-level playbook entry: either an include record
/// or a play record.
#[derive(Debug, Deserialize)]
struct PlayData {
    include: Option<String>,
    vars: Option<serde_yaml::Value>,
    hosts: Option<String>,
    vars_files: Option<Vec<serde_yaml::Value>>,
    tasks: Option<Vec<TaskData>>,
    handlers: Option<Vec<TaskData>>,
    roles: Option<Vec<serde_yaml::Value>>,
}

#[derive(Clone)]
pub struct Play {
    pub hosts: String,
    pub vars: Arc<NestedScope>,
    pub vars_files: Vec<serde_yaml::Value>,
    pub tasks: Vec<Arc<Task>>,
    pub handlers: Vec<Arc<Task>>,
    pub roles: Vec<String>,
    pub base_dir: PathBuf,
}

pub struct Playbook {
    pub path: PathBuf,
    pub base_dir: PathBuf,
    pub plays: Vec<Play>,
    pub vars: Arc<NestedScope>,
}

impl Playbook {
    pub async fn load(
        env: &Environment,
        path: impl AsRef<Path>,
    ) -> Result<Playbook, TachyonError> {
        let path = path.as_ref();
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| io_context(e, path))?
                .join(path)
        };
        let base_dir = abs
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| TachyonError::io("playbook has no parent directory", &abs))?;

        let vars = Arc::new(NestedScope::new(Some(env.vars.clone() as Arc<dyn Scope>)));
        vars.set(
            "playbook_dir",
            Value::Str(base_dir.display().to_string()),
        );

        let loader = Loader {
            base_dir: base_dir.clone(),
            eval: env.eval.clone(),
        };
        let plays = loader
            .load_plays(abs.clone(), vars.clone() as Arc<dyn Scope>)
            .await?;

        Ok(Playbook {
            path: abs,
            base_dir,
            plays,
            vars,
        })
    }
}

pub(crate) struct Loader {
    pub(crate) base_dir: PathBuf,
    pub(crate) eval: Arc<dyn ExprEvaluator>,
}

impl Loader {
    pub(crate) fn load_plays(
        &self,
        fpath: PathBuf,
        scope: Arc<dyn Scope>,
    ) -> LoadFuture<'_, Vec<Play>> {
        Box::pin(async move {
            let text =
                std::fs::read_to_string(&fpath).map_err(|e| io_context(e, &fpath))?;
            let seq: Vec<PlayData> = serde_yaml::from_str(&text)
                .map_err(|e| TachyonError::Parse(format!("{}: {}", fpath.display(), e)))?;

            let mut plays = Vec::new();

            for item in &seq {
                if let Some(target) = &item.include {
                    // include args and explicit vars form a scope the
                    // sub-plays will be spliced with
                    let ns = Arc::new(NestedScope::new(Some(scope.clone())));
                    if let Some(vars) = &item.vars {
                        ns.add_vars(vars);
                    }

                    let mut file = target.clone();
                    if let Some(parts) = shlex::split(target) {
                        if let Some((first, rest)) = parts.split_first() {
                            file = first.clone();
                            for tok in rest {
                                if let Some((k, v)) = tok.split_once('=') {
                                    ns.set(k, infer_string(v));
                                }
                            }
                        }
                    }

                    let mut sub = self
                        .load_plays(self.base_dir.join(&file), ns.clone().flatten())
                        .await?;

                    if !ns.is_empty() {
                        for play in &mut sub {
                            play.vars = Arc::new(splice_overrides(
                                play.vars.clone() as Arc<dyn Scope>,
                                &ns,
                            ));
                        }
                    }

                    plays.append(&mut sub);
                } else {
                    plays.push(self.parse_play(&fpath, item, scope.clone()).await?);
                }
            }

            Ok(plays)
        })
    }

    async fn parse_play(
        &self,
        file: &Path,
        data: &PlayData,
        scope: Arc<dyn Scope>,
    ) -> Result<Play, TachyonError> {
        let paths = Paths::simple(&self.base_dir);

        let vars = Arc::new(NestedScope::new(Some(scope.clone())));
        if let Some(v) = &data.vars {
            vars.add_vars(v);
        }

        let mut play = Play {
            hosts: data.hosts.clone().unwrap_or_else(|| "all".to_string()),
            vars,
            vars_files: data.vars_files.clone().unwrap_or_default(),
            tasks: Vec::new(),
            handlers: Vec::new(),
            roles: Vec::new(),
            base_dir: self.base_dir.clone(),
        };

        self.import_vars_files(&play, &paths).await?;

        if let Some(tasks) = &data.tasks {
            self.import_tasks(&mut play.tasks, file, scope.clone(), tasks, &paths)
                .await?;
        }

        // handlers come strictly from the handlers key
        if let Some(handlers) = &data.handlers {
            self.import_tasks(&mut play.handlers, file, scope.clone(), handlers, &paths)
                .await?;
        }

        if let Some(entries) = &data.roles {
            let mut visited = HashSet::new();
            for entry in entries {
                let name = roles::import_role(
                    self,
                    &mut play,
                    entry.clone(),
                    scope.clone(),
                    &mut visited,
                )
                .await?;
                play.roles.push(name);
            }
        }

        Ok(play)
    }

    /// A string entry must import; a candidate list imports the first
    /// existing candidate and skips silently when none exists.
    async fn import_vars_files(
        &self,
        play: &Play,
        paths: &Paths,
    ) -> Result<(), TachyonError> {
        for entry in &play.vars_files {
            match entry {
                serde_yaml::Value::String(file) => {
                    import_vars_file(&*play.vars, &paths.vars(file))?;
                }
                serde_yaml::Value::Sequence(candidates) => {
                    for cand in candidates {
                        let Some(cand) = cand.as_str() else { continue };
                        let Ok(expanded) =
                            expand_vars(&*play.vars, &*self.eval, cand).await
                        else {
                            continue;
                        };

                        let path = paths.vars(&expanded);
                        if path.is_file() {
                            import_vars_file(&*play.vars, &path)?;
                            break;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn import_tasks<'a>(
        &'a self,
        tasks: &'a mut Vec<Arc<Task>>,
        file: &'a Path,
        scope: Arc<dyn Scope>,
        datas: &'a [TaskData],
        paths: &'a Paths,
    ) -> LoadFuture<'a, ()> {
        Box::pin(async move {
            for data in datas {
                if data.get("include").is_some() {
                    self.import_tasks_file(
                        tasks,
                        scope.clone(),
                        data.clone(),
                        Vars::new(),
                        paths.clone(),
                    )
                    .await?;
                } else {
                    tasks.push(Arc::new(Task::parse(data, file, paths.clone())?));
                }
            }
            Ok(())
        })
    }

    fn import_tasks_file<'a>(
        &'a self,
        tasks: &'a mut Vec<Arc<Task>>,
        scope: Arc<dyn Scope>,
        record: TaskData,
        inherited: Vars,
        paths: Paths,
    ) -> LoadFuture<'a, ()> {
        Box::pin(async move {
            let target = record
                .get("include")
                .map(|v| Value::from(v).to_string())
                .ok_or_else(|| TachyonError::Parse("include without a file".to_string()))?;

            let (file_part, args) = match target.split_once(' ') {
                Some((f, a)) => (f.to_string(), a.to_string()),
                None => (target, String::new()),
            };

            let file = expand_vars(&*scope, &*self.eval, &file_part).await?;
            let file_path = paths.task(&file);

            self.run_tasks_file(tasks, file_path, args, scope, record, inherited, paths)
                .await
        })
    }

    /// Load a task file, composing each sub-task's include-vars from the
    /// parsed arg tokens, the record's `vars` mapping, the record's residual
    /// keys, and anything inherited from an outer include.
    pub(crate) fn run_tasks_file<'a>(
        &'a self,
        tasks: &'a mut Vec<Arc<Task>>,
        file_path: PathBuf,
        args: String,
        scope: Arc<dyn Scope>,
        record: TaskData,
        inherited: Vars,
        paths: Paths,
    ) -> LoadFuture<'a, ()> {
        Box::pin(async move {
            let text = std::fs::read_to_string(&file_path)
                .map_err(|e| io_context(e, &file_path))?;
            let datas: Vec<TaskData> = serde_yaml::from_str(&text)
                .map_err(|e| {
                    TachyonError::Parse(format!("{}: {}", file_path.display(), e))
                })?;

            let mut iv = inherited;

            if !args.is_empty() {
                for (k, v) in parse_simple_map(&*scope, &*self.eval, &args).await? {
                    iv.insert(k, v);
                }
            }

            if let Some(serde_yaml::Value::Mapping(m)) = record.get("vars") {
                for (k, v) in m {
                    iv.insert(yaml_key(k), Value::from(v));
                }
            }

            for (k, v) in &record {
                let key = yaml_key(k);
                if key == "include" || is_reserved(&key) {
                    continue;
                }
                iv.insert(key, Value::from(v));
            }

            for data in &datas {
                if data.get("include").is_some() {
                    self.import_tasks_file(
                        tasks,
                        scope.clone(),
                        data.clone(),
                        iv.clone(),
                        paths.clone(),
                    )
                    .await?;
                } else {
                    let mut task = Task::parse(data, &file_path, paths.clone())?;
                    task.include_vars = iv.clone();
                    tasks.push(Arc::new(task));
                }
            }

            Ok(())
        })
    }
}
