// Command contract: keyword registry, parameter binding, result record.

mod copy;
mod script;
mod shell;

pub use copy::CopyCmd;
pub use script::ScriptCmd;
pub use shell::{CommandCmd, ShellCmd};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::environment::{Config, Environment};
use crate::output::errors::TachyonError;
use crate::output::reporter::Reporter;
use crate::parser::task::Task;
use crate::paths::Paths;
use crate::runtime::eval::ExprEvaluator;
use crate::runtime::expand::parse_simple_map;
use crate::runtime::scope::{Scope, Vars};
use crate::runtime::value::Value;

/// Named payloads a command reports back.
#[derive(Debug, Clone, Default)]
pub struct ResultData(HashMap<String, Value>);

impl ResultData {
    pub fn set(&mut self, key: impl Into<String>, val: impl Into<Value>) {
        self.0.insert(key.into(), val.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The uniform outcome of one command run. Output records conventionally
/// carry `rc`, `stdout`, `stderr` and a one-line summary under `_result`.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub changed: bool,
    pub failed: bool,
    pub data: ResultData,
}

impl TaskResult {
    pub fn new(changed: bool) -> Self {
        TaskResult {
            changed,
            failed: false,
            data: ResultData::default(),
        }
    }

    /// The shape a failure takes when it must live inside a result
    /// (async and future tasks, ignored errors).
    pub fn from_error(err: &TachyonError) -> Self {
        let mut res = TaskResult::new(false);
        res.failed = true;
        res.data.set("failed", true);
        res.data.set("error", err.to_string());
        res
    }

    pub fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        map.insert("changed".to_string(), Value::Bool(self.changed));
        map.insert("failed".to_string(), Value::Bool(self.failed));
        for (k, v) in self.data.iter() {
            map.insert(k.clone(), v.clone());
        }
        Value::Map(map)
    }

    /// `{"changed": bool, ...data}` with values resolved through read.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_value().to_json()
    }
}

/// What a command sees of the engine while it runs.
#[derive(Clone)]
pub struct CommandEnv {
    pub config: Config,
    pub paths: Paths,
    report: Arc<dyn Reporter>,
}

impl CommandEnv {
    pub fn new(env: &Environment, task: &Task) -> Self {
        CommandEnv {
            config: env.config.clone(),
            paths: task.paths.clone(),
            report: env.report.clone(),
        }
    }

    pub fn progress(&self, msg: &str) {
        self.report.progress(msg);
    }

    pub fn json_progress(&self, data: &[u8]) -> Result<(), TachyonError> {
        self.report.json_progress(data)
    }
}

/// One executable task keyword.
#[async_trait]
pub trait Command: Send + Sync + std::fmt::Debug {
    async fn run(&self, env: &CommandEnv, args: &str) -> Result<TaskResult, TachyonError>;
}

/// How a keyword turns its arg-string into the effective mapping.
#[derive(Debug, Clone, Copy)]
pub enum ArgStyle {
    /// `k=v` tokens through `parse_simple_map`.
    SimpleMap,
    /// The whole tail as one string under `command`
    /// (`command: "ls -la /tmp"` becomes `{command: "ls -la /tmp"}`).
    WholeString,
}

/// Prototype for a registered keyword: the arg style plus a constructor that
/// binds the typed parameter record.
#[derive(Clone, Copy)]
pub struct Proto {
    pub style: ArgStyle,
    pub make: fn(&Vars) -> Result<Box<dyn Command>, TachyonError>,
}

/// Keyword → prototype. Task libraries plug in by registering here.
pub struct CommandRegistry {
    map: RwLock<HashMap<String, Proto>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_builtins() -> Self {
        let reg = CommandRegistry::new();
        reg.register(
            "command",
            Proto {
                style: ArgStyle::WholeString,
                make: |_| Ok(Box::new(CommandCmd)),
            },
        );
        reg.register(
            "shell",
            Proto {
                style: ArgStyle::WholeString,
                make: |_| Ok(Box::new(ShellCmd)),
            },
        );
        reg.register(
            "script",
            Proto {
                style: ArgStyle::WholeString,
                make: |_| Ok(Box::new(ScriptCmd)),
            },
        );
        reg.register(
            "copy",
            Proto {
                style: ArgStyle::SimpleMap,
                make: |vars| Ok(Box::new(CopyCmd::bind(vars)?)),
            },
        );
        reg.register(
            "tachyon",
            Proto {
                style: ArgStyle::SimpleMap,
                make: |vars| Ok(Box::new(crate::remote::TachyonCmd::bind(vars)?)),
            },
        );
        reg
    }

    pub fn register(&self, name: &str, proto: Proto) {
        self.map.write().insert(name.to_string(), proto);
    }

    /// Bind a fresh command for a task: look up the keyword, build the
    /// effective mapping (parsed args overridden by the task's explicit
    /// vars), then construct the parameter record.
    pub async fn make_command(
        &self,
        scope: &dyn Scope,
        eval: &dyn ExprEvaluator,
        task: &Task,
        args: &str,
    ) -> Result<Box<dyn Command>, TachyonError> {
        let proto = self
            .map
            .read()
            .get(task.command())
            .copied()
            .ok_or_else(|| TachyonError::UnknownCommand(task.command().to_string()))?;

        let mut sm = match proto.style {
            ArgStyle::SimpleMap => parse_simple_map(scope, eval, args).await?,
            ArgStyle::WholeString => {
                let mut v = Vars::new();
                v.insert("command".to_string(), Value::Str(args.to_string()));
                v
            }
        };

        for (k, v) in task.vars() {
            sm.insert(k.clone(), v.clone());
        }

        (proto.make)(&sm)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Field binding over the effective mapping: required fields, enum
/// validation, boolean coercion; everything else binds by printed form.
pub struct ArgBinder<'a> {
    vars: &'a Vars,
}

impl<'a> ArgBinder<'a> {
    pub fn new(vars: &'a Vars) -> Self {
        ArgBinder { vars }
    }

    pub fn optional(&self, name: &str) -> Option<String> {
        self.vars.get(name).map(|v| v.to_string())
    }

    pub fn required(&self, name: &str) -> Result<String, TachyonError> {
        self.optional(name)
            .ok_or_else(|| TachyonError::MissingField(name.to_string()))
    }

    pub fn boolean(&self, name: &str) -> bool {
        self.vars.get(name).map(Value::truthy).unwrap_or(false)
    }

    pub fn enumerated(
        &self,
        name: &str,
        allowed: &[&str],
    ) -> Result<Option<String>, TachyonError> {
        match self.optional(name) {
            None => Ok(None),
            Some(val) => {
                if allowed.contains(&val.as_str()) {
                    Ok(Some(val))
                } else {
                    Err(TachyonError::InvalidEnumValue {
                        field: name.to_string(),
                        value: val,
                        allowed: allowed.join(","),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::eval::SexprEvaluator;
    use crate::runtime::scope::NestedScope;
    use std::path::Path;

    fn binder_vars(pairs: &[(&str, Value)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn binder_required_and_missing() {
        let vars = binder_vars(&[("src", Value::Str("a".into()))]);
        let b = ArgBinder::new(&vars);
        assert_eq!(b.required("src").unwrap(), "a");
        assert!(matches!(
            b.required("dest"),
            Err(TachyonError::MissingField(name)) if name == "dest"
        ));
    }

    #[test]
    fn binder_coerces_booleans_and_prints_the_rest() {
        let vars = binder_vars(&[
            ("dry", Value::Bool(true)),
            ("count", Value::Int(3)),
            ("off", Value::Str("no".into())),
        ]);
        let b = ArgBinder::new(&vars);
        assert!(b.boolean("dry"));
        assert!(!b.boolean("off"));
        assert!(!b.boolean("absent"));
        assert_eq!(b.optional("count").as_deref(), Some("3"));
    }

    #[test]
    fn binder_validates_enums() {
        let vars = binder_vars(&[("state", Value::Str("sideways".into()))]);
        let b = ArgBinder::new(&vars);
        let err = b.enumerated("state", &["present", "absent"]).unwrap_err();
        assert!(matches!(err, TachyonError::InvalidEnumValue { .. }));

        let vars = binder_vars(&[("state", Value::Str("present".into()))]);
        let b = ArgBinder::new(&vars);
        assert_eq!(
            b.enumerated("state", &["present", "absent"]).unwrap(),
            Some("present".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let reg = CommandRegistry::with_builtins();
        let scope = NestedScope::root();
        let data: crate::parser::task::TaskData =
            serde_yaml::from_str("{warble: hi}").unwrap();
        let task =
            Task::parse(&data, Path::new("t.yml"), Paths::simple("/tmp")).unwrap();

        let err = reg
            .make_command(&scope, &SexprEvaluator, &task, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, TachyonError::UnknownCommand(name) if name == "warble"));
    }

    #[tokio::test]
    async fn task_vars_override_parsed_args() {
        let reg = CommandRegistry::with_builtins();
        let scope = NestedScope::root();
        // copy with a mapping body: src/dest come from vars, not the tail
        let data: crate::parser::task::TaskData =
            serde_yaml::from_str("{copy: {src: a.txt, dest: /tmp/a}}").unwrap();
        let task =
            Task::parse(&data, Path::new("t.yml"), Paths::simple("/tmp")).unwrap();

        assert!(reg
            .make_command(&scope, &SexprEvaluator, &task, "src=ignored dest=/other")
            .await
            .is_ok());
    }

    #[test]
    fn result_json_shape() {
        let mut res = TaskResult::new(true);
        res.data.set("rc", 0i64);
        res.data.set("stdout", "hi");
        let json = res.to_json();
        assert_eq!(json["changed"], true);
        assert_eq!(json["rc"], 0);
        assert_eq!(json["stdout"], "hi");
    }
}
