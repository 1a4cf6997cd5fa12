// Task records: one command keyword plus scheduling and lifecycle metadata.

use std::path::{Path, PathBuf};

use crate::output::errors::TachyonError;
use crate::paths::Paths;
use crate::runtime::scope::Vars;
use crate::runtime::value::{yaml_key, Value};

/// Raw yaml shape of a task entry.
pub type TaskData = serde_yaml::Mapping;

/// Keys with reserved meaning; every other key names the command. The policy
/// keys are reserved too, otherwise they would be mistaken for commands.
const RESERVED: &[&str] = &[
    "name",
    "action",
    "notify",
    "async",
    "poll",
    "when",
    "future",
    "register",
    "with_items",
    "vars",
    "ignore_errors",
    "ignore_changed",
    "manual_status",
    "ok_rc",
    "changed_rc",
    "changed_create",
    "creates",
];

/// Whether a task key carries reserved meaning rather than naming a command.
pub fn is_reserved(key: &str) -> bool {
    RESERVED.contains(&key)
}

/// Per-task failure and change policy.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub ignore_errors: bool,
    pub ignore_changed: bool,
    pub manual_status: bool,
    pub ok_rc: Vec<i64>,
    pub changed_rc: Vec<i64>,
    pub changed_create: Option<String>,
    pub creates: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    cmd: String,
    args: String,
    vars: Vars,
    when: Option<String>,
    notify: Vec<String>,
    async_task: bool,
    future: Option<String>,
    register: Option<String>,
    with_items: Option<Vec<Value>>,
    policy: Policy,

    /// Call-site parameters when this task came in through an include.
    pub include_vars: Vars,
    /// Source file the task was parsed from.
    pub file: PathBuf,
    /// Resolver snapshot taken at construction.
    pub paths: Paths,
}

impl Task {
    pub fn parse(data: &TaskData, file: &Path, paths: Paths) -> Result<Task, TachyonError> {
        let mut cmd = String::new();
        let mut args = String::new();
        let mut vars = Vars::new();

        for (key, val) in data {
            let key = yaml_key(key);
            if RESERVED.contains(&key.as_str()) {
                continue;
            }

            if !cmd.is_empty() {
                return Err(TachyonError::DuplicateCommand(cmd));
            }

            cmd = key;
            match val {
                serde_yaml::Value::Mapping(m) => {
                    for (ik, iv) in m {
                        vars.insert(yaml_key(ik), Value::from(iv));
                    }
                }
                other => args = Value::from(other).to_string(),
            }
        }

        if cmd.is_empty() {
            let action = data
                .get("action")
                .ok_or(TachyonError::NoAction)?;
            let action = Value::from(action).to_string();

            // a single-token action is a command with no arguments
            match action.split_once(' ') {
                Some((c, rest)) => {
                    cmd = c.to_string();
                    args = rest.to_string();
                }
                None => cmd = action,
            }

            if cmd.is_empty() {
                return Err(TachyonError::NoAction);
            }
        }

        Ok(Task {
            name: str_field(data, "name").unwrap_or_default(),
            cmd,
            args,
            vars,
            when: str_field(data, "when"),
            notify: list_field(data, "notify"),
            async_task: flag_field(data, "async"),
            future: str_field(data, "future"),
            register: str_field(data, "register"),
            with_items: data
                .get("with_items")
                .and_then(|v| match v {
                    serde_yaml::Value::Sequence(seq) => {
                        Some(seq.iter().map(Value::from).collect())
                    }
                    _ => None,
                }),
            policy: Policy {
                ignore_errors: flag_field(data, "ignore_errors"),
                ignore_changed: flag_field(data, "ignore_changed"),
                manual_status: flag_field(data, "manual_status"),
                ok_rc: rc_field(data, "ok_rc"),
                changed_rc: rc_field(data, "changed_rc"),
                changed_create: str_field(data, "changed_create"),
                creates: str_field(data, "creates"),
            },
            include_vars: Vars::new(),
            file: file.to_path_buf(),
            paths,
        })
    }

    /// A synthetic task for one-off command runs.
    pub fn adhoc(cmd: &str, args: &str, paths: Paths) -> Task {
        Task {
            name: "adhoc".to_string(),
            cmd: cmd.to_string(),
            args: args.to_string(),
            vars: Vars::new(),
            when: None,
            notify: Vec::new(),
            async_task: false,
            future: None,
            register: None,
            with_items: None,
            policy: Policy::default(),
            include_vars: Vars::new(),
            file: PathBuf::new(),
            paths,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.cmd
    }

    pub fn args(&self) -> &str {
        &self.args
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn when(&self) -> Option<&str> {
        self.when.as_deref()
    }

    pub fn notify(&self) -> &[String] {
        &self.notify
    }

    pub fn is_async(&self) -> bool {
        self.async_task
    }

    pub fn future(&self) -> Option<&str> {
        self.future.as_deref()
    }

    pub fn register(&self) -> Option<&str> {
        self.register.as_deref()
    }

    pub fn items(&self) -> Option<&[Value]> {
        self.with_items.as_deref()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

fn str_field(data: &TaskData, key: &str) -> Option<String> {
    let v = data.get(key)?;
    if v.is_null() {
        return None;
    }
    Some(Value::from(v).to_string())
}

fn flag_field(data: &TaskData, key: &str) -> bool {
    match data.get(key) {
        Some(serde_yaml::Value::Bool(b)) => *b,
        Some(_) => true,
        None => false,
    }
}

fn list_field(data: &TaskData, key: &str) -> Vec<String> {
    match data.get(key) {
        Some(serde_yaml::Value::Sequence(seq)) => {
            seq.iter().map(|v| Value::from(v).to_string()).collect()
        }
        _ => Vec::new(),
    }
}

/// Exit-code lists accept an integer, a comma-separated string, or a
/// sequence of integers.
fn rc_field(data: &TaskData, key: &str) -> Vec<i64> {
    match data.get(key) {
        Some(serde_yaml::Value::Number(n)) => n.as_i64().into_iter().collect(),
        Some(serde_yaml::Value::String(s)) => s
            .split(',')
            .filter_map(|p| p.trim().parse::<i64>().ok())
            .collect(),
        Some(serde_yaml::Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| v.as_i64())
            .collect(),
        _ => Vec::new(),
    }
}
