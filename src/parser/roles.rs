// Role composition: meta dependencies, then tasks, handlers and vars.
//
// A role directory is laid out as roles/<name>/{tasks,handlers,vars,meta}/
// main.yml. Imports receive an explicit resolver scoped to the role, so
// tasks constructed here snapshot role-relative lookups.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::output::errors::TachyonError;
use crate::parser::playbook::{LoadFuture, Loader, Play};
use crate::parser::task::TaskData;
use crate::paths::Paths;
use crate::runtime::expand::parse_simple_map;
use crate::runtime::scope::{import_vars_file, NestedScope, Scope, Vars};
use crate::runtime::value::{yaml_key, Value};

#[derive(Debug, Default, Deserialize)]
struct RoleMeta {
    #[serde(default)]
    dependencies: Vec<serde_yaml::Value>,
}

/// Import one role entry (a name, optionally with a `k=v` tail, or a
/// mapping with a `role:` key plus vars). Dependencies from meta/main.yml
/// import first; a role already imported in this play is skipped, which
/// also breaks dependency cycles.
pub(crate) fn import_role<'a>(
    loader: &'a Loader,
    play: &'a mut Play,
    entry: serde_yaml::Value,
    scope: Arc<dyn Scope>,
    visited: &'a mut HashSet<String>,
) -> LoadFuture<'a, String> {
    Box::pin(async move {
        let ts = Arc::new(NestedScope::new(Some(scope.clone())));
        let mut record = TaskData::new();
        let mut role = String::new();

        match &entry {
            serde_yaml::Value::String(s) => role = s.clone(),
            serde_yaml::Value::Mapping(m) => {
                for (k, v) in m {
                    let key = yaml_key(k);
                    if key == "role" {
                        role = Value::from(v).to_string();
                    } else {
                        ts.set(&key, Value::from(v));
                        record.insert(k.clone(), v.clone());
                    }
                }
            }
            _ => {
                return Err(TachyonError::Parse(
                    "role entry is not a string or mapping".to_string(),
                ))
            }
        }

        if let Some(idx) = role.find(' ') {
            let tail = role[idx + 1..].to_string();
            role.truncate(idx);

            let sm = parse_simple_map(&*ts, &*loader.eval, &tail).await?;
            for (k, v) in sm {
                record.insert(serde_yaml::Value::String(k), v.to_yaml());
            }
        }

        if role.is_empty() {
            return Err(TachyonError::Parse("role entry has no name".to_string()));
        }

        if !visited.insert(role.clone()) {
            return Ok(role);
        }

        let dir = loader.base_dir.join("roles").join(&role);
        if !dir.is_dir() {
            return Err(TachyonError::Parse(format!(
                "no role named {} available",
                role
            )));
        }

        let role_paths = Paths::separate(&loader.base_dir, &dir);

        let meta_path = role_paths.meta("main.yml");
        if meta_path.is_file() {
            let text = std::fs::read_to_string(&meta_path)
                .map_err(|e| crate::output::errors::io_context(e, &meta_path))?;
            let meta: RoleMeta = serde_yaml::from_str(&text).map_err(|e| {
                TachyonError::Parse(format!("{}: {}", meta_path.display(), e))
            })?;

            for dep in meta.dependencies {
                import_role(loader, play, dep, scope.clone(), visited).await?;
            }
        }

        let tasks_path = role_paths.task("main.yml");
        if tasks_path.is_file() {
            loader
                .run_tasks_file(
                    &mut play.tasks,
                    tasks_path,
                    String::new(),
                    ts.clone() as Arc<dyn Scope>,
                    record.clone(),
                    Vars::new(),
                    role_paths.clone(),
                )
                .await?;
        }

        let handlers_path = role_paths.handler("main.yml");
        if handlers_path.is_file() {
            loader
                .run_tasks_file(
                    &mut play.handlers,
                    handlers_path,
                    String::new(),
                    ts.clone() as Arc<dyn Scope>,
                    record.clone(),
                    Vars::new(),
                    role_paths.clone(),
                )
                .await?;
        }

        let vars_path = role_paths.vars("main.yml");
        if vars_path.is_file() {
            import_vars_file(&*play.vars, &vars_path)?;
        }

        Ok(role)
    })
}
