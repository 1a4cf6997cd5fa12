// The `script` keyword: run a file resolved against the play's file root.

use async_trait::async_trait;

use super::shell::run_cmd;
use super::{Command, CommandEnv, TaskResult};
use crate::output::errors::TachyonError;

#[derive(Debug)]
pub struct ScriptCmd;

#[async_trait]
impl Command for ScriptCmd {
    async fn run(&self, env: &CommandEnv, args: &str) -> Result<TaskResult, TachyonError> {
        let parts = shlex::split(args)
            .ok_or_else(|| TachyonError::CommandFailure(format!("bad quoting in: {}", args)))?;
        let script = parts
            .first()
            .ok_or_else(|| TachyonError::CommandFailure("no script given".to_string()))?;

        let path = env.paths.file(script);
        if !path.is_file() {
            return Err(TachyonError::io("script not found", path));
        }

        let mut argv = vec!["sh".to_string(), path.display().to_string()];
        argv.extend(parts[1..].iter().cloned());

        run_cmd(env, &argv).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Config, Environment};
    use crate::parser::task::Task;
    use crate::paths::Paths;
    use crate::runtime::scope::NestedScope;
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_a_script_relative_to_the_play() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.sh"), "echo \"hi $1\"\n").unwrap();

        let env = Environment::new(Arc::new(NestedScope::root()), Config::default());
        let task = Task::adhoc("script", "", Paths::simple(dir.path()));
        let ce = CommandEnv::new(&env, &task);

        let res = ScriptCmd.run(&ce, "hello.sh there").await.unwrap();
        assert!(!res.failed);
        assert_eq!(
            res.data.get("stdout").unwrap().as_str(),
            Some("hi there")
        );
    }

    #[tokio::test]
    async fn missing_script_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::new(Arc::new(NestedScope::root()), Config::default());
        let task = Task::adhoc("script", "", Paths::simple(dir.path()));
        let ce = CommandEnv::new(&env, &task);

        assert!(ScriptCmd.run(&ce, "nope.sh").await.is_err());
    }
}
