// The `copy` keyword: content-compared file copy.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{ArgBinder, Command, CommandEnv, TaskResult};
use crate::output::errors::{io_context, TachyonError};
use crate::runtime::scope::Vars;

#[derive(Debug)]
pub struct CopyCmd {
    src: String,
    dest: String,
}

impl CopyCmd {
    pub fn bind(vars: &Vars) -> Result<Self, TachyonError> {
        let b = ArgBinder::new(vars);
        Ok(CopyCmd {
            src: b.required("src")?,
            dest: b.required("dest")?,
        })
    }
}

fn digest_file(path: &Path) -> Result<Vec<u8>, TachyonError> {
    let data = std::fs::read(path).map_err(|e| io_context(e, path))?;
    Ok(Sha256::digest(&data).to_vec())
}

#[async_trait]
impl Command for CopyCmd {
    async fn run(&self, _env: &CommandEnv, _args: &str) -> Result<TaskResult, TachyonError> {
        let src = Path::new(&self.src);
        let src_meta = std::fs::metadata(src).map_err(|e| io_context(e, src))?;
        let src_digest = digest_file(src)?;

        let mut dest = PathBuf::from(&self.dest);
        let mut dest_digest = None;
        let mut dest_is_link = false;

        if let Ok(stat) = std::fs::symlink_metadata(&dest) {
            if stat.is_dir() {
                if let Some(base) = src.file_name() {
                    dest = dest.join(base);
                }
            } else {
                dest_digest = digest_file(&dest).ok();
            }
            dest_is_link = stat.file_type().is_symlink();
        }

        let mut res = TaskResult::new(true);
        res.data.set("src", self.src.clone());
        res.data.set("dest", dest.display().to_string());
        res.data.set("sha256", hex(&src_digest));

        if dest_digest.as_deref() == Some(src_digest.as_slice()) {
            res.changed = false;
            return Ok(res);
        }

        let tmp = dest.with_extension(format!("tmp.{}", std::process::id()));

        let copy = || -> Result<(), TachyonError> {
            std::fs::copy(src, &tmp).map_err(|e| io_context(e, &tmp))?;
            std::fs::set_permissions(&tmp, src_meta.permissions())
                .map_err(|e| io_context(e, &tmp))?;
            if dest_is_link {
                std::fs::remove_file(&dest).map_err(|e| io_context(e, &dest))?;
            }
            std::fs::rename(&tmp, &dest).map_err(|e| io_context(e, &dest))?;
            Ok(())
        };

        if let Err(err) = copy() {
            let _ = std::fs::remove_file(&tmp);
            return Err(err);
        }

        Ok(res)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Config, Environment};
    use crate::parser::task::Task;
    use crate::paths::Paths;
    use crate::runtime::scope::NestedScope;
    use crate::runtime::value::Value;
    use std::sync::Arc;

    fn command_env(dir: &Path) -> CommandEnv {
        let env = Environment::new(Arc::new(NestedScope::root()), Config::default());
        let task = Task::adhoc("copy", "", Paths::simple(dir));
        CommandEnv::new(&env, &task)
    }

    #[test]
    fn bind_requires_src_and_dest() {
        let mut vars = Vars::new();
        vars.insert("src".to_string(), Value::Str("a".into()));
        let err = CopyCmd::bind(&vars).unwrap_err();
        assert!(matches!(err, TachyonError::MissingField(name) if name == "dest"));
    }

    #[tokio::test]
    async fn copies_then_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dest = dir.path().join("dest.txt");
        std::fs::write(&src, "payload").unwrap();

        let mut vars = Vars::new();
        vars.insert("src".to_string(), Value::Str(src.display().to_string()));
        vars.insert("dest".to_string(), Value::Str(dest.display().to_string()));
        let cmd = CopyCmd::bind(&vars).unwrap();
        let env = command_env(dir.path());

        let first = cmd.run(&env, "").await.unwrap();
        assert!(first.changed);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "payload");

        let second = cmd.run(&env, "").await.unwrap();
        assert!(!second.changed);
    }
}
