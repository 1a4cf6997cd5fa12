// Remote bootstrap: push the engine to a host over a persistent,
// multiplexed SSH connection and run a playbook there.
//
// The engine does not implement SSH primitives; it composes the ssh, scp
// and rsync binaries with multiplexing options.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use crate::commands::{ArgBinder, Command, CommandEnv, TaskResult};
use crate::output::errors::TachyonError;
use crate::runtime::scope::Vars;

/// Runs on the host, driven by TACHYON_RELEASE / TACHYON_OS / TACHYON_ARCH,
/// to fetch or refresh the engine binary for that platform.
pub const UPDATE_SCRIPT: &str = r#"#!/bin/bash

cd .tachyon

REL=$TACHYON_RELEASE
BIN=tachyon-$TACHYON_OS-$TACHYON_ARCH

if test -f tachyon; then
  CUR=$(< release)
  if test "$REL" != "$CUR"; then
    echo "Detected tachyon of old release ($CUR), removing."
    rm tachyon
  fi
fi

if which curl > /dev/null; then
  DL="curl -O"
elif which wget > /dev/null; then
  DL="wget"
else
  echo "No curl or wget, unable to pull a release"
  exit 1
fi

if ! test -f tachyon; then
  echo "Downloading $REL/$BIN..."

  $DL https://s3-us-west-2.amazonaws.com/tachyon.vektra.io/$REL/sums
  $DL https://s3-us-west-2.amazonaws.com/tachyon.vektra.io/$REL/$BIN

  mv $BIN $BIN.gz

  # gunzip failing means the file was never gzip'd
  if ! gunzip $BIN.gz; then
    mv $BIN.gz $BIN
  fi

  if which shasum > /dev/null; then
    if ! (grep $BIN sums | shasum -c); then
      echo "Sum verification failed!"
      exit 1
    fi
  else
    echo "No shasum available to verify files"
  fi

  echo $REL > release

  mv $BIN tachyon
  chmod a+x tachyon
fi
"#;

pub fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        other => other,
    }
}

/// A host reachable over ssh, with connection multiplexing so repeated
/// commands reuse one session.
pub struct Ssh {
    pub host: String,
    pub config: Option<PathBuf>,
    pub debug: bool,
    remove_config: bool,
    options: Vec<String>,
}

impl Ssh {
    pub fn new(host: &str) -> Result<Ssh, TachyonError> {
        let mut ssh = Ssh {
            host: host.to_string(),
            config: None,
            debug: false,
            remove_config: false,
            options: Vec::new(),
        };

        if host == ":vagrant" {
            ssh.import_vagrant()?;
        }

        let home = std::env::var("HOME")
            .map_err(|_| TachyonError::RemoteTransport("HOME is not set".to_string()))?;
        let control_dir = PathBuf::from(home).join(".tachyon");
        if !control_dir.is_dir() {
            std::fs::create_dir_all(&control_dir).map_err(|e| {
                TachyonError::RemoteTransport(format!(
                    "creating {}: {}",
                    control_dir.display(),
                    e
                ))
            })?;
        }

        ssh.options = vec![
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            "ControlPersist=60s".to_string(),
            "-o".to_string(),
            format!(
                "ControlPath={}/tachyon-cp-ssh-%h-%p-%r",
                control_dir.display()
            ),
        ];

        Ok(ssh)
    }

    /// `:vagrant` resolves the local vagrant machine by importing its
    /// ssh-config into a temp file.
    fn import_vagrant(&mut self) -> Result<(), TachyonError> {
        self.host = "default".to_string();
        self.remove_config = true;

        let out = std::process::Command::new("vagrant")
            .arg("ssh-config")
            .output()
            .map_err(|e| {
                TachyonError::RemoteTransport(format!("running vagrant ssh-config: {}", e))
            })?;
        if !out.status.success() {
            return Err(TachyonError::RemoteTransport(
                "vagrant ssh-config failed".to_string(),
            ));
        }

        let path = std::env::temp_dir().join(format!("tachyon-ssh-{}", std::process::id()));
        std::fs::write(&path, &out.stdout).map_err(|e| {
            TachyonError::RemoteTransport(format!("writing {}: {}", path.display(), e))
        })?;

        self.config = Some(path);
        Ok(())
    }

    pub fn cleanup(&self) {
        if self.remove_config {
            if let Some(cfg) = &self.config {
                let _ = std::fs::remove_file(cfg);
            }
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = self.options.clone();
        if let Some(cfg) = &self.config {
            args.push("-F".to_string());
            args.push(cfg.display().to_string());
        }
        args
    }

    /// The `-e` argument rsync needs to tunnel through this connection.
    pub fn rsync_command(&self) -> String {
        let mut parts = vec!["ssh".to_string()];
        parts.extend(self.base_args());
        parts.join(" ")
    }

    fn ssh_invocation(&self, remote_cmd: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.args(self.base_args());
        cmd.arg(&self.host);
        cmd.arg(remote_cmd);
        cmd
    }

    pub async fn run(&self, remote_cmd: &str) -> Result<(), TachyonError> {
        let status = self
            .ssh_invocation(remote_cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| TachyonError::RemoteTransport(format!("ssh: {}", e)))?;

        if !status.success() {
            return Err(TachyonError::RemoteTransport(format!(
                "ssh command failed on {}: {}",
                self.host, remote_cmd
            )));
        }
        Ok(())
    }

    /// Run and inherit this process's stdout/stderr.
    pub async fn run_and_show(&self, remote_cmd: &str) -> Result<(), TachyonError> {
        let status = self
            .ssh_invocation(remote_cmd)
            .status()
            .await
            .map_err(|e| TachyonError::RemoteTransport(format!("ssh: {}", e)))?;

        if !status.success() {
            return Err(TachyonError::RemoteTransport(format!(
                "ssh command failed on {}: {}",
                self.host, remote_cmd
            )));
        }
        Ok(())
    }

    pub async fn run_and_capture(&self, remote_cmd: &str) -> Result<String, TachyonError> {
        let out = self
            .ssh_invocation(remote_cmd)
            .output()
            .await
            .map_err(|e| TachyonError::RemoteTransport(format!("ssh: {}", e)))?;

        if !out.status.success() {
            return Err(TachyonError::RemoteTransport(format!(
                "ssh command failed on {}: {}",
                self.host, remote_cmd
            )));
        }

        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    /// Run a remote command with bytes piped to its stdin.
    pub async fn run_with_stdin(
        &self,
        remote_cmd: &str,
        input: &[u8],
    ) -> Result<(), TachyonError> {
        let mut child = self
            .ssh_invocation(remote_cmd)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| TachyonError::RemoteTransport(format!("ssh: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(input).await.map_err(|e| {
                TachyonError::RemoteTransport(format!("writing to ssh stdin: {}", e))
            })?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| TachyonError::RemoteTransport(format!("ssh: {}", e)))?;
        if !status.success() {
            return Err(TachyonError::RemoteTransport(format!(
                "ssh command failed on {}: {}",
                self.host, remote_cmd
            )));
        }
        Ok(())
    }

    pub async fn copy_to_host(&self, src: &Path, dest: &str) -> Result<(), TachyonError> {
        let mut cmd = tokio::process::Command::new("scp");
        cmd.args(self.base_args());
        cmd.arg(src);
        cmd.arg(format!("{}:{}", self.host, dest));

        let status = cmd
            .status()
            .await
            .map_err(|e| TachyonError::RemoteTransport(format!("scp: {}", e)))?;
        if !status.success() {
            return Err(TachyonError::RemoteTransport(format!(
                "scp {} to {} failed",
                src.display(),
                self.host
            )));
        }
        Ok(())
    }
}

pub struct RemoteOptions {
    pub host: String,
    pub playbook: PathBuf,
    pub debug: bool,
    pub clean_host: bool,
    pub dev: bool,
    pub release: String,
}

/// The full bootstrap: probe OS/arch, install or refresh the engine, mirror
/// the playbook tree, and invoke the engine remotely.
pub async fn push_and_run(
    opts: &RemoteOptions,
    progress: impl Fn(&str),
) -> Result<(), TachyonError> {
    let mut ssh = Ssh::new(&opts.host)?;
    ssh.debug = opts.debug;

    let result = bootstrap(&ssh, opts, &progress).await;
    ssh.cleanup();
    result
}

async fn bootstrap(
    ssh: &Ssh,
    opts: &RemoteOptions,
    progress: &impl Fn(&str),
) -> Result<(), TachyonError> {
    let setup = if opts.clean_host {
        "rm -rf .tachyon && mkdir -p .tachyon"
    } else {
        "mkdir -p .tachyon"
    };

    let probe = ssh
        .run_and_capture(&format!("{} && uname && uname -m", setup))
        .await
        .map_err(|e| {
            TachyonError::RemoteTransport(format!("creating remote .tachyon dir: {}", e))
        })?;

    let mut lines = probe.lines();
    let (os, arch) = match (lines.next(), lines.next()) {
        (Some(os), Some(arch)) => (
            os.trim().to_lowercase(),
            normalize_arch(arch.trim()).to_string(),
        ),
        _ => {
            return Err(TachyonError::RemoteTransport(
                "unable to figure out os and arch of remote machine".to_string(),
            ))
        }
    };

    let binary = format!("tachyon-{}-{}", os, arch);

    if opts.dev {
        progress("Copying development tachyon...");

        let local = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join(&binary)))
            .ok_or_else(|| {
                TachyonError::RemoteTransport("cannot locate development binary".to_string())
            })?;

        ssh.copy_to_host(&local, ".tachyon/tachyon")
            .await
            .map_err(|e| {
                TachyonError::RemoteTransport(format!("copying tachyon binary: {}", e))
            })?;
    } else {
        progress("Updating tachyon release...");

        ssh.run_with_stdin(
            "cat > .tachyon/update && chmod a+x .tachyon/update",
            UPDATE_SCRIPT.as_bytes(),
        )
        .await
        .map_err(|e| TachyonError::RemoteTransport(format!("installing updater: {}", e)))?;

        let update = format!(
            "TACHYON_RELEASE={} TACHYON_OS={} TACHYON_ARCH={} ./.tachyon/update",
            opts.release, os, arch
        );
        ssh.run_and_show(&update)
            .await
            .map_err(|e| TachyonError::RemoteTransport(format!("running updater: {}", e)))?;
    }

    // a directory playbook means "run site.yml inside it"
    let meta = std::fs::metadata(&opts.playbook)
        .map_err(|e| crate::output::errors::io_context(e, &opts.playbook))?;

    let (src, main) = if meta.is_dir() {
        (opts.playbook.clone(), "site.yml".to_string())
    } else {
        let dir = opts
            .playbook
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = opts
            .playbook
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "site.yml".to_string());
        (dir, name)
    };

    progress("Syncing playbook...");

    let mut rsync = tokio::process::Command::new("rsync");
    rsync.arg("-av");
    rsync.arg("-e");
    rsync.arg(ssh.rsync_command());
    rsync.arg(format!("{}/", src.display()));
    rsync.arg(format!("{}:.tachyon/playbook", ssh.host));
    if !opts.debug {
        rsync.stdout(Stdio::null());
    }

    let status = rsync
        .status()
        .await
        .map_err(|e| TachyonError::RemoteTransport(format!("rsync: {}", e)))?;
    if !status.success() {
        return Err(TachyonError::RemoteTransport(
            "syncing playbook to host failed".to_string(),
        ));
    }

    progress("Running playbook...");

    let start = format!("cd .tachyon && sudo ./tachyon -o playbook/{}", main);
    ssh.run_and_show(&start)
        .await
        .map_err(|e| TachyonError::RemoteTransport(format!("running remote playbook: {}", e)))?;

    Ok(())
}

/// The `tachyon` keyword: a task that pushes the engine to another host and
/// runs a playbook there.
#[derive(Debug)]
pub struct TachyonCmd {
    target: String,
    playbook: String,
    debug: bool,
    clean: bool,
    dev: bool,
    release: String,
}

impl TachyonCmd {
    pub fn bind(vars: &Vars) -> Result<Self, TachyonError> {
        let b = ArgBinder::new(vars);
        Ok(TachyonCmd {
            target: b.required("target")?,
            playbook: b.required("playbook")?,
            debug: b.boolean("debug"),
            clean: b.boolean("clean"),
            dev: b.boolean("dev"),
            release: b.optional("release").unwrap_or_else(|| "dev".to_string()),
        })
    }
}

#[async_trait]
impl Command for TachyonCmd {
    async fn run(&self, env: &CommandEnv, _args: &str) -> Result<TaskResult, TachyonError> {
        let opts = RemoteOptions {
            host: self.target.clone(),
            playbook: env.paths.file(&self.playbook),
            debug: self.debug,
            clean_host: self.clean,
            dev: self.dev,
            release: self.release.clone(),
        };

        push_and_run(&opts, |msg| env.progress(msg)).await?;

        let mut res = TaskResult::new(true);
        res.data.set("target", self.target.clone());
        res.data.set("playbook", self.playbook.clone());
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::Value;

    #[test]
    fn arch_normalization() {
        assert_eq!(normalize_arch("x86_64"), "amd64");
        assert_eq!(normalize_arch("aarch64"), "aarch64");
    }

    #[test]
    fn update_script_is_driven_by_the_env_contract() {
        assert!(UPDATE_SCRIPT.contains("TACHYON_RELEASE"));
        assert!(UPDATE_SCRIPT.contains("TACHYON_OS"));
        assert!(UPDATE_SCRIPT.contains("TACHYON_ARCH"));
    }

    #[test]
    fn tachyon_cmd_requires_target_and_playbook() {
        let mut vars = Vars::new();
        vars.insert("target".to_string(), Value::Str("web1".into()));
        let err = TachyonCmd::bind(&vars).unwrap_err();
        assert!(matches!(err, TachyonError::MissingField(name) if name == "playbook"));
    }
}
