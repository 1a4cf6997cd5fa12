// Process execution: the `command` and `shell` keywords.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as Process;

use super::{Command, CommandEnv, TaskResult};
use crate::output::errors::TachyonError;

pub(crate) struct CaptureResult {
    pub rc: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Run argv, capturing output. With show-output on, lines are echoed with a
/// `| ` prefix as they arrive.
pub(crate) async fn capture(
    env: &CommandEnv,
    parts: &[String],
) -> Result<CaptureResult, TachyonError> {
    let (program, rest) = parts
        .split_first()
        .ok_or_else(|| TachyonError::CommandFailure("empty command".to_string()))?;

    if env.config.show_command_output {
        env.progress(&format!("RUN: {}", parts.join(" ")));
    }

    let mut cmd = Process::new(program);
    cmd.args(rest);

    if !env.config.show_command_output {
        let out = cmd
            .output()
            .await
            .map_err(|e| TachyonError::CommandFailure(format!("{}: {}", program, e)))?;
        return Ok(CaptureResult {
            rc: out.status.code().unwrap_or(1) as i64,
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        });
    }

    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| TachyonError::CommandFailure(format!("{}: {}", program, e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out_task = tokio::spawn(echo_lines(stdout));
    let err_task = tokio::spawn(echo_lines(stderr));

    let status = child
        .wait()
        .await
        .map_err(|e| TachyonError::CommandFailure(e.to_string()))?;

    let stdout = out_task.await.unwrap_or_default();
    let stderr = err_task.await.unwrap_or_default();

    Ok(CaptureResult {
        rc: status.code().unwrap_or(1) as i64,
        stdout,
        stderr,
    })
}

async fn echo_lines<R>(reader: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };

    let mut full = String::new();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        println!("| {}", line);
        full.push_str(&line);
        full.push('\n');
    }

    full
}

/// Build the conventional result record from a finished process.
pub(crate) fn command_result(cap: CaptureResult) -> TaskResult {
    let mut res = TaskResult::new(true);
    res.failed = cap.rc != 0;
    res.data.set("rc", cap.rc);
    res.data.set("stdout", cap.stdout.trim().to_string());
    res.data.set("stderr", cap.stderr.trim().to_string());

    if let Some(summary) = render_shell_result(&res) {
        res.data.set("_result", summary);
    }

    res
}

pub(crate) async fn run_cmd(
    env: &CommandEnv,
    parts: &[String],
) -> Result<TaskResult, TachyonError> {
    let cap = capture(env, parts).await?;
    Ok(command_result(cap))
}

/// One-line human summary, when the output is small enough to deserve one.
fn render_shell_result(res: &TaskResult) -> Option<String> {
    let rc = res.data.get("rc")?.as_int()?;
    let stdout = res.data.get("stdout")?.as_str()?;
    let stderr = res.data.get("stderr")?.as_str()?;

    if rc == 0 && stdout.is_empty() && stderr.is_empty() {
        return Some(String::new());
    }

    if stderr.is_empty() && stdout.len() < 60 {
        let oneline = stdout.replace('\n', " ");
        return Some(format!("rc: {}, stdout: \"{}\"", rc, oneline));
    }

    None
}

/// `command`: argv executed directly, no shell involved.
#[derive(Debug)]
pub struct CommandCmd;

#[async_trait]
impl Command for CommandCmd {
    async fn run(&self, env: &CommandEnv, args: &str) -> Result<TaskResult, TachyonError> {
        let parts = shlex::split(args)
            .ok_or_else(|| TachyonError::CommandFailure(format!("bad quoting in: {}", args)))?;
        run_cmd(env, &parts).await
    }
}

/// `shell`: the tail handed to `sh -c`.
#[derive(Debug)]
pub struct ShellCmd;

#[async_trait]
impl Command for ShellCmd {
    async fn run(&self, env: &CommandEnv, args: &str) -> Result<TaskResult, TachyonError> {
        let parts = vec!["sh".to_string(), "-c".to_string(), args.to_string()];
        run_cmd(env, &parts).await
    }
}
