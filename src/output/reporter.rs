// Progress reporting for a run.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use colored::Colorize;
use parking_lot::Mutex;

use crate::commands::TaskResult;
use crate::executor::async_action::AsyncAction;
use crate::output::errors::TachyonError;
use crate::output::json_chunk::JsonChunkReconstitute;
use crate::parser::task::Task;

/// Consumed by the runner at phase boundaries and around every task.
pub trait Reporter: Send + Sync {
    fn start_tasks(&self);
    fn finish_tasks(&self);
    fn start_handlers(&self);
    fn finish_handlers(&self);

    fn start_task(&self, task: &Task, cmd: &str, args: &str);
    fn finish_task(&self, task: &Task, res: Option<&TaskResult>);
    fn finish_async(&self, act: &AsyncAction);

    fn progress(&self, msg: &str);
    fn json_progress(&self, data: &[u8]) -> Result<(), TachyonError>;
}

/// A `Write` that several owners can share; used to capture reporter output
/// in tests and in `run_capture`.
#[derive(Clone, Default)]
pub struct SharedWriter(pub Arc<Mutex<Vec<u8>>>);

impl SharedWriter {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Human-readable reporter: timings as seconds since the run started.
pub struct CliReporter {
    out: Mutex<Box<dyn Write + Send>>,
    start: Mutex<Instant>,
}

impl CliReporter {
    pub fn stdout() -> Self {
        CliReporter::new(Box::new(std::io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        CliReporter {
            out: Mutex::new(out),
            start: Mutex::new(Instant::now()),
        }
    }

    fn delta(&self) -> f64 {
        self.start.lock().elapsed().as_secs_f64()
    }

    fn line(&self, msg: &str) {
        let delta = self.delta();
        let mut out = self.out.lock();
        let _ = writeln!(out, "{:7.3} {}", delta, msg);
    }
}

impl Reporter for CliReporter {
    fn start_tasks(&self) {
        let mut out = self.out.lock();
        let _ = writeln!(out, "== tasks @ {}", chrono::Local::now().to_rfc3339());
    }

    fn finish_tasks(&self) {
        self.line("! waiting on all tasks to finish...");
    }

    fn start_handlers(&self) {
        self.line("! running any handlers");
    }

    fn finish_handlers(&self) {}

    fn start_task(&self, task: &Task, cmd: &str, args: &str) {
        if task.is_async() {
            self.line(&format!("- {} &", task.name()));
        } else {
            self.line(&format!("- {}", task.name()));
        }
        self.line(&format!("  {}: {}", cmd, args));
    }

    fn finish_task(&self, _task: &Task, res: Option<&TaskResult>) {
        let Some(res) = res else { return };

        if res.failed {
            self.line(&format!("* {}", "failed".red()));
        }

        if let Some(render) = res.data.get("_result").and_then(|v| v.as_str()) {
            let render = render.trim();
            if !render.is_empty() {
                self.line("* result:");
                for line in render.lines() {
                    self.line(&format!("    {}", line));
                }
            }
            return;
        }

        if !res.data.is_empty() {
            self.line("* result:");
            let mut entries: Vec<_> = res.data.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (k, v) in entries {
                self.line(&format!("    {}: {}", k, v));
            }
        }
    }

    fn finish_async(&self, act: &AsyncAction) {
        match &act.outcome {
            Ok(res) if !res.failed => {
                self.line(&format!("* {} (async success)", act.task.name()));
            }
            Ok(_) => {
                self.line(&format!(
                    "* {} (async {})",
                    act.task.name(),
                    "failed".red()
                ));
            }
            Err(err) => {
                self.line(&format!(
                    "* {} (async {}: {})",
                    act.task.name(),
                    "error".red(),
                    err
                ));
            }
        }
    }

    fn progress(&self, msg: &str) {
        for line in msg.lines() {
            self.line(&format!("+ {}", line));
        }
    }

    fn json_progress(&self, data: &[u8]) -> Result<(), TachyonError> {
        JsonChunkReconstitute::new(self).input(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Paths;

    #[test]
    fn cli_reporter_prints_task_lines() {
        let buf = SharedWriter::default();
        let rep = CliReporter::new(Box::new(buf.clone()));

        let task = Task::adhoc("shell", "echo hi", Paths::simple("/tmp"));
        rep.start_tasks();
        rep.start_task(&task, "shell", "echo hi");

        let mut res = TaskResult::new(true);
        res.data.set("_result", "rc: 0, stdout: \"hi\"");
        rep.finish_task(&task, Some(&res));

        let out = buf.contents();
        assert!(out.contains("== tasks @"));
        assert!(out.contains("- adhoc"));
        assert!(out.contains("shell: echo hi"));
        assert!(out.contains("rc: 0, stdout: \"hi\""));
    }

    #[test]
    fn progress_lines_are_prefixed() {
        let buf = SharedWriter::default();
        let rep = CliReporter::new(Box::new(buf.clone()));
        rep.progress("one\ntwo");

        let out = buf.contents();
        assert!(out.contains("+ one"));
        assert!(out.contains("+ two"));
    }
}
