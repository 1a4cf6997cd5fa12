// Length-framed JSON progress stream, for a driving process to consume.
//
// Each event is a decimal byte length on its own line followed by the JSON
// object on its own line.

use std::io::Write;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::json;

use super::errors::TachyonError;
use super::reporter::Reporter;
use crate::commands::TaskResult;
use crate::executor::async_action::AsyncAction;
use crate::parser::task::Task;

pub struct JsonChunkReporter {
    out: Mutex<Box<dyn Write + Send>>,
    start: Mutex<Instant>,
}

impl JsonChunkReporter {
    pub fn stdout() -> Self {
        JsonChunkReporter::new(Box::new(std::io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        JsonChunkReporter {
            out: Mutex::new(out),
            start: Mutex::new(Instant::now()),
        }
    }

    fn delta(&self) -> f64 {
        self.start.lock().elapsed().as_secs_f64()
    }

    fn send(&self, event: serde_json::Value) {
        if let Ok(body) = serde_json::to_string(&event) {
            let mut out = self.out.lock();
            let _ = write!(out, "{}\n{}\n", body.len(), body);
        }
    }

    fn task_type(task: &Task) -> &'static str {
        if task.future().is_some() {
            "future"
        } else if task.is_async() {
            "async"
        } else {
            "sync"
        }
    }
}

impl Reporter for JsonChunkReporter {
    fn start_tasks(&self) {
        self.send(json!({
            "phase": "start",
            "time": chrono::Local::now().to_rfc3339(),
            "delta": self.delta(),
        }));
    }

    fn finish_tasks(&self) {
        self.send(json!({"phase": "finish", "delta": self.delta()}));
    }

    fn start_handlers(&self) {
        self.send(json!({"phase": "start_handlers", "delta": self.delta()}));
    }

    fn finish_handlers(&self) {
        self.send(json!({"phase": "finish_handlers", "delta": self.delta()}));
    }

    fn start_task(&self, task: &Task, cmd: &str, args: &str) {
        self.send(json!({
            "phase": "start_task",
            "type": Self::task_type(task),
            "name": task.name(),
            "command": cmd,
            "args": args,
            "delta": self.delta(),
        }));
    }

    fn finish_task(&self, _task: &Task, res: Option<&TaskResult>) {
        let Some(res) = res else { return };
        self.send(json!({
            "phase": "finish_task",
            "delta": self.delta(),
            "result": res.to_json(),
        }));
    }

    fn finish_async(&self, act: &AsyncAction) {
        match &act.outcome {
            Ok(res) => self.send(json!({
                "phase": "finish_task",
                "delta": self.delta(),
                "result": res.to_json(),
            })),
            Err(err) => self.send(json!({
                "phase": "finish_task",
                "delta": self.delta(),
                "error": err.to_string(),
            })),
        }
    }

    fn progress(&self, msg: &str) {
        self.send(json!({
            "phase": "progress",
            "delta": self.delta(),
            "progress": msg,
        }));
    }

    fn json_progress(&self, data: &[u8]) -> Result<(), TachyonError> {
        let parsed: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| TachyonError::Parse(e.to_string()))?;
        self.send(json!({
            "phase": "json_progress",
            "delta": self.delta(),
            "progress": parsed,
        }));
        Ok(())
    }
}

/// Renders a remote engine's framed stream through a local reporter.
pub struct JsonChunkReconstitute<'a> {
    report: &'a dyn Reporter,
}

impl<'a> JsonChunkReconstitute<'a> {
    pub fn new(report: &'a dyn Reporter) -> Self {
        JsonChunkReconstitute { report }
    }

    pub fn input(&self, data: &[u8]) -> Result<(), TachyonError> {
        let event: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| TachyonError::Parse(e.to_string()))?;

        let phase = event
            .get("phase")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TachyonError::Parse("no phase specified".to_string()))?;

        match phase {
            "start" => {
                let time = event
                    .get("time")
                    .and_then(|v| v.as_str())
                    .unwrap_or("(unknown)");
                self.report.progress(&format!("remote tasks @ {}", time));
            }
            "start_task" => {
                self.report.progress(&format!(
                    "- {}",
                    event.get("name").and_then(|v| v.as_str()).unwrap_or("")
                ));
                self.report.progress(&format!(
                    "  {}: {}",
                    event.get("command").and_then(|v| v.as_str()).unwrap_or(""),
                    event.get("args").and_then(|v| v.as_str()).unwrap_or(""),
                ));
            }
            "finish_task" => {
                self.report.progress("* result:");
                if let Some(obj) = event.get("result").and_then(|v| v.as_object()) {
                    let mut keys: Vec<_> = obj.keys().collect();
                    keys.sort();
                    for k in keys {
                        self.report
                            .progress(&format!("  {}: {}", k, obj[k.as_str()]));
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::reporter::SharedWriter;
    use crate::paths::Paths;

    fn framed_events(raw: &str) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        let mut lines = raw.lines();
        while let (Some(len), Some(body)) = (lines.next(), lines.next()) {
            assert_eq!(len.parse::<usize>().unwrap(), body.len());
            out.push(serde_json::from_str(body).unwrap());
        }
        out
    }

    #[test]
    fn frames_carry_length_then_body() {
        let buf = SharedWriter::default();
        let rep = JsonChunkReporter::new(Box::new(buf.clone()));

        rep.start_tasks();
        let task = Task::adhoc("shell", "true", Paths::simple("/tmp"));
        rep.start_task(&task, "shell", "true");

        let mut res = TaskResult::new(false);
        res.data.set("rc", 0i64);
        rep.finish_task(&task, Some(&res));
        rep.finish_tasks();

        let events = framed_events(&buf.contents());
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["phase"], "start");
        assert_eq!(events[1]["phase"], "start_task");
        assert_eq!(events[1]["type"], "sync");
        assert_eq!(events[2]["phase"], "finish_task");
        assert_eq!(events[2]["result"]["rc"], 0);
        assert_eq!(events[3]["phase"], "finish");
    }

    #[test]
    fn every_event_kind_carries_a_delta() {
        let buf = SharedWriter::default();
        let rep = JsonChunkReporter::new(Box::new(buf.clone()));

        rep.start_tasks();
        rep.finish_tasks();
        rep.start_handlers();
        rep.finish_handlers();
        rep.progress("working");

        let events = framed_events(&buf.contents());
        let phases: Vec<_> = events
            .iter()
            .map(|e| e["phase"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            phases,
            ["start", "finish", "start_handlers", "finish_handlers", "progress"]
        );
        for event in &events {
            assert!(
                event["delta"].as_f64().unwrap() >= 0.0,
                "missing delta on {}",
                event["phase"]
            );
        }
    }

    #[test]
    fn reconstitute_renders_remote_events() {
        let buf = SharedWriter::default();
        let cli = crate::output::reporter::CliReporter::new(Box::new(buf.clone()));

        let chunk = serde_json::to_vec(&json!({
            "phase": "start_task",
            "name": "install",
            "command": "shell",
            "args": "apt-get update",
        }))
        .unwrap();
        JsonChunkReconstitute::new(&cli).input(&chunk).unwrap();

        let out = buf.contents();
        assert!(out.contains("- install"));
        assert!(out.contains("shell: apt-get update"));
    }
}
