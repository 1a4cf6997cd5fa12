// Tachyon - declarative configuration management
//
// Playbooks of ordered plays run tasks locally or push the engine over ssh,
// with idempotent commands, change tracking, handler notification, variable
// expansion, and futures/async tasks at the task boundary.

pub mod commands;
pub mod environment;
pub mod executor;
pub mod output;
pub mod parser;
pub mod paths;
pub mod remote;
pub mod runtime;

use std::path::Path;
use std::sync::Arc;

pub use commands::{Command, CommandEnv, CommandRegistry, TaskResult};
pub use environment::{Config, Environment};
pub use executor::{run_adhoc_task, RunResult, Runner};
pub use output::{CliReporter, JsonChunkReporter, Reporter, TachyonError};
pub use parser::{Play, Playbook, Task};
pub use paths::Paths;
pub use runtime::{NestedScope, Scope, Value};

/// Version of the engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run a playbook against a buffer-backed reporter and hand back the
/// recorded results plus the rendered output. The workhorse of the
/// integration tests.
pub async fn run_capture(
    path: impl AsRef<Path>,
) -> Result<(Vec<RunResult>, String), TachyonError> {
    let buf = output::SharedWriter::default();
    let reporter = Arc::new(CliReporter::new(Box::new(buf.clone())));

    let env = Environment::new(Arc::new(NestedScope::root()), Config::default())
        .with_report(reporter);

    let playbook = Playbook::load(&env, path).await?;
    let mut runner = Runner::new(playbook.plays, env.report.clone());
    runner.run(&env).await?;

    Ok((runner.results, buf.contents()))
}
