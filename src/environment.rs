// Run-wide wiring: root scope, resolver, reporter, registry, evaluator.

use std::path::PathBuf;
use std::sync::Arc;

use crate::commands::CommandRegistry;
use crate::output::reporter::{CliReporter, Reporter};
use crate::paths::Paths;
use crate::runtime::eval::{ExprEvaluator, SexprEvaluator};
use crate::runtime::scope::NestedScope;

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Echo command output as it arrives.
    pub show_command_output: bool,
    pub debug: bool,
}

pub struct Environment {
    pub vars: Arc<NestedScope>,
    pub paths: Paths,
    pub report: Arc<dyn Reporter>,
    pub config: Config,
    pub commands: Arc<CommandRegistry>,
    pub eval: Arc<dyn ExprEvaluator>,
}

impl Environment {
    pub fn new(vars: Arc<NestedScope>, config: Config) -> Environment {
        let top = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Environment {
            vars,
            paths: Paths::simple(top),
            report: Arc::new(CliReporter::stdout()),
            config,
            commands: Arc::new(CommandRegistry::with_builtins()),
            eval: Arc::new(SexprEvaluator),
        }
    }

    pub fn with_report(mut self, report: Arc<dyn Reporter>) -> Environment {
        self.report = report;
        self
    }
}
