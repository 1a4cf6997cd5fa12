// Error types surfaced by the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Every failure the runtime can surface. Parse and binding errors abort the
/// run; expansion errors abort the current task (sync) or are recorded into
/// the result (async/future); command failures are subject to per-task
/// policy.
#[derive(Debug, Clone, Error)]
pub enum TachyonError {
    #[error("invalid playbook yaml: {0}")]
    Parse(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing value for {0}")]
    MissingField(String),

    #[error("invalid value '{value}' for variable '{field}', possibles: {allowed}")]
    InvalidEnumValue {
        field: String,
        value: String,
        allowed: String,
    },

    #[error("duplicate command, already: {0}")]
    DuplicateCommand(String),

    #[error("no action specified")]
    NoAction,

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("unclosed template")]
    UnclosedTemplate,

    #[error("unclosed expression")]
    UnclosedExpr,

    #[error("expected {expected}, found {found}")]
    UnexpectedValueKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("expression error: {0}")]
    Eval(String),

    #[error("command failed: {0}")]
    CommandFailure(String),

    #[error("{message}: {}", path.display())]
    Io { message: String, path: PathBuf },

    #[error("remote transport failure: {0}")]
    RemoteTransport(String),
}

impl TachyonError {
    pub fn io(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        TachyonError::Io {
            message: message.into(),
            path: path.into(),
        }
    }
}

/// Attach a path to a raw I/O error.
pub fn io_context(err: std::io::Error, path: impl Into<PathBuf>) -> TachyonError {
    TachyonError::Io {
        message: err.to_string(),
        path: path.into(),
    }
}
