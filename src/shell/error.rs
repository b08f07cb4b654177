use std::fmt;
use std::io;
use std::path::PathBuf;

/// Why an invocation stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    Cancelled,
    TimedOut,
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptKind::Cancelled => write!(f, "command cancelled"),
            InterruptKind::TimedOut => write!(f, "command timed out"),
        }
    }
}

/// Errors from parsing and running a shell command.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("could not parse command: {0}")]
    Parse(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    /// Raised by an in-process shell for bad invocations such as `sh -c`
    /// without a script.
    #[error("{0}")]
    Usage(String),

    #[error("command is not allowed for security reasons: {0}")]
    Blocked(String),

    #[error("exit status {0}")]
    ExitStatus(i32),

    #[error("{0}")]
    Interrupted(InterruptKind),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("could not read script {}: {source}", .path.display())]
    Script {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The interpreter itself failed, as opposed to a command it ran.
    #[error("shell engine: {0}")]
    Engine(String),
}

/// True if the error came from cancellation or a timeout.
pub fn is_interrupt(err: &ShellError) -> bool {
    matches!(err, ShellError::Interrupted(_))
}

/// Process-style exit code for a finished invocation.
pub fn exit_code(result: &Result<(), ShellError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(ShellError::ExitStatus(code)) => *code,
        Err(_) => 1,
    }
}
