use std::io;
use std::path::PathBuf;

/// Errors from sandbox initialisation and shutdown.
///
/// Everything except [`SandboxError::AlreadyInitialized`] is fatal at
/// startup: a process that failed to restrict itself must not continue.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("security already initialized")]
    AlreadyInitialized,

    #[error("invalid sandbox configuration ({}): {reason}", .path.display())]
    Configuration { path: PathBuf, reason: String },

    #[error("unveil {} failed: {source}", .path.display())]
    Reveal {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unveil lock failed: {source}")]
    Seal {
        #[source]
        source: io::Error,
    },

    #[error("pledge \"{promises}\" failed: {source}")]
    Restrict {
        promises: String,
        #[source]
        source: io::Error,
    },
}

impl SandboxError {
    /// True for reveal, seal, and restrict failures.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            SandboxError::Reveal { .. } | SandboxError::Seal { .. } | SandboxError::Restrict { .. }
        )
    }
}
