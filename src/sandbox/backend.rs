use std::io;

use super::policy::PathGrant;
use super::promises::PromiseSet;

/// The platform primitive behind the sandbox controller.
///
/// Exactly two implementations exist: the enforcing OpenBSD backend and
/// [`NoopBackend`] everywhere else. Callers never branch on the platform,
/// only on [`SandboxBackend::is_enforcing`].
#[cfg_attr(test, mockall::automock)]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether calls actually restrict the process.
    fn is_enforcing(&self) -> bool;

    /// Make one path visible (`unveil(path, perms)`).
    fn reveal(&self, grant: &PathGrant) -> io::Result<()>;

    /// Lock the reveal list (`unveil(NULL, NULL)`).
    fn seal(&self) -> io::Result<()>;

    /// Restrict the process to `promises` (`pledge(promises, NULL)`).
    fn restrict(&self, promises: &PromiseSet) -> io::Result<()>;
}

/// Backend for platforms without pledge/unveil.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl SandboxBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_enforcing(&self) -> bool {
        false
    }

    fn reveal(&self, _grant: &PathGrant) -> io::Result<()> {
        Ok(())
    }

    fn seal(&self) -> io::Result<()> {
        Ok(())
    }

    fn restrict(&self, _promises: &PromiseSet) -> io::Result<()> {
        Ok(())
    }
}

/// The backend for the platform this binary was built for.
pub fn platform_backend() -> Box<dyn SandboxBackend> {
    #[cfg(target_os = "openbsd")]
    {
        Box::new(super::openbsd::OpenBsdBackend)
    }

    #[cfg(not(target_os = "openbsd"))]
    {
        Box::new(NoopBackend)
    }
}
