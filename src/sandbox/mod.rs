//! Process sandbox: filesystem visibility and syscall restriction.
//!
//! Initialisation reveals a fixed set of paths, seals the reveal list, then
//! restricts the process to [`STARTUP_PROMISES`]. At exit the promise set
//! shrinks to [`SHUTDOWN_PROMISES`]. Both steps are irreversible.
//!
//! Platform enforcement:
//! - OpenBSD: `unveil(2)` + `pledge(2)`
//! - everything else: no-op backend; all operations succeed and restrict nothing

pub mod backend;
pub mod controller;
pub mod detect;
pub mod error;
#[cfg(target_os = "openbsd")]
pub mod openbsd;
pub mod policy;
pub mod promises;

use std::path::Path;

pub use backend::{NoopBackend, SandboxBackend, platform_backend};
pub use controller::{Phase, SandboxController, SandboxState};
pub use detect::{
    CORE_UTILS_ENV, SandboxCapabilities, detect_capabilities, parse_bool, resolve_in_process,
};
pub use error::SandboxError;
pub use policy::{GrantRequirement, PathGrant, PathPolicy, Permissions, PolicyInputs};
pub use promises::{PromiseSet, SHUTDOWN_PROMISES, STARTUP_PROMISES};

/// Initialise the process-wide sandbox. See [`SandboxController::init`].
pub fn init(data_dir: &Path, working_dir: &Path) -> Result<(), SandboxError> {
    SandboxController::global().init(data_dir, working_dir)
}

/// Drop to the shutdown promise set. See [`SandboxController::shutdown`].
pub fn shutdown() -> Result<(), SandboxError> {
    SandboxController::global().shutdown()
}

/// True while the process-wide sandbox is active and not yet shut down.
pub fn is_initialized() -> bool {
    SandboxController::global().is_initialized()
}
