use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use tracing::{debug, info, warn};

use super::backend::{SandboxBackend, platform_backend};
use super::error::SandboxError;
use super::policy::{PathGrant, PathPolicy, PolicyInputs};
use super::promises::PromiseSet;
use crate::paths::{Paths, create_dir_with_mode};

static GLOBAL: OnceLock<SandboxController> = OnceLock::new();

/// Lifecycle of the process-wide sandbox. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialized,
    ShutdownRestricted,
    /// A reveal, seal or restrict call failed partway. The primitives cannot
    /// be undone, so the process stays here.
    Failed,
}

/// Process-wide sandbox state, mutated only by [`SandboxController`].
#[derive(Debug, Clone)]
pub struct SandboxState {
    pub phase: Phase,
    /// Paths actually revealed, in reveal order. Frozen once initialised.
    pub granted_paths: Vec<PathGrant>,
    /// `None` until the first restriction: the process is unrestricted.
    pub promises: Option<PromiseSet>,
}

impl Default for SandboxState {
    fn default() -> Self {
        Self {
            phase: Phase::Uninitialized,
            granted_paths: Vec::new(),
            promises: None,
        }
    }
}

/// Owns the sandbox state and drives the reveal → seal → restrict protocol.
pub struct SandboxController {
    backend: Box<dyn SandboxBackend>,
    paths: Paths,
    state: Mutex<SandboxState>,
}

impl SandboxController {
    pub fn new(backend: Box<dyn SandboxBackend>) -> Self {
        Self::with_paths(backend, Paths::default())
    }

    pub fn with_paths(backend: Box<dyn SandboxBackend>, paths: Paths) -> Self {
        Self {
            backend,
            paths,
            state: Mutex::new(SandboxState::default()),
        }
    }

    /// The controller bound to this platform's backend.
    pub fn global() -> &'static SandboxController {
        GLOBAL.get_or_init(|| SandboxController::new(platform_backend()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_enforcing(&self) -> bool {
        self.backend.is_enforcing()
    }

    /// Restrict filesystem visibility and syscalls for the rest of the
    /// process lifetime. Must be called once, before concurrent work begins.
    pub fn init(&self, data_dir: &Path, working_dir: &Path) -> Result<(), SandboxError> {
        let mut state = self.lock();

        if !self.backend.is_enforcing() {
            debug!(
                backend = self.backend.name(),
                "sandbox primitives unavailable, init is a no-op"
            );
            return Ok(());
        }

        // The primitive cannot un-seal, so a second call is rejected, not merged.
        if state.phase != Phase::Uninitialized {
            return Err(SandboxError::AlreadyInitialized);
        }

        let temp_dir = prepare_temp_dir(&self.paths.temp_dir);
        let policy = PathPolicy::build(
            PolicyInputs {
                data_dir,
                working_dir,
                paths: &self.paths,
                temp_dir: &temp_dir,
            },
            |key| std::env::var(key).ok(),
        )?;

        let promises = PromiseSet::startup();
        let granted = match self.apply(&policy, state.promises.as_ref(), &promises) {
            Ok(granted) => granted,
            Err(e) => {
                state.phase = Phase::Failed;
                warn!(error = %e, "sandbox setup failed");
                return Err(e);
            }
        };

        state.phase = Phase::Initialized;
        state.granted_paths = granted;
        state.promises = Some(promises);

        info!(
            promises = %PromiseSet::startup(),
            data_dir = %data_dir.display(),
            working_dir = %working_dir.display(),
            "sandbox active"
        );
        Ok(())
    }

    /// Drop to the minimal promise set for a graceful exit.
    ///
    /// Call only after all filesystem and network activity has finished.
    pub fn shutdown(&self) -> Result<(), SandboxError> {
        let mut state = self.lock();

        if state.phase != Phase::Initialized {
            return Ok(());
        }

        let promises = PromiseSet::shutdown();
        if let Err(e) = self.restrict(state.promises.as_ref(), &promises) {
            // Already exiting: report, do not escalate.
            warn!(error = %e, "pledge shutdown failed");
            return Err(e);
        }

        state.phase = Phase::ShutdownRestricted;
        state.promises = Some(promises);
        debug!("sandbox: shutdown promises active");
        Ok(())
    }

    /// True between a successful [`init`](Self::init) and
    /// [`shutdown`](Self::shutdown). Always false on a non-enforcing backend.
    pub fn is_initialized(&self) -> bool {
        self.lock().phase == Phase::Initialized
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> SandboxState {
        self.lock().clone()
    }

    /// Reveal, seal, then restrict to `promises`. Returns the grants revealed.
    fn apply(
        &self,
        policy: &PathPolicy,
        current: Option<&PromiseSet>,
        promises: &PromiseSet,
    ) -> Result<Vec<PathGrant>, SandboxError> {
        // Step 1: reveal paths BEFORE sealing
        let mut granted = Vec::new();
        for grant in policy.reveal_order() {
            match self.backend.reveal(grant) {
                Ok(()) => granted.push(grant.clone()),
                Err(source) if grant.is_mandatory() => {
                    return Err(SandboxError::Reveal {
                        path: grant.path.clone(),
                        source,
                    });
                }
                Err(e) => {
                    debug!(path = %grant.path.display(), error = %e, "unveil skipped");
                }
            }
        }
        debug!(total_paths = granted.len(), "unveil setup complete");

        // Step 2: lock the reveal list
        self.backend
            .seal()
            .map_err(|source| SandboxError::Seal { source })?;

        // Step 3: everything the process will ever need, requested upfront
        self.restrict(current, promises)?;
        Ok(granted)
    }

    /// Apply `next`, refusing anything that is not a subset of `current`.
    fn restrict(&self, current: Option<&PromiseSet>, next: &PromiseSet) -> Result<(), SandboxError> {
        if let Some(current) = current
            && !next.is_subset(current)
        {
            return Err(SandboxError::Restrict {
                promises: next.to_string(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("promises can only shrink (current: {})", current),
                ),
            });
        }

        self.backend
            .restrict(next)
            .map_err(|source| SandboxError::Restrict {
                promises: next.to_string(),
                source,
            })
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Create the per-user temp dir, falling back to the system temp dir.
fn prepare_temp_dir(preferred: &Path) -> PathBuf {
    match create_dir_with_mode(preferred) {
        Ok(()) => preferred.to_path_buf(),
        Err(e) => {
            debug!(path = %preferred.display(), error = %e, "failed to create temp dir");
            std::env::temp_dir()
        }
    }
}
