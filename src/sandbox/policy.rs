use std::fmt;
use std::path::{Path, PathBuf};

use super::error::SandboxError;
use crate::paths::Paths;

/// Environment variables naming toolchain caches that shell commands
/// (cargo build, go test, ...) need to write into.
pub const TOOLCHAIN_ENV_VARS: &[&str] = &[
    "CARGO_HOME",
    "RUSTUP_HOME",
    "CARGO_TARGET_DIR",
    "GOPATH",
    "GOCACHE",
];

/// Fixed system paths revealed read-only (some with execute) at startup.
pub const SYSTEM_PATHS: &[(&str, Permissions)] = &[
    // Libraries and binaries for exec
    ("/usr/lib", Permissions::R),
    ("/usr/local/lib", Permissions::R),
    ("/usr/bin", Permissions::RX),
    ("/usr/local/bin", Permissions::RX),
    ("/bin", Permissions::RX),
    ("/sbin", Permissions::R),
    // TLS certificates
    ("/etc/ssl/cert.pem", Permissions::R),
    ("/etc/ssl/certs", Permissions::R),
    // DNS and hostname resolution
    ("/etc/resolv.conf", Permissions::R),
    ("/etc/hosts", Permissions::R),
    // User database
    ("/etc/passwd", Permissions::R),
    // Timezone data
    ("/usr/share/zoneinfo", Permissions::R),
    ("/etc/localtime", Permissions::R),
    // Devices
    ("/dev/null", Permissions::RW),
    ("/dev/tty", Permissions::RW),
    ("/dev/urandom", Permissions::R),
];

/// Access bits for a revealed path (`unveil(2)` permission string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub execute: bool,
}

impl Permissions {
    pub const R: Self = Self::new(true, false, false, false);
    pub const RW: Self = Self::new(true, true, false, false);
    pub const RX: Self = Self::new(true, false, false, true);
    pub const RWC: Self = Self::new(true, true, true, false);
    pub const RWCX: Self = Self::new(true, true, true, true);

    pub const fn new(read: bool, write: bool, create: bool, execute: bool) -> Self {
        Self {
            read,
            write,
            create,
            execute,
        }
    }

    /// Parse an unveil-style permission string such as `"rwc"`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut perms = Self::default();
        for c in s.chars() {
            match c {
                'r' => perms.read = true,
                'w' => perms.write = true,
                'c' => perms.create = true,
                'x' => perms.execute = true,
                _ => return None,
            }
        }
        Some(perms)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (on, c) in [
            (self.read, 'r'),
            (self.write, 'w'),
            (self.create, 'c'),
            (self.execute, 'x'),
        ] {
            if on {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// Whether failing to reveal a grant aborts startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantRequirement {
    /// Failure is fatal: data dir and working dir.
    Mandatory,
    /// Failure is logged and skipped: system paths, XDG dirs, caches.
    BestEffort,
}

/// One path made visible to the sandboxed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGrant {
    pub path: PathBuf,
    pub perms: Permissions,
    pub requirement: GrantRequirement,
}

impl PathGrant {
    pub fn mandatory(path: impl Into<PathBuf>, perms: Permissions) -> Self {
        Self {
            path: path.into(),
            perms,
            requirement: GrantRequirement::Mandatory,
        }
    }

    pub fn best_effort(path: impl Into<PathBuf>, perms: Permissions) -> Self {
        Self {
            path: path.into(),
            perms,
            requirement: GrantRequirement::BestEffort,
        }
    }

    pub fn is_mandatory(&self) -> bool {
        self.requirement == GrantRequirement::Mandatory
    }
}

/// Inputs that the policy is derived from.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInputs<'a> {
    pub data_dir: &'a Path,
    pub working_dir: &'a Path,
    pub paths: &'a Paths,
    /// Per-user temp directory, already created by the caller.
    pub temp_dir: &'a Path,
}

/// The full set of path grants for one sandbox initialisation.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    grants: Vec<PathGrant>,
}

impl PathPolicy {
    /// Build the grant list. Fails if a mandatory directory is unset or missing.
    ///
    /// `env_fn` supplies toolchain cache variables; unset or empty values are skipped.
    pub fn build<F>(inputs: PolicyInputs<'_>, env_fn: F) -> Result<Self, SandboxError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = resolve_mandatory_dir(inputs.data_dir, "data directory")?;
        let working_dir = resolve_mandatory_dir(inputs.working_dir, "working directory")?;

        let mut grants = vec![
            PathGrant::mandatory(&data_dir, Permissions::RWC),
            PathGrant::mandatory(&working_dir, Permissions::RWCX),
        ];

        grants.extend(
            SYSTEM_PATHS
                .iter()
                .map(|(path, perms)| PathGrant::best_effort(*path, *perms)),
        );

        let paths = inputs.paths;
        if let Some(dot_dir) = paths.home_dot_dir()
            && dot_dir != data_dir
        {
            grants.push(PathGrant::best_effort(dot_dir, Permissions::RWC));
        }
        grants.push(PathGrant::best_effort(&paths.xdg_config_home, Permissions::RWC));
        grants.push(PathGrant::best_effort(&paths.xdg_data_home, Permissions::RWC));
        if let Some(gitconfig) = paths.gitconfig() {
            grants.push(PathGrant::best_effort(gitconfig, Permissions::R));
        }

        for var in TOOLCHAIN_ENV_VARS {
            if let Some(dir) = env_fn(var).filter(|v| !v.is_empty()) {
                grants.push(PathGrant::best_effort(dir, Permissions::RWC));
            }
        }

        grants.push(PathGrant::best_effort(inputs.temp_dir, Permissions::RWC));

        Ok(Self { grants })
    }

    pub fn grants(&self) -> &[PathGrant] {
        &self.grants
    }

    pub fn mandatory(&self) -> impl Iterator<Item = &PathGrant> {
        self.grants.iter().filter(|g| g.is_mandatory())
    }

    pub fn best_effort(&self) -> impl Iterator<Item = &PathGrant> {
        self.grants.iter().filter(|g| !g.is_mandatory())
    }

    /// Mandatory grants first, so a fatal failure happens before any
    /// optional path has been revealed.
    pub fn reveal_order(&self) -> impl Iterator<Item = &PathGrant> {
        self.mandatory().chain(self.best_effort())
    }
}

fn resolve_mandatory_dir(dir: &Path, label: &str) -> Result<PathBuf, SandboxError> {
    if dir.as_os_str().is_empty() {
        return Err(SandboxError::Configuration {
            path: dir.to_path_buf(),
            reason: format!("{} is not set", label),
        });
    }

    let absolute = std::path::absolute(dir).map_err(|e| SandboxError::Configuration {
        path: dir.to_path_buf(),
        reason: format!("cannot resolve {}: {}", label, e),
    })?;

    if !absolute.is_dir() {
        return Err(SandboxError::Configuration {
            path: absolute,
            reason: format!("{} does not exist or is not a directory", label),
        });
    }

    Ok(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_paths(home: &Path) -> Paths {
        Paths {
            home_dir: Some(home.to_path_buf()),
            xdg_config_home: home.join(".config"),
            xdg_data_home: home.join(".local/share"),
            config_dir: home.join(".config/warden"),
            data_dir: home.join(".local/share/warden"),
            temp_dir: home.join("tmp"),
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn permissions_render_like_unveil() {
        assert_eq!(Permissions::R.to_string(), "r");
        assert_eq!(Permissions::RX.to_string(), "rx");
        assert_eq!(Permissions::RWC.to_string(), "rwc");
        assert_eq!(Permissions::RWCX.to_string(), "rwcx");
        assert_eq!(Permissions::parse("rwc"), Some(Permissions::RWC));
        assert_eq!(Permissions::parse("rq"), None);
    }

    #[test]
    fn mandatory_grants_come_first() {
        let data = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let paths = test_paths(data.path());
        let temp = paths.temp_dir.clone();

        let policy = PathPolicy::build(
            PolicyInputs {
                data_dir: data.path(),
                working_dir: work.path(),
                paths: &paths,
                temp_dir: &temp,
            },
            no_env,
        )
        .unwrap();

        let order: Vec<&PathGrant> = policy.reveal_order().collect();
        assert_eq!(order[0].path, data.path());
        assert_eq!(order[0].perms, Permissions::RWC);
        assert_eq!(order[1].path, work.path());
        assert_eq!(order[1].perms, Permissions::RWCX);
        assert!(order[2..].iter().all(|g| !g.is_mandatory()));
        assert_eq!(policy.mandatory().count(), 2);
    }

    #[test]
    fn system_paths_are_best_effort() {
        let data = tempfile::tempdir().unwrap();
        let paths = test_paths(data.path());
        let temp = paths.temp_dir.clone();
        let policy = PathPolicy::build(
            PolicyInputs {
                data_dir: data.path(),
                working_dir: data.path(),
                paths: &paths,
                temp_dir: &temp,
            },
            no_env,
        )
        .unwrap();

        let find = |p: &str| {
            policy
                .grants()
                .iter()
                .find(|g| g.path == Path::new(p))
                .cloned()
                .unwrap()
        };
        assert_eq!(find("/usr/bin").perms, Permissions::RX);
        assert_eq!(find("/dev/null").perms, Permissions::RW);
        assert_eq!(find("/dev/urandom").perms, Permissions::R);
        assert_eq!(find("/etc/ssl/cert.pem").requirement, GrantRequirement::BestEffort);
        assert!(policy.grants().iter().any(|g| g.path == temp));
        assert!(
            policy
                .grants()
                .iter()
                .any(|g| g.path.ends_with(".gitconfig") && g.perms == Permissions::R)
        );
    }

    #[test]
    fn toolchain_dirs_come_from_env() {
        let data = tempfile::tempdir().unwrap();
        let paths = test_paths(data.path());
        let temp = paths.temp_dir.clone();
        let env: HashMap<&str, &str> = HashMap::from([
            ("CARGO_HOME", "/opt/cargo"),
            ("GOCACHE", "/opt/gocache"),
            ("GOPATH", ""),
        ]);

        let policy = PathPolicy::build(
            PolicyInputs {
                data_dir: data.path(),
                working_dir: data.path(),
                paths: &paths,
                temp_dir: &temp,
            },
            |k| env.get(k).map(|v| v.to_string()),
        )
        .unwrap();

        let cargo = policy
            .grants()
            .iter()
            .find(|g| g.path == Path::new("/opt/cargo"))
            .unwrap();
        assert_eq!(cargo.perms, Permissions::RWC);
        assert!(!cargo.is_mandatory());
        assert!(policy.grants().iter().any(|g| g.path == Path::new("/opt/gocache")));
        assert!(!policy.grants().iter().any(|g| g.path.as_os_str().is_empty()));
    }

    #[test]
    fn missing_mandatory_dir_is_configuration_error() {
        let data = tempfile::tempdir().unwrap();
        let paths = test_paths(data.path());
        let temp = paths.temp_dir.clone();
        let missing = data.path().join("does-not-exist");

        let err = PathPolicy::build(
            PolicyInputs {
                data_dir: data.path(),
                working_dir: &missing,
                paths: &paths,
                temp_dir: &temp,
            },
            no_env,
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::Configuration { .. }));

        let err = PathPolicy::build(
            PolicyInputs {
                data_dir: Path::new(""),
                working_dir: data.path(),
                paths: &paths,
                temp_dir: &temp,
            },
            no_env,
        )
        .unwrap_err();
        assert!(err.to_string().contains("data directory is not set"));
    }

    #[test]
    fn home_dot_dir_skipped_when_it_is_the_data_dir() {
        let home = tempfile::tempdir().unwrap();
        let dot = home.path().join(".warden");
        std::fs::create_dir(&dot).unwrap();
        let paths = test_paths(home.path());
        let temp = paths.temp_dir.clone();

        let policy = PathPolicy::build(
            PolicyInputs {
                data_dir: &dot,
                working_dir: home.path(),
                paths: &paths,
                temp_dir: &temp,
            },
            no_env,
        )
        .unwrap();
        assert_eq!(policy.grants().iter().filter(|g| g.path == dot).count(), 1);
    }
}
