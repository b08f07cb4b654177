//! XDG Base Directory Specification compliant path resolution.
//!
//! Every directory is resolved through a three-level fallback:
//! 1. Warden-specific env var (WARDEN_CONFIG_DIR, etc.)
//! 2. XDG env var (XDG_CONFIG_HOME, etc.) via `etcetera`
//! 3. Platform default (~/.config, etc.)
//!
//! All paths are absolute. Relative paths from env vars are ignored, as XDG requires.

use anyhow::{Context, Result};
#[cfg(unix)]
use libc::getuid;
use std::path::{Path, PathBuf};

/// Resolved directory paths for the entire application.
///
/// Created once at startup and handed to the sandbox policy builder.
#[derive(Debug, Clone)]
pub struct Paths {
    /// User home directory, if one could be determined.
    pub home_dir: Option<PathBuf>,

    /// XDG config home (~/.config). Revealed to the sandbox as a whole.
    pub xdg_config_home: PathBuf,

    /// XDG data home (~/.local/share). Revealed to the sandbox as a whole.
    pub xdg_data_home: PathBuf,

    /// Config directory: config.toml lives here
    pub config_dir: PathBuf,

    /// Data directory: the default mandatory sandbox data path
    pub data_dir: PathBuf,

    /// Per-user temp directory: $TMPDIR/warden-$UID
    pub temp_dir: PathBuf,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let xdg_config_home = strategy.config_dir();
        let xdg_data_home = strategy.data_dir();

        let config_dir = env_or(&env_fn, "WARDEN_CONFIG_DIR", || {
            xdg_config_home.join("warden")
        });

        let data_dir = env_or(&env_fn, "WARDEN_DATA_DIR", || xdg_data_home.join("warden"));

        Ok(Self {
            home_dir: etcetera::home_dir().ok(),
            xdg_config_home,
            xdg_data_home,
            config_dir,
            data_dir,
            temp_dir: resolve_temp_dir(&env_fn),
        })
    }

    /// Config file: config_dir/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Legacy dot-directory in the home dir (~/.warden).
    pub fn home_dot_dir(&self) -> Option<PathBuf> {
        self.home_dir.as_ref().map(|h| h.join(".warden"))
    }

    /// Git configuration file (~/.gitconfig).
    pub fn gitconfig(&self) -> Option<PathBuf> {
        self.home_dir.as_ref().map(|h| h.join(".gitconfig"))
    }

    /// Create the config and data directories with appropriate permissions.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            create_dir_with_mode(dir)?;
        }
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| {
            // Fallback when no base directories can be determined
            let home = etcetera::home_dir().unwrap_or_else(|_| PathBuf::from("."));
            Self {
                home_dir: Some(home.clone()),
                xdg_config_home: home.join(".config"),
                xdg_data_home: home.join(".local").join("share"),
                config_dir: home.join(".config").join("warden"),
                data_dir: home.join(".local").join("share").join("warden"),
                temp_dir: std::env::temp_dir().join("warden"),
            }
        })
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_absolute()) // XDG: relative paths are invalid
        .unwrap_or_else(default)
}

/// Resolve the per-user temp directory: $TMPDIR/warden-$UID on Unix.
fn resolve_temp_dir<F>(env_fn: &F) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    #[cfg(unix)]
    {
        let uid = unsafe { getuid() };
        let tmpdir = env_fn("TMPDIR")
            .ok()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "/tmp".to_string());
        PathBuf::from(tmpdir).join(format!("warden-{}", uid))
    }

    #[cfg(not(unix))]
    {
        let user = env_fn("USERNAME").unwrap_or_else(|_| "user".into());
        std::env::temp_dir().join(format!("warden-{}", user))
    }
}

/// Create a directory with mode 0700.
pub(crate) fn create_dir_with_mode(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}
