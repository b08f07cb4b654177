use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::Paths;
use crate::sandbox::{CORE_UTILS_ENV, parse_bool};
use crate::shell::{BlockFunc, arguments_blocker, commands_blocker};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub shell: ShellConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Force in-process sh/scripts/utilities on or off. Unset means platform
    /// default. `WARDEN_CORE_UTILS` wins over this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_utils: Option<bool>,

    /// Per-invocation limit in seconds (0 or unset = no limit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Commands refused by name, e.g. ["curl", "wget"]
    #[serde(default)]
    pub blocked_commands: Vec<String>,

    #[serde(default)]
    pub blocked_subcommands: Vec<BlockedSubcommand>,
}

/// `git push --force` style rule: command, leading arguments, required flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlockedSubcommand {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Apply the process sandbox around `warden exec`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Mandatory writable data directory (default: XDG data dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            data_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ShellConfig {
    /// In-process override from the environment, else from the file.
    pub fn in_process(&self) -> Option<bool> {
        self.in_process_with(|key| std::env::var(key).ok())
    }

    pub(crate) fn in_process_with<F>(&self, env_fn: F) -> Option<bool>
    where
        F: Fn(&str) -> Option<String>,
    {
        env_fn(CORE_UTILS_ENV)
            .and_then(|v| parse_bool(&v))
            .or(self.core_utils)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Block predicates in file order: names first, then subcommand rules.
    pub fn block_funcs(&self) -> Vec<BlockFunc> {
        let mut funcs = Vec::with_capacity(1 + self.blocked_subcommands.len());
        if !self.blocked_commands.is_empty() {
            funcs.push(commands_blocker(self.blocked_commands.iter().cloned()));
        }
        for rule in &self.blocked_subcommands {
            funcs.push(arguments_blocker(
                rule.command.clone(),
                rule.args.iter().cloned(),
                rule.flags.iter().cloned(),
            ));
        }
        funcs
    }
}

impl SandboxConfig {
    /// Configured data dir with `~` expanded, or the XDG default.
    pub fn data_dir(&self, paths: &Paths) -> PathBuf {
        match self.data_dir.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).to_string()),
            None => paths.data_dir.clone(),
        }
    }
}

impl Config {
    /// Load `config_dir/config.toml`, writing a commented template on first run.
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;

        let path = paths.config_file();
        if !path.exists() {
            let config = Config {
                paths,
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }
        Self::load_file(&path, paths)
    }

    /// Load an explicit config file. A missing file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::load_file(path, Paths::resolve()?)
    }

    fn load_file(path: &Path, paths: Paths) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.paths = paths;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.paths.config_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.paths.config_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.sandbox.data_dir(&self.paths)
    }
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Warden Configuration
# Auto-created on first run. Edit as needed.

[shell]
# Run sh, shell scripts and common file utilities inside the warden process.
# Default: on for OpenBSD and Windows, off elsewhere.
# WARDEN_CORE_UTILS=true|false overrides this setting.
# core_utils = true

# Per-command limit in seconds (0 = none)
# timeout_secs = 120

# Commands that are never run
# blocked_commands = ["curl", "wget"]

# Subcommands refused when all listed flags are present
# [[shell.blocked_subcommands]]
# command = "git"
# args = ["push"]
# flags = ["--force"]

[sandbox]
enabled = true
# Writable data directory revealed to the sandbox (default: XDG data dir)
# data_dir = "~/.local/share/warden"

[logging]
level = "info"
"#;
