/// Environment variable that forces in-process utilities on or off.
pub const CORE_UTILS_ENV: &str = "WARDEN_CORE_UTILS";

/// Detected sandbox capabilities of the current platform.
#[derive(Debug, Clone)]
pub struct SandboxCapabilities {
    /// Target OS this binary was built for.
    pub platform: &'static str,

    /// Whether `unveil(2)` and `pledge(2)` are available (OpenBSD only).
    pub pledge_unveil: bool,

    /// Whether sh, scripts, and common utilities run in-process by default.
    pub in_process_default: bool,

    /// Value of `WARDEN_CORE_UTILS`, if set and parseable.
    pub core_utils_override: Option<bool>,
}

/// Probe the current build target for sandbox capabilities.
pub fn detect_capabilities() -> SandboxCapabilities {
    SandboxCapabilities {
        platform: std::env::consts::OS,
        pledge_unveil: cfg!(target_os = "openbsd"),
        in_process_default: in_process_default(),
        core_utils_override: std::env::var(CORE_UTILS_ENV)
            .ok()
            .and_then(|v| parse_bool(&v)),
    }
}

/// Platform default for in-process execution.
///
/// On OpenBSD a child process does not inherit the parent's unveil list, so
/// anything spawned natively would see the whole filesystem. Windows has no
/// POSIX shell to delegate to.
pub fn in_process_default() -> bool {
    cfg!(any(target_os = "openbsd", target_os = "windows"))
}

/// Decide in-process mode: explicit option, then environment, then platform.
pub fn resolve_in_process(explicit: Option<bool>) -> bool {
    resolve_in_process_with(explicit, |key| std::env::var(key).ok())
}

pub(crate) fn resolve_in_process_with<F>(explicit: Option<bool>, env_fn: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .or_else(|| env_fn(CORE_UTILS_ENV).and_then(|v| parse_bool(&v)))
        .unwrap_or_else(in_process_default)
}

/// Parse `1`/`t`/`true` or `0`/`f`/`false` in their common casings.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

impl SandboxCapabilities {
    /// In-process mode with no explicit option.
    pub fn effective_in_process(&self) -> bool {
        self.core_utils_override.unwrap_or(self.in_process_default)
    }

    /// Human-readable status lines for `sandbox status` command.
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        lines.push(format!("  Platform:  {:<24}", self.platform));
        if self.pledge_unveil {
            lines.push("  pledge:    available               ok".to_string());
            lines.push("  unveil:    available               ok".to_string());
        } else {
            lines.push("  pledge:    not available           --".to_string());
            lines.push("  unveil:    not available           --".to_string());
        }

        let source = match self.core_utils_override {
            Some(_) => CORE_UTILS_ENV,
            None => "platform default",
        };
        lines.push(format!(
            "  In-process utilities: {} ({})",
            if self.effective_in_process() { "on" } else { "off" },
            source
        ));

        lines
    }
}
