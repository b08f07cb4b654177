//! Syscall-category tokens (`pledge(2)` promises).
//!
//! A [`PromiseSet`] renders in declaration order, so the startup set always
//! prints as the exact literal downstream deployments match on.

use std::collections::BTreeSet;
use std::fmt;

/// Promises held for the whole process lifetime after startup.
pub const STARTUP_PROMISES: &str =
    "stdio rpath wpath cpath dpath flock fattr proc exec inet dns unix tty getpw";

/// Promises held after shutdown: basic I/O only.
pub const SHUTDOWN_PROMISES: &str = "stdio";

/// A single syscall category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Promise {
    /// Basic I/O operations (read, write, close, ...).
    Stdio,
    /// Read-only filesystem access.
    Rpath,
    /// Write access to existing files.
    Wpath,
    /// Create and delete files.
    Cpath,
    /// Create device nodes.
    Dpath,
    /// File locking (SQLite WAL, lock files).
    Flock,
    /// Change file attributes.
    Fattr,
    /// fork, wait, kill.
    Proc,
    /// execve.
    Exec,
    /// Internet sockets.
    Inet,
    /// Hostname resolution.
    Dns,
    /// Unix domain sockets.
    Unix,
    /// Terminal control.
    Tty,
    /// User database lookups.
    Getpw,
}

impl Promise {
    pub const ALL: [Promise; 14] = [
        Promise::Stdio,
        Promise::Rpath,
        Promise::Wpath,
        Promise::Cpath,
        Promise::Dpath,
        Promise::Flock,
        Promise::Fattr,
        Promise::Proc,
        Promise::Exec,
        Promise::Inet,
        Promise::Dns,
        Promise::Unix,
        Promise::Tty,
        Promise::Getpw,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Promise::Stdio => "stdio",
            Promise::Rpath => "rpath",
            Promise::Wpath => "wpath",
            Promise::Cpath => "cpath",
            Promise::Dpath => "dpath",
            Promise::Flock => "flock",
            Promise::Fattr => "fattr",
            Promise::Proc => "proc",
            Promise::Exec => "exec",
            Promise::Inet => "inet",
            Promise::Dns => "dns",
            Promise::Unix => "unix",
            Promise::Tty => "tty",
            Promise::Getpw => "getpw",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == token)
    }
}

/// An order-insensitive set of promises.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromiseSet(BTreeSet<Promise>);

impl PromiseSet {
    /// Everything the process will ever need, requested once at startup.
    pub fn startup() -> Self {
        Self(Promise::ALL.into_iter().collect())
    }

    /// Minimal set held while the process exits.
    pub fn shutdown() -> Self {
        Self(BTreeSet::from([Promise::Stdio]))
    }

    /// Parse a space-separated token list. Unknown tokens are rejected.
    pub fn parse(tokens: &str) -> Result<Self, String> {
        tokens
            .split_whitespace()
            .map(|t| Promise::from_token(t).ok_or_else(|| format!("unknown promise: {}", t)))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn contains(&self, promise: Promise) -> bool {
        self.0.contains(&promise)
    }

    pub fn is_subset(&self, other: &PromiseSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Promise> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for PromiseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self.iter().map(Promise::as_str).collect();
        f.write_str(&tokens.join(" "))
    }
}
