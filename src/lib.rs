//! Warden - capability-restricted command execution
//!
//! This crate provides:
//! - A process sandbox (`unveil`/`pledge` on OpenBSD, no-op elsewhere)
//! - A bash-compatible shell session on brush, vetted before each run
//! - In-process core utilities that stay inside the sandboxed process
//! - Command blocklists

pub mod cli;
pub mod config;
pub mod paths;
pub mod sandbox;
pub mod shell;

pub use config::Config;
pub use shell::{Shell, ShellError, ShellOptions};
