//! Command execution on brush, with vetting and in-process utilities.
//!
//! Each invocation is checked by the [`chain::ExecChain`] on a tree-sitter
//! parse of the source, then run by a fresh brush shell on an engine thread
//! (see [`engine`]). In in-process mode `sh`, `bash` and the utility catalogue
//! are brush builtins, so they never leave this process.

pub mod blocklist;
pub mod builtins;
pub mod chain;
pub mod coreutils;
pub mod engine;
pub mod error;
pub mod io;
pub mod scan;
pub mod script;
pub mod session;

pub use blocklist::{BlockFunc, Blocklist, arguments_blocker, commands_blocker, split_args_flags};
pub use chain::{Delegation, ExecChain, HandlerContext, delegate};
pub use error::{InterruptKind, ShellError, exit_code, is_interrupt};
pub use scan::analyze;
pub use script::is_shell_script;
pub use session::{CommandLogger, ExecOutput, NoopLogger, Shell, ShellOptions, TracingLogger};
