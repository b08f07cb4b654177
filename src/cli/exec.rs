//! CLI subcommand: `warden exec`
//!
//! Initialises the process sandbox, runs one command line through a shell
//! session with output streamed to the terminal, then drops to the shutdown
//! promise set.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::sandbox;
use crate::shell::{Shell, ShellError, ShellOptions, TracingLogger, exit_code};

#[derive(Args)]
pub struct ExecArgs {
    /// Working directory (default: current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Do not apply the process sandbox
    #[arg(long)]
    pub no_sandbox: bool,

    /// Per-command limit in seconds (overrides shell.timeout_secs)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Command line to run; multiple words are joined with spaces
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl ExecArgs {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Run the command and return its exit code.
pub async fn run(args: ExecArgs, config: &Config) -> Result<i32> {
    let cwd = match &args.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let cwd = cwd
        .canonicalize()
        .with_context(|| format!("Invalid working directory {}", cwd.display()))?;

    let sandboxed = config.sandbox.enabled && !args.no_sandbox;
    if sandboxed {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        sandbox::init(&data_dir, &cwd).context("Failed to initialise sandbox")?;
    } else {
        debug!("sandbox disabled for this invocation");
    }

    let timeout = args
        .timeout
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .or_else(|| config.shell.timeout());
    let shell = Shell::new(ShellOptions {
        working_dir: Some(cwd),
        env: None,
        logger: Some(Arc::new(TracingLogger)),
        block_funcs: config.shell.block_funcs(),
        in_process: config.shell.in_process(),
        timeout,
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = shell
        .exec_stream(
            &cancel,
            &args.command_line(),
            tokio::io::stdout(),
            tokio::io::stderr(),
        )
        .await;
    match &result {
        Ok(()) | Err(ShellError::ExitStatus(_)) => {}
        Err(e) => eprintln!("warden: {}", e),
    }

    if sandboxed && let Err(e) = sandbox::shutdown() {
        warn!("Failed to restrict sandbox at exit: {}", e);
    }

    Ok(exit_code(&result))
}
