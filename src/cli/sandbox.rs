use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::sandbox::{SandboxController, detect_capabilities, resolve_in_process};

#[derive(Args)]
pub struct SandboxArgs {
    #[command(subcommand)]
    pub command: SandboxCommands,
}

#[derive(Subcommand)]
pub enum SandboxCommands {
    /// Show sandbox capabilities and configuration
    Status,
}

pub fn run(args: SandboxArgs, config: &Config) -> Result<()> {
    match args.command {
        SandboxCommands::Status => run_status(config),
    }
}

fn run_status(config: &Config) -> Result<()> {
    let caps = detect_capabilities();
    let controller = SandboxController::global();

    println!("Sandbox Capabilities:");
    for line in caps.status_lines() {
        println!("{}", line);
    }
    println!("  Backend:   {}", controller.backend_name());
    println!();

    let in_process = resolve_in_process(config.shell.in_process());
    println!("Configuration:");
    println!("  Enabled:     {}", config.sandbox.enabled);
    println!("  Data dir:    {}", config.data_dir().display());
    println!(
        "  Utilities:   {}",
        if in_process { "in-process" } else { "native" }
    );
    match config.shell.timeout() {
        Some(limit) => println!("  Timeout:     {}s", limit.as_secs()),
        None => println!("  Timeout:     none"),
    }
    println!("  Blocked:     {} rule(s)", config.shell.block_funcs().len());

    Ok(())
}
