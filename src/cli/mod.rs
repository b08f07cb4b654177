pub mod exec;
pub mod paths;
pub mod sandbox;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about = "Run shell commands under a process sandbox")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command line in a sandboxed shell session
    Exec(exec::ExecArgs),

    /// Shell sandbox management
    Sandbox(sandbox::SandboxArgs),

    /// Show resolved XDG directory paths
    Paths,
}
