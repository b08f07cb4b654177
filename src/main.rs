use anyhow::Result;
use clap::Parser;

use warden::cli::{self, Cli, Commands};
use warden::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))?;
    std::process::exit(code);
}

async fn async_main(cli: Cli) -> Result<i32> {
    let config = match cli.config {
        Some(ref path) => Config::load_from(std::path::Path::new(path))?,
        None => Config::load()?,
    };

    // Initialize logging
    let log_level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::Exec(args) => cli::exec::run(args, &config).await,
        Commands::Sandbox(args) => cli::sandbox::run(args, &config).map(|()| 0),
        Commands::Paths => cli::paths::run(&config).map(|()| 0),
    }
}
