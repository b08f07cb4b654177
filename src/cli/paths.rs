//! CLI subcommand: `warden paths`
//!
//! Prints all resolved XDG-compliant paths for debugging and scripting.

use anyhow::Result;

use crate::config::Config;

pub fn run(config: &Config) -> Result<()> {
    let paths = &config.paths;

    println!("Warden Paths (XDG Base Directory)");
    println!("=================================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    println!("Data:       {}", paths.data_dir.display());
    println!("  sandbox data:   {}", config.data_dir().display());
    println!();
    println!("Temp:       {}", paths.temp_dir.display());
    println!();
    println!("XDG config: {}", paths.xdg_config_home.display());
    println!("XDG data:   {}", paths.xdg_data_home.display());
    match paths.home_dir {
        Some(ref home) => println!("Home:       {}", home.display()),
        None => println!("Home:       (not available)"),
    }

    Ok(())
}
