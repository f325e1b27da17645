use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::*;

use crate::cli::ConfigCommands;
use crate::config::Config;

pub fn handle_config_command(
    command: ConfigCommands,
    config_path: Option<&Path>,
) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => Config::config_path()?,
    };

    match command {
        ConfigCommands::Show => {
            let config = Config::load(config_path)?;
            let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{}", content);
        }
        ConfigCommands::Path => {
            let state = if path.exists() { "exists".green() } else { "not created".yellow() };
            println!("{} ({})", path.display(), state);
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "Config file already exists: {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            println!("Wrote default config to {}", path.display().to_string().bright_green());
        }
    }
    Ok(())
}
