use anyhow::Result;
use colored::*;

use super::token_source;
use crate::api::auth::token_summary;
use crate::api::{region_label, resolve_token};
use crate::cli::TokenArgs;
use crate::config::Config;

pub fn handle_token_command(args: TokenArgs, config: &Config) -> Result<()> {
    println!(
        "Endpoint: {} ({})",
        config.endpoint,
        region_label(&config.endpoint).cyan()
    );

    let resolved = resolve_token(&token_source(&args))?;
    println!(
        "{} Token found via {}: {}",
        "✓".green(),
        resolved.origin,
        token_summary(&resolved.token)
    );
    Ok(())
}
