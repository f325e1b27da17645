mod api;
mod cli;
mod config;
mod services;
mod workbook;

use anyhow::Result;
use clap::Parser;

use cli::commands::{config as config_cmd, download, periods, run, sheets, splice, token};
use cli::{Cli, Commands};
use config::Config;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins over -v
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config_path = cli.config.as_deref();
    let load = || Config::load(config_path);

    match cli.command {
        Commands::Run(args) => run::handle_run_command(args, load()?).await,
        Commands::Download(args) => download::handle_download_command(args, load()?).await,
        Commands::Splice(args) => splice::handle_splice_command(args, load()?),
        Commands::Periods => periods::handle_periods_command(&load()?),
        Commands::Sheets(args) => sheets::handle_sheets_command(args, load()?),
        Commands::Token(args) => token::handle_token_command(args, &load()?),
        // A broken config file must not block `config init --force`
        Commands::Config(command) => config_cmd::handle_config_command(command, config_path),
    }
}
