//! Command line definitions

pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "powerbi-cli")]
#[command(
    author,
    version,
    about = "Download PowerBI report exports and splice them into an Excel workbook"
)]
pub struct Cli {
    /// Configuration file (default: the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download all reports and splice them into a copy of the destination workbook
    Run(RunArgs),

    /// Download reports and save the raw exports
    Download(DownloadArgs),

    /// Splice exports already on disk into a copy of the destination workbook
    Splice(SpliceArgs),

    /// Show the date windows each report will request today
    Periods,

    /// Check the sheet mapping against a destination workbook
    Sheets(SheetsArgs),

    /// Check whether a PowerBI token can be found
    Token(TokenArgs),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Where the bearer token comes from
#[derive(Args, Debug, Clone, Default)]
pub struct TokenArgs {
    /// Bearer token (also read from POWERBI_TOKEN)
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// JSON dump of sessionStorage from an app.powerbi.com report page
    #[arg(long, value_name = "FILE")]
    pub session_storage: Option<PathBuf>,

    /// Never prompt for a token on the terminal
    #[arg(long)]
    pub no_prompt: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct MappingArgs {
    /// Override the destination sheet for a report
    #[arg(long = "map", value_name = "KEY=SHEET")]
    pub map: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Destination workbook (xlsx or xlsm); it is read, never modified
    #[arg(long, value_name = "FILE")]
    pub dest: PathBuf,

    /// Output workbook (default: next to the destination, timestamped)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub token: TokenArgs,

    #[command(flatten)]
    pub mapping: MappingArgs,

    /// Only process these reports
    #[arg(long, value_name = "KEY")]
    pub only: Vec<String>,

    /// Also keep the raw exports in this directory
    #[arg(long, value_name = "DIR")]
    pub save_downloads: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Directory the exports are written to
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,

    #[command(flatten)]
    pub token: TokenArgs,

    /// Only download these reports
    #[arg(long, value_name = "KEY")]
    pub only: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SpliceArgs {
    /// Destination workbook (xlsx or xlsm)
    #[arg(long, value_name = "FILE")]
    pub dest: PathBuf,

    /// Export to splice, given as report key and file
    #[arg(long = "report", value_name = "KEY=FILE", required = true)]
    pub reports: Vec<String>,

    /// Output workbook (default: next to the destination, timestamped)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub mapping: MappingArgs,
}

#[derive(Args, Debug)]
pub struct SheetsArgs {
    /// Destination workbook (xlsx or xlsm)
    #[arg(long, value_name = "FILE")]
    pub dest: PathBuf,

    #[command(flatten)]
    pub mapping: MappingArgs,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file location
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
