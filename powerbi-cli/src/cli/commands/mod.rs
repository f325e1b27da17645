//! Subcommand handlers and the helpers they share

pub mod config;
pub mod download;
pub mod periods;
pub mod run;
pub mod sheets;
pub mod splice;
pub mod token;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use colored::*;

use super::{MappingArgs, TokenArgs};
use crate::api::{PowerBiClient, TokenSource, resolve_token};
use crate::api::auth::token_summary;
use crate::config::Config;
use crate::services::{DownloadProgress, DownloadStatus};
use crate::workbook::{SpliceSummary, WorkbookPackage};

/// Split a `KEY=VALUE` argument
pub fn parse_pair(arg: &str) -> Result<(String, String)> {
    let Some((key, value)) = arg.split_once('=') else {
        bail!("Expected KEY=VALUE, got '{}'", arg);
    };
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
        bail!("Expected KEY=VALUE, got '{}'", arg);
    }
    Ok((key.to_string(), value.to_string()))
}

/// Apply `--map KEY=SHEET` overrides for this invocation
pub fn apply_mappings(config: &mut Config, args: &MappingArgs) -> Result<()> {
    for entry in &args.map {
        let (key, sheet) = parse_pair(entry)?;
        log::debug!("Mapping override: {} -> {}", key, sheet);
        config.update_sheet_mapping(&key, &sheet)?;
    }
    Ok(())
}

/// Mapping pairs restricted to `only` (all reports when empty)
pub fn selected_mapping(config: &Config, only: &[String]) -> Result<Vec<(String, String)>> {
    let selected: Vec<&str> = config
        .select_reports(only)?
        .iter()
        .map(|r| r.key.as_str())
        .collect();
    Ok(config
        .sheet_mapping()
        .into_iter()
        .filter(|(key, _)| selected.contains(&key.as_str()))
        .collect())
}

pub fn token_source(args: &TokenArgs) -> TokenSource {
    TokenSource {
        explicit: args.token.clone(),
        session_storage: args.session_storage.clone(),
        allow_prompt: !args.no_prompt,
    }
}

/// Resolve a token and build the export client
pub fn build_client(config: &Config, args: &TokenArgs) -> Result<PowerBiClient> {
    let resolved = resolve_token(&token_source(args))?;
    log::info!(
        "Using token {} from {}",
        token_summary(&resolved.token),
        resolved.origin
    );
    PowerBiClient::new(&config.endpoint, &resolved.token, &config.api.resilience())
}

/// Timestamped output file next to the destination
pub fn default_output_path(dest: &Path, prefix: &str, now: DateTime<Local>) -> PathBuf {
    let extension = dest
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("xlsx")
        .to_ascii_lowercase();
    let name = format!("{}_{}.{}", prefix, now.format("%Y%m%dT%H%M%S"), extension);
    match dest.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

pub fn print_progress(progress: DownloadProgress) {
    let status = match progress.status {
        DownloadStatus::Downloading => "downloading".cyan(),
        DownloadStatus::Completed => "done".green(),
        DownloadStatus::Placeholder => "failed, using placeholder".yellow(),
    };
    println!(
        "[{}/{}] {} {}",
        progress.current, progress.total, progress.display_name, status
    );
}

/// Save the spliced workbook, or fail when nothing was updated
pub fn save_spliced(
    package: &WorkbookPackage,
    summary: &SpliceSummary,
    output: &Path,
) -> Result<()> {
    for failure in summary.failures() {
        println!(
            "{} {} → {}: {}",
            "❌".red(),
            failure.key,
            failure.target_sheet,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }

    if summary.success_count() == 0 {
        bail!("No sheets were updated; {} was not written", output.display());
    }

    package
        .save(output)
        .with_context(|| format!("Failed to save {}", output.display()))
}

/// Final status lines after a successful save
pub fn print_summary(summary: &SpliceSummary, output: &Path) {
    let downloaded = summary
        .outcomes
        .iter()
        .filter(|o| o.success && !o.is_placeholder)
        .count();
    let placeholders = summary.placeholder_count();

    let mut headline = format!("✅ Processing completed: {} files downloaded", downloaded);
    if placeholders > 0 {
        headline.push_str(&format!(", {} placeholder(s) created", placeholders));
    }
    println!("{}", headline.green().bold());

    for outcome in summary.outcomes.iter().filter(|o| o.success) {
        if let Some(message) = &outcome.message {
            println!("   {}: {}", outcome.key, message.dimmed());
        }
        if let (Some(sheet), Some(range)) = (&outcome.source_sheet, outcome.column_range) {
            log::debug!("{}: columns {} came from export sheet \"{}\"", outcome.key, range, sheet);
        }
    }
    println!("Updated sheets: {}", summary.processed_sheets().join(", "));
    println!(
        "File saved as: {}",
        output.display().to_string().bright_green()
    );

    if placeholders > 0 {
        println!(
            "{}",
            "⚠️  Some files failed to download and were replaced with placeholders. Check the Excel file for details."
                .yellow()
        );
    }
}
