//! Download every report and splice it into a copy of the destination

use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::Local;
use colored::*;

use super::{
    apply_mappings, build_client, default_output_path, print_progress, print_summary,
    save_spliced, selected_mapping,
};
use crate::api::PowerBiClient;
use crate::cli::RunArgs;
use crate::config::Config;
use crate::services::{download_reports, save_downloads};
use crate::workbook::{WorkbookPackage, splice_reports};

pub async fn handle_run_command(args: RunArgs, mut config: Config) -> Result<()> {
    apply_mappings(&mut config, &args.mapping)?;
    let mapping = selected_mapping(&config, &args.only)?;

    // Fail on a bad destination before spending minutes on downloads
    let package = open_destination(&args, &mapping)?;
    let client = build_client(&config, &args.token)?;

    run_with_client(&client, &args, &config, package, &mapping).await?;
    Ok(())
}

fn open_destination(args: &RunArgs, mapping: &[(String, String)]) -> Result<WorkbookPackage> {
    let package = WorkbookPackage::open(&args.dest)?;
    let required: Vec<String> = mapping.iter().map(|(_, sheet)| sheet.clone()).collect();
    let validation = package.validate_required_sheets(&required);
    if !validation.is_valid {
        bail!(
            "Destination {} is missing sheet(s): {}. Available sheets: {}",
            args.dest.display(),
            validation.missing_sheets.join(", "),
            validation.available_sheets.join(", ")
        );
    }
    log::debug!("Destination has every target sheet: {}", validation.required_sheets.join(", "));
    Ok(package)
}

/// Download, splice and save; returns the written workbook
async fn run_with_client(
    client: &PowerBiClient,
    args: &RunArgs,
    config: &Config,
    mut package: WorkbookPackage,
    mapping: &[(String, String)],
) -> Result<PathBuf> {
    let today = config.today()?;
    println!(
        "Downloading {} report(s) from {}...",
        mapping.len(),
        client.region().cyan()
    );

    let downloads = download_reports(client, config, &args.only, today, print_progress).await?;

    if let Some(dir) = &args.save_downloads {
        let paths = save_downloads(dir, &downloads)?;
        println!("Saved {} export(s) to {}", paths.len(), dir.display());
    }

    println!("Processing downloaded files...");
    let sources: Vec<_> = downloads.iter().map(|d| d.as_source()).collect();
    let summary = splice_reports(&mut package, &sources, mapping)?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.dest, &config.output_prefix, Local::now()));
    save_spliced(&package, &summary, &output)?;
    print_summary(&summary, &output);

    for download in downloads.iter().filter(|d| d.is_placeholder) {
        log::warn!(
            "{} used placeholder data: {}",
            download.key,
            download.error.as_deref().unwrap_or("download failed")
        );
    }
    Ok(output)
}
