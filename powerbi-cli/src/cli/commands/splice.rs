//! Offline splice of exports already on disk

use std::fs;

use anyhow::{Context, Result, bail};
use chrono::Local;

use super::{apply_mappings, default_output_path, parse_pair, print_summary, save_spliced};
use crate::cli::SpliceArgs;
use crate::config::Config;
use crate::workbook::{SourceReport, WorkbookPackage, splice_reports};

pub fn handle_splice_command(args: SpliceArgs, mut config: Config) -> Result<()> {
    apply_mappings(&mut config, &args.mapping)?;

    let mut files = Vec::with_capacity(args.reports.len());
    for entry in &args.reports {
        let (key, path) = parse_pair(entry)?;
        if config.report(&key).is_none() {
            bail!(
                "Unknown report '{}'. Known reports: {}",
                key,
                config.report_keys().join(", ")
            );
        }
        let bytes = fs::read(&path).with_context(|| format!("Failed to read export: {}", path))?;
        files.push((key, bytes));
    }

    // Only the reports given on the command line are spliced
    let mapping: Vec<(String, String)> = config
        .sheet_mapping()
        .into_iter()
        .filter(|(key, _)| files.iter().any(|(k, _)| k == key))
        .collect();

    let mut package = WorkbookPackage::open(&args.dest)?;
    let sources: Vec<SourceReport<'_>> = files
        .iter()
        .map(|(key, bytes)| SourceReport {
            key,
            bytes,
            is_placeholder: false,
        })
        .collect();
    let summary = splice_reports(&mut package, &sources, &mapping)?;

    let output = args
        .output
        .unwrap_or_else(|| default_output_path(&args.dest, &config.output_prefix, Local::now()));
    save_spliced(&package, &summary, &output)?;
    print_summary(&summary, &output);
    Ok(())
}
