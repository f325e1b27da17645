//! Splice downloaded reports into the destination workbook

use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};

use super::column::ColumnRange;
use super::package::WorkbookPackage;
use super::sheet_patch::patch_sheet_xml;
use super::source::SourceSheet;

/// One downloaded export, ready to be spliced
#[derive(Debug, Clone, Copy)]
pub struct SourceReport<'a> {
    pub key: &'a str,
    pub bytes: &'a [u8],
    pub is_placeholder: bool,
}

/// Mapping check for a single report key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingCheck {
    pub key: String,
    pub target_sheet: String,
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingValidation {
    pub entries: Vec<MappingCheck>,
    pub available_sheets: Vec<String>,
}

impl MappingValidation {
    pub fn is_valid(&self) -> bool {
        self.entries.iter().all(|e| e.exists)
    }

    pub fn missing(&self) -> impl Iterator<Item = &MappingCheck> {
        self.entries.iter().filter(|e| !e.exists)
    }
}

/// Check every mapped target sheet against the destination workbook
pub fn validate_sheet_mapping(
    package: &WorkbookPackage,
    mapping: &[(String, String)],
) -> MappingValidation {
    let entries = mapping
        .iter()
        .map(|(key, sheet)| MappingCheck {
            key: key.clone(),
            target_sheet: sheet.clone(),
            exists: package.has_sheet(sheet),
        })
        .collect();

    MappingValidation {
        entries,
        available_sheets: package.sheet_names(),
    }
}

/// What happened to one report during a splice
#[derive(Debug, Clone, PartialEq)]
pub struct SpliceOutcome {
    pub key: String,
    pub source_sheet: Option<String>,
    pub target_sheet: String,
    pub success: bool,
    pub column_range: Option<ColumnRange>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub is_placeholder: bool,
}

impl SpliceOutcome {
    fn failed(key: &str, target_sheet: &str, is_placeholder: bool, error: String) -> Self {
        SpliceOutcome {
            key: key.to_string(),
            source_sheet: None,
            target_sheet: target_sheet.to_string(),
            success: false,
            column_range: None,
            message: None,
            error: Some(error),
            is_placeholder,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpliceSummary {
    pub outcomes: Vec<SpliceOutcome>,
}

impl SpliceSummary {
    /// Target sheets that were updated, in processing order without repeats
    pub fn processed_sheets(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.outcomes
            .iter()
            .filter(|o| o.success && seen.insert(o.target_sheet.clone()))
            .map(|o| o.target_sheet.clone())
            .collect()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.success && o.is_placeholder)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SpliceOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}

/// Splice every mapped report into `package`.
///
/// A target sheet missing from the workbook aborts before anything is
/// modified. Problems with an individual report are recorded in its outcome
/// and the remaining reports are still processed.
pub fn splice_reports(
    package: &mut WorkbookPackage,
    reports: &[SourceReport<'_>],
    mapping: &[(String, String)],
) -> Result<SpliceSummary> {
    log::info!("Processing {} report(s) with sheet mapping", mapping.len());

    let validation = validate_sheet_mapping(package, mapping);
    if !validation.is_valid() {
        let missing = validation
            .missing()
            .map(|m| format!("{} → {}", m.key, m.target_sheet))
            .collect::<Vec<_>>()
            .join(", ");
        bail!(
            "Target sheets not found in destination file: {}. Available sheets: {}",
            missing,
            validation.available_sheets.join(", ")
        );
    }

    let mut summary = SpliceSummary::default();
    for (key, target_sheet) in mapping {
        let Some(report) = reports.iter().find(|r| r.key == key) else {
            log::warn!("Downloaded file {} not found", key);
            summary.outcomes.push(SpliceOutcome::failed(
                key,
                target_sheet,
                false,
                format!("Downloaded file {} not available", key),
            ));
            continue;
        };

        let outcome = match splice_one(package, report, target_sheet) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Failed to process {}: {:#}", key, e);
                SpliceOutcome::failed(key, target_sheet, report.is_placeholder, format!("{:#}", e))
            }
        };
        summary.outcomes.push(outcome);
    }

    if summary.success_count() > 0 {
        package.drop_calc_chain()?;
    }

    log::info!(
        "Processing completed. {} sheet(s) updated: {:?}",
        summary.processed_sheets().len(),
        summary.processed_sheets()
    );
    Ok(summary)
}

fn splice_one(
    package: &mut WorkbookPackage,
    report: &SourceReport<'_>,
    target_sheet: &str,
) -> Result<SpliceOutcome> {
    let source = SourceSheet::from_bytes(report.bytes)
        .with_context(|| format!("Could not read downloaded file {}", report.key))?;
    log::info!("Processing {}: {} → {}", report.key, source.name, target_sheet);

    let range = source
        .detect_column_range()
        .with_context(|| format!("No data columns detected in {}", report.key))?;
    log::debug!("Detected columns {} in {}", range, report.key);

    let part = package
        .sheet_part(target_sheet)
        .with_context(|| format!("Target sheet \"{}\" not found", target_sheet))?
        .to_string();
    let xml = package
        .part(&part)
        .with_context(|| format!("Worksheet part {} is missing", part))?;

    let (patched, stats) = patch_sheet_xml(xml, range, &source)
        .with_context(|| format!("Failed to update sheet {}", target_sheet))?;
    package.replace_part(&part, patched)?;

    log::debug!(
        "{}: removed {} cell(s), wrote {} cell(s), added {} row(s), detached {} formula(s)",
        target_sheet,
        stats.cells_removed,
        stats.cells_written,
        stats.rows_added,
        stats.formulas_detached
    );

    Ok(SpliceOutcome {
        key: report.key.to_string(),
        source_sheet: Some(source.name),
        target_sheet: target_sheet.to_string(),
        success: true,
        column_range: Some(range),
        message: Some(format!(
            "Successfully replaced columns {} in sheet {}",
            range, target_sheet
        )),
        error: None,
        is_placeholder: report.is_placeholder,
    })
}
