//! Placeholder workbook used when a report download fails

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_xlsxwriter::Workbook;

use crate::config::ReportDefinition;

pub const PLACEHOLDER_SHEET: &str = "PlaceholderData";

/// Build a one-sheet workbook explaining that the download for `report` failed
pub fn placeholder_workbook(report: &ReportDefinition, today: NaiveDate) -> Result<Vec<u8>> {
    let date = today.format("%Y-%m-%d").to_string();
    let rows: [[&str; 4]; 5] = [
        ["Data Source", "Status", "Date", "Message"],
        [
            &report.display_name,
            "Download Failed",
            &date,
            "Could not download from PowerBI",
        ],
        [
            "Note",
            "",
            "",
            "This is placeholder data. Original download failed.",
        ],
        ["File", &report.file_name, "", ""],
        ["Target Sheet", &report.target_sheet, "", ""],
    ];

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(PLACEHOLDER_SHEET)?;

    for (row, values) in rows.iter().enumerate() {
        for (col, value) in values.iter().enumerate() {
            if !value.is_empty() {
                worksheet.write_string(row as u32, col as u16, *value)?;
            }
        }
    }

    let bytes = workbook
        .save_to_buffer()
        .with_context(|| format!("Failed to build placeholder for {}", report.key))?;

    log::info!("Created placeholder workbook for {}", report.display_name);
    Ok(bytes)
}
