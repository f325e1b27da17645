use anyhow::{Result, bail};
use colored::*;

use super::apply_mappings;
use crate::cli::SheetsArgs;
use crate::config::Config;
use crate::workbook::{WorkbookPackage, validate_sheet_mapping};

pub fn handle_sheets_command(args: SheetsArgs, mut config: Config) -> Result<()> {
    apply_mappings(&mut config, &args.mapping)?;
    let package = WorkbookPackage::open(&args.dest)?;
    let validation = validate_sheet_mapping(&package, &config.sheet_mapping());

    println!("Sheet mapping for {}:", args.dest.display().to_string().bold());
    for entry in &validation.entries {
        let mark = if entry.exists { "✓".green() } else { "✗".red() };
        println!("  {} {} → {}", mark, entry.key, entry.target_sheet);
    }
    println!();
    println!("Available sheets: {}", validation.available_sheets.join(", "));

    if !validation.is_valid() {
        let missing: Vec<_> = validation.missing().map(|m| m.target_sheet.as_str()).collect();
        bail!("Target sheets not found in destination file: {}", missing.join(", "));
    }
    println!("{}", "All target sheets are present".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::MappingArgs;
    use crate::workbook::package::tests::destination_fixture;

    fn dest() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dest.xlsx");
        std::fs::write(&path, destination_fixture()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_sheets_reports_missing_targets() {
        let (_dir, path) = dest();
        let err = handle_sheets_command(
            SheetsArgs {
                dest: path,
                mapping: MappingArgs::default(),
            },
            Config::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Target sheets not found in destination file: 09.06-now"
        );
    }

    #[test]
    fn test_sheets_accepts_mapping_override() {
        let (_dir, path) = dest();
        handle_sheets_command(
            SheetsArgs {
                dest: path,
                mapping: MappingArgs {
                    map: vec!["09.06-now=Summary".to_string()],
                },
            },
            Config::default(),
        )
        .unwrap();
    }
}
