use anyhow::Result;
use colored::*;

use crate::config::Config;

pub fn handle_periods_command(config: &Config) -> Result<()> {
    let today = config.today()?;
    println!(
        "Today is {} ({})",
        today.format("%d/%m/%Y").to_string().bold(),
        config.timezone
    );

    let mapping = config.sheet_mapping();
    for report in &config.reports {
        let (current, reference) = report.windows(today)?;
        let sheet = mapping
            .iter()
            .find(|(key, _)| *key == report.key)
            .map(|(_, sheet)| sheet.as_str())
            .unwrap_or(&report.target_sheet);

        println!();
        println!("{} → sheet {}", report.display_name.cyan().bold(), sheet.green());
        if !report.description.is_empty() {
            println!("  {}", report.description.dimmed());
        }
        println!(
            "  Current:   {} ({} day(s); {} to {})",
            current.display(),
            current.days(),
            report.current.start,
            report.current.end
        );
        println!(
            "  Reference: {} ({} day(s); {} to {})",
            reference.display(),
            reference.days(),
            report.reference.start,
            report.reference.end
        );
    }
    Ok(())
}
