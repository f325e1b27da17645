//! Export request bodies
//!
//! The export endpoint takes a semantic query document. The document is kept
//! as a JSON template with `${name}` placeholders inside string values; the
//! placeholders are filled from a report's date windows.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use include_dir::{Dir, include_dir};
use serde_json::Value;

use crate::config::{DateWindow, ReportDefinition};

static TEMPLATES: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/src/api/templates");

pub const DEFAULT_TEMPLATE: &str = "semantic_query.json";

/// A rendered export request for one report
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub key: String,
    pub display_name: String,
    pub current: DateWindow,
    pub reference: DateWindow,
    pub body: Value,
}

impl ExportRequest {
    pub fn for_report(report: &ReportDefinition, today: NaiveDate) -> Result<Self> {
        let (current, reference) = report.windows(today)?;
        let template = load_template(report)?;
        let body = render_template(&template, &template_vars(&current, &reference))
            .with_context(|| format!("Failed to render query template for {}", report.key))?;

        log::debug!(
            "Built export request for {}: current {}, reference {}",
            report.key,
            current.display(),
            reference.display()
        );

        Ok(Self {
            key: report.key.clone(),
            display_name: report.display_name.clone(),
            current,
            reference,
            body,
        })
    }
}

/// The report's own template file, or the built-in query
pub fn load_template(report: &ReportDefinition) -> Result<Value> {
    let text = match &report.template {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read query template: {}", path.display()))?,
        None => builtin_template()?.to_string(),
    };
    serde_json::from_str(&text).context("Query template is not valid JSON")
}

fn builtin_template() -> Result<&'static str> {
    TEMPLATES
        .get_file(DEFAULT_TEMPLATE)
        .and_then(|f| f.contents_utf8())
        .context("Built-in query template is missing")
}

/// Placeholder values for a pair of windows
pub fn template_vars(current: &DateWindow, reference: &DateWindow) -> BTreeMap<&'static str, String> {
    let (current_start, current_end) = current.api_literals();
    let (reference_start, reference_end) = reference.api_literals();
    let day = |d: NaiveDate| d.format("%Y-%m-%d").to_string();

    BTreeMap::from([
        ("current_start", current_start),
        ("current_end", current_end),
        ("reference_start", reference_start),
        ("reference_end", reference_end),
        ("current_start_date", day(current.start)),
        ("current_end_date", day(current.end)),
        ("reference_start_date", day(reference.start)),
        ("reference_end_date", day(reference.end)),
    ])
}

/// Substitute placeholders in every string of `template`
pub fn render_template(template: &Value, vars: &BTreeMap<&'static str, String>) -> Result<Value> {
    Ok(match template {
        Value::String(s) => Value::String(substitute(s, vars)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_template(v, vars))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| render_template(v, vars).map(|v| (k.clone(), v)))
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    })
}

fn substitute(text: &str, vars: &BTreeMap<&'static str, String>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            bail!("Unterminated placeholder in template: {}", rest);
        };
        let name = &after[..end];
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => bail!(
                "Unknown placeholder ${{{}}}. Known placeholders: {}",
                name,
                vars.keys().copied().collect::<Vec<_>>().join(", ")
            ),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
