//! Concurrent report downloads with placeholder fallback

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::future::join_all;

use crate::api::{ExportRequest, PowerBiClient};
use crate::config::{Config, ReportDefinition};
use crate::workbook::{SourceReport, placeholder_workbook};

/// Every xlsx is a zip archive
const ZIP_MAGIC: &[u8] = b"PK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    /// 1-based position of the report in the download order
    pub current: usize,
    pub total: usize,
    pub display_name: String,
    pub status: DownloadStatus,
}

#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub key: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub is_placeholder: bool,
    /// Why the export failed, when a placeholder was used
    pub error: Option<String>,
}

impl DownloadResult {
    pub fn as_source(&self) -> SourceReport<'_> {
        SourceReport {
            key: &self.key,
            bytes: &self.bytes,
            is_placeholder: self.is_placeholder,
        }
    }
}

/// Download the selected reports (all of them for empty `keys`)
///
/// Failed exports are replaced with a placeholder workbook so the splice can
/// still run. Results come back in download order.
pub async fn download_reports<F>(
    client: &PowerBiClient,
    config: &Config,
    keys: &[String],
    today: NaiveDate,
    on_progress: F,
) -> Result<Vec<DownloadResult>>
where
    F: Fn(DownloadProgress),
{
    let reports = config.select_reports(keys)?;
    let total = reports.len();
    log::info!("Downloading {} report(s) from {}", total, client.region());

    let tasks = reports.iter().enumerate().map(|(index, report)| {
        let on_progress = &on_progress;
        async move {
            let progress = |status| DownloadProgress {
                current: index + 1,
                total,
                display_name: report.display_name.clone(),
                status,
            };
            on_progress(progress(DownloadStatus::Downloading));

            let result = download_one(client, report, today).await;
            let status = match &result {
                Ok(r) if r.is_placeholder => DownloadStatus::Placeholder,
                _ => DownloadStatus::Completed,
            };
            on_progress(progress(status));
            result
        }
    });

    let results = join_all(tasks).await.into_iter().collect();

    let stats = client.limiter().stats();
    log::debug!(
        "Downloads finished: {} permit(s) handed out, {} wait(s) at limit {}",
        stats.requests_acquired,
        stats.requests_waited,
        stats.max_concurrent_requests
    );
    results
}

async fn download_one(
    client: &PowerBiClient,
    report: &ReportDefinition,
    today: NaiveDate,
) -> Result<DownloadResult> {
    let exported = match ExportRequest::for_report(report, today) {
        Ok(request) => client.export_xlsx(&request).await,
        Err(e) => Err(e),
    };
    let exported = exported.and_then(|bytes| {
        if !bytes.starts_with(ZIP_MAGIC) {
            anyhow::bail!(
                "{} did not return an xlsx file (got {} bytes starting with {:?})",
                report.display_name,
                bytes.len(),
                String::from_utf8_lossy(&bytes[..bytes.len().min(32)])
            );
        }
        Ok(bytes)
    });

    let (bytes, error) = match exported {
        Ok(bytes) => (bytes, None),
        Err(e) => {
            log::warn!(
                "Download of {} failed, using placeholder: {:#}",
                report.display_name,
                e
            );
            let placeholder = placeholder_workbook(report, today)
                .with_context(|| format!("Failed to create placeholder for {}", report.key))?;
            (placeholder, Some(format!("{:#}", e)))
        }
    };

    Ok(DownloadResult {
        key: report.key.clone(),
        file_name: report.file_name.clone(),
        is_placeholder: error.is_some(),
        bytes,
        error,
    })
}

/// Write each export to `dir` under its configured file name
pub fn save_downloads(dir: &Path, results: &[DownloadResult]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    results
        .iter()
        .map(|result| {
            let path = dir.join(&result.file_name);
            fs::write(&path, &result.bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::debug!("Saved {} ({} bytes)", path.display(), result.bytes.len());
            Ok(path)
        })
        .collect()
}
