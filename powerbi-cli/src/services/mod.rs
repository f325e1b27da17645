//! Services shared by the CLI commands

pub mod download;

pub use download::{DownloadProgress, DownloadStatus, download_reports, save_downloads};
