use std::path::PathBuf;

use anyhow::Result;
use colored::*;

use super::{build_client, print_progress};
use crate::api::PowerBiClient;
use crate::cli::DownloadArgs;
use crate::config::Config;
use crate::services::{download_reports, save_downloads};

pub async fn handle_download_command(args: DownloadArgs, config: Config) -> Result<()> {
    let client = build_client(&config, &args.token)?;
    download_with_client(&client, &args, &config).await?;
    Ok(())
}

async fn download_with_client(
    client: &PowerBiClient,
    args: &DownloadArgs,
    config: &Config,
) -> Result<Vec<PathBuf>> {
    let today = config.today()?;

    let downloads = download_reports(client, config, &args.only, today, print_progress).await?;
    let paths = save_downloads(&args.out_dir, &downloads)?;

    for (download, path) in downloads.iter().zip(&paths) {
        match &download.error {
            None => println!("{} {}", "✓".green(), path.display()),
            Some(error) => println!(
                "{} {} (placeholder: {})",
                "⚠".yellow(),
                path.display(),
                error
            ),
        }
    }

    let placeholders = downloads.iter().filter(|d| d.is_placeholder).count();
    let mut line = format!(
        "Downloaded {} of {} report(s)",
        downloads.len() - placeholders,
        downloads.len()
    );
    if placeholders > 0 {
        line.push_str(&format!(", {} placeholder(s) created", placeholders));
    }
    println!("{}", line.bold());
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::TokenArgs;
    use crate::services::download::tests::{client, export_bytes, serve_ok};
    use std::fs;

    #[tokio::test]
    async fn test_download_writes_every_selected_report() {
        let dir = tempfile::tempdir().unwrap();
        let body = export_bytes();
        let url = serve_ok(2, body.clone()).await;
        let args = DownloadArgs {
            out_dir: dir.path().join("exports"),
            token: TokenArgs::default(),
            only: vec!["MTD_Le".to_string(), "Day_Le".to_string()],
        };

        let paths = download_with_client(&client(&url), &args, &Config::default())
            .await
            .unwrap();

        assert_eq!(
            paths,
            vec![
                dir.path().join("exports").join("MTD_Le_Report.xlsx"),
                dir.path().join("exports").join("Day_Le_Report.xlsx"),
            ]
        );
        assert!(paths.iter().all(|p| fs::read(p).unwrap() == body));
    }

    #[tokio::test]
    async fn test_download_rejects_malformed_token() {
        let args = DownloadArgs {
            out_dir: PathBuf::from("unused"),
            token: TokenArgs {
                token: Some("abc\ndef".to_string()),
                session_storage: None,
                no_prompt: true,
            },
            only: Vec::new(),
        };

        let err = handle_download_command(args, Config::default()).await.unwrap_err();
        assert!(err.to_string().contains("not allowed in an HTTP header"));
    }
}
