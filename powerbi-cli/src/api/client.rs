//! HTTP client for the PowerBI export endpoint

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, ORIGIN,
    PRAGMA, REFERER, RETRY_AFTER,
};
use serde_json::Value;
use uuid::Uuid;

use super::query::ExportRequest;
use super::resilience::{ConcurrencyLimiter, ResilienceConfig, RetryPolicy, RetryableError};

const POWERBI_ORIGIN: &str = "https://app.powerbi.com";

/// Per-request correlation ids the web app sends
const ACTIVITY_ID: HeaderName = HeaderName::from_static("activityid");
const REQUEST_ID: HeaderName = HeaderName::from_static("requestid");

/// Failure of a single export attempt
#[derive(Debug)]
pub enum ExportError {
    Status {
        status: StatusCode,
        body: String,
        retry_after: Option<Duration>,
    },
    Transport(reqwest::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Status { status, body, .. } => {
                write!(
                    f,
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown status")
                )?;
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN {
                    write!(f, " (the token may have expired; copy a fresh one from app.powerbi.com)")?;
                }
                if !body.is_empty() {
                    write!(f, ": {}", body)?;
                }
                Ok(())
            }
            ExportError::Transport(e) => write!(f, "request failed: {}", e),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Transport(e) => Some(e),
            ExportError::Status { .. } => None,
        }
    }
}

impl RetryableError for ExportError {
    fn is_retryable(&self) -> bool {
        match self {
            ExportError::Status { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
            }
            ExportError::Transport(_) => true,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ExportError::Status { retry_after, .. } => *retry_after,
            ExportError::Transport(_) => None,
        }
    }
}

/// Client for `POST .../export/xlsx`
#[derive(Debug, Clone)]
pub struct PowerBiClient {
    http: reqwest::Client,
    endpoint: String,
    authorization: HeaderValue,
    retry: RetryPolicy,
    limiter: ConcurrencyLimiter,
}

impl PowerBiClient {
    pub fn new(endpoint: &str, token: &str, resilience: &ResilienceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(resilience.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Self::with_http_client(http, endpoint, token, resilience)
    }

    pub(crate) fn with_http_client(
        http: reqwest::Client,
        endpoint: &str,
        token: &str,
        resilience: &ResilienceConfig,
    ) -> Result<Self> {
        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .context("Token contains characters that are not allowed in an HTTP header")?;
        authorization.set_sensitive(true);

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            authorization,
            retry: RetryPolicy::new(resilience.retry.clone()),
            limiter: ConcurrencyLimiter::new(resilience.concurrency.clone()),
        })
    }

    pub fn region(&self) -> &'static str {
        region_label(&self.endpoint)
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Download one report as xlsx bytes
    pub async fn export_xlsx(&self, request: &ExportRequest) -> Result<Vec<u8>> {
        let _permit = self.limiter.acquire().await?;
        log::info!("Requesting {} from {}", request.display_name, self.region());

        let label = format!("Export of {}", request.key);
        let bytes = self
            .retry
            .execute(&label, || self.send_once(&request.body))
            .await
            .map_err(anyhow::Error::new)
            .with_context(|| format!("Failed to download {}", request.display_name))?;

        log::info!(
            "Downloaded {} ({} bytes)",
            request.display_name,
            bytes.len()
        );
        Ok(bytes)
    }

    async fn send_once(&self, body: &Value) -> Result<Vec<u8>, ExportError> {
        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers())
            .json(body)
            .send()
            .await
            .map_err(ExportError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::Status {
                status,
                body: truncate(body.trim(), 300),
                retry_after,
            });
        }

        let bytes = response.bytes().await.map_err(ExportError::Transport)?;
        Ok(bytes.to_vec())
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json;charset=UTF-8"),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(ORIGIN, HeaderValue::from_static(POWERBI_ORIGIN));
        headers.insert(REFERER, HeaderValue::from_static("https://app.powerbi.com/"));
        headers.insert(AUTHORIZATION, self.authorization.clone());
        for name in [ACTIVITY_ID, REQUEST_ID] {
            if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
                headers.insert(name, value);
            }
        }
        headers
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Human label for the cluster an endpoint points at
pub fn region_label(endpoint: &str) -> &'static str {
    let host = reqwest::Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();

    if host.contains("south-east-asia") {
        "PowerBI South East Asia"
    } else if host.contains("-us-") || host.contains("west-us") || host.contains("east-us") {
        "PowerBI US"
    } else if host.contains("europe") {
        "PowerBI Europe"
    } else {
        "PowerBI API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::api::resilience::RetryConfig;
    use chrono::NaiveDate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Answer one connection per response, returning the raw requests
    async fn serve(responses: Vec<(u16, Vec<u8>)>) -> (String, JoinHandle<Vec<String>>) {
        serve_with_headers(responses.into_iter().map(|(s, b)| (s, "", b)).collect()).await
    }

    /// Like `serve`, with raw extra header lines per response
    async fn serve_with_headers(
        responses: Vec<(u16, &'static str, Vec<u8>)>,
    ) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, extra, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                let head = format!(
                    "HTTP/1.1 {} Test\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    extra,
                    body.len()
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                socket.write_all(&body).await.unwrap();
                socket.shutdown().await.ok();
            }
            requests
        });

        (format!("http://{}/export/xlsx", addr), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&data[..pos]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= pos + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    fn client(url: &str, max_attempts: u32) -> PowerBiClient {
        let resilience = ResilienceConfig::builder()
            .retry_config(RetryConfig {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
                jitter: false,
            })
            .build();
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        PowerBiClient::with_http_client(http, url, "secret-token", &resilience).unwrap()
    }

    fn request() -> ExportRequest {
        let config = Config::default();
        let today = NaiveDate::from_ymd_opt(2025, 6, 22).unwrap();
        ExportRequest::for_report(config.report("Day_Le").unwrap(), today).unwrap()
    }

    #[tokio::test]
    async fn test_export_sends_powerbi_headers() {
        let (url, server) = serve(vec![(200, b"PK\x03\x04xlsx".to_vec())]).await;

        let bytes = client(&url, 1).export_xlsx(&request()).await.unwrap();
        assert_eq!(bytes, b"PK\x03\x04xlsx");

        let requests = server.await.unwrap();
        let raw = requests[0].to_lowercase();
        assert!(raw.starts_with("post /export/xlsx"));
        assert!(raw.contains("authorization: bearer secret-token"));
        assert!(raw.contains("content-type: application/json;charset=utf-8"));
        assert!(raw.contains("origin: https://app.powerbi.com"));
        assert!(raw.contains("activityid: "));
        assert!(raw.contains("requestid: "));
        assert!(raw.contains("\"artifactid\":4656201"));
    }

    #[tokio::test]
    async fn test_export_retries_server_errors() {
        let (url, server) = serve(vec![
            (503, b"busy".to_vec()),
            (200, b"data".to_vec()),
        ])
        .await;

        let bytes = client(&url, 3).export_xlsx(&request()).await.unwrap();
        assert_eq!(bytes, b"data");
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_export_does_not_retry_unauthorized() {
        let (url, server) = serve(vec![(401, Vec::new())]).await;

        let err = client(&url, 3).export_xlsx(&request()).await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Failed to download Day Le (Yesterday)"));
        assert!(message.contains("HTTP 401: Unauthorized"));
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_export_honours_retry_after() {
        let (url, server) = serve_with_headers(vec![
            (429, "Retry-After: 0\r\n", Vec::new()),
            (200, "", b"data".to_vec()),
        ])
        .await;
        // Backoff alone would wait 30s before the second attempt
        let resilience = ResilienceConfig::builder()
            .retry_config(RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(30),
                backoff_multiplier: 1.0,
                jitter: false,
            })
            .build();
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let client = PowerBiClient::with_http_client(http, &url, "t", &resilience).unwrap();

        let bytes = tokio::time::timeout(Duration::from_secs(5), client.export_xlsx(&request()))
            .await
            .expect("Retry-After: 0 should skip the backoff")
            .unwrap();
        assert_eq!(bytes, b"data");
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_after_is_parsed_from_response() {
        let (url, _server) = serve_with_headers(vec![(503, "Retry-After: 7\r\n", Vec::new())]).await;

        let err = client(&url, 1).export_xlsx(&request()).await.unwrap_err();
        let export_error = err.downcast_ref::<ExportError>().unwrap();
        assert_eq!(export_error.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_token_with_invalid_header_characters_is_rejected() {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let err = PowerBiClient::with_http_client(
            http,
            "http://127.0.0.1:9/export/xlsx",
            "abc\ndef",
            &ResilienceConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not allowed in an HTTP header"));
    }

    #[test]
    fn test_retryable_statuses() {
        let status = |code: u16| ExportError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
            retry_after: None,
        };
        assert!(status(408).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(502).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
    }

    #[test]
    fn test_region_label() {
        assert_eq!(region_label(crate::config::DEFAULT_ENDPOINT), "PowerBI South East Asia");
        assert_eq!(
            region_label("https://wabi-west-us-redirect.analysis.windows.net/export/xlsx"),
            "PowerBI US"
        );
        assert_eq!(
            region_label("https://wabi-north-europe-redirect.analysis.windows.net/export/xlsx"),
            "PowerBI Europe"
        );
        assert_eq!(region_label("not a url"), "PowerBI API");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(truncate("ab", 3), "ab");
    }
}
