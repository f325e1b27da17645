//! Configuration for powerbi-cli
//!
//! Settings live in a TOML file under the user config directory. When that
//! file is absent the built-in defaults describe the three standard reports.

pub mod periods;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::resilience::{ConcurrencyConfig, ResilienceConfig, RetryConfig};

pub use periods::{DateExpr, DateWindow, PeriodRule, today_in};

pub const DEFAULT_ENDPOINT: &str =
    "https://wabi-south-east-asia-b-primary-redirect.analysis.windows.net/export/xlsx";
pub const DEFAULT_TIMEZONE: &str = "Asia/Ho_Chi_Minh";
pub const DEFAULT_OUTPUT_PREFIX: &str = "PowerBI_Data";

/// One PowerBI export and where it goes in the destination workbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub file_name: String,
    pub target_sheet: String,
    /// Path to a query template overriding the built-in one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
    pub current: PeriodRule,
    pub reference: PeriodRule,
}

impl ReportDefinition {
    /// (current, reference) windows for `today`
    pub fn windows(&self, today: NaiveDate) -> Result<(DateWindow, DateWindow)> {
        let current = self
            .current
            .window(today)
            .with_context(|| format!("Invalid current period for {}", self.key))?;
        let reference = self
            .reference
            .window(today)
            .with_context(|| format!("Invalid reference period for {}", self.key))?;
        Ok((current, reference))
    }
}

/// HTTP settings, mirrored into [`ResilienceConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub timeout_secs: u64,
    pub retry_enabled: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub concurrency_enabled: bool,
    pub max_concurrent_requests: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        let concurrency = ConcurrencyConfig::default();
        Self {
            timeout_secs: 300,
            retry_enabled: true,
            max_attempts: retry.max_attempts,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            backoff_multiplier: retry.backoff_multiplier,
            jitter: retry.jitter,
            concurrency_enabled: concurrency.enabled,
            max_concurrent_requests: concurrency.max_concurrent_requests,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig::builder()
            .retry_config(RetryConfig {
                max_attempts: if self.retry_enabled { self.max_attempts.max(1) } else { 1 },
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                backoff_multiplier: self.backoff_multiplier,
                jitter: self.jitter,
            })
            .max_concurrent_requests(self.max_concurrent_requests.max(1))
            .enable_concurrency_limiting(self.concurrency_enabled)
            .timeout(self.timeout())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    /// IANA timezone the report dates are computed in
    pub timezone: String,
    pub output_prefix: String,
    pub api: ApiSettings,
    /// Report key -> destination sheet, overriding `target_sheet`
    pub sheet_mapping: BTreeMap<String, String>,
    /// Reports in download order
    pub reports: Vec<ReportDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            api: ApiSettings::default(),
            sheet_mapping: BTreeMap::new(),
            reports: default_reports(),
        }
    }
}

fn default_reports() -> Vec<ReportDefinition> {
    let today = DateExpr::today;
    vec![
        ReportDefinition {
            key: "Day_Le".to_string(),
            display_name: "Day Le (Yesterday)".to_string(),
            description: "Yesterday vs Same Day Last Year".to_string(),
            file_name: "Day_Le_Report.xlsx".to_string(),
            target_sheet: "Day_Le".to_string(),
            template: None,
            current: PeriodRule::new(today().days(-1), today()),
            reference: PeriodRule::new(today().years(-1), today().years(-1).days(1)),
        },
        ReportDefinition {
            key: "MTD_Le".to_string(),
            display_name: "MTD Le (Month to Date)".to_string(),
            description: "Month to Date vs Same Period Last Year".to_string(),
            file_name: "MTD_Le_Report.xlsx".to_string(),
            target_sheet: "MTD_Le".to_string(),
            template: None,
            current: PeriodRule::new(DateExpr::month_start(), today()),
            reference: PeriodRule::new(DateExpr::month_start().years(-1), today().years(-1)),
        },
        ReportDefinition {
            key: "09.06-now".to_string(),
            display_name: "09.06-now (June 9 to Now)".to_string(),
            description: "June 9 to Today vs Same Period Last Year".to_string(),
            file_name: "09.06-now_Report.xlsx".to_string(),
            target_sheet: "09.06-now".to_string(),
            template: None,
            current: PeriodRule::new(DateExpr::fixed(6, 9), today()),
            reference: PeriodRule::new(
                DateExpr::fixed(6, 10).years(-1),
                today().years(-1).days(1),
            ),
        },
    ]
}

impl Config {
    /// Default location: `<config dir>/powerbi-cli/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine the user config directory")?;
        Ok(dir.join("powerbi-cli").join("config.toml"))
    }

    /// Load from `path`, or from the default location.
    ///
    /// A missing file at the default location yields the built-in defaults;
    /// a missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::config_path()?, false),
        };

        if !path.exists() {
            if explicit {
                bail!("Config file does not exist: {}", path.display());
            }
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        log::info!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.reports.is_empty() {
            bail!("No reports configured");
        }

        let mut seen = HashSet::new();
        for report in &self.reports {
            if report.key.trim().is_empty() {
                bail!("Report key must not be empty");
            }
            if !seen.insert(report.key.as_str()) {
                bail!("Duplicate report key: {}", report.key);
            }
            if report.target_sheet.trim().is_empty() {
                bail!("Report {} has an empty target sheet", report.key);
            }
            report
                .current
                .validate()
                .and_then(|_| report.reference.validate())
                .with_context(|| format!("Invalid period in report {}", report.key))?;
        }

        for key in self.sheet_mapping.keys() {
            if !seen.contains(key.as_str()) {
                bail!("Sheet mapping refers to unknown report: {}", key);
            }
        }

        periods::parse_timezone(&self.timezone)?;
        Ok(())
    }

    pub fn report(&self, key: &str) -> Option<&ReportDefinition> {
        self.reports.iter().find(|r| r.key == key)
    }

    pub fn report_keys(&self) -> Vec<&str> {
        self.reports.iter().map(|r| r.key.as_str()).collect()
    }

    /// Resolved (report key, destination sheet) pairs in download order
    pub fn sheet_mapping(&self) -> Vec<(String, String)> {
        self.reports
            .iter()
            .map(|r| {
                let sheet = self
                    .sheet_mapping
                    .get(&r.key)
                    .unwrap_or(&r.target_sheet)
                    .clone();
                (r.key.clone(), sheet)
            })
            .collect()
    }

    pub fn update_sheet_mapping(&mut self, key: &str, sheet: &str) -> Result<()> {
        if self.report(key).is_none() {
            bail!(
                "Unknown report '{}'. Known reports: {}",
                key,
                self.report_keys().join(", ")
            );
        }
        self.sheet_mapping.insert(key.to_string(), sheet.to_string());
        Ok(())
    }

    /// Reports selected by `keys`, or all of them when `keys` is empty
    pub fn select_reports(&self, keys: &[String]) -> Result<Vec<&ReportDefinition>> {
        if keys.is_empty() {
            return Ok(self.reports.iter().collect());
        }
        keys.iter()
            .map(|k| {
                self.report(k).with_context(|| {
                    format!("Unknown report '{}'. Known reports: {}", k, self.report_keys().join(", "))
                })
            })
            .collect()
    }

    pub fn today(&self) -> Result<NaiveDate> {
        today_in(&self.timezone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_default_reports_windows() {
        let config = Config::default();
        let today = date(2025, 6, 22);
        let windows: Vec<_> = config
            .reports
            .iter()
            .map(|r| {
                let (c, r) = r.windows(today).unwrap();
                (c.display(), r.display())
            })
            .collect();

        assert_eq!(
            windows,
            vec![
                (
                    "21/06/2025 - 22/06/2025".to_string(),
                    "22/06/2024 - 23/06/2024".to_string()
                ),
                (
                    "01/06/2025 - 22/06/2025".to_string(),
                    "01/06/2024 - 22/06/2024".to_string()
                ),
                (
                    "09/06/2025 - 22/06/2025".to_string(),
                    "10/06/2024 - 23/06/2024".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_sheet_mapping_overrides() {
        let mut config = Config::default();
        assert_eq!(config.report_keys(), vec!["Day_Le", "MTD_Le", "09.06-now"]);

        config.update_sheet_mapping("MTD_Le", "Month").unwrap();
        assert!(config.update_sheet_mapping("Weekly", "W").is_err());

        assert_eq!(
            config.sheet_mapping(),
            vec![
                ("Day_Le".to_string(), "Day_Le".to_string()),
                ("MTD_Le".to_string(), "Month".to_string()),
                ("09.06-now".to_string(), "09.06-now".to_string()),
            ]
        );
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.timezone = "Nowhere/Land".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reports[1].key = "Day_Le".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sheet_mapping.insert("Ghost".to_string(), "X".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reports[2].current.start = DateExpr::fixed(0, 9);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_select_reports() {
        let config = Config::default();
        assert_eq!(config.select_reports(&[]).unwrap().len(), 3);

        let picked = config.select_reports(&["09.06-now".to_string()]).unwrap();
        assert_eq!(picked[0].file_name, "09.06-now_Report.xlsx");
        assert!(config.select_reports(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.output_prefix = "Weekly".to_string();
        config.update_sheet_mapping("Day_Le", "Yesterday").unwrap();
        config.save(&path).unwrap();

        let loaded = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(dir.path().join("absent.toml").as_path())).is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "output_prefix = \"Sales\"\n[api]\nmax_attempts = 5\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.output_prefix, "Sales");
        assert_eq!(config.api.max_attempts, 5);
        assert_eq!(config.api.base_delay_ms, ApiSettings::default().base_delay_ms);
        assert_eq!(config.reports.len(), 3);
        assert_eq!(config.api.resilience().retry.max_attempts, 5);
    }
}
