//! Date period rules for report windows
//!
//! A report asks PowerBI for two windows, the current period and the same
//! period one year earlier. Each boundary is a [`DateExpr`] evaluated against
//! "today" in the configured timezone.

use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Starting point of a date expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    Today,
    MonthStart,
    /// Fixed day of the reference year, e.g. June 9
    Fixed { month: u32, day: u32 },
}

/// `anchor`, shifted by whole years, then by days.
///
/// Shifting the year can produce a day the month does not have (Feb 29 in a
/// common year); such dates roll forward into the next month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateExpr {
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub years: i32,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub days: i64,
    pub anchor: Anchor,
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

impl DateExpr {
    pub const fn today() -> Self {
        Self {
            anchor: Anchor::Today,
            years: 0,
            days: 0,
        }
    }

    pub const fn month_start() -> Self {
        Self {
            anchor: Anchor::MonthStart,
            years: 0,
            days: 0,
        }
    }

    pub const fn fixed(month: u32, day: u32) -> Self {
        Self {
            anchor: Anchor::Fixed { month, day },
            years: 0,
            days: 0,
        }
    }

    pub const fn years(mut self, years: i32) -> Self {
        self.years = years;
        self
    }

    pub const fn days(mut self, days: i64) -> Self {
        self.days = days;
        self
    }

    pub fn resolve(&self, today: NaiveDate) -> Result<NaiveDate> {
        let (month, day) = match self.anchor {
            Anchor::Today => (today.month(), today.day()),
            Anchor::MonthStart => (today.month(), 1),
            Anchor::Fixed { month, day } => (month, day),
        };
        let year = today.year() + self.years;

        let base = roll_forward(year, month, day)
            .with_context(|| format!("Date {:04}-{:02}-{:02} is out of range", year, month, day))?;
        base.checked_add_signed(Duration::days(self.days))
            .ok_or_else(|| anyhow!("Date {} shifted by {} days is out of range", base, self.days))
    }

    pub fn validate(&self) -> Result<()> {
        if let Anchor::Fixed { month, day } = self.anchor {
            if !(1..=12).contains(&month) {
                bail!("Fixed date month must be 1-12, got {}", month);
            }
            if !(1..=31).contains(&day) {
                bail!("Fixed date day must be 1-31, got {}", day);
            }
        }
        Ok(())
    }
}

/// Day `day` of `month`, counting past the end of the month if needed
fn roll_forward(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    first.checked_add_signed(Duration::days(i64::from(day) - 1))
}

impl fmt::Display for DateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.anchor {
            Anchor::Today => write!(f, "today")?,
            Anchor::MonthStart => write!(f, "month start")?,
            Anchor::Fixed { month, day } => write!(f, "{:02}/{:02}", day, month)?,
        }
        if self.years != 0 {
            write!(f, " {:+}y", self.years)?;
        }
        if self.days != 0 {
            write!(f, " {:+}d", self.days)?;
        }
        Ok(())
    }
}

/// Start (inclusive) and end (exclusive) of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRule {
    pub start: DateExpr,
    pub end: DateExpr,
}

impl PeriodRule {
    pub const fn new(start: DateExpr, end: DateExpr) -> Self {
        Self { start, end }
    }

    pub fn window(&self, today: NaiveDate) -> Result<DateWindow> {
        Ok(DateWindow {
            start: self.start.resolve(today)?,
            end: self.end.resolve(today)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.start.validate()?;
        self.end.validate()
    }
}

/// Concrete half-open date window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Midnight literals in the form the export API filters on
    pub fn api_literals(&self) -> (String, String) {
        (api_literal(self.start), api_literal(self.end))
    }

    /// "dd/mm/yyyy - dd/mm/yyyy"
    pub fn display(&self) -> String {
        format!(
            "{} - {}",
            self.start.format("%d/%m/%Y"),
            self.end.format("%d/%m/%Y")
        )
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

pub fn api_literal(date: NaiveDate) -> String {
    date.format("%Y-%m-%dT00:00:00").to_string()
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow!("Unknown timezone '{}': {}", name, e))
}

/// Current calendar date in `timezone`
pub fn today_in(timezone: &str) -> Result<NaiveDate> {
    let tz = parse_timezone(timezone)?;
    Ok(Utc::now().with_timezone(&tz).date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_resolve_anchors() {
        let today = date(2025, 6, 22);

        assert_eq!(DateExpr::today().days(-1).resolve(today).unwrap(), date(2025, 6, 21));
        assert_eq!(DateExpr::month_start().resolve(today).unwrap(), date(2025, 6, 1));
        assert_eq!(
            DateExpr::month_start().years(-1).resolve(today).unwrap(),
            date(2024, 6, 1)
        );
        assert_eq!(
            DateExpr::fixed(6, 10).years(-1).resolve(today).unwrap(),
            date(2024, 6, 10)
        );
        assert_eq!(
            DateExpr::today().years(-1).days(1).resolve(today).unwrap(),
            date(2024, 6, 23)
        );
    }

    #[test]
    fn test_leap_day_rolls_forward() {
        let today = date(2024, 2, 29);
        assert_eq!(DateExpr::today().years(-1).resolve(today).unwrap(), date(2023, 3, 1));
        assert_eq!(
            DateExpr::today().years(-1).days(1).resolve(today).unwrap(),
            date(2023, 3, 2)
        );
    }

    #[test]
    fn test_days_cross_month_and_year() {
        let today = date(2025, 1, 1);
        assert_eq!(DateExpr::today().days(-1).resolve(today).unwrap(), date(2024, 12, 31));
        assert_eq!(DateExpr::fixed(2, 30).resolve(today).unwrap(), date(2025, 3, 2));
    }

    #[test]
    fn test_validate_fixed_dates() {
        assert!(DateExpr::fixed(6, 9).validate().is_ok());
        assert!(DateExpr::fixed(13, 1).validate().is_err());
        assert!(DateExpr::fixed(1, 0).validate().is_err());
    }

    #[test]
    fn test_window_formats() {
        let window = PeriodRule::new(DateExpr::today().days(-1), DateExpr::today())
            .window(date(2025, 6, 22))
            .unwrap();

        assert_eq!(
            window.api_literals(),
            ("2025-06-21T00:00:00".to_string(), "2025-06-22T00:00:00".to_string())
        );
        assert_eq!(window.display(), "21/06/2025 - 22/06/2025");
        assert_eq!(window.days(), 1);
    }

    #[test]
    fn test_display_expr() {
        assert_eq!(DateExpr::today().years(-1).days(1).to_string(), "today -1y +1d");
        assert_eq!(DateExpr::fixed(6, 9).to_string(), "09/06");
    }

    #[test]
    fn test_timezone() {
        assert!(today_in("Asia/Ho_Chi_Minh").is_ok());
        assert!(today_in("Mars/Olympus").is_err());
    }

    #[test]
    fn test_toml_shape() {
        let rule = PeriodRule::new(DateExpr::fixed(6, 10).years(-1), DateExpr::today());
        let text = toml::to_string(&rule).unwrap();
        let back: PeriodRule = toml::from_str(&text).unwrap();
        assert_eq!(back, rule);

        let parsed: DateExpr = toml::from_str(r#"anchor = "month_start""#).unwrap();
        assert_eq!(parsed, DateExpr::month_start());
    }
}
