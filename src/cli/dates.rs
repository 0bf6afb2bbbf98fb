use std::fmt::Display;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, Utc};
use chrono_english::parse_date_string;
use clap::ValueEnum;
use now::DateTimeNow;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

/// Inclusive range used to filter the session log. Open ends stay `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Parses human dates such as "yesterday" or "15/03/2025". With `whole_days` the range is widened
/// to the start of the first day and the end of the last one.
pub fn parse_range(
    from: Option<&str>,
    to: Option<&str>,
    style: DateStyle,
    whole_days: bool,
    now: DateTime<Local>,
) -> Result<DateRange> {
    let parse = |value: &str| {
        parse_date_string(value, now, style.into())
            .map_err(|e| anyhow!("Failed to parse date {value:?}: {e}"))
    };

    let mut start = from.map(&parse).transpose()?;
    let mut end = to.map(&parse).transpose()?;
    if whole_days {
        start = start.map(|v| v.beginning_of_day());
        end = end.map(|v| v.end_of_day());
    }

    Ok(DateRange {
        from: start.map(|v| v.to_utc()),
        to: end.map(|v| v.to_utc()),
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{Local, NaiveDate, TimeZone};

    use super::{parse_range, DateStyle};

    #[test]
    fn test_date_styles() -> Result<()> {
        let now = Local.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        let uk = parse_range(Some("15/03/2025"), None, DateStyle::Uk, true, now)?;
        let us = parse_range(Some("03/15/2025"), None, DateStyle::Us, true, now)?;

        assert_eq!(uk, us);
        assert_eq!(
            uk.from.unwrap().with_timezone(&Local).date_naive(),
            NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
        );
        assert_eq!(uk.to, None);
        Ok(())
    }

    #[test]
    fn test_whole_days_cover_the_day() -> Result<()> {
        let now = Local.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        let range = parse_range(Some("yesterday"), Some("yesterday"), DateStyle::Uk, true, now)?;

        let from = range.from.unwrap().with_timezone(&Local);
        let to = range.to.unwrap().with_timezone(&Local);
        assert_eq!(from.date_naive(), NaiveDate::from_ymd_opt(2025, 3, 31).unwrap());
        assert_eq!(to.date_naive(), from.date_naive());
        assert!(to > from);
        Ok(())
    }

    #[test]
    fn test_bad_date_is_an_error() {
        let now = Local.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        assert!(parse_range(Some("not a date at all"), None, DateStyle::Uk, false, now).is_err());
    }
}
