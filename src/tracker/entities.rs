use std::{fmt::Display, str::FromStr};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ACTIVITY_COLOR: &str = "hsl(200, 50%, 50%)";

/// One of the three rolling aggregation windows of an activity.
///
/// Stored documents keep the historical keys `daily`, `weekly` and `monthly`, but the buckets
/// actually roll over on new day, new month and new year. The enum carries the honest names; the
/// legacy ones are still accepted when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Month,
    Year,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Day, Period::Month, Period::Year];
}

impl Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Day => write!(f, "day"),
            Period::Month => write!(f, "month"),
            Period::Year => write!(f, "year"),
        }
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" | "daily" => Ok(Period::Day),
            "month" | "weekly" => Ok(Period::Month),
            "year" | "monthly" => Ok(Period::Year),
            other => Err(anyhow!("Unknown period {other}, expected day, month or year")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated hours for one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeframeStats {
    pub current: f64,
    pub previous: f64,
    #[serde(default)]
    pub notes: Vec<Note>,
    /// Single free-text note written by older versions. Folded into `notes` on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TimeframeStats {
    /// Moves `current` into `previous` and starts the bucket from zero.
    pub fn roll(&mut self) {
        self.previous = self.current;
        self.current = 0.;
    }

    /// Converts the legacy `note` field into a dated entry. Returns whether anything changed, a
    /// second call is always a no-op.
    pub fn migrate_legacy_note(&mut self, at: DateTime<Utc>) -> bool {
        let Some(text) = self.note.take() else {
            return false;
        };
        if !text.trim().is_empty() {
            self.notes.push(Note { text, timestamp: at });
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeframes {
    #[serde(rename = "daily")]
    pub day: TimeframeStats,
    #[serde(rename = "weekly")]
    pub month: TimeframeStats,
    #[serde(rename = "monthly")]
    pub year: TimeframeStats,
}

impl Timeframes {
    pub fn get(&self, period: Period) -> &TimeframeStats {
        match period {
            Period::Day => &self.day,
            Period::Month => &self.month,
            Period::Year => &self.year,
        }
    }

    pub fn get_mut(&mut self, period: Period) -> &mut TimeframeStats {
        match period {
            Period::Day => &mut self.day,
            Period::Month => &mut self.month,
            Period::Year => &mut self.year,
        }
    }
}

/// A named category of tracked time. Titles are unique within a user's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub title: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub timeframes: Timeframes,
}

fn default_color() -> String {
    DEFAULT_ACTIVITY_COLOR.into()
}

impl Activity {
    pub fn new(title: impl Into<String>, color: Option<String>) -> Self {
        Self {
            title: title.into(),
            color: color.unwrap_or_else(default_color),
            timeframes: Timeframes::default(),
        }
    }

    pub fn has_title(&self, title: &str) -> bool {
        self.title.to_lowercase() == title.to_lowercase()
    }

    /// Returns whether any legacy note was converted.
    pub fn migrate_notes(&mut self, at: DateTime<Utc>) -> bool {
        Period::ALL
            .into_iter()
            .map(|period| self.timeframes.get_mut(period).migrate_legacy_note(at))
            .fold(false, |changed, v| changed | v)
    }
}

/// An immutable log entry recording one instance of time logged against an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub activity: String,
    pub hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Everything stored for one user under one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    pub activities: Vec<Activity>,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl UserDocument {
    pub fn new(activities: Vec<Activity>, last_update: DateTime<Utc>) -> Self {
        Self {
            activities,
            last_update,
            sessions: vec![],
        }
    }

    pub fn find(&self, title: &str) -> Option<&Activity> {
        self.activities.iter().find(|v| v.title == title)
    }

    pub fn find_mut(&mut self, title: &str) -> Option<&mut Activity> {
        self.activities.iter_mut().find(|v| v.title == title)
    }

    pub fn contains_title(&self, title: &str) -> bool {
        self.activities.iter().any(|v| v.has_title(title))
    }

    /// Returns whether any activity had legacy notes to convert.
    pub fn migrate_notes(&mut self, at: DateTime<Utc>) -> bool {
        self.activities
            .iter_mut()
            .map(|v| v.migrate_notes(at))
            .fold(false, |changed, v| changed | v)
    }
}
