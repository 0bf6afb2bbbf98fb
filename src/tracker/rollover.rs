//! Calendar rollover of the day/month/year buckets.
//!
//! Rollover is evaluated against the document's `last_update` whenever data is fetched. Every
//! boundary crossed since then fires in the same pass, so a collection untouched for a year rolls
//! all three buckets at once. Dates are compared in the caller's timezone; the data manager uses
//! the local one, tests use UTC.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use tracing::debug;

use super::entities::{Period, UserDocument};

/// Which calendar boundaries lie between two points in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Boundaries {
    pub day: bool,
    pub month: bool,
    pub year: bool,
}

impl Boundaries {
    pub fn any(&self) -> bool {
        self.day || self.month || self.year
    }

    pub fn crossed(&self, period: Period) -> bool {
        match period {
            Period::Day => self.day,
            Period::Month => self.month,
            Period::Year => self.year,
        }
    }
}

/// Finds boundaries crossed going from `last` to `now`. A clock that went backwards crosses
/// nothing.
pub fn crossed_boundaries<Tz: TimeZone>(
    last: DateTime<Utc>,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Boundaries {
    let last = last.with_timezone(tz).date_naive();
    let now = now.with_timezone(tz).date_naive();

    Boundaries {
        day: now > last,
        month: (now.year(), now.month()) > (last.year(), last.month()),
        year: now.year() > last.year(),
    }
}

/// Rolls every bucket whose boundary was crossed and moves `last_update` to `now` when anything
/// fired. Applying it again with the same `now` changes nothing.
pub fn apply_rollover<Tz: TimeZone>(
    document: &mut UserDocument,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Boundaries {
    let boundaries = crossed_boundaries(document.last_update, now, tz);
    if !boundaries.any() {
        return boundaries;
    }

    debug!(
        "Rolling over {:?} since {} for {} activities",
        boundaries,
        document.last_update,
        document.activities.len()
    );

    for activity in document.activities.iter_mut() {
        for period in Period::ALL {
            if boundaries.crossed(period) {
                activity.timeframes.get_mut(period).roll();
            }
        }
    }
    document.last_update = now;
    boundaries
}
