//! Per-activity stopwatches.
//!
//! A timer is either absent, running or paused. Running timers only store when they started, so
//! the elapsed time keeps growing correctly across restarts of the application. Paused timers
//! freeze the elapsed time in `paused_time`; resuming moves the start back by that amount.
//!
//! The whole timer map is written to the preferences store after every change.

pub mod ticker;

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    store::prefs::{Preferences, ACTIVE_TIMERS_KEY},
    utils::{clock::Clock, time::millis_to_hours},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    /// Elapsed milliseconds at the moment of pausing.
    #[serde(default)]
    pub paused_time: i64,
    #[serde(default)]
    pub is_paused: bool,
}

impl TimerState {
    /// Start time that makes a timer resumed at `now` show its frozen elapsed time. `None` when
    /// `paused_time` can't be a real duration.
    fn resumed_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.paused_time < 0 {
            return None;
        }
        now.checked_sub_signed(TimeDelta::try_milliseconds(self.paused_time)?)
    }

    /// False for paused timers whose frozen time can't be resumed.
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_paused || self.resumed_start(now).is_some()
    }

    fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        if self.is_paused {
            self.paused_time
        } else {
            (now - self.start_time).num_milliseconds().max(0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    Absent,
    Running,
    Paused,
}

/// Result of stopping a timer. Logging the time is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppedTimer {
    pub elapsed_ms: i64,
    pub hours: f64,
}

/// Snapshot of one timer for displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerReading {
    pub title: String,
    pub elapsed_ms: i64,
    pub paused: bool,
}

pub struct TimerEngine {
    timers: BTreeMap<String, TimerState>,
    prefs: Preferences,
    clock: Arc<dyn Clock>,
}

impl TimerEngine {
    /// Rebuilds timers saved by a previous run. Unreadable state counts as no timers.
    pub async fn restore(prefs: Preferences, clock: Arc<dyn Clock>) -> Result<Self> {
        let timers = load_timers(&prefs, clock.time()).await?;
        debug!("Restored {} timers", timers.len());
        Ok(Self {
            timers,
            prefs,
            clock,
        })
    }

    /// Replaces the in-memory timers with the persisted ones, picking up changes made by other
    /// processes.
    pub async fn reload(&mut self) -> Result<()> {
        self.timers = load_timers(&self.prefs, self.clock.time()).await?;
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        self.prefs.set(ACTIVE_TIMERS_KEY, &self.timers).await
    }

    pub fn status(&self, title: &str) -> TimerStatus {
        match self.timers.get(title) {
            None => TimerStatus::Absent,
            Some(timer) if timer.is_paused => TimerStatus::Paused,
            Some(_) => TimerStatus::Running,
        }
    }

    pub fn is_active(&self, title: &str) -> bool {
        self.timers.contains_key(title)
    }

    pub fn is_paused(&self, title: &str) -> bool {
        self.status(title) == TimerStatus::Paused
    }

    pub fn active_timers(&self) -> Vec<String> {
        self.timers.keys().cloned().collect()
    }

    /// Starts a new timer or resumes a paused one. A running timer is left as is.
    pub async fn start(&mut self, title: &str) -> Result<TimerStatus> {
        let now = self.clock.time();
        match self.timers.get_mut(title) {
            Some(timer) if timer.is_paused => match timer.resumed_start(now) {
                Some(start_time) => {
                    timer.start_time = start_time;
                    timer.is_paused = false;
                    info!("Resumed timer for {title}");
                }
                None => {
                    warn!("Paused timer for {title} is broken, starting over");
                    *timer = TimerState {
                        start_time: now,
                        paused_time: 0,
                        is_paused: false,
                    };
                }
            },
            Some(_) => debug!("Timer for {title} is already running"),
            None => {
                self.timers.insert(
                    title.into(),
                    TimerState {
                        start_time: now,
                        paused_time: 0,
                        is_paused: false,
                    },
                );
                info!("Started timer for {title}");
            }
        }
        self.persist().await?;
        Ok(TimerStatus::Running)
    }

    /// Pauses a running timer. Returns `false` when there was nothing running to pause.
    pub async fn pause(&mut self, title: &str) -> Result<bool> {
        let now = self.clock.time();
        let Some(timer) = self.timers.get_mut(title).filter(|v| !v.is_paused) else {
            return Ok(false);
        };
        timer.paused_time = timer.elapsed_ms(now);
        timer.is_paused = true;
        info!("Paused timer for {title} at {}ms", timer.paused_time);
        self.persist().await?;
        Ok(true)
    }

    /// Removes the timer and reports how long it ran. `None` when there was no timer.
    pub async fn stop(&mut self, title: &str) -> Result<Option<StoppedTimer>> {
        let now = self.clock.time();
        let Some(timer) = self.timers.remove(title) else {
            return Ok(None);
        };
        let elapsed_ms = timer.elapsed_ms(now);
        self.persist().await?;
        info!("Stopped timer for {title} after {elapsed_ms}ms");
        Ok(Some(StoppedTimer {
            elapsed_ms,
            hours: millis_to_hours(elapsed_ms),
        }))
    }

    /// Live elapsed time for running timers, the frozen one for paused timers, 0 otherwise.
    pub fn elapsed(&self, title: &str) -> i64 {
        self.timers
            .get(title)
            .map_or(0, |timer| timer.elapsed_ms(self.clock.time()))
    }

    pub fn readings(&self) -> Vec<TimerReading> {
        let now = self.clock.time();
        self.timers
            .iter()
            .map(|(title, timer)| TimerReading {
                title: title.clone(),
                elapsed_ms: timer.elapsed_ms(now),
                paused: timer.is_paused,
            })
            .collect()
    }
}

async fn load_timers(
    prefs: &Preferences,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, TimerState>> {
    let mut timers = prefs
        .get::<BTreeMap<String, TimerState>>(ACTIVE_TIMERS_KEY)
        .await?
        .unwrap_or_default();
    timers.retain(|title, timer| {
        let valid = timer.is_valid(now);
        if !valid {
            warn!("Dropping broken timer for {title}: {timer:?}");
        }
        valid
    });
    Ok(timers)
}

/// Formats milliseconds as `HH:MM:SS.CC`. Hours keep growing past 99.
pub fn format_time(ms: i64) -> String {
    let ms = ms.max(0);
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let centiseconds = (ms % 1000) / 10;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{centiseconds:02}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    use crate::{
        store::prefs::{Preferences, ACTIVE_TIMERS_KEY},
        utils::clock::test_clock::ManualClock,
    };

    use super::{format_time, TimerEngine, TimerStatus};

    async fn engine(clock: &ManualClock) -> Result<(TimerEngine, TempDir)> {
        let dir = tempdir()?;
        let prefs = Preferences::new(dir.path().join("prefs.json"));
        let engine = TimerEngine::restore(prefs, Arc::new(clock.clone())).await?;
        Ok((engine, dir))
    }

    #[tokio::test]
    async fn test_pause_resume_stop() -> Result<()> {
        let clock = ManualClock::at(2024, 5, 1, 9);
        let (mut engine, _dir) = engine(&clock).await?;

        engine.start("Work").await?;
        clock.advance_ms(5000);
        assert!(engine.pause("Work").await?);
        assert_eq!(engine.elapsed("Work"), 5000);

        clock.advance_ms(4000);
        assert_eq!(engine.elapsed("Work"), 5000);
        engine.start("Work").await?;
        assert_eq!(engine.status("Work"), TimerStatus::Running);

        clock.advance_ms(3000);
        let stopped = engine.stop("Work").await?.unwrap();
        assert_eq!(stopped.elapsed_ms, 8000);
        assert!((stopped.hours - 0.002_22).abs() < 1e-5);
        assert_eq!(engine.status("Work"), TimerStatus::Absent);
        Ok(())
    }

    #[tokio::test]
    async fn test_absent_and_repeated_operations() -> Result<()> {
        let clock = ManualClock::at(2024, 5, 1, 9);
        let (mut engine, _dir) = engine(&clock).await?;

        assert_eq!(engine.elapsed("Work"), 0);
        assert!(!engine.pause("Work").await?);
        assert_eq!(engine.stop("Work").await?, None);

        engine.start("Work").await?;
        clock.advance_ms(1000);
        engine.start("Work").await?;
        assert_eq!(engine.elapsed("Work"), 1000);

        assert!(engine.pause("Work").await?);
        clock.advance_ms(1000);
        assert!(!engine.pause("Work").await?);
        assert_eq!(engine.elapsed("Work"), 1000);
        assert!(engine.is_paused("Work"));
        assert_eq!(engine.active_timers(), vec!["Work".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_timers_survive_restart() -> Result<()> {
        let clock = ManualClock::at(2024, 5, 1, 9);
        let dir = tempdir()?;
        let prefs = Preferences::new(dir.path().join("prefs.json"));

        {
            let mut engine = TimerEngine::restore(prefs.clone(), Arc::new(clock.clone())).await?;
            engine.start("Work").await?;
            engine.start("Play").await?;
            clock.advance_ms(2000);
            engine.pause("Play").await?;
        }

        clock.advance_ms(10_000);
        let engine = TimerEngine::restore(prefs, Arc::new(clock.clone())).await?;
        assert_eq!(engine.status("Work"), TimerStatus::Running);
        assert_eq!(engine.elapsed("Work"), 12_000);
        assert_eq!(engine.status("Play"), TimerStatus::Paused);
        assert_eq!(engine.elapsed("Play"), 2000);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_timer_state_is_ignored() -> Result<()> {
        let clock = ManualClock::at(2024, 5, 1, 9);
        let dir = tempdir()?;
        let prefs = Preferences::new(dir.path().join("prefs.json"));
        prefs.set(ACTIVE_TIMERS_KEY, "garbage").await?;

        let engine = TimerEngine::restore(prefs, Arc::new(clock)).await?;
        assert!(engine.active_timers().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_range_paused_timer_is_dropped() -> Result<()> {
        let clock = ManualClock::at(2024, 5, 1, 9);
        let dir = tempdir()?;
        let prefs = Preferences::new(dir.path().join("prefs.json"));
        let paused = |paused_time: i64| {
            json!({"startTime": 0, "pausedTime": paused_time, "isPaused": true})
        };
        let timers = json!({
            "Work": paused(9_000_000_000_000_000_000),
            "Play": paused(-5),
            "Read": paused(1500),
        });
        prefs.set(ACTIVE_TIMERS_KEY, &timers).await?;

        let mut engine = TimerEngine::restore(prefs, Arc::new(clock.clone())).await?;
        assert_eq!(engine.active_timers(), vec!["Read".to_string()]);

        engine.start("Work").await?;
        clock.advance_ms(250);
        assert_eq!(engine.elapsed("Work"), 250);
        engine.start("Read").await?;
        assert_eq!(engine.elapsed("Read"), 1500);
        Ok(())
    }

    #[tokio::test]
    async fn test_non_utf8_timer_state_is_ignored() -> Result<()> {
        let clock = ManualClock::at(2024, 5, 1, 9);
        let dir = tempdir()?;
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, [0xff, 0xfe, b'{', b'}'])?;

        let engine = TimerEngine::restore(Preferences::new(path), Arc::new(clock)).await?;
        assert!(engine.active_timers().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_reload_sees_other_engines() -> Result<()> {
        let clock = ManualClock::at(2024, 5, 1, 9);
        let (mut engine, dir) = engine(&clock).await?;
        engine.start("Work").await?;

        let prefs = Preferences::new(dir.path().join("prefs.json"));
        let mut other = TimerEngine::restore(prefs, Arc::new(clock.clone())).await?;
        other.stop("Work").await?;

        assert!(engine.is_active("Work"));
        engine.reload().await?;
        assert!(!engine.is_active("Work"));
        Ok(())
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "00:00:00.00");
        assert_eq!(format_time(8000), "00:00:08.00");
        assert_eq!(format_time(3_723_456), "01:02:03.45");
        assert_eq!(format_time(-5), "00:00:00.00");
        assert_eq!(format_time(100 * 3_600_000), "100:00:00.00");
    }
}
