use std::{path::PathBuf, time::Duration};

/// How long a loaded document is trusted before the backend is asked again.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Refresh rate of the live stopwatch display.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Ticks between re-reads of persisted timers while watching them.
pub const DEFAULT_TIMER_RELOAD_TICKS: u32 = 10;

pub const DEFAULT_RECENT_USERS: usize = 5;

/// Runtime knobs shared by the data manager, timer ticker and user manager.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub cache_ttl: Duration,
    pub tick_interval: Duration,
    pub timer_reload_ticks: u32,
    pub max_recent_users: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            tick_interval: DEFAULT_TICK_INTERVAL,
            timer_reload_ticks: DEFAULT_TIMER_RELOAD_TICKS,
            max_recent_users: DEFAULT_RECENT_USERS,
        }
    }
}

/// Layout of the application directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
}

impl AppPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn documents(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn preferences(&self) -> PathBuf {
        self.root.join("prefs.json")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }
}
