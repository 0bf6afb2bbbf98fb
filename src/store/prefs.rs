use std::path::PathBuf;

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::fs::operations::{read_locked, write_locked};

pub const ACTIVE_TIMERS_KEY: &str = "active-timers";
pub const CURRENT_USER_KEY: &str = "current-user";
pub const RECENT_USERS_KEY: &str = "recent-users";
pub const USERS_KEY: &str = "activity-tracker-users";
pub const THEME_KEY: &str = "theme";

/// Small key-value entries kept next to the documents: running timers, who is logged in,
/// recently used names and the theme. Everything lives in one JSON object.
#[derive(Debug, Clone)]
pub struct Preferences {
    path: PathBuf,
}

impl Preferences {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_all(&self) -> Result<Map<String, Value>> {
        let Some(content) = read_locked(&self.path).await? else {
            return Ok(Map::new());
        };
        match serde_json::from_slice::<Map<String, Value>>(&content) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!("Preferences in {:?} are corrupted, starting over: {e}", self.path);
                Ok(Map::new())
            }
        }
    }

    /// Returns `None` for missing entries and for entries that don't parse as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut all = self.read_all().await?;
        let Some(value) = all.remove(key) else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!("Preference {key} has unexpected shape, ignoring it: {e}");
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let mut all = self.read_all().await?;
        all.insert(key.into(), serde_json::to_value(value)?);
        self.write_all(&all).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut all = self.read_all().await?;
        if all.remove(key).is_some() {
            self.write_all(&all).await?;
        }
        Ok(())
    }

    async fn write_all(&self, all: &Map<String, Value>) -> Result<()> {
        write_locked(&self.path, &serde_json::to_vec_pretty(all)?).await
    }
}
