use std::{fmt::Display, str::FromStr, sync::Arc};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    store::prefs::{Preferences, CURRENT_USER_KEY, RECENT_USERS_KEY, THEME_KEY, USERS_KEY},
    tracker::error::{TrackerError, TrackerResult},
    utils::clock::Clock,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
        }
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(anyhow!("Unknown theme {other}")),
        }
    }
}

/// Known user names, who is currently selected and the other per-device preferences. User names
/// only pick which document is loaded; they are not an access control mechanism.
pub struct UserManager {
    prefs: Preferences,
    clock: Arc<dyn Clock>,
    max_recent: usize,
}

impl UserManager {
    pub fn new(prefs: Preferences, clock: Arc<dyn Clock>, max_recent: usize) -> Self {
        Self {
            prefs,
            clock,
            max_recent,
        }
    }

    pub async fn users(&self) -> Result<Vec<User>> {
        Ok(self.prefs.get(USERS_KEY).await?.unwrap_or_default())
    }

    pub async fn user_exists(&self, name: &str) -> Result<bool> {
        let name = name.trim().to_lowercase();
        Ok(self
            .users()
            .await?
            .iter()
            .any(|v| v.name.to_lowercase() == name))
    }

    /// Registers a new name. Names are trimmed and compared case-insensitively.
    pub async fn create_user(&self, name: &str) -> TrackerResult<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrackerError::EmptyUserName);
        }
        if self.user_exists(name).await? {
            return Err(TrackerError::UserExists(name.into()));
        }

        let now = self.clock.time();
        let user = User {
            id: now.timestamp_millis().to_string(),
            name: name.into(),
            created_at: now,
        };
        let mut users = self.users().await?;
        users.push(user.clone());
        self.prefs.set(USERS_KEY, &users).await?;
        info!("Created user {name}");
        Ok(user)
    }

    /// Forgets the name. The user's activity document is kept so nothing is lost by accident.
    pub async fn delete_user(&self, name: &str) -> Result<bool> {
        let mut users = self.users().await?;
        let before = users.len();
        users.retain(|v| v.name != name);
        if users.len() == before {
            return Ok(false);
        }
        self.prefs.set(USERS_KEY, &users).await?;

        let mut recent = self.recent_users().await?;
        recent.retain(|v| v != name);
        self.prefs.set(RECENT_USERS_KEY, &recent).await?;
        if self.current_user().await?.as_deref() == Some(name) {
            self.prefs.remove(CURRENT_USER_KEY).await?;
        }
        info!("Deleted user {name}");
        Ok(true)
    }

    pub async fn current_user(&self) -> Result<Option<String>> {
        self.prefs.get(CURRENT_USER_KEY).await
    }

    /// Most recently used first.
    pub async fn recent_users(&self) -> Result<Vec<String>> {
        Ok(self.prefs.get(RECENT_USERS_KEY).await?.unwrap_or_default())
    }

    /// Selects `name` as the current user and moves it to the front of the recent list.
    pub async fn switch_user(&self, name: &str) -> Result<()> {
        let name = name.trim();
        let mut recent = self.recent_users().await?;
        recent.retain(|v| v != name);
        recent.insert(0, name.into());
        recent.truncate(self.max_recent);

        self.prefs.set(RECENT_USERS_KEY, &recent).await?;
        self.prefs.set(CURRENT_USER_KEY, name).await?;
        info!("Switched to user {name}");
        Ok(())
    }

    pub async fn theme(&self) -> Result<Theme> {
        Ok(self.prefs.get(THEME_KEY).await?.unwrap_or_default())
    }

    pub async fn set_theme(&self, theme: Theme) -> Result<()> {
        self.prefs.set(THEME_KEY, &theme).await
    }
}
