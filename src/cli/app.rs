use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::{
    config::{AppPaths, TrackerConfig},
    store::{file_store::FileStore, prefs::Preferences},
    timer::TimerEngine,
    tracker::manager::DataManager,
    users::UserManager,
    utils::clock::{Clock, DefaultClock},
};

/// Services used by commands, built once per invocation.
pub struct App {
    pub paths: AppPaths,
    pub config: TrackerConfig,
    pub clock: Arc<dyn Clock>,
    pub prefs: Preferences,
    pub users: UserManager,
    pub data: DataManager<FileStore>,
}

impl App {
    /// `user` overrides the stored current user for this invocation only.
    pub async fn open(paths: AppPaths, user: Option<&str>) -> Result<Self> {
        let config = TrackerConfig::default();
        let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
        let prefs = Preferences::new(paths.preferences());
        let users = UserManager::new(prefs.clone(), clock.clone(), config.max_recent_users);

        let user = match user {
            Some(user) => Some(user.to_string()),
            None => users.current_user().await?,
        };
        debug!("Opening data for {user:?} in {:?}", paths.root);

        let store = FileStore::new(paths.documents())?;
        let data = DataManager::new(store, user.as_deref(), clock.clone(), config.clone());

        Ok(Self {
            paths,
            config,
            clock,
            prefs,
            users,
            data,
        })
    }

    pub async fn timers(&self) -> Result<TimerEngine> {
        TimerEngine::restore(self.prefs.clone(), self.clock.clone()).await
    }
}
