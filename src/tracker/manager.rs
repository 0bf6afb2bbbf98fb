use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use anyhow::anyhow;
use chrono::{DateTime, Local, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::TrackerConfig,
    store::{document_key, DocumentChange, DocumentStore},
    utils::clock::Clock,
};

use super::{
    cache::CacheEntry,
    entities::{Activity, Note, Period, Session, UserDocument},
    error::{TrackerError, TrackerResult},
    rollover::apply_rollover,
    seed::default_activities,
    subscription::{Subscribers, Subscription},
};

/// Narrows [DataManager::time_sessions]. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub activity: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl SessionFilter {
    fn matches(&self, session: &Session) -> bool {
        self.activity
            .as_ref()
            .map_or(true, |v| *v == session.activity)
            && self.from.map_or(true, |from| session.timestamp >= from)
            && self.to.map_or(true, |to| session.timestamp <= to)
    }
}

/// Held while a write is in flight. Dropping it lets the next write through.
struct WriteGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Owns the canonical activity collection of the current user.
///
/// Reads go through a short lived cache and apply notes migration and calendar rollover before
/// anything is returned; when either changed the document, the result is written back. Every
/// mutation reads the latest document, applies the change to a copy and only replaces the cache
/// once the backend accepted the write, so a failed write leaves nothing half applied. Only one
/// write may be in flight at a time: a second one is refused with
/// [TrackerError::SyncInProgress] rather than queued.
pub struct DataManager<S> {
    store: S,
    key: Mutex<String>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    cache: Mutex<Option<CacheEntry<UserDocument>>>,
    saving: AtomicBool,
    subscribers: Subscribers,
}

impl<S: DocumentStore> DataManager<S> {
    pub fn new(
        store: S,
        user: Option<&str>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            key: Mutex::new(document_key(user)),
            clock,
            config,
            cache: Mutex::new(None),
            saving: AtomicBool::new(false),
            subscribers: Subscribers::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key(&self) -> String {
        self.key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switches to another user's document. The cache belongs to the previous user and is
    /// dropped.
    pub fn set_user(&self, user: Option<&str>) {
        let key = document_key(user);
        info!("Switching data to {key}");
        *self.key.lock().unwrap_or_else(PoisonError::into_inner) = key;
        self.invalidate();
    }

    /// Forces the next read to go to the backend.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn subscribe(&self, handler: impl Fn(&[Activity]) + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(handler)
    }

    fn cached(&self) -> Option<CacheEntry<UserDocument>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_cache(&self, document: UserDocument, fetched_at: DateTime<Utc>) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(CacheEntry::new(document, fetched_at));
    }

    fn begin_write(&self) -> TrackerResult<WriteGuard<'_>> {
        self.saving
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| {
                warn!("Rejected write, another one is in progress");
                TrackerError::SyncInProgress
            })?;
        Ok(WriteGuard { flag: &self.saving })
    }

    /// Latest document with migration and rollover applied, plus whether those changed it and
    /// it should be written back. Never fails: an unreachable backend falls back to the cache,
    /// then to the default seed.
    async fn current_document(&self) -> (UserDocument, bool) {
        let now = self.clock.time();
        let key = self.key();
        let cached = self.cached();

        let (mut document, mut dirty) = match cached {
            Some(entry) if !entry.is_stale(now, self.config.cache_ttl) => (entry.value, false),
            cached => match self.store.load(&key).await {
                Ok(Some(document)) => {
                    self.set_cache(document.clone(), now);
                    (document, false)
                }
                Ok(None) => {
                    info!("Nothing stored under {key}, seeding default activities");
                    (UserDocument::new(default_activities(), now), true)
                }
                Err(e) => {
                    warn!("Failed to load {key}, using fallback data: {e:?}");
                    match cached {
                        Some(entry) => (entry.value, false),
                        None => (UserDocument::new(default_activities(), now), false),
                    }
                }
            },
        };

        if document.migrate_notes(now) {
            debug!("Migrated legacy notes in {key}");
            dirty = true;
        }
        if apply_rollover(&mut document, now, &Local).any() {
            dirty = true;
        }
        (document, dirty)
    }

    /// Persists `document` as the new state. The cache and subscribers only see it once the
    /// backend accepted it.
    async fn write(&self, _guard: &WriteGuard<'_>, mut document: UserDocument) -> TrackerResult<()> {
        let now = self.clock.time();
        let key = self.key();
        document.last_update = now;

        self.store
            .save(&key, &document)
            .await
            .inspect_err(|e| error!("Failed to save {key}: {e:?}"))?;

        debug!("Saved {} activities into {key}", document.activities.len());
        self.set_cache(document.clone(), now);
        self.subscribers.notify(&document.activities);
        Ok(())
    }

    /// Applies `change` to the latest document and persists it. `Ok(None)` from `change` means
    /// there is nothing to write; pending rollover is still persisted in that case.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut UserDocument, DateTime<Utc>) -> TrackerResult<Option<T>>,
    ) -> TrackerResult<Option<T>> {
        let guard = self.begin_write()?;
        let (mut document, dirty) = self.current_document().await;

        let result = change(&mut document, self.clock.time())?;
        if result.is_some() || dirty {
            self.write(&guard, document).await?;
        }
        Ok(result)
    }

    /// Current snapshot of the activities.
    #[instrument(skip(self))]
    pub async fn get_data(&self) -> Vec<Activity> {
        self.get_document().await.activities
    }

    async fn get_document(&self) -> UserDocument {
        let (document, dirty) = self.current_document().await;
        if dirty {
            match self.begin_write() {
                Ok(guard) => {
                    if let Err(e) = self.write(&guard, document.clone()).await {
                        warn!("Couldn't write back refreshed data: {e}");
                    }
                }
                Err(_) => debug!("Skipping write back, a save is in progress"),
            }
        }
        document
    }

    /// Replaces the whole collection. Saving the same collection twice leaves the same state.
    #[instrument(skip(self, activities))]
    pub async fn save(&self, activities: Vec<Activity>) -> TrackerResult<()> {
        validate_unique(&activities)?;
        self.mutate(|document, _| {
            document.activities = activities;
            Ok(Some(()))
        })
        .await?;
        Ok(())
    }

    /// Adds hours to a bucket. Returns `false` when there is no activity called `title`.
    #[instrument(skip(self))]
    pub async fn add_hours_to_activity(
        &self,
        title: &str,
        period: Period,
        hours: f64,
    ) -> TrackerResult<bool> {
        validate_hours(hours)?;
        let updated = self
            .mutate(|document, _| {
                Ok(document.find_mut(title).map(|activity| {
                    activity.timeframes.get_mut(period).current += hours;
                }))
            })
            .await?;
        if updated.is_some() {
            info!("Added {hours}h to {title} ({period})");
        }
        Ok(updated.is_some())
    }

    /// Same as [Self::add_hours_to_activity] but also keeps a dated note on the bucket.
    #[instrument(skip(self, note))]
    pub async fn add_hours_with_note(
        &self,
        title: &str,
        period: Period,
        hours: f64,
        note: &str,
    ) -> TrackerResult<bool> {
        validate_hours(hours)?;
        let note = note.trim();
        let updated = self
            .mutate(|document, now| {
                Ok(document.find_mut(title).map(|activity| {
                    let stats = activity.timeframes.get_mut(period);
                    stats.current += hours;
                    if !note.is_empty() {
                        stats.notes.push(Note {
                            text: note.into(),
                            timestamp: now,
                        });
                    }
                }))
            })
            .await?;
        Ok(updated.is_some())
    }

    /// Overwrites both values of a bucket. Returns `false` when there is no activity called
    /// `title`.
    #[instrument(skip(self))]
    pub async fn update_activity_hours(
        &self,
        title: &str,
        period: Period,
        current: f64,
        previous: f64,
    ) -> TrackerResult<bool> {
        validate_hours(current)?;
        validate_hours(previous)?;
        let updated = self
            .mutate(|document, _| {
                Ok(document.find_mut(title).map(|activity| {
                    let stats = activity.timeframes.get_mut(period);
                    stats.current = current;
                    stats.previous = previous;
                }))
            })
            .await?;
        Ok(updated.is_some())
    }

    /// Creates an empty activity. Titles are compared case-insensitively.
    #[instrument(skip(self))]
    pub async fn create_activity(
        &self,
        title: &str,
        color: Option<String>,
    ) -> TrackerResult<Activity> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TrackerError::EmptyTitle);
        }
        self.add_activity(Activity::new(title, color)).await
    }

    /// Appends a complete activity, keeping its hours and notes.
    pub async fn add_activity(&self, activity: Activity) -> TrackerResult<Activity> {
        let created = activity.clone();
        self.mutate(|document, _| {
            if document.contains_title(&activity.title) {
                return Err(TrackerError::DuplicateActivity(activity.title));
            }
            document.activities.push(activity);
            Ok(Some(()))
        })
        .await?;
        info!("Created activity {}", created.title);
        Ok(created)
    }

    /// Removes every activity called `title`. Returns `false` and writes nothing when none
    /// matched.
    #[instrument(skip(self))]
    pub async fn delete_activity(&self, title: &str) -> TrackerResult<bool> {
        let removed = self
            .mutate(|document, _| {
                let before = document.activities.len();
                document.activities.retain(|v| v.title != title);
                Ok((document.activities.len() < before).then_some(()))
            })
            .await?;
        if removed.is_some() {
            info!("Deleted activity {title}");
        }
        Ok(removed.is_some())
    }

    /// Appends an entry to the session log. Aggregated hours are left alone; callers that want
    /// both also call [Self::add_hours_to_activity].
    #[instrument(skip(self, note))]
    pub async fn log_time_session(
        &self,
        activity: &str,
        hours: f64,
        note: Option<String>,
    ) -> TrackerResult<Session> {
        validate_hours(hours)?;
        let session = self
            .mutate(|document, now| Ok(Some(push_session(document, now, activity, hours, note))))
            .await?;
        session.ok_or_else(|| anyhow!("Session for {activity} was not recorded").into())
    }

    /// Adds hours to a bucket, keeps a non-empty note on it and logs the session, all in one
    /// write. Either everything is stored or nothing is. `None` when there is no activity called
    /// `title`.
    #[instrument(skip(self, note))]
    pub async fn record_hours(
        &self,
        title: &str,
        period: Period,
        hours: f64,
        note: Option<String>,
    ) -> TrackerResult<Option<Session>> {
        validate_hours(hours)?;
        let note = note.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let session = self
            .mutate(|document, now| {
                let Some(activity) = document.find_mut(title) else {
                    return Ok(None);
                };
                let stats = activity.timeframes.get_mut(period);
                stats.current += hours;
                if let Some(text) = &note {
                    stats.notes.push(Note {
                        text: text.clone(),
                        timestamp: now,
                    });
                }
                Ok(Some(push_session(document, now, title, hours, note)))
            })
            .await?;
        if session.is_some() {
            info!("Recorded {hours}h for {title} ({period})");
        }
        Ok(session)
    }

    /// Logged sessions in the order they were recorded.
    pub async fn time_sessions(&self, filter: &SessionFilter) -> Vec<Session> {
        self.get_document()
            .await
            .sessions
            .into_iter()
            .filter(|v| filter.matches(v))
            .collect()
    }

    /// Replaces the collection with imported activities. Sessions are kept.
    #[instrument(skip(self, activities))]
    pub async fn import(&self, activities: Vec<Activity>) -> TrackerResult<()> {
        info!("Importing {} activities", activities.len());
        self.save(activities).await
    }

    /// Puts the default activities back. Sessions are kept.
    #[instrument(skip(self))]
    pub async fn reset_data(&self) -> TrackerResult<Vec<Activity>> {
        let activities = default_activities();
        self.save(activities.clone()).await?;
        Ok(activities)
    }

    fn apply_remote(&self, change: DocumentChange) {
        if change.key != self.key() {
            return;
        }
        if self
            .cached()
            .is_some_and(|entry| entry.value == change.document)
        {
            // Our own write coming back.
            return;
        }
        debug!("Received remote change for {}", change.key);
        self.set_cache(change.document.clone(), self.clock.time());
        self.subscribers.notify(&change.document.activities);
    }

    /// Follows backend change notifications for the current user until `shutdown` fires. Changes
    /// made elsewhere replace the cache and are pushed to subscribers.
    ///
    /// The subscription is taken when this is called, so nothing written after the call is
    /// missed even if the returned future is polled later.
    pub fn listen(
        &self,
        shutdown: CancellationToken,
    ) -> impl Future<Output = anyhow::Result<()>> + '_ {
        let mut changes = self.store.subscribe();
        async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        return Ok(())
                    }
                    change = changes.recv() => match change {
                        Ok(change) => self.apply_remote(change),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Missed {skipped} remote changes, dropping cache");
                            self.invalidate();
                        }
                        Err(RecvError::Closed) => {
                            debug!("Change channel closed");
                            return Ok(())
                        }
                    }
                }
            }
        }
    }
}

/// Ids are millisecond timestamps, bumped past the last id so they stay unique and ordered.
fn push_session(
    document: &mut UserDocument,
    now: DateTime<Utc>,
    activity: &str,
    hours: f64,
    note: Option<String>,
) -> Session {
    let last_id = document.sessions.last().map_or(i64::MIN, |v| v.id);
    let session = Session {
        id: now.timestamp_millis().max(last_id.saturating_add(1)),
        activity: activity.into(),
        hours,
        note: note.filter(|v| !v.trim().is_empty()),
        timestamp: now,
    };
    document.sessions.push(session.clone());
    session
}

fn validate_hours(hours: f64) -> TrackerResult<()> {
    if hours.is_finite() && hours >= 0. {
        Ok(())
    } else {
        Err(TrackerError::InvalidHours(hours))
    }
}

fn validate_unique(activities: &[Activity]) -> TrackerResult<()> {
    for (index, activity) in activities.iter().enumerate() {
        if activity.title.trim().is_empty() {
            return Err(TrackerError::EmptyTitle);
        }
        if activities[..index].iter().any(|v| v.has_title(&activity.title)) {
            return Err(TrackerError::DuplicateActivity(activity.title.clone()));
        }
        for period in Period::ALL {
            let stats = activity.timeframes.get(period);
            validate_hours(stats.current)?;
            validate_hours(stats.previous)?;
        }
    }
    Ok(())
}
