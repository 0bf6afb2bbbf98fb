use std::time::Duration;

use chrono::{DateTime, Utc};

/// Last document fetched from the backend together with when it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self { value, fetched_at }
    }

    /// An entry is stale once `ttl` has passed since it was fetched. Entries from the future
    /// (clock moved back) are stale too.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        let age = now - self.fetched_at;
        age < chrono::Duration::zero() || age >= ttl
    }
}
