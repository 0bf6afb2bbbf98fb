//! Persistence backends for user documents.
//!
//! Every user owns one [UserDocument] stored under a key derived from the user name. Backends are
//! interchangeable behind [DocumentStore]:
//!  - [file_store::FileStore] keeps one JSON file per key on the local disk.
//!  - [memory_store::MemoryStore] is a shared in-process document store that plays the remote
//!    database. It can be switched offline to exercise the failure paths.
//!
//! Both announce successful writes on a broadcast channel so open data managers can pick up
//! changes made through another handle.

pub mod file_store;
pub mod memory_store;
pub mod prefs;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::tracker::entities::UserDocument;

const BASE_DOCUMENT_KEY: &str = "activity-tracker-data";

/// Capacity of change channels. A listener lagging further behind skips to the newest change.
pub const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Notification that the document under `key` was replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub key: String,
    pub document: UserDocument,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `None` when nothing usable is stored under `key`, including corrupt data.
    async fn load(&self, key: &str) -> Result<Option<UserDocument>>;

    /// Overwrites the whole document under `key`.
    async fn save(&self, key: &str, document: &UserDocument) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange>;
}

/// Key under which a user's document lives. Without a user the legacy shared key is used.
///
/// Distinct names always map to distinct keys: ASCII letters, digits and `-` are kept, every other
/// byte (including `_`) is written as `_XX` in hex.
pub fn document_key(user: Option<&str>) -> String {
    match user.map(str::trim).filter(|v| !v.is_empty()) {
        Some(user) => format!("{BASE_DOCUMENT_KEY}-{}", escape_user(user)),
        None => BASE_DOCUMENT_KEY.into(),
    }
}

fn escape_user(user: &str) -> String {
    let mut escaped = String::with_capacity(user.len());
    for byte in user.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{byte:02X}"));
        }
    }
    escaped
}
