use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::tracker::entities::UserDocument;

use super::{DocumentChange, DocumentStore, CHANGE_CHANNEL_CAPACITY};

struct Shared {
    documents: Mutex<HashMap<String, UserDocument>>,
    offline: AtomicBool,
    changes: broadcast::Sender<DocumentChange>,
}

/// Document store shared between every clone of the handle, the way several clients share one
/// remote database. Writes through any clone are pushed to all subscribers.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                documents: Mutex::new(HashMap::new()),
                offline: AtomicBool::new(false),
                changes,
            }),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every read and write fails as an unreachable backend would.
    pub fn set_offline(&self, offline: bool) {
        debug!("Memory store offline: {offline}");
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.shared.offline.load(Ordering::SeqCst) {
            bail!("Document store is unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<UserDocument>> {
        self.ensure_online()?;
        let documents = self
            .shared
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(key).cloned())
    }

    async fn save(&self, key: &str, document: &UserDocument) -> Result<()> {
        self.ensure_online()?;
        self.shared
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), document.clone());

        let _ = self.shared.changes.send(DocumentChange {
            key: key.into(),
            document: document.clone(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.shared.changes.subscribe()
    }
}
