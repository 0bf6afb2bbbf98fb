use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    fs::operations::{read_locked, write_locked},
    tracker::entities::UserDocument,
};

use super::{DocumentChange, DocumentStore, CHANGE_CHANNEL_CAPACITY};

/// Local key-value backend: one pretty printed JSON file per key inside `document_dir`.
pub struct FileStore {
    document_dir: PathBuf,
    changes: broadcast::Sender<DocumentChange>,
}

impl FileStore {
    pub fn new(document_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&document_dir)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            document_dir,
            changes,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.document_dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<UserDocument>> {
        let path = self.path_for(key);
        let Some(content) = read_locked(&path).await? else {
            debug!("No document stored under {key}");
            return Ok(None);
        };

        match serde_json::from_slice::<UserDocument>(&content) {
            Ok(document) => Ok(Some(document)),
            Err(e) => {
                // Interrupted writes or hand edits. Treated as if nothing was stored.
                warn!("Document in {path:?} is corrupted, ignoring it: {e}");
                Ok(None)
            }
        }
    }

    async fn save(&self, key: &str, document: &UserDocument) -> Result<()> {
        let content = serde_json::to_vec_pretty(document)?;
        write_locked(&self.path_for(key), &content).await?;

        // Nobody listening is fine.
        let _ = self.changes.send(DocumentChange {
            key: key.into(),
            document: document.clone(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use crate::{
        store::DocumentStore,
        tracker::entities::{Activity, UserDocument},
    };

    use super::FileStore;

    fn document() -> UserDocument {
        UserDocument::new(
            vec![Activity::new("Work", None), Activity::new("Play", None)],
            Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_file_store_save_and_load() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::new(dir.path().to_owned())?;

        assert_eq!(store.load("activity-tracker-data-ana").await?, None);

        store.save("activity-tracker-data-ana", &document()).await?;
        let loaded = store.load("activity-tracker-data-ana").await?;
        assert_eq!(loaded, Some(document()));

        assert_eq!(store.load("activity-tracker-data-bob").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_corrupt_document_is_absent() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("broken.json"), "{\"activities\": [")?;
        let store = FileStore::new(dir.path().to_owned())?;

        assert_eq!(store.load("broken").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_non_utf8_document_is_absent() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("binary.json"), [0xff, 0xfe, b'{', b'}'])?;
        let store = FileStore::new(dir.path().to_owned())?;

        assert_eq!(store.load("binary").await?, None);
        store.save("binary", &document()).await?;
        assert_eq!(store.load("binary").await?, Some(document()));
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_announces_saves() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::new(dir.path().to_owned())?;
        let mut changes = store.subscribe();

        store.save("key", &document()).await?;

        let change = changes.recv().await?;
        assert_eq!(change.key, "key");
        assert_eq!(change.document, document());
        Ok(())
    }
}
