use std::{io::ErrorKind, path::Path};

use anyhow::Result;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;

/// Reads the raw bytes of the file under a shared lock. A missing file is `None`, not an error.
/// Content is not checked in any way, parsing and its failures are up to the caller.
pub async fn read_locked(path: &Path) -> Result<Option<Vec<u8>>, std::io::Error> {
    async fn extract(path: &Path) -> Result<Vec<u8>, std::io::Error> {
        debug!("Reading {path:?}");
        let mut file = File::open(path).await?;
        file.lock_shared()?;
        let mut content = Vec::new();
        let result = file.read_to_end(&mut content).await;
        file.unlock_async().await?;
        result.map(|_| content)
    }

    match extract(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Replaces the file content under an exclusive lock, creating the file when needed.
pub async fn write_locked(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = File::options()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;

    // Truncating only once the lock is held keeps readers from seeing an empty file.
    file.lock_exclusive()?;
    let result = overwrite(&mut file, content).await;
    file.unlock_async().await?;
    debug!("Wrote {} bytes into {path:?}", content.len());
    result
}

async fn overwrite(file: &mut File, content: &[u8]) -> Result<()> {
    file.set_len(0).await?;
    file.write_all(content).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}
