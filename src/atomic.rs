//! Upload staging: bytes land in a hidden sibling file and only become
//! visible under the destination name through a rename.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::storage::STAGING_PREFIX;

/// A partially written upload. Dropped or discarded staging files are
/// removed, so a failed transfer never leaves a truncated destination.
pub struct StagedFile {
    target: PathBuf,
    staging_path: PathBuf,
    file: Option<File>,
    written: u64,
    settled: bool,
}

impl StagedFile {
    /// Creates the staging file next to `target` (same filesystem, so the
    /// final rename is atomic).
    pub async fn create(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let staging_path = parent.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging_path)
            .await?;
        Ok(Self {
            target: target.to_path_buf(),
            staging_path,
            file: Some(file),
            written: 0,
            settled: false,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("staging file already closed"))?;
        file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Abandons the upload and removes the staging file.
    pub async fn discard(mut self) {
        self.file.take();
        if let Err(err) = fs::remove_file(&self.staging_path).await {
            warn!(path = ?self.staging_path, error = %err, "failed to remove staging file");
        }
        self.settled = true;
    }

    /// Flushes, syncs and renames over the destination, replacing any file
    /// already there. Returns the number of bytes stored.
    pub async fn commit(mut self) -> io::Result<u64> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        if let Err(err) = fs::rename(&self.staging_path, &self.target).await {
            #[cfg(windows)]
            {
                // Windows refuses to rename over an existing file.
                if fs::remove_file(&self.target).await.is_err() {
                    return Err(err);
                }
                fs::rename(&self.staging_path, &self.target).await?;
            }
            #[cfg(not(windows))]
            return Err(err);
        }
        self.settled = true;

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }
        Ok(self.written)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.settled {
            self.file.take();
            let _ = std::fs::remove_file(&self.staging_path);
        }
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
