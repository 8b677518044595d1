//! Filesystem drop directory: every visible regular file is one message.

use super::{MessageSource, RawMessage, SourceError};
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct DropDirectory {
    path: PathBuf,
    name: String,
}

impl DropDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("drop directory {}", path.display());
        Self { path, name }
    }

    /// Read a file only if it can be opened for reading and writing, so a
    /// file still being written by another user is left for later.
    async fn read_message(path: &Path) -> Option<Vec<u8>> {
        if let Err(err) = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
        {
            log::warn!("skipping {}: {}", path.display(), err);
            return None;
        }

        match fs::read(path).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                log::warn!("skipping {}: {}", path.display(), err);
                None
            }
        }
    }
}

#[rocket::async_trait]
impl MessageSource for DropDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<RawMessage>, SourceError> {
        let io_error = |source| SourceError::Io {
            path: self.path.clone(),
            source,
        };

        let mut entries = fs::read_dir(&self.path).await.map_err(io_error)?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => paths.push(entry.path()),
                Ok(_) => {}
                Err(err) => log::warn!("skipping {}: {}", entry.path().display(), err),
            }
        }
        paths.sort();

        let mut messages = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(bytes) = Self::read_message(&path).await {
                messages.push(RawMessage {
                    id: path.to_string_lossy().into_owned(),
                    bytes,
                });
            }
        }

        Ok(messages)
    }

    async fn acknowledge(&self, ids: &[String]) -> Result<(), SourceError> {
        for id in ids {
            if let Err(err) = fs::remove_file(id).await {
                log::error!("failed to delete {}: {}", id, err);
            }
        }
        Ok(())
    }
}
