//! Out-of-band message bodies referenced by a claim check.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StagingError;

/// Fetches a body previously stored under its message id.
#[async_trait]
pub trait BodyStorage: Send + Sync {
    async fn fetch(&self, message_id: &str) -> Result<Option<Vec<u8>>, StagingError>;
}

/// Bodies stored as individual files, named by the hex-encoded message id
/// so arbitrary ids are safe as file names.
pub struct FileBodyStorage {
    dir: PathBuf,
}

impl FileBodyStorage {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, message_id: &str) -> PathBuf {
        self.dir.join(hex::encode(message_id.as_bytes()))
    }

    pub async fn store(&self, message_id: &str, body: &[u8]) -> Result<(), StagingError> {
        let path = self.path_for(message_id);
        tokio::fs::write(&path, body).await?;
        debug!(message_id = %message_id, bytes = body.len(), "Body stored");
        Ok(())
    }
}

#[async_trait]
impl BodyStorage for FileBodyStorage {
    async fn fetch(&self, message_id: &str) -> Result<Option<Vec<u8>>, StagingError> {
        match tokio::fs::read(self.path_for(message_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
