//! Spooling of incoming upload bodies to local temporary files.
//!
//! The body is hashed and measured while it streams, so by the time a staged
//! upload exists its size and SHA-256 are known and nothing was buffered in
//! memory beyond one chunk and the sniffing head.

use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::UploadError;

/// Leading bytes kept for content sniffing.
pub const HEAD_LEN: usize = 4096;

/// A fully received upload on local disk. The file is removed on drop.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    pub size: u64,
    /// Lowercase hex SHA-256 of the received bytes
    pub hash: String,
    pub head: Vec<u8>,
}

impl StagedUpload {
    /// Spool `stream` into `staging_dir`, aborting once more than `max_bytes`
    /// have arrived.
    pub async fn from_stream<S, B, E>(staging_dir: &Path, stream: S, max_bytes: u64) -> Result<Self, UploadError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        fs::create_dir_all(staging_dir).await.map_err(UploadError::Staging)?;

        let path = staging_dir.join(format!("{}.upload", Uuid::new_v4()));
        // From here on the partial file is removed on every exit path
        let mut staged = StagedUpload {
            path,
            size: 0,
            hash: String::new(),
            head: Vec::new(),
        };

        let mut file = fs::File::create(&staged.path).await.map_err(UploadError::Staging)?;
        let mut hasher = Sha256::new();
        let mut stream = std::pin::pin!(stream);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UploadError::Transport(e.to_string()))?;
            let bytes = chunk.as_ref();
            if bytes.is_empty() {
                continue;
            }

            staged.size += bytes.len() as u64;
            if staged.size > max_bytes {
                debug!("Upload exceeded {} bytes while staging, aborting", max_bytes);
                return Err(UploadError::TooLarge {
                    size: staged.size,
                    max_size: max_bytes,
                });
            }

            if staged.head.len() < HEAD_LEN {
                let take = (HEAD_LEN - staged.head.len()).min(bytes.len());
                staged.head.extend_from_slice(&bytes[..take]);
            }

            hasher.update(bytes);
            file.write_all(bytes).await.map_err(UploadError::Staging)?;
        }

        file.flush().await.map_err(UploadError::Staging)?;
        file.sync_all().await.map_err(UploadError::Staging)?;

        staged.hash = format!("{:x}", hasher.finalize());
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the staged bytes for streaming to a backend.
    pub async fn open(&self) -> Result<fs::File, UploadError> {
        fs::File::open(&self.path).await.map_err(UploadError::Staging)
    }

    /// Read the staged bytes into memory for decoding.
    pub async fn read_all(&self) -> Result<Vec<u8>, UploadError> {
        fs::read(&self.path).await.map_err(UploadError::Staging)
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staged upload {}: {}", self.path.display(), e);
            }
        }
    }
}
