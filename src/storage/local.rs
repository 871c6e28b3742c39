//! Local filesystem storage backend implementation

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{render_public_url, ObjectReader, StorageBackend};
use crate::utils::security::validate_storage_key;

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Local filesystem storage backend
pub struct LocalStorageBackend {
    root: PathBuf,
    public_url: Option<String>,
}

impl LocalStorageBackend {
    /// Create a new local storage backend
    pub fn new(root: impl Into<PathBuf>, public_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_url,
        }
    }

    /// Resolve a backend-relative key to an absolute path under the root.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        validate_storage_key(key)?;
        Ok(self.root.join(key))
    }

    async fn create_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        set_mode(dir, DIR_MODE).await;
        Ok(())
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await {
        warn!("Failed to set permissions {:o} on {}: {}", mode, path.display(), e);
    }
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) {}

#[async_trait]
impl StorageBackend for LocalStorageBackend {
    async fn ensure_directory(&self, dir: &str) -> Result<()> {
        if dir.is_empty() {
            return self.create_dir(&self.root).await;
        }
        let path = self.resolve(dir)?;
        self.create_dir(&path).await
    }

    async fn write_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        _content_type: &str,
    ) -> Result<u64> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        if fs::metadata(&parent).await.is_err() {
            self.create_dir(&parent).await?;
        }

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        // Write next to the target, then rename so readers never observe a partial file
        let result: Result<u64> = async {
            let mut file = fs::File::create(&temp_path)
                .await
                .with_context(|| format!("Failed to create {}", temp_path.display()))?;
            let written = tokio::io::copy(reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            set_mode(&temp_path, FILE_MODE).await;
            fs::rename(&temp_path, &target)
                .await
                .with_context(|| format!("Failed to move file into place at {}", target.display()))?;
            Ok(written)
        }
        .await;

        match result {
            Ok(written) => {
                info!("Stored file locally: {} ({} bytes)", target.display(), written);
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup_err) = fs::remove_file(&temp_path).await {
                    if cleanup_err.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove temporary file {}: {}", temp_path.display(), cleanup_err);
                    }
                }
                error!("Failed to store file {}: {:#}", target.display(), e);
                Err(e)
            }
        }
    }

    async fn open_read(&self, path: &str) -> Result<ObjectReader> {
        let target = self.resolve(path)?;
        let file = fs::File::open(&target)
            .await
            .with_context(|| format!("File not found: {}", path))?;
        let content_length = file.metadata().await.ok().map(|m| m.len());
        Ok(ObjectReader {
            reader: Box::new(file),
            content_length,
        })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        Ok(fs::try_exists(&target).await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(_) => {
                info!("Deleted file: {}", target.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("File already deleted: {}", target.display());
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("Failed to delete file {}: {}", target.display(), e)),
        }
    }

    fn public_url(&self, path: &str) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|template| render_public_url(template, path))
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }

    async fn initialize(&self) -> Result<()> {
        if let Err(e) = self.create_dir(&self.root).await {
            error!("Failed to create storage root {:?}: {}", self.root, e);
            return Err(anyhow::anyhow!("Failed to create storage root: {}", e));
        }
        info!("Ensured storage root exists: {:?}", self.root);
        Ok(())
    }
}
