//! Storage backend abstraction for media objects
//!
//! Every physical medium (local filesystem, S3-compatible bucket) implements the
//! same small capability set. Paths are always backend-relative keys such as
//! `global/galleries/<id>/2024/06/sunset-1718000000000-ab12cd34.jpg`.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub mod factory;
pub mod local;

pub use factory::{create_storage_backend, StorageRegistry};

/// An object opened for reading.
pub struct ObjectReader {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub content_length: Option<u64>,
}

/// Core storage backend trait that all storage implementations must implement
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create a directory (or key prefix) if it does not exist yet. Idempotent.
    async fn ensure_directory(&self, dir: &str) -> Result<()>;

    /// Stream `reader` to `path`, replacing any existing object.
    /// Returns the number of bytes written.
    async fn write_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        content_type: &str,
    ) -> Result<u64>;

    /// Open an object for streaming reads.
    async fn open_read(&self, path: &str) -> Result<ObjectReader>;

    /// Check if an object exists at the given path
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Direct public URL for an object, when the backend is publicly fronted.
    fn public_url(&self, path: &str) -> Option<String>;

    /// Get a human-readable identifier for this storage backend type
    fn storage_type(&self) -> &'static str;

    /// Initialize the storage backend (create directories, validate access, etc.)
    async fn initialize(&self) -> Result<()>;

    /// Read a whole object into memory.
    async fn read_to_vec(&self, path: &str) -> Result<Vec<u8>> {
        let mut object = self.open_read(path).await?;
        let mut data = Vec::with_capacity(object.content_length.unwrap_or(0) as usize);
        object.reader.read_to_end(&mut data).await?;
        Ok(data)
    }
}

/// Storage configuration enum for different backend types
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Local filesystem storage
    Local {
        root: String,
        public_url: Option<String>,
    },
    /// S3-compatible storage
    #[cfg(feature = "s3")]
    S3(S3StorageConfig),
}

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3StorageConfig {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub public_url: Option<String>,
}

/// Errors raised while selecting a backend for a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend '{0}' is not configured")]
    NotConfigured(String),

    #[error("Storage backend '{backend}' is misconfigured: {reason}")]
    Configuration { backend: String, reason: String },
}

/// Expand a public URL template for `path`.
pub fn render_public_url(template: &str, path: &str) -> String {
    if template.contains("{path}") {
        template.replace("{path}", path)
    } else {
        format!("{}/{}", template.trim_end_matches('/'), path)
    }
}

/// Parent "directory" of a backend-relative key.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_public_url_with_placeholder() {
        assert_eq!(
            render_public_url("https://cdn.example.com/media/{path}?v=1", "global/a.jpg"),
            "https://cdn.example.com/media/global/a.jpg?v=1"
        );
    }

    #[test]
    fn test_render_public_url_appends_path() {
        assert_eq!(
            render_public_url("https://pub.r2.dev/", "tenant_4/galleries/x.png"),
            "https://pub.r2.dev/tenant_4/galleries/x.png"
        );
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("a/b/c.jpg"), "a/b");
        assert_eq!(parent_dir("c.jpg"), "");
    }
}
