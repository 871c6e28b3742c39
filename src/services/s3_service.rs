use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client;
use aws_types::region::Region as AwsRegion;

use crate::storage::{render_public_url, ObjectReader, S3StorageConfig, StorageBackend};
use crate::utils::security::validate_storage_key;

/// Objects larger than one part go through a multipart upload. S3 requires
/// every part except the last to be at least 5 MiB.
const MULTIPART_CHUNK_SIZE: usize = 8 * 1024 * 1024;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct S3Service {
    client: Client,
    config: S3StorageConfig,
}

impl S3Service {
    pub async fn new(config: S3StorageConfig) -> Result<Self> {
        // Validate required fields
        if config.bucket_name.is_empty() {
            return Err(anyhow!("Bucket name is required"));
        }
        if config.access_key_id.is_empty() {
            return Err(anyhow!("Access key ID is required"));
        }
        if config.secret_access_key.is_empty() {
            return Err(anyhow!("Secret access key is required"));
        }

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None, // session token
            None, // expiry
            "mediashelf-storage",
        );

        let region = if config.region.is_empty() {
            "us-east-1".to_string()
        } else {
            config.region.clone()
        };

        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .region(AwsRegion::new(region))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .behavior_version_latest();

        // Set custom endpoint if provided (R2, MinIO and friends)
        if let Some(endpoint_url) = &config.endpoint_url {
            if !endpoint_url.is_empty() {
                s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
                info!("Using custom S3 endpoint: {}", endpoint_url);
            }
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self { client, config })
    }

    pub fn bucket_name(&self) -> &str {
        &self.config.bucket_name
    }

    /// Test S3 connection and access to bucket
    pub async fn test_connection(&self) -> Result<String> {
        info!("Testing S3 connection to bucket: {}", self.config.bucket_name);

        self.client
            .head_bucket()
            .bucket(&self.config.bucket_name)
            .send()
            .await
            .map_err(|e| anyhow!("Cannot access bucket {}: {}", self.config.bucket_name, e))?;

        Ok(format!(
            "Successfully connected to S3 bucket '{}'",
            self.config.bucket_name
        ))
    }

    /// Single-request upload for objects that fit in one part.
    async fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        let bucket_name = self.config.bucket_name.clone();
        let client = self.client.clone();

        self.retry_operation(&format!("put_object: {}", key), || {
            let client = client.clone();
            let bucket_name = bucket_name.clone();
            let data = data.clone();
            async move {
                client
                    .put_object()
                    .bucket(&bucket_name)
                    .key(key)
                    .content_type(content_type)
                    .acl(ObjectCannedAcl::PublicRead)
                    .body(ByteStream::from(data))
                    .send()
                    .await
                    .map_err(|e| anyhow!("Failed to store file {}: {}", key, e))?;
                Ok(())
            }
        })
        .await
    }

    /// Multipart upload fed from a reader. `first_part` has already been read.
    /// On any failure the upload is aborted so no parts linger in the bucket.
    async fn put_multipart(
        &self,
        key: &str,
        first_part: Vec<u8>,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        content_type: &str,
    ) -> Result<u64> {
        let create_response = self
            .retry_operation(&format!("create_multipart_upload: {}", key), || async {
                self.client
                    .create_multipart_upload()
                    .bucket(&self.config.bucket_name)
                    .key(key)
                    .content_type(content_type)
                    .acl(ObjectCannedAcl::PublicRead)
                    .send()
                    .await
                    .map_err(|e| anyhow!("Failed to initiate multipart upload for {}: {}", key, e))
            })
            .await?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| anyhow!("Missing upload ID in multipart upload response"))?
            .to_string();

        info!("Initiated multipart upload for {}: {}", key, upload_id);

        match self.upload_parts(key, &upload_id, first_part, reader).await {
            Ok(total) => {
                info!("Successfully completed multipart upload for {} ({} bytes)", key, total);
                Ok(total)
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.config.bucket_name)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    error!("Failed to abort multipart upload {} for {}: {}", upload_id, key, abort_err);
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first_part: Vec<u8>,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let mut completed_parts = Vec::new();
        let mut total: u64 = 0;
        let mut chunk = first_part;
        let mut part_number: i32 = 1;

        while !chunk.is_empty() {
            total += chunk.len() as u64;
            debug!("Uploading part {} for {} ({} bytes)", part_number, key, chunk.len());

            let part = chunk;
            let upload_part_response = self
                .retry_operation(&format!("upload_part {}: {}", part_number, key), || async {
                    self.client
                        .upload_part()
                        .bucket(&self.config.bucket_name)
                        .key(key)
                        .upload_id(upload_id)
                        .part_number(part_number)
                        .body(ByteStream::from(part.clone()))
                        .send()
                        .await
                        .map_err(|e| anyhow!("Failed to upload part {} for {}: {}", part_number, key, e))
                })
                .await?;

            let etag = upload_part_response
                .e_tag()
                .ok_or_else(|| anyhow!("Missing ETag in upload part response"))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );

            part_number += 1;
            chunk = read_chunk(reader, MULTIPART_CHUNK_SIZE).await?;
        }

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.config.bucket_name)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to complete multipart upload for {}: {}", key, e))?;

        Ok(total)
    }

    /// Retry wrapper for S3 operations with exponential backoff
    async fn retry_operation<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("S3 operation '{}' succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let delay_ms = BASE_DELAY_MS * 2u64.pow(attempt);
                    warn!(
                        "S3 operation '{}' failed (attempt {}/{}), retrying in {}ms: {}",
                        operation_name,
                        attempt + 1,
                        MAX_RETRIES + 1,
                        delay_ms,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "S3 operation '{}' failed after {} attempts: {}",
                        operation_name,
                        MAX_RETRIES + 1,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// Read up to `limit` bytes, stopping early only at end of stream.
async fn read_chunk(reader: &mut (dyn AsyncRead + Send + Unpin), limit: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit.min(64 * 1024));
    let mut limited = reader.take(limit as u64);
    limited.read_to_end(&mut buf).await?;
    Ok(buf)
}

#[async_trait]
impl StorageBackend for S3Service {
    async fn ensure_directory(&self, _dir: &str) -> Result<()> {
        // Object stores have no directories; keys carry the hierarchy
        Ok(())
    }

    async fn write_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        content_type: &str,
    ) -> Result<u64> {
        validate_storage_key(path)?;
        info!("Storing file to S3: {}/{}", self.config.bucket_name, path);

        let first = read_chunk(reader, MULTIPART_CHUNK_SIZE).await?;
        if first.len() < MULTIPART_CHUNK_SIZE {
            let size = first.len() as u64;
            self.put_object(path, first, content_type).await?;
            info!("Successfully stored file: {} ({} bytes)", path, size);
            return Ok(size);
        }

        // Exactly one part's worth may still be the whole file
        let second = read_chunk(reader, MULTIPART_CHUNK_SIZE).await?;
        if second.is_empty() {
            let size = first.len() as u64;
            self.put_object(path, first, content_type).await?;
            info!("Successfully stored file: {} ({} bytes)", path, size);
            return Ok(size);
        }

        let mut rest = std::io::Cursor::new(second).chain(reader);
        self.put_multipart(path, first, &mut rest, content_type).await
    }

    async fn open_read(&self, path: &str) -> Result<ObjectReader> {
        validate_storage_key(path)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket_name)
            .key(path)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to retrieve file {}: {}", path, e))?;

        let content_length = response.content_length().and_then(|len| u64::try_from(len).ok());
        let reader = Box::pin(response.body.into_async_read());

        Ok(ObjectReader {
            reader: Box::new(reader),
            content_length,
        })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        validate_storage_key(path)?;
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket_name)
            .key(path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(anyhow!("Failed to check file existence {}: {}", path, e))
                }
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate_storage_key(path)?;
        info!("Deleting file from S3: {}/{}", self.config.bucket_name, path);

        // DeleteObject on a missing key is already a success
        self.retry_operation(&format!("delete_object: {}", path), || async {
            self.client
                .delete_object()
                .bucket(&self.config.bucket_name)
                .key(path)
                .send()
                .await
                .map_err(|e| anyhow!("Failed to delete file {}: {}", path, e))?;
            Ok(())
        })
        .await
    }

    fn public_url(&self, path: &str) -> Option<String> {
        self.config
            .public_url
            .as_deref()
            .map(|template| render_public_url(template, path))
    }

    fn storage_type(&self) -> &'static str {
        "s3"
    }

    async fn initialize(&self) -> Result<()> {
        self.test_connection().await?;
        info!("S3 storage backend initialized successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3StorageConfig {
        S3StorageConfig {
            bucket_name: "test-bucket".to_string(),
            region: "auto".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
            endpoint_url: Some("https://account.r2.cloudflarestorage.com".to_string()),
            force_path_style: true,
            public_url: Some("https://pub-123.r2.dev".to_string()),
        }
    }

    #[tokio::test]
    async fn test_s3_config_creation() {
        // Creates the client without touching the network
        let service = S3Service::new(config()).await;
        assert!(service.is_ok());
    }

    #[tokio::test]
    async fn test_s3_config_requires_credentials() {
        let mut cfg = config();
        cfg.secret_access_key.clear();
        assert!(S3Service::new(cfg).await.is_err());
    }

    #[tokio::test]
    async fn test_public_url_from_template() {
        let service = S3Service::new(config()).await.unwrap();
        assert_eq!(
            service.public_url("global/galleries/x/a.jpg").as_deref(),
            Some("https://pub-123.r2.dev/global/galleries/x/a.jpg")
        );
    }

    #[tokio::test]
    async fn test_read_chunk_stops_at_limit() {
        let data = vec![7u8; 100];
        let mut reader = data.as_slice();
        let first = read_chunk(&mut reader, 64).await.unwrap();
        let second = read_chunk(&mut reader, 64).await.unwrap();
        let third = read_chunk(&mut reader, 64).await.unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(second.len(), 36);
        assert!(third.is_empty());
    }
}
