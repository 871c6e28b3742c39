/*!
 * Media Ingestion Service
 *
 * Takes a staged upload through validation, storage, derivative generation,
 * metadata extraction and cataloging. Each uploaded file is ingested on its
 * own: a failure aborts that file and leaves no catalog row behind, while
 * objects already written for it are removed on a best-effort basis.
 */

use image::RgbaImage;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::staging::StagedUpload;
use crate::config::{BackendName, Config, DerivativeSize};
use crate::db::Database;
use crate::errors::{is_unique_violation, UploadError};
use crate::models::{Asset, Collection, NewAsset};
use crate::services::derivatives::{decode_rgba, render_derivative};
use crate::services::metadata::{self, ExtractedMetadata};
use crate::services::naming::{derivative_key, storage_key};
use crate::services::validator::{self, AcceptedType};
use crate::storage::{parent_dir, StorageBackend, StorageRegistry};
use crate::utils::security::generate_public_token;

const TOKEN_ATTEMPTS: usize = 3;
const KEY_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeduplicationPolicy {
    /// Create a new asset even if the collection already holds the same bytes
    #[default]
    AllowDuplicateContent,
    /// Return the existing asset of the collection with identical content
    ReturnExisting,
}

#[derive(Debug)]
pub enum IngestionResult {
    /// New asset was created
    Created(Asset),
    /// Existing asset was returned (content duplicate)
    ExistingAsset(Asset),
}

impl IngestionResult {
    pub fn into_asset(self) -> Asset {
        match self {
            IngestionResult::Created(asset) | IngestionResult::ExistingAsset(asset) => asset,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaIngestionRequest {
    pub collection: Collection,
    pub original_filename: String,
    /// Content type declared by the client; advisory only
    pub mime_hint: Option<String>,
    pub backend: BackendName,
}

pub struct MediaIngestionService {
    db: Database,
    storage: Arc<StorageRegistry>,
    staging_path: PathBuf,
    max_file_size: u64,
    derivative_sizes: Vec<DerivativeSize>,
    image_quality: u8,
    deduplication_policy: DeduplicationPolicy,
}

impl MediaIngestionService {
    pub fn new(db: Database, storage: Arc<StorageRegistry>, config: &Config) -> Self {
        Self {
            db,
            storage,
            staging_path: PathBuf::from(&config.staging_path),
            max_file_size: config.max_file_size_bytes(),
            derivative_sizes: config.derivative_sizes.clone(),
            image_quality: config.image_quality,
            deduplication_policy: if config.deduplicate_uploads {
                DeduplicationPolicy::ReturnExisting
            } else {
                DeduplicationPolicy::AllowDuplicateContent
            },
        }
    }

    pub fn with_deduplication_policy(mut self, policy: DeduplicationPolicy) -> Self {
        self.deduplication_policy = policy;
        self
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Spool an upload body to the staging area.
    pub async fn stage<S, B, E>(&self, stream: S) -> Result<StagedUpload, UploadError>
    where
        S: futures::Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        StagedUpload::from_stream(&self.staging_path, stream, self.max_file_size).await
    }

    /// Ingest one staged upload into a collection.
    pub async fn ingest(
        &self,
        request: &MediaIngestionRequest,
        staged: &StagedUpload,
    ) -> Result<IngestionResult, UploadError> {
        let accepted = validator::validate(
            staged.size,
            &staged.head,
            request.mime_hint.as_deref(),
            self.max_file_size,
        )?;

        let backend = self.storage.select(request.backend).map_err(|e| {
            error!("Upload of {} rejected: {}", request.original_filename, e);
            UploadError::StorageUnavailable
        })?;

        debug!(
            "Ingesting {} into collection {} (hash: {}, size: {} bytes, backend: {}, policy: {:?})",
            request.original_filename,
            request.collection.id,
            &staged.hash[..8],
            staged.size,
            request.backend,
            self.deduplication_policy
        );

        if self.deduplication_policy == DeduplicationPolicy::ReturnExisting {
            match self.db.find_asset_by_hash(request.collection.id, &staged.hash).await {
                Ok(Some(existing)) => {
                    debug!(
                        "Found existing asset with same content: {} (ID: {}) matches new file: {}",
                        existing.original_filename, existing.id, request.original_filename
                    );
                    return Ok(IngestionResult::ExistingAsset(existing));
                }
                Ok(None) => {}
                Err(e) => {
                    // Continue with ingestion even if the duplicate check fails
                    warn!("Error checking for duplicate content (hash: {}): {}", &staged.hash[..8], e);
                }
            }
        }

        let key = self.free_key(backend.as_ref(), request, staged, accepted).await?;

        backend.ensure_directory(parent_dir(&key)).await.map_err(|e| {
            error!("Failed to prepare directory for {}: {:#}", key, e);
            UploadError::Storage("could not prepare destination".to_string())
        })?;

        let mut file = staged.open().await?;
        let written = backend
            .write_stream(&key, &mut file, accepted.mime_type)
            .await
            .map_err(|e| {
                error!("Failed to store {}: {:#}", key, e);
                UploadError::Storage("write failed".to_string())
            })?;
        drop(file);

        let mut written_paths = vec![key.clone()];

        if written != staged.size {
            error!(
                "Stored size mismatch for {}: wrote {} bytes, expected {}",
                key, written, staged.size
            );
            self.remove_objects(backend.as_ref(), &written_paths).await;
            return Err(UploadError::Storage("stored size mismatch".to_string()));
        }

        // Derivatives and metadata read the staged copy, whose hash matches the stored original
        let data = match staged.read_all().await {
            Ok(data) => data,
            Err(e) => {
                self.remove_objects(backend.as_ref(), &written_paths).await;
                return Err(e);
            }
        };
        let data = Arc::new(data);

        let derivatives = self
            .generate_derivatives(backend.as_ref(), &key, accepted, data.clone(), &mut written_paths)
            .await;
        let extracted = extract_metadata(data, accepted).await;

        let mut new_asset = NewAsset {
            id: Uuid::new_v4(),
            collection_id: request.collection.id,
            backend: request.backend,
            public_token: generate_public_token(),
            original_filename: request.original_filename.clone(),
            storage_path: key.clone(),
            file_hash: staged.hash.clone(),
            file_size: staged.size as i64,
            mime_type: accepted.mime_type.to_string(),
            width: extracted.width.map(i64::from),
            height: extracted.height.map(i64::from),
            metadata: extracted.fields,
            derivatives,
        };

        let mut attempt = 1;
        let saved = loop {
            match self.db.create_asset(&new_asset).await {
                Ok(asset) => break asset,
                Err(e) if attempt < TOKEN_ATTEMPTS && is_unique_violation(&e) => {
                    warn!("Public token collision for {}, generating a new token", request.original_filename);
                    new_asset.public_token = generate_public_token();
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Failed to create asset record for {} (hash: {}): {:#}",
                        request.original_filename,
                        &staged.hash[..8],
                        e
                    );
                    self.remove_objects(backend.as_ref(), &written_paths).await;
                    return Err(UploadError::Database(e.to_string()));
                }
            }
        };

        info!(
            "Ingested {} as asset {} ({} bytes, {} derivative(s)) into collection {}",
            saved.original_filename,
            saved.id,
            saved.file_size,
            saved.derivatives.len(),
            saved.collection_id
        );

        Ok(IngestionResult::Created(saved))
    }

    /// Storage key for a new original. Identical content uploaded twice in the
    /// same millisecond would map to the same key, so an occupied key moves the
    /// time component forward.
    async fn free_key(
        &self,
        backend: &dyn StorageBackend,
        request: &MediaIngestionRequest,
        staged: &StagedUpload,
        accepted: AcceptedType,
    ) -> Result<String, UploadError> {
        let mut at = chrono::Utc::now();
        for _ in 0..KEY_ATTEMPTS {
            let key = storage_key(
                &request.collection.owner_scope(),
                request.collection.id,
                &request.original_filename,
                &staged.hash,
                accepted.extension,
                at,
            );
            match backend.exists(&key).await {
                Ok(false) => return Ok(key),
                Ok(true) => {
                    debug!("Storage key {} already taken", key);
                    at += chrono::Duration::milliseconds(1);
                }
                Err(e) => {
                    error!("Failed to check storage key {}: {:#}", key, e);
                    return Err(UploadError::Storage("could not check destination".to_string()));
                }
            }
        }
        Err(UploadError::Storage("no free storage key".to_string()))
    }

    /// Render and store each configured size class. A class that fails is
    /// logged and left out; the asset is cataloged regardless.
    async fn generate_derivatives(
        &self,
        backend: &dyn StorageBackend,
        original_key: &str,
        accepted: AcceptedType,
        data: Arc<Vec<u8>>,
        written_paths: &mut Vec<String>,
    ) -> BTreeMap<String, String> {
        let mut derivatives = BTreeMap::new();
        if accepted.is_vector() || self.derivative_sizes.is_empty() {
            return derivatives;
        }

        let decoded = tokio::task::spawn_blocking(move || decode_rgba(&data, accepted)).await;
        let source: Arc<RgbaImage> = match decoded {
            Ok(Ok(image)) => Arc::new(image),
            Ok(Err(e)) => {
                warn!("Could not decode {} for derivatives: {}", original_key, e);
                return derivatives;
            }
            Err(e) => {
                error!("Derivative decoding task failed for {}: {}", original_key, e);
                return derivatives;
            }
        };

        for size in &self.derivative_sizes {
            let image = source.clone();
            let class = size.clone();
            let quality = self.image_quality;
            let rendered =
                tokio::task::spawn_blocking(move || render_derivative(&image, accepted, &class, quality)).await;

            let rendered = match rendered {
                Ok(Ok(Some(rendered))) => rendered,
                Ok(Ok(None)) => {
                    debug!("{} already fits {}, no derivative needed", original_key, size.name);
                    continue;
                }
                Ok(Err(e)) => {
                    warn!("Failed to render {} derivative of {}: {}", size.name, original_key, e);
                    continue;
                }
                Err(e) => {
                    error!("Derivative task for {} of {} failed: {}", size.name, original_key, e);
                    continue;
                }
            };

            let path = derivative_key(original_key, &rendered.size_class, accepted.extension);
            match backend
                .write_stream(&path, &mut rendered.data.as_slice(), accepted.mime_type)
                .await
            {
                Ok(_) => {
                    debug!(
                        "Stored {} derivative {} ({}x{})",
                        rendered.size_class, path, rendered.width, rendered.height
                    );
                    written_paths.push(path.clone());
                    derivatives.insert(rendered.size_class, path);
                }
                Err(e) => warn!("Failed to store {} derivative {}: {:#}", rendered.size_class, path, e),
            }
        }

        derivatives
    }

    /// Best-effort removal of objects written for an upload that failed later.
    async fn remove_objects(&self, backend: &dyn StorageBackend, paths: &[String]) {
        for path in paths {
            if let Err(e) = backend.delete(path).await {
                warn!("Failed to clean up {} after aborted upload: {:#}", path, e);
            }
        }
    }
}

async fn extract_metadata(data: Arc<Vec<u8>>, accepted: AcceptedType) -> ExtractedMetadata {
    match tokio::task::spawn_blocking(move || metadata::extract(&data, accepted)).await {
        Ok(extracted) => extracted,
        Err(e) => {
            warn!("Metadata extraction task failed: {}", e);
            ExtractedMetadata {
                width: None,
                height: None,
                fields: serde_json::json!({}),
            }
        }
    }
}
