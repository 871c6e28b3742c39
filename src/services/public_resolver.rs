//! Token-gated access to stored objects.
//!
//! Public callers only ever hold an asset's public token. The resolver turns
//! a token (plus, for derivatives, a backend-relative path) into either a
//! redirect to a publicly fronted backend or a byte stream, and fails closed
//! for anything the catalog does not vouch for.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::{debug, error, warn};

use crate::db::Database;
use crate::models::{Asset, AssetResponse};
use crate::storage::StorageRegistry;
use crate::utils::security::is_valid_public_token;

/// Size class whose URL doubles as the asset's thumbnail.
pub const THUMBNAIL_CLASS: &str = "thumb";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Not found")]
    NotFound,
    #[error("Storage unavailable")]
    Unavailable,
}

pub struct ResolvedStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub content_type: String,
    pub content_length: Option<u64>,
    /// Strong entity tag, already quoted
    pub etag: String,
}

impl std::fmt::Debug for ResolvedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedStream")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("etag", &self.etag)
            .finish()
    }
}

#[derive(Debug)]
pub enum Resolved {
    Redirect(String),
    Stream(ResolvedStream),
}

pub struct PublicResolver {
    db: Database,
    storage: Arc<StorageRegistry>,
    public_base_url: String,
}

impl PublicResolver {
    pub fn new(db: Database, storage: Arc<StorageRegistry>, public_base_url: impl Into<String>) -> Self {
        Self {
            db,
            storage,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// ETag of an object; derivatives are distinguished by size class.
    pub fn etag_for(asset: &Asset, size_class: Option<&str>) -> String {
        match size_class {
            Some(class) => format!("\"{}-{}\"", asset.file_hash, class),
            None => format!("\"{}\"", asset.file_hash),
        }
    }

    /// Look up the active asset behind a public token.
    pub async fn lookup(&self, token: &str) -> Result<Asset, ResolveError> {
        if !is_valid_public_token(token) {
            return Err(ResolveError::NotFound);
        }

        let asset = self.db.get_asset_by_token(token).await.map_err(|e| {
            error!("Failed to look up public token: {:#}", e);
            ResolveError::Unavailable
        })?;

        match asset {
            Some(asset) if asset.is_active => Ok(asset),
            Some(_) => {
                debug!("Public token refers to an inactive asset");
                Err(ResolveError::NotFound)
            }
            None => Err(ResolveError::NotFound),
        }
    }

    /// Resolve a token, and optionally one of the asset's object paths.
    pub async fn resolve(&self, token: &str, path: Option<&str>) -> Result<Resolved, ResolveError> {
        let asset = self.lookup(token).await?;

        let object_path = match path {
            None => asset.storage_path.as_str(),
            Some(p) if asset.owns_path(p) => p,
            Some(_) => {
                warn!("Rejected path that does not belong to asset {}", asset.id);
                return Err(ResolveError::NotFound);
            }
        };
        let size_class = asset.size_class_of(object_path);
        let content_type = asset.mime_type.clone();

        let backend = self.storage.select(asset.backend).map_err(|e| {
            error!("Cannot serve asset {}: {}", asset.id, e);
            ResolveError::Unavailable
        })?;

        if let Some(url) = backend.public_url(object_path) {
            return Ok(Resolved::Redirect(url));
        }

        let object = backend.open_read(object_path).await.map_err(|e| {
            warn!("Object {} of asset {} unreadable: {:#}", object_path, asset.id, e);
            ResolveError::NotFound
        })?;

        Ok(Resolved::Stream(ResolvedStream {
            reader: object.reader,
            content_type,
            content_length: object.content_length,
            etag: Self::etag_for(&asset, size_class),
        }))
    }

    fn object_url(&self, asset: &Asset, path: &str, is_original: bool) -> String {
        if let Ok(backend) = self.storage.select(asset.backend) {
            if let Some(url) = backend.public_url(path) {
                return url;
            }
        }
        if is_original {
            format!("{}/media/{}", self.public_base_url, asset.public_token)
        } else {
            format!(
                "{}/media/file?path={}&token={}",
                self.public_base_url,
                urlencoding::encode(path),
                asset.public_token
            )
        }
    }

    /// Public representation of an asset with every URL filled in.
    pub fn present(&self, asset: &Asset) -> AssetResponse {
        let url = self.object_url(asset, &asset.storage_path, true);
        let derivatives: BTreeMap<String, String> = asset
            .derivatives
            .iter()
            .map(|(class, path)| (class.clone(), self.object_url(asset, path, false)))
            .collect();
        let thumbnail_url = derivatives
            .get(THUMBNAIL_CLASS)
            .cloned()
            .unwrap_or_else(|| url.clone());

        AssetResponse {
            id: asset.id,
            collection_id: asset.collection_id,
            public_token: asset.public_token.clone(),
            backend: asset.backend,
            original_filename: asset.original_filename.clone(),
            mime_type: asset.mime_type.clone(),
            file_size: asset.file_size,
            file_hash: asset.file_hash.clone(),
            width: asset.width,
            height: asset.height,
            sort_order: asset.sort_order,
            is_active: asset.is_active,
            title: asset.title.clone(),
            alt_text: asset.alt_text.clone(),
            caption: asset.caption.clone(),
            link_url: asset.link_url.clone(),
            metadata: asset.metadata.0.clone(),
            url,
            thumbnail_url,
            derivatives,
            created_at: asset.created_at,
            updated_at: asset.updated_at,
        }
    }
}
