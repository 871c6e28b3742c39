use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::errors::ApiError;
use crate::models::{Asset, SetCoverResponse, UpdateAsset};
use crate::services::public_resolver::PublicResolver;
use crate::storage::StorageRegistry;

/// Catalog operations on existing assets that also touch storage.
pub struct AssetService {
    db: Database,
    storage: Arc<StorageRegistry>,
    resolver: Arc<PublicResolver>,
}

impl AssetService {
    pub fn new(db: Database, storage: Arc<StorageRegistry>, resolver: Arc<PublicResolver>) -> Self {
        Self { db, storage, resolver }
    }

    async fn require_asset(&self, id: Uuid) -> Result<Asset, ApiError> {
        self.db
            .get_asset(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Asset not found".to_string()))
    }

    /// Delete every stored object of an asset, then its catalog row.
    ///
    /// If any object cannot be removed the row is kept so the asset stays
    /// addressable and the delete can be retried.
    pub async fn delete_asset(&self, id: Uuid) -> Result<(), ApiError> {
        let asset = self.require_asset(id).await?;

        let backend = self.storage.select(asset.backend).map_err(|e| {
            error!("Cannot delete asset {}: {}", asset.id, e);
            ApiError::StorageUnavailable
        })?;

        let mut failures = Vec::new();
        for path in asset.object_paths() {
            if let Err(e) = backend.delete(&path).await {
                error!("Failed to delete object {} of asset {}: {:#}", path, asset.id, e);
                failures.push(path);
            }
        }

        if !failures.is_empty() {
            return Err(ApiError::Internal(format!(
                "Failed to delete {} stored object(s); asset kept",
                failures.len()
            )));
        }

        if !self.db.delete_asset(asset.id).await? {
            warn!("Asset {} disappeared before its row was deleted", asset.id);
        }

        info!(
            "Deleted asset {} ({}) from collection {}",
            asset.id, asset.original_filename, asset.collection_id
        );
        Ok(())
    }

    pub async fn update_asset(&self, id: Uuid, update: &UpdateAsset) -> Result<Asset, ApiError> {
        self.db
            .update_asset(id, update)
            .await?
            .ok_or_else(|| ApiError::NotFound("Asset not found".to_string()))
    }

    /// Make an asset its collection's cover.
    pub async fn set_cover(&self, id: Uuid) -> Result<SetCoverResponse, ApiError> {
        let asset = self.require_asset(id).await?;

        if !self.db.set_collection_cover(asset.collection_id, asset.id).await? {
            return Err(ApiError::NotFound("Collection not found".to_string()));
        }

        let presented = self.resolver.present(&asset);
        Ok(SetCoverResponse {
            success: true,
            cover_url: presented.thumbnail_url,
        })
    }
}
