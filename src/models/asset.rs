use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::BackendName;

/// One cataloged media object.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Asset {
    pub id: Uuid,
    pub collection_id: Uuid,
    #[sqlx(try_from = "String")]
    pub backend: BackendName,
    pub public_token: String,
    pub original_filename: String,
    /// Backend-relative key of the original
    pub storage_path: String,
    /// Lowercase hex SHA-256 of the stored bytes
    pub file_hash: String,
    pub file_size: i64,
    pub mime_type: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub sort_order: i64,
    pub is_active: bool,
    pub metadata: Json<serde_json::Value>,
    pub title: Option<String>,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
    pub link_url: Option<String>,
    /// Size class -> backend-relative key
    pub derivatives: Json<BTreeMap<String, String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    /// Whether `path` is one of the objects this asset owns.
    pub fn owns_path(&self, path: &str) -> bool {
        self.storage_path == path || self.derivatives.values().any(|p| p == path)
    }

    /// Size class of a derivative path, if it is one.
    pub fn size_class_of(&self, path: &str) -> Option<&str> {
        self.derivatives
            .iter()
            .find(|(_, p)| p.as_str() == path)
            .map(|(class, _)| class.as_str())
    }

    /// Every physical object backing this asset, original first.
    pub fn object_paths(&self) -> Vec<String> {
        std::iter::once(self.storage_path.clone())
            .chain(self.derivatives.values().cloned())
            .collect()
    }
}

/// Everything needed to insert an asset row. Display order and timestamps are
/// assigned by the database layer.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub backend: BackendName,
    pub public_token: String,
    pub original_filename: String,
    pub storage_path: String,
    pub file_hash: String,
    pub file_size: i64,
    pub mime_type: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub metadata: serde_json::Value,
    pub derivatives: BTreeMap<String, String>,
}

/// Partial update of editable asset fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateAsset {
    pub title: Option<String>,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
    pub link_url: Option<String>,
    pub is_active: Option<bool>,
}
