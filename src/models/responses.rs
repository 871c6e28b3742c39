use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::BackendName;
use crate::errors::ErrorCategory;

/// Public representation of an asset. Internal storage keys are never exposed
/// as such; every object is reachable through `url` and `derivatives`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssetResponse {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub public_token: String,
    pub backend: BackendName,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_hash: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub sort_order: i64,
    pub is_active: bool,
    pub title: Option<String>,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
    pub link_url: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    /// URL of the original
    pub url: String,
    /// Thumbnail URL, or the original's URL when no thumbnail exists
    pub thumbnail_url: String,
    /// Size class -> URL
    pub derivatives: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadFailure {
    pub filename: String,
    pub error: String,
    pub category: ErrorCategory,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub uploaded: Vec<AssetResponse>,
    pub errors: Vec<UploadFailure>,
    pub success_count: usize,
    pub error_count: usize,
}

impl UploadResponse {
    pub fn new(uploaded: Vec<AssetResponse>, errors: Vec<UploadFailure>) -> Self {
        Self {
            success_count: uploaded.len(),
            error_count: errors.len(),
            uploaded,
            errors,
        }
    }
}

/// Body of a reorder request. `order` is kept untyped so a missing or
/// non-array value can be reported as a bad request instead of a 422.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReorderRequest {
    #[serde(default)]
    #[schema(value_type = Vec<Uuid>)]
    pub order: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReorderResponse {
    pub success: bool,
    pub reordered: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetCoverResponse {
    pub success: bool,
    pub cover_url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_failure_round_trips_category() {
        let failure = UploadFailure {
            filename: "notes.pdf".to_string(),
            error: "Unsupported file type: application/pdf".to_string(),
            category: ErrorCategory::Content,
        };

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["category"], "content");

        let parsed: UploadFailure = serde_json::from_value(serde_json::json!({
            "filename": "a.jpg",
            "error": "Storage backend unavailable",
            "category": "not_found",
        }))
        .unwrap();
        assert_eq!(parsed.category, ErrorCategory::NotFound);
    }
}
