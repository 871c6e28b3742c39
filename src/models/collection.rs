use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::responses::AssetResponse;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CollectionLayout {
    #[default]
    Grid,
    Masonry,
    Carousel,
    Justified,
}

impl std::fmt::Display for CollectionLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionLayout::Grid => write!(f, "grid"),
            CollectionLayout::Masonry => write!(f, "masonry"),
            CollectionLayout::Carousel => write!(f, "carousel"),
            CollectionLayout::Justified => write!(f, "justified"),
        }
    }
}

impl TryFrom<String> for CollectionLayout {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "grid" => Ok(CollectionLayout::Grid),
            "masonry" => Ok(CollectionLayout::Masonry),
            "carousel" => Ok(CollectionLayout::Carousel),
            "justified" => Ok(CollectionLayout::Justified),
            _ => Err(format!("Invalid collection layout: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Collection {
    pub id: Uuid,
    /// Owning tenant; `None` for global collections
    pub tenant_id: Option<i64>,
    pub name: String,
    pub slug: String,
    #[sqlx(try_from = "String")]
    pub layout: CollectionLayout,
    pub columns: i64,
    /// Gap between items in pixels
    pub gap: i64,
    pub is_active: bool,
    pub is_featured: bool,
    pub cover_asset_id: Option<Uuid>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    /// Top-level storage namespace for this collection's objects.
    pub fn owner_scope(&self) -> String {
        match self.tenant_id {
            Some(tenant_id) => format!("tenant_{}", tenant_id),
            None => "global".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateCollection {
    pub name: String,
    /// Derived from the name when omitted
    pub slug: Option<String>,
    pub tenant_id: Option<i64>,
    pub layout: Option<CollectionLayout>,
    pub columns: Option<i64>,
    pub gap: Option<i64>,
    pub is_featured: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateCollection {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub layout: Option<CollectionLayout>,
    pub columns: Option<i64>,
    pub gap: Option<i64>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    pub sort_order: Option<i64>,
}

/// A collection with its ordered assets and effective cover.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CollectionDetail {
    #[serde(flatten)]
    pub collection: Collection,
    pub cover: Option<AssetResponse>,
    pub assets: Vec<AssetResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_round_trips_through_strings() {
        for layout in [
            CollectionLayout::Grid,
            CollectionLayout::Masonry,
            CollectionLayout::Carousel,
            CollectionLayout::Justified,
        ] {
            assert_eq!(CollectionLayout::try_from(layout.to_string()), Ok(layout));
        }
        assert!(CollectionLayout::try_from("mosaic".to_string()).is_err());
    }
}
