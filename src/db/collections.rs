use anyhow::Result;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::models::{Collection, CollectionLayout, CreateCollection, UpdateCollection};
use crate::services::naming::slugify;

const COLLECTION_COLUMNS: &str = r#"id, tenant_id, name, slug, layout, columns, gap, is_active,
    is_featured, cover_asset_id, sort_order, created_at, updated_at"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteCollectionOutcome {
    Deleted,
    NotFound,
    /// The collection still holds assets
    NotEmpty,
}

impl Database {
    pub async fn create_collection(&self, request: &CreateCollection) -> Result<Collection> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let slug = match request.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => slugify(slug),
            None => slugify(&request.name),
        };

        sqlx::query(
            r#"INSERT INTO collections
               (id, tenant_id, name, slug, layout, columns, gap, is_active, is_featured, sort_order, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?,
                       (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM collections), ?, ?)"#,
        )
        .bind(id)
        .bind(request.tenant_id)
        .bind(request.name.trim())
        .bind(&slug)
        .bind(request.layout.unwrap_or_default().to_string())
        .bind(request.columns.unwrap_or(3))
        .bind(request.gap.unwrap_or(10))
        .bind(request.is_featured.unwrap_or(false))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_collection(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Collection {} vanished after insert", id))
    }

    pub async fn get_collection(&self, id: Uuid) -> Result<Option<Collection>> {
        self.with_retry(|| async {
            let collection = sqlx::query_as::<_, Collection>(&format!(
                "SELECT {} FROM collections WHERE id = ?",
                COLLECTION_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database query failed: {}", e))?;
            Ok(collection)
        })
        .await
    }

    pub async fn list_collections(&self, tenant_id: Option<i64>) -> Result<Vec<Collection>> {
        let collections = match tenant_id {
            Some(tenant_id) => {
                sqlx::query_as::<_, Collection>(&format!(
                    "SELECT {} FROM collections WHERE tenant_id = ? ORDER BY sort_order ASC, name ASC",
                    COLLECTION_COLUMNS
                ))
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Collection>(&format!(
                    "SELECT {} FROM collections ORDER BY sort_order ASC, name ASC",
                    COLLECTION_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(collections)
    }

    pub async fn update_collection(&self, id: Uuid, update: &UpdateCollection) -> Result<Option<Collection>> {
        let slug = update
            .slug
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(slugify);

        let result = sqlx::query(
            r#"UPDATE collections SET
                   name = COALESCE(?, name),
                   slug = COALESCE(?, slug),
                   layout = COALESCE(?, layout),
                   columns = COALESCE(?, columns),
                   gap = COALESCE(?, gap),
                   is_active = COALESCE(?, is_active),
                   is_featured = COALESCE(?, is_featured),
                   sort_order = COALESCE(?, sort_order),
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(update.name.as_deref().map(str::trim))
        .bind(slug)
        .bind(update.layout.map(|l: CollectionLayout| l.to_string()))
        .bind(update.columns)
        .bind(update.gap)
        .bind(update.is_active)
        .bind(update.is_featured)
        .bind(update.sort_order)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_collection(id).await
    }

    /// Delete a collection only when it no longer holds any asset.
    pub async fn delete_collection(&self, id: Uuid) -> Result<DeleteCollectionOutcome> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM collections WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Ok(DeleteCollectionOutcome::NotFound);
        }

        let asset_count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM assets WHERE collection_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?
            .get("count");
        if asset_count > 0 {
            return Ok(DeleteCollectionOutcome::NotEmpty);
        }

        sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(DeleteCollectionOutcome::Deleted)
    }

    pub async fn set_collection_cover(&self, collection_id: Uuid, asset_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE collections SET cover_asset_id = ?, updated_at = ?
               WHERE id = ? AND EXISTS (SELECT 1 FROM assets WHERE id = ? AND collection_id = ?)"#,
        )
        .bind(asset_id)
        .bind(Utc::now())
        .bind(collection_id)
        .bind(asset_id)
        .bind(collection_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_assets(&self, collection_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM assets WHERE collection_id = ?")
            .bind(collection_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }
}
