use anyhow::Result;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::models::{Asset, NewAsset, UpdateAsset};

const ASSET_COLUMNS: &str = r#"id, collection_id, backend, public_token, original_filename, storage_path,
    file_hash, file_size, mime_type, width, height, sort_order, is_active, metadata, title,
    alt_text, caption, link_url, derivatives, created_at, updated_at"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderOutcome {
    Reordered(usize),
    CollectionNotFound,
    /// Ids that do not belong to the collection
    UnknownAssets(Vec<Uuid>),
    DuplicateAssets(Vec<Uuid>),
}

impl Database {
    /// Insert an asset at the end of its collection's display order.
    ///
    /// The next display position is computed inside the INSERT so concurrent
    /// uploads into one collection can never read the same maximum. The first
    /// asset of a collection without a cover becomes its cover.
    pub async fn create_asset(&self, asset: &NewAsset) -> Result<Asset> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO assets
               (id, collection_id, backend, public_token, original_filename, storage_path, file_hash,
                file_size, mime_type, width, height, sort_order, is_active, metadata, derivatives,
                created_at, updated_at)
               SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                      COALESCE(MAX(sort_order) + 1, 0), 1, ?12, ?13, ?14, ?14
               FROM assets WHERE collection_id = ?2"#,
        )
        .bind(asset.id)
        .bind(asset.collection_id)
        .bind(asset.backend.as_str())
        .bind(&asset.public_token)
        .bind(&asset.original_filename)
        .bind(&asset.storage_path)
        .bind(&asset.file_hash)
        .bind(asset.file_size)
        .bind(&asset.mime_type)
        .bind(asset.width)
        .bind(asset.height)
        .bind(Json(&asset.metadata))
        .bind(Json(&asset.derivatives))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let cover = sqlx::query(
            "UPDATE collections SET cover_asset_id = ?, updated_at = ? WHERE id = ? AND cover_asset_id IS NULL",
        )
        .bind(asset.id)
        .bind(now)
        .bind(asset.collection_id)
        .execute(&mut *tx)
        .await?;
        if cover.rows_affected() > 0 {
            debug!("Asset {} is now the cover of collection {}", asset.id, asset.collection_id);
        }

        let created = sqlx::query_as::<_, Asset>(&format!("SELECT {} FROM assets WHERE id = ?", ASSET_COLUMNS))
            .bind(asset.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    pub async fn get_asset(&self, id: Uuid) -> Result<Option<Asset>> {
        self.with_retry(|| async {
            let asset = sqlx::query_as::<_, Asset>(&format!("SELECT {} FROM assets WHERE id = ?", ASSET_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| anyhow::anyhow!("Database query failed: {}", e))?;
            Ok(asset)
        })
        .await
    }

    pub async fn get_asset_by_token(&self, public_token: &str) -> Result<Option<Asset>> {
        self.with_retry(|| async {
            let asset = sqlx::query_as::<_, Asset>(&format!(
                "SELECT {} FROM assets WHERE public_token = ?",
                ASSET_COLUMNS
            ))
            .bind(public_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database query failed: {}", e))?;
            Ok(asset)
        })
        .await
    }

    /// Oldest asset in a collection with the given content hash.
    pub async fn find_asset_by_hash(&self, collection_id: Uuid, file_hash: &str) -> Result<Option<Asset>> {
        let asset = sqlx::query_as::<_, Asset>(&format!(
            "SELECT {} FROM assets WHERE collection_id = ? AND file_hash = ? ORDER BY created_at ASC LIMIT 1",
            ASSET_COLUMNS
        ))
        .bind(collection_id)
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(asset)
    }

    /// Assets of a collection in display order.
    pub async fn list_assets(&self, collection_id: Uuid) -> Result<Vec<Asset>> {
        let assets = sqlx::query_as::<_, Asset>(&format!(
            "SELECT {} FROM assets WHERE collection_id = ? ORDER BY sort_order ASC, created_at ASC",
            ASSET_COLUMNS
        ))
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(assets)
    }

    /// Explicit cover if set, otherwise the first asset in display order.
    pub async fn effective_cover(&self, collection_id: Uuid) -> Result<Option<Asset>> {
        let asset = sqlx::query_as::<_, Asset>(&format!(
            r#"SELECT {} FROM assets
               WHERE collection_id = ?1
               ORDER BY (id = (SELECT cover_asset_id FROM collections WHERE id = ?1)) DESC,
                        sort_order ASC, created_at ASC
               LIMIT 1"#,
            ASSET_COLUMNS
        ))
        .bind(collection_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(asset)
    }

    pub async fn update_asset(&self, id: Uuid, update: &UpdateAsset) -> Result<Option<Asset>> {
        let result = sqlx::query(
            r#"UPDATE assets SET
                   title = COALESCE(?, title),
                   alt_text = COALESCE(?, alt_text),
                   caption = COALESCE(?, caption),
                   link_url = COALESCE(?, link_url),
                   is_active = COALESCE(?, is_active),
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&update.title)
        .bind(&update.alt_text)
        .bind(&update.caption)
        .bind(&update.link_url)
        .bind(update.is_active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_asset(id).await
    }

    /// Apply a new display order. Listed ids take positions `0..n`; assets the
    /// caller left out keep their relative order after them.
    pub async fn reorder_assets(&self, collection_id: Uuid, order: &[Uuid]) -> Result<ReorderOutcome> {
        let mut seen = HashSet::new();
        let duplicates: Vec<Uuid> = order.iter().copied().filter(|id| !seen.insert(*id)).collect();
        if !duplicates.is_empty() {
            return Ok(ReorderOutcome::DuplicateAssets(duplicates));
        }

        let mut tx = self.pool.begin().await?;

        let collection_exists = sqlx::query("SELECT 1 FROM collections WHERE id = ?")
            .bind(collection_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !collection_exists {
            return Ok(ReorderOutcome::CollectionNotFound);
        }

        let existing: Vec<Uuid> = sqlx::query(
            "SELECT id FROM assets WHERE collection_id = ? ORDER BY sort_order ASC, created_at ASC",
        )
        .bind(collection_id)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| row.get("id"))
        .collect();

        let members: HashSet<Uuid> = existing.iter().copied().collect();
        let unknown: Vec<Uuid> = order.iter().copied().filter(|id| !members.contains(id)).collect();
        if !unknown.is_empty() {
            return Ok(ReorderOutcome::UnknownAssets(unknown));
        }

        let final_order = order
            .iter()
            .copied()
            .chain(existing.into_iter().filter(|id| !seen.contains(id)));

        let now = Utc::now();
        for (position, asset_id) in final_order.enumerate() {
            sqlx::query("UPDATE assets SET sort_order = ?, updated_at = ? WHERE id = ? AND collection_id = ?")
                .bind(position as i64)
                .bind(now)
                .bind(asset_id)
                .bind(collection_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ReorderOutcome::Reordered(order.len()))
    }

    /// Remove an asset row. If it was its collection's cover, the cover moves
    /// to the next asset in display order, or is cleared.
    pub async fn delete_asset(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let collection_id: Option<Uuid> = sqlx::query("SELECT collection_id FROM assets WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("collection_id"));
        let Some(collection_id) = collection_id else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM assets WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"UPDATE collections SET
                   cover_asset_id = (SELECT id FROM assets WHERE collection_id = ?1
                                     ORDER BY sort_order ASC, created_at ASC LIMIT 1),
                   updated_at = ?2
               WHERE id = ?1 AND cover_asset_id = ?3"#,
        )
        .bind(collection_id)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendName;
    use crate::models::CreateCollection;
    use crate::test_helpers::create_test_database;
    use crate::utils::security::generate_public_token;
    use std::collections::BTreeMap;

    async fn collection(db: &Database) -> Uuid {
        db.create_collection(&CreateCollection {
            name: format!("c-{}", Uuid::new_v4()),
            slug: None,
            tenant_id: None,
            layout: None,
            columns: None,
            gap: None,
            is_featured: None,
        })
        .await
        .unwrap()
        .id
    }

    fn new_asset(collection_id: Uuid, name: &str) -> NewAsset {
        NewAsset {
            id: Uuid::new_v4(),
            collection_id,
            backend: BackendName::Local,
            public_token: generate_public_token(),
            original_filename: name.to_string(),
            storage_path: format!("global/galleries/{}/2024/06/{}", collection_id, name),
            file_hash: "ab".repeat(32),
            file_size: 42,
            mime_type: "image/png".to_string(),
            width: Some(10),
            height: Some(10),
            metadata: serde_json::json!({}),
            derivatives: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_sort_order_appends_and_first_asset_is_cover() {
        let db = create_test_database().await;
        let cid = collection(&db).await;

        let a = db.create_asset(&new_asset(cid, "a.png")).await.unwrap();
        let b = db.create_asset(&new_asset(cid, "b.png")).await.unwrap();
        let c = db.create_asset(&new_asset(cid, "c.png")).await.unwrap();
        assert_eq!((a.sort_order, b.sort_order, c.sort_order), (0, 1, 2));

        let coll = db.get_collection(cid).await.unwrap().unwrap();
        assert_eq!(coll.cover_asset_id, Some(a.id));
    }

    #[tokio::test]
    async fn test_concurrent_inserts_get_distinct_positions() {
        let db = create_test_database().await;
        let cid = collection(&db).await;

        let inserts = (0..8).map(|i| {
            let db = db.clone();
            async move { db.create_asset(&new_asset(cid, &format!("{}.png", i))).await }
        });
        let results = futures::future::join_all(inserts).await;

        let mut positions: Vec<i64> = results.into_iter().map(|r| r.unwrap().sort_order).collect();
        positions.sort();
        assert_eq!(positions, (0..8).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_reorder_assigns_positions() {
        let db = create_test_database().await;
        let cid = collection(&db).await;
        let a = db.create_asset(&new_asset(cid, "a.png")).await.unwrap();
        let b = db.create_asset(&new_asset(cid, "b.png")).await.unwrap();
        let c = db.create_asset(&new_asset(cid, "c.png")).await.unwrap();

        let outcome = db.reorder_assets(cid, &[c.id, a.id]).await.unwrap();
        assert_eq!(outcome, ReorderOutcome::Reordered(2));

        let ids: Vec<Uuid> = db.list_assets(cid).await.unwrap().iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![c.id, a.id, b.id]);
    }

    #[tokio::test]
    async fn test_reorder_rejects_foreign_and_duplicate_ids() {
        let db = create_test_database().await;
        let cid = collection(&db).await;
        let other = collection(&db).await;
        let a = db.create_asset(&new_asset(cid, "a.png")).await.unwrap();
        let foreign = db.create_asset(&new_asset(other, "x.png")).await.unwrap();

        assert_eq!(
            db.reorder_assets(cid, &[a.id, foreign.id]).await.unwrap(),
            ReorderOutcome::UnknownAssets(vec![foreign.id])
        );
        assert_eq!(
            db.reorder_assets(cid, &[a.id, a.id]).await.unwrap(),
            ReorderOutcome::DuplicateAssets(vec![a.id])
        );
        assert_eq!(
            db.reorder_assets(Uuid::new_v4(), &[]).await.unwrap(),
            ReorderOutcome::CollectionNotFound
        );

        // Nothing moved
        assert_eq!(db.get_asset(a.id).await.unwrap().unwrap().sort_order, 0);
    }

    #[tokio::test]
    async fn test_deleting_cover_repoints_to_next_asset() {
        let db = create_test_database().await;
        let cid = collection(&db).await;
        let a = db.create_asset(&new_asset(cid, "a.png")).await.unwrap();
        let b = db.create_asset(&new_asset(cid, "b.png")).await.unwrap();

        assert!(db.delete_asset(a.id).await.unwrap());
        assert_eq!(db.get_collection(cid).await.unwrap().unwrap().cover_asset_id, Some(b.id));

        assert!(db.delete_asset(b.id).await.unwrap());
        assert_eq!(db.get_collection(cid).await.unwrap().unwrap().cover_asset_id, None);

        assert!(!db.delete_asset(b.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_effective_cover_prefers_explicit_cover() {
        let db = create_test_database().await;
        let cid = collection(&db).await;
        let a = db.create_asset(&new_asset(cid, "a.png")).await.unwrap();
        let b = db.create_asset(&new_asset(cid, "b.png")).await.unwrap();

        assert_eq!(db.effective_cover(cid).await.unwrap().unwrap().id, a.id);
        assert!(db.set_collection_cover(cid, b.id).await.unwrap());
        assert_eq!(db.effective_cover(cid).await.unwrap().unwrap().id, b.id);
    }

    #[tokio::test]
    async fn test_update_asset_is_partial() {
        let db = create_test_database().await;
        let cid = collection(&db).await;
        let a = db.create_asset(&new_asset(cid, "a.png")).await.unwrap();

        let updated = db
            .update_asset(
                a.id,
                &UpdateAsset {
                    title: Some("Dusk".to_string()),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title.as_deref(), Some("Dusk"));
        assert!(!updated.is_active);
        assert_eq!(updated.public_token, a.public_token);
        assert!(updated.alt_text.is_none());
    }
}
