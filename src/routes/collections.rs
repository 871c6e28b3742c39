use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    db::{DeleteCollectionOutcome, ReorderOutcome},
    errors::{is_unique_violation, ApiError},
    models::{
        Collection, CollectionDetail, CreateCollection, DeleteResponse, ReorderRequest, ReorderResponse,
        UpdateCollection,
    },
    AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_collection).get(list_collections))
        .route(
            "/{id}",
            get(get_collection).put(update_collection).delete(delete_collection),
        )
        .route("/{id}/reorder", post(reorder_assets))
}

#[derive(Debug, Deserialize)]
pub struct ListCollectionsQuery {
    pub tenant_id: Option<i64>,
}

fn conflict_or_internal(e: anyhow::Error, what: &str) -> ApiError {
    if is_unique_violation(&e) {
        ApiError::Conflict(format!("A collection with this slug already exists ({})", what))
    } else {
        ApiError::from(e)
    }
}

#[utoipa::path(
    post,
    path = "/api/collections",
    tag = "collections",
    request_body = CreateCollection,
    responses(
        (status = 201, description = "Collection created", body = Collection),
        (status = 400, description = "Invalid collection"),
        (status = 409, description = "Slug already in use")
    )
)]
pub async fn create_collection(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateCollection>,
) -> Result<(StatusCode, Json<Collection>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Collection name is required".to_string()));
    }

    let collection = state
        .db
        .create_collection(&request)
        .await
        .map_err(|e| conflict_or_internal(e, &request.name))?;

    info!("Created collection {} ({})", collection.id, collection.slug);
    Ok((StatusCode::CREATED, Json(collection)))
}

#[utoipa::path(
    get,
    path = "/api/collections",
    tag = "collections",
    params(
        ("tenant_id" = Option<i64>, Query, description = "Only collections of this tenant")
    ),
    responses(
        (status = 200, description = "Collections in display order", body = Vec<Collection>)
    )
)]
pub async fn list_collections(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCollectionsQuery>,
) -> Result<Json<Vec<Collection>>, ApiError> {
    let collections = state.db.list_collections(query.tenant_id).await?;
    Ok(Json(collections))
}

#[utoipa::path(
    get,
    path = "/api/collections/{id}",
    tag = "collections",
    params(
        ("id" = Uuid, Path, description = "Collection ID")
    ),
    responses(
        (status = 200, description = "Collection with its ordered assets", body = CollectionDetail),
        (status = 404, description = "Collection not found")
    )
)]
pub async fn get_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CollectionDetail>, ApiError> {
    let collection = state
        .db
        .get_collection(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Collection not found".to_string()))?;

    let assets = state.db.list_assets(id).await?;
    let cover = state.db.effective_cover(id).await?;

    Ok(Json(CollectionDetail {
        collection,
        cover: cover.map(|asset| state.resolver.present(&asset)),
        assets: assets.iter().map(|asset| state.resolver.present(asset)).collect(),
    }))
}

#[utoipa::path(
    put,
    path = "/api/collections/{id}",
    tag = "collections",
    params(
        ("id" = Uuid, Path, description = "Collection ID")
    ),
    request_body = UpdateCollection,
    responses(
        (status = 200, description = "Updated collection", body = Collection),
        (status = 400, description = "Invalid update"),
        (status = 404, description = "Collection not found"),
        (status = 409, description = "Slug already in use")
    )
)]
pub async fn update_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<UpdateCollection>,
) -> Result<Json<Collection>, ApiError> {
    if matches!(update.name.as_deref(), Some(name) if name.trim().is_empty()) {
        return Err(ApiError::BadRequest("Collection name cannot be empty".to_string()));
    }

    let collection = state
        .db
        .update_collection(id, &update)
        .await
        .map_err(|e| conflict_or_internal(e, &id.to_string()))?
        .ok_or_else(|| ApiError::NotFound("Collection not found".to_string()))?;

    Ok(Json(collection))
}

#[utoipa::path(
    delete,
    path = "/api/collections/{id}",
    tag = "collections",
    params(
        ("id" = Uuid, Path, description = "Collection ID")
    ),
    responses(
        (status = 200, description = "Collection deleted", body = DeleteResponse),
        (status = 404, description = "Collection not found"),
        (status = 409, description = "Collection still holds assets")
    )
)]
pub async fn delete_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    match state.db.delete_collection(id).await? {
        DeleteCollectionOutcome::Deleted => {
            info!("Deleted collection {}", id);
            Ok(Json(DeleteResponse { success: true }))
        }
        DeleteCollectionOutcome::NotFound => Err(ApiError::NotFound("Collection not found".to_string())),
        DeleteCollectionOutcome::NotEmpty => Err(ApiError::Conflict(
            "Collection still contains assets; delete them first".to_string(),
        )),
    }
}

/// Turn the raw `order` payload into asset ids.
fn parse_order(order: Option<serde_json::Value>) -> Result<Vec<Uuid>, ApiError> {
    let items = match order {
        Some(serde_json::Value::Array(items)) => items,
        _ => return Err(ApiError::BadRequest("Invalid order data".to_string())),
    };

    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid asset id in order: {}", item)))
        })
        .collect()
}

#[utoipa::path(
    post,
    path = "/api/collections/{id}/reorder",
    tag = "collections",
    params(
        ("id" = Uuid, Path, description = "Collection ID")
    ),
    request_body = ReorderRequest,
    responses(
        (status = 200, description = "Assets reordered", body = ReorderResponse),
        (status = 400, description = "Missing or invalid order"),
        (status = 404, description = "Collection not found")
    )
)]
pub async fn reorder_assets(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReorderRequest>,
) -> Result<Json<ReorderResponse>, ApiError> {
    let order = parse_order(request.order)?;

    match state.db.reorder_assets(id, &order).await {
        Ok(ReorderOutcome::Reordered(count)) => {
            info!("Reordered {} asset(s) in collection {}", count, id);
            Ok(Json(ReorderResponse {
                success: true,
                reordered: count,
            }))
        }
        Ok(ReorderOutcome::CollectionNotFound) => Err(ApiError::NotFound("Collection not found".to_string())),
        Ok(ReorderOutcome::UnknownAssets(ids)) => {
            warn!("Reorder of collection {} named {} foreign asset(s)", id, ids.len());
            Err(ApiError::BadRequest(format!(
                "Assets not in this collection: {}",
                join_ids(&ids)
            )))
        }
        Ok(ReorderOutcome::DuplicateAssets(ids)) => Err(ApiError::BadRequest(format!(
            "Assets listed more than once: {}",
            join_ids(&ids)
        ))),
        Err(e) => {
            error!("Failed to reorder collection {}: {:#}", id, e);
            Err(ApiError::Internal("Failed to reorder assets".to_string()))
        }
    }
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", ")
}
