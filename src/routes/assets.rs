use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{patch, post},
    Json, Router,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    errors::ApiError,
    models::{AssetResponse, DeleteResponse, SetCoverResponse, UpdateAsset},
    AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{id}", patch(update_asset).delete(delete_asset))
        .route("/{id}/cover", post(set_cover))
}

#[utoipa::path(
    patch,
    path = "/api/assets/{id}",
    tag = "assets",
    params(
        ("id" = Uuid, Path, description = "Asset ID")
    ),
    request_body = UpdateAsset,
    responses(
        (status = 200, description = "Updated asset", body = AssetResponse),
        (status = 404, description = "Asset not found")
    )
)]
pub async fn update_asset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<UpdateAsset>,
) -> Result<Json<AssetResponse>, ApiError> {
    let asset = state.assets.update_asset(id, &update).await?;
    Ok(Json(state.resolver.present(&asset)))
}

#[utoipa::path(
    delete,
    path = "/api/assets/{id}",
    tag = "assets",
    params(
        ("id" = Uuid, Path, description = "Asset ID")
    ),
    responses(
        (status = 200, description = "Asset and all of its stored objects deleted", body = DeleteResponse),
        (status = 404, description = "Asset not found"),
        (status = 500, description = "Stored objects could not be removed; asset kept")
    )
)]
pub async fn delete_asset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.assets.delete_asset(id).await?;
    Ok(Json(DeleteResponse { success: true }))
}

#[utoipa::path(
    post,
    path = "/api/assets/{id}/cover",
    tag = "assets",
    params(
        ("id" = Uuid, Path, description = "Asset ID")
    ),
    responses(
        (status = 200, description = "Asset is now its collection's cover", body = SetCoverResponse),
        (status = 404, description = "Asset not found")
    )
)]
pub async fn set_cover(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SetCoverResponse>, ApiError> {
    let response = state.assets.set_cover(id).await?;
    info!("Asset {} set as collection cover", id);
    Ok(Json(response))
}
