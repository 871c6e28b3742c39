use std::sync::Arc;

use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::{
    config::BackendName,
    errors::ErrorCategory,
    models::{
        AssetResponse, Collection, CollectionDetail, CollectionLayout, CreateCollection, DeleteResponse,
        HealthResponse, ReorderRequest, ReorderResponse, SetCoverResponse, UpdateAsset, UpdateCollection,
        UploadFailure, UploadResponse,
    },
    AppState,
};

pub mod assets;
pub mod collections;
pub mod public;
pub mod uploads;

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        collections::create_collection,
        collections::list_collections,
        collections::get_collection,
        collections::update_collection,
        collections::delete_collection,
        collections::reorder_assets,
        uploads::upload_assets,
        assets::update_asset,
        assets::delete_asset,
        assets::set_cover,
        public::serve_original,
        public::serve_derivative,
    ),
    components(schemas(
        AssetResponse,
        BackendName,
        Collection,
        CollectionDetail,
        CollectionLayout,
        CreateCollection,
        DeleteResponse,
        ErrorCategory,
        HealthResponse,
        ReorderRequest,
        ReorderResponse,
        SetCoverResponse,
        UpdateAsset,
        UpdateCollection,
        UploadFailure,
        UploadResponse,
    )),
    tags(
        (name = "collections", description = "Collection management"),
        (name = "assets", description = "Asset upload and management"),
        (name = "media", description = "Token-gated public reads"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Everything mounted under `/api`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/openapi.json", get(openapi_json))
        .nest("/collections", collections::router().merge(uploads::router()))
        .nest("/assets", assets::router())
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
