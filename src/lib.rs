pub mod commands;
pub mod config;
pub mod db;
pub mod errors;
pub mod ingestion;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;
pub mod utils;


#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use config::Config;
use db::Database;
use ingestion::MediaIngestionService;
use services::{asset_service::AssetService, public_resolver::PublicResolver};
use storage::StorageRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub storage: Arc<StorageRegistry>,
    pub ingestion: Arc<MediaIngestionService>,
    pub resolver: Arc<PublicResolver>,
    pub assets: Arc<AssetService>,
}

impl AppState {
    /// Wire every service around an open database and a built storage registry.
    pub fn new(db: Database, config: Config, storage: Arc<StorageRegistry>) -> Self {
        let resolver = Arc::new(PublicResolver::new(
            db.clone(),
            storage.clone(),
            config.public_base_url.clone(),
        ));
        let ingestion = Arc::new(MediaIngestionService::new(db.clone(), storage.clone(), &config));
        let assets = Arc::new(AssetService::new(db.clone(), storage.clone(), resolver.clone()));

        Self {
            db,
            config,
            storage,
            ingestion,
            resolver,
            assets,
        }
    }
}

/// Connect to the database, run migrations and build every storage backend.
pub async fn build_state(config: Config) -> Result<Arc<AppState>> {
    let db = Database::new(&config.database_url).await?;
    db.migrate().await?;

    let storage = Arc::new(StorageRegistry::from_config(&config).await);
    Ok(Arc::new(AppState::new(db, config, storage)))
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", routes::api_router())
        .merge(routes::public::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
