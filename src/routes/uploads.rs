use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::BackendName,
    errors::UploadError,
    ingestion::{IngestionResult, MediaIngestionRequest},
    models::{AssetResponse, UploadFailure, UploadResponse},
    AppState,
};

/// Multipart field names that carry files.
const FILE_FIELDS: [&str; 3] = ["file", "files", "files[]"];

pub fn router() -> Router<Arc<AppState>> {
    // Size is enforced per file while staging, not on the whole body
    Router::new().route(
        "/{id}/assets",
        post(upload_assets).layer(DefaultBodyLimit::disable()),
    )
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub backend: Option<String>,
}

/// Content type hint for a part: what the client declared, else a guess from
/// the file name. Either way it is only advisory.
fn mime_hint(declared: Option<&str>, filename: &str) -> Option<String> {
    declared
        .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(filename).first_raw().map(str::to_string))
}

fn failure(filename: &str, error: &UploadError) -> UploadFailure {
    UploadFailure {
        filename: filename.to_string(),
        error: error.to_string(),
        category: error.category(),
    }
}

#[utoipa::path(
    post,
    path = "/api/collections/{id}/assets",
    tag = "assets",
    params(
        ("id" = Uuid, Path, description = "Collection ID"),
        ("backend" = Option<String>, Query, description = "Target storage backend (local, media, r2, s3)")
    ),
    request_body(content = String, description = "Multipart form with one or more `file` parts", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Per-file upload results", body = UploadResponse),
        (status = 400, description = "No files provided"),
        (status = 404, description = "Collection not found")
    )
)]
pub async fn upload_assets(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, UploadError> {
    let collection = state
        .db
        .get_collection(id)
        .await
        .map_err(|e| UploadError::Database(e.to_string()))?
        .ok_or(UploadError::CollectionNotFound)?;

    let mut backend = BackendName::from_selector(query.backend.as_deref(), state.config.default_backend);
    let mut uploaded: Vec<AssetResponse> = Vec::new();
    let mut errors: Vec<UploadFailure> = Vec::new();
    let mut files_seen = 0usize;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Multipart stream for collection {} broke off: {}", id, e);
                let error = UploadError::Transport(e.body_text());
                errors.push(failure("", &error));
                break;
            }
        };

        let name = field.name().unwrap_or_default().to_string();

        if name == "backend" {
            match field.text().await {
                Ok(selector) => {
                    backend = BackendName::from_selector(Some(&selector), state.config.default_backend);
                }
                Err(e) => {
                    errors.push(failure("", &UploadError::Transport(e.body_text())));
                    break;
                }
            }
            continue;
        }

        if !FILE_FIELDS.contains(&name.as_str()) {
            debug!("Ignoring multipart field '{}'", name);
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let hint = mime_hint(field.content_type(), &filename);
        files_seen += 1;

        let staged = match state.ingestion.stage(field).await {
            Ok(staged) => staged,
            Err(e) => {
                warn!("Failed to receive {}: {}", filename, e);
                let transport = matches!(e, UploadError::Transport(_));
                errors.push(failure(&filename, &e));
                if transport {
                    // The rest of the body is unreadable after a broken part
                    break;
                }
                continue;
            }
        };

        let request = MediaIngestionRequest {
            collection: collection.clone(),
            original_filename: filename.clone(),
            mime_hint: hint,
            backend,
        };

        match state.ingestion.ingest(&request, &staged).await {
            Ok(IngestionResult::Created(asset)) => uploaded.push(state.resolver.present(&asset)),
            Ok(IngestionResult::ExistingAsset(asset)) => {
                debug!("{} matched existing asset {}", filename, asset.id);
                uploaded.push(state.resolver.present(&asset));
            }
            Err(e) => {
                warn!("Upload of {} into collection {} failed: {}", filename, id, e);
                errors.push(failure(&filename, &e));
            }
        }
    }

    if files_seen == 0 && errors.is_empty() {
        return Err(UploadError::NoFiles);
    }

    let response = UploadResponse::new(uploaded, errors);
    info!(
        "Upload into collection {}: {} stored, {} failed",
        id, response.success_count, response.error_count
    );
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_hint_prefers_declared_type() {
        assert_eq!(mime_hint(Some("image/png"), "a.jpg").as_deref(), Some("image/png"));
    }

    #[test]
    fn test_mime_hint_guesses_from_name() {
        assert_eq!(mime_hint(None, "photo.JPG").as_deref(), Some("image/jpeg"));
        assert_eq!(
            mime_hint(Some("application/octet-stream"), "logo.svg").as_deref(),
            Some("image/svg+xml")
        );
        assert_eq!(mime_hint(None, "noextension"), None);
    }
}
