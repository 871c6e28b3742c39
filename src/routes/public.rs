//! Public, token-gated reads of stored media.
//!
//! The original lives at `/media/{token}`; derivatives at
//! `/media/file?path=...&token=...`. Both either redirect to a publicly
//! fronted backend or stream the object with long-lived cache headers.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{
    errors::ErrorCategory,
    services::public_resolver::{Resolved, ResolveError},
    AppState,
};

const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
const SVG_CSP: &str = "default-src 'none'; style-src 'unsafe-inline'; sandbox";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media/file", get(serve_derivative))
        .route("/media/{token}", get(serve_original))
}

#[derive(Debug, Deserialize)]
pub struct DerivativeQuery {
    pub path: Option<String>,
    pub token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/media/{token}",
    tag = "media",
    params(
        ("token" = String, Path, description = "Public token of the asset")
    ),
    responses(
        (status = 200, description = "Original bytes"),
        (status = 304, description = "Client copy is current"),
        (status = 307, description = "Redirect to the backend's public URL"),
        (status = 404, description = "Unknown token"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn serve_original(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.resolver.resolve(&token, None).await {
        Ok(resolved) => respond(resolved, &headers),
        Err(e) => resolve_error(e),
    }
}

#[utoipa::path(
    get,
    path = "/media/file",
    tag = "media",
    params(
        ("path" = String, Query, description = "Backend-relative path of the derivative"),
        ("token" = String, Query, description = "Public token of the owning asset")
    ),
    responses(
        (status = 200, description = "Derivative bytes"),
        (status = 304, description = "Client copy is current"),
        (status = 307, description = "Redirect to the backend's public URL"),
        (status = 404, description = "Unknown token or path"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn serve_derivative(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DerivativeQuery>,
    headers: HeaderMap,
) -> Response {
    let (Some(path), Some(token)) = (query.path, query.token) else {
        return resolve_error(ResolveError::NotFound);
    };

    match state.resolver.resolve(&token, Some(&path)).await {
        Ok(resolved) => respond(resolved, &headers),
        Err(e) => resolve_error(e),
    }
}

fn resolve_error(e: ResolveError) -> Response {
    let (status, category) = match e {
        ResolveError::NotFound => (StatusCode::NOT_FOUND, ErrorCategory::Integrity),
        ResolveError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, ErrorCategory::Configuration),
    };
    let body = Json(serde_json::json!({
        "error": category,
        "message": e.to_string(),
    }));
    (status, body).into_response()
}

/// Whether an `If-None-Match` header value matches `etag`.
fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}

fn respond(resolved: Resolved, request_headers: &HeaderMap) -> Response {
    let stream = match resolved {
        Resolved::Redirect(url) => return Redirect::temporary(&url).into_response(),
        Resolved::Stream(stream) => stream,
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    if let Ok(etag) = HeaderValue::from_str(&stream.etag) {
        headers.insert(header::ETAG, etag);
    }

    let not_modified = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| etag_matches(v, &stream.etag))
        .unwrap_or(false);
    if not_modified {
        debug!("Serving 304 for {}", stream.etag);
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }

    let content_type = HeaderValue::from_str(&stream.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    if stream.content_type == "image/svg+xml" {
        headers.insert(header::CONTENT_SECURITY_POLICY, HeaderValue::from_static(SVG_CSP));
    }
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = stream.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    let body = Body::from_stream(ReaderStream::new(stream.reader));
    (StatusCode::OK, headers, body).into_response()
}
