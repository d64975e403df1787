//! Serves locally stored receipt images over HTTP.

use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::fs;
use tracing::{debug, warn};

use crate::local::resolve_key;
use crate::mime_detect::{detect_mime_type, is_inline_safe};

/// Router serving `GET /*key` from `media_dir`. Mount it under `/media`.
pub fn media_router(media_dir: PathBuf) -> Router {
    Router::new()
        .route("/*key", get(serve_media))
        .with_state(Arc::new(media_dir))
}

async fn serve_media(Path(key): Path<String>, State(root): State<Arc<PathBuf>>) -> Response {
    let Ok(path) = resolve_key(&root, &key) else {
        warn!(key = %key, "Rejected media key outside the store");
        return (StatusCode::BAD_REQUEST, "Invalid media key").into_response();
    };

    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(key = %key, "Media key not in store");
            return (StatusCode::NOT_FOUND, "Media file not found").into_response();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read media file");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read media").into_response();
        }
    };
    (StatusCode::OK, receipt_headers(&key, detect_mime_type(&path)), bytes).into_response()
}

/// Stored receipts never change; clients may cache them for a day.
fn receipt_headers(key: &str, mime: &'static str) -> [(HeaderName, HeaderValue); 3] {
    let filename = key.rsplit('/').next().unwrap_or(key);
    let mode = if is_inline_safe(mime) { "inline" } else { "attachment" };
    let disposition = HeaderValue::from_str(&format!("{mode}; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    [
        (header::CONTENT_TYPE, HeaderValue::from_static(mime)),
        (header::CONTENT_DISPOSITION, disposition),
        (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=86400")),
    ]
}
