//! Header checks for the upload API and the worker callback.

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use crate::api::AppState;
use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const WORKER_SECRET_HEADER: &str = "x-worker-secret";

fn secrets_match(expected: &str, given: &str) -> bool {
    expected.len() == given.len()
        && expected
            .bytes()
            .zip(given.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Requires `X-API-Key` to equal the configured key. With no key configured
/// every request is rejected.
pub struct RequireApiKey;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match (state.api_key.as_deref(), header(parts, API_KEY_HEADER)) {
            (Some(expected), Some(given)) if secrets_match(expected, given) => Ok(Self),
            (None, _) => {
                warn!(path = %parts.uri.path(), "Rejected request: no API key configured");
                Err(ApiError::forbidden())
            }
            _ => {
                warn!(path = %parts.uri.path(), "Rejected request: bad or missing API key");
                Err(ApiError::forbidden())
            }
        }
    }
}

/// Requires `X-Worker-Secret` when a worker secret is configured.
pub struct RequireWorkerSecret;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireWorkerSecret {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.worker_secret.as_deref() else {
            return Ok(Self);
        };
        match header(parts, WORKER_SECRET_HEADER) {
            Some(given) if secrets_match(expected, given) => Ok(Self),
            _ => {
                warn!("Rejected worker callback: bad or missing worker secret");
                Err(ApiError::forbidden())
            }
        }
    }
}
