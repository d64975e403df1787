//! OAuth access tokens for Google APIs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use slipscan_core::{SlipError, SlipResult, TokenSource};
use tokio::sync::Mutex;
use tracing::debug;

pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A fixed token, e.g. from `gcloud auth print-access-token`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> SlipResult<String> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Default service-account token from the GCE/Cloud Run metadata server.
pub struct MetadataServerToken {
    client: reqwest::Client,
    endpoint: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl MetadataServerToken {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_endpoint(client, METADATA_TOKEN_URL)
    }

    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> SlipResult<TokenResponse> {
        let resp = self
            .client
            .get(&self.endpoint)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| SlipError::transport("metadata", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SlipError::upstream("metadata", status.as_u16(), body));
        }
        resp.json()
            .await
            .map_err(|e| SlipError::Parse(format!("metadata token response: {e}")))
    }
}

#[async_trait]
impl TokenSource for MetadataServerToken {
    async fn access_token(&self) -> SlipResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some((token, refresh_at)) = cached.as_ref() {
            if Instant::now() < *refresh_at {
                return Ok(token.clone());
            }
        }
        let fresh = self.fetch().await?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!(expires_in = fresh.expires_in, "Fetched metadata access token");
        *cached = Some((fresh.access_token.clone(), Instant::now() + lifetime));
        Ok(fresh.access_token)
    }
}
