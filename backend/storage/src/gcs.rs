//! Google Cloud Storage blob store over the JSON API.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use slipscan_core::{BlobStore, SlipError, SlipResult, StoredBlob, TokenSource};
use tracing::info;

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

pub struct GcsBlobStore {
    client: reqwest::Client,
    bucket: String,
    make_public: bool,
    endpoint: String,
    tokens: Arc<dyn TokenSource>,
}

impl GcsBlobStore {
    pub fn new(
        client: reqwest::Client,
        bucket: impl Into<String>,
        make_public: bool,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            make_public,
            endpoint: GCS_ENDPOINT.to_string(),
            tokens,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{key}", self.endpoint, self.bucket)
    }

    async fn error_for(resp: reqwest::Response) -> SlipError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        SlipError::upstream("gcs", status, body)
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    fn name(&self) -> &str {
        "gcs"
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> SlipResult<StoredBlob> {
        let token = self.tokens.access_token().await?;
        let mut url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.endpoint,
            self.bucket,
            urlencoding::encode(key)
        );
        if self.make_public {
            url.push_str("&predefinedAcl=publicRead");
        }
        let size = data.len();
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| SlipError::transport("gcs", e))?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }
        info!(bucket = %self.bucket, key, bytes = size, "Uploaded receipt image to GCS");
        Ok(StoredBlob {
            key: key.to_string(),
            url: self.public_url(key),
        })
    }

    async fn get(&self, key: &str) -> SlipResult<Bytes> {
        let token = self.tokens.access_token().await?;
        let url = format!(
            "{}/storage/v1/b/{}/o/{}?alt=media",
            self.endpoint,
            self.bucket,
            urlencoding::encode(key)
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SlipError::transport("gcs", e))?;
        match resp.status() {
            s if s.is_success() => resp.bytes().await.map_err(|e| SlipError::transport("gcs", e)),
            reqwest::StatusCode::NOT_FOUND => Err(SlipError::NotFound(format!("gs://{}/{key}", self.bucket))),
            _ => Err(Self::error_for(resp).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Router,
    };
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    type Objects = Arc<Mutex<HashMap<String, Vec<u8>>>>;

    async fn fake_gcs() -> (String, Objects) {
        let objects: Objects = Arc::default();
        let app = Router::new()
            .route(
                "/upload/storage/v1/b/:bucket/o",
                post(
                    |State(objects): State<Objects>,
                     Query(q): Query<HashMap<String, String>>,
                     headers: HeaderMap,
                     body: Bytes| async move {
                        assert_eq!(headers["authorization"], "Bearer tok");
                        assert_eq!(q.get("predefinedAcl").map(String::as_str), Some("publicRead"));
                        objects.lock().await.insert(q["name"].clone(), body.to_vec());
                        StatusCode::OK
                    },
                ),
            )
            .route(
                "/storage/v1/b/:bucket/o/:object",
                get(
                    |State(objects): State<Objects>, Path((_bucket, object)): Path<(String, String)>| async move {
                        match objects.lock().await.get(&object) {
                            Some(data) => Ok(data.clone()),
                            None => Err(StatusCode::NOT_FOUND),
                        }
                    },
                ),
            )
            .with_state(objects.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), objects)
    }

    #[tokio::test]
    async fn uploads_and_downloads_objects() {
        let (endpoint, objects) = fake_gcs().await;
        let store = GcsBlobStore::new(reqwest::Client::new(), "receipts-bkt", true, Arc::new(StaticToken::new("tok")))
            .with_endpoint(&endpoint);

        let blob = store
            .put("receipts/2024/a.jpg", Bytes::from_static(b"img"), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(blob.url, format!("{endpoint}/receipts-bkt/receipts/2024/a.jpg"));
        assert!(objects.lock().await.contains_key("receipts/2024/a.jpg"));

        let data = store.get("receipts/2024/a.jpg").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"img"));
        assert!(matches!(store.get("missing").await, Err(SlipError::NotFound(_))));
    }

    #[tokio::test]
    async fn upload_rejection_is_upstream_error() {
        let app = Router::new().route(
            "/upload/storage/v1/b/:bucket/o",
            post(|| async { (StatusCode::FORBIDDEN, "caller lacks storage.objects.create") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let store = GcsBlobStore::new(reqwest::Client::new(), "receipts-bkt", false, Arc::new(StaticToken::new("tok")))
            .with_endpoint(format!("http://{addr}"));
        let err = store
            .put("receipts/2024/a.jpg", Bytes::from_static(b"img"), "image/jpeg")
            .await
            .unwrap_err();
        match &err {
            SlipError::Upstream { service, status, message } => {
                assert_eq!((service.as_str(), *status), ("gcs", 403));
                assert!(message.contains("storage.objects.create"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_retryable());
    }
}
