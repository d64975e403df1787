use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query,
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use slipscan_core::{BlobStore, JobDispatcher, ReceiptJob};
use slipscan_logging::{log_event, PipelineEvent};
use slipscan_scheduler::{JobStore, Outcome, ReceiptWorker};
use slipscan_storage::{is_image, media_router, receipt_blob_key, sniff_image_mime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{RequireApiKey, RequireWorkerSecret};
use crate::error::ApiError;

/// Shared application state for API handlers.
pub struct AppState {
    pub blobs: Arc<dyn BlobStore>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub worker: Arc<ReceiptWorker>,
    pub jobs: Arc<JobStore>,
    pub api_key: Option<String>,
    pub worker_secret: Option<String>,
}

/// Build the Axum router with all API routes. `media_dir` mounts the local
/// image server under `/media`.
pub fn build_router(state: Arc<AppState>, media_dir: Option<PathBuf>, max_upload_bytes: usize) -> Router {
    let mut app = Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/upload", post(upload_receipt))
        .route("/process-receipt", post(process_receipt))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/:id", get(get_job))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state);

    if let Some(dir) = media_dir {
        app = app.nest("/media", media_router(dir));
    }
    app
}

async fn root() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "Welcome to the Receipt Scanner API!" }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "slipscan",
        "version": env!("CARGO_PKG_VERSION"),
        "dispatch": state.dispatcher.name(),
        "storage": state.blobs.name(),
    }))
}

struct UploadedImage {
    filename: Option<String>,
    declared_type: Option<String>,
    data: Bytes,
}

/// Keeps the status axum assigns, so a body over the upload limit is a 413.
fn bad_multipart(err: MultipartError) -> ApiError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::new(status, "Uploaded file exceeds the size limit");
    }
    ApiError::new(status, format!("Invalid multipart body: {}", err.body_text()))
}

/// POST /upload: store the image and hand a job to the dispatcher.
async fn upload_receipt(
    State(state): State<Arc<AppState>>,
    _auth: RequireApiKey,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut image = None;
    let mut voice_note = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name() {
            Some("image") => {
                let filename = field.file_name().map(str::to_string);
                let declared_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(bad_multipart)?;
                image = Some(UploadedImage {
                    filename,
                    declared_type,
                    data,
                });
            }
            Some("voice_note") => voice_note = Some(field.text().await.map_err(bad_multipart)?),
            _ => {}
        }
    }

    let image = image
        .filter(|i| !i.data.is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "An image file is required"))?;
    let mime = image
        .declared_type
        .filter(|t| is_image(t))
        .or_else(|| sniff_image_mime(&image.data).map(str::to_string))
        .ok_or_else(|| ApiError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Uploaded file is not an image"))?;

    let key = receipt_blob_key(image.filename.as_deref().unwrap_or("receipt.jpg"));
    let size_bytes = image.data.len();
    let stored = state.blobs.put(&key, image.data, &mime).await?;

    let job = ReceiptJob::new(&stored.url)
        .with_blob(&stored.key, &mime)
        .with_voice_note(voice_note);
    log_event(
        job.id,
        PipelineEvent::Stored {
            key: stored.key.clone(),
            url: stored.url.clone(),
            size_bytes,
        },
    );

    let dispatched = state.dispatcher.dispatch(job).await?;
    info!(job_id = %dispatched.job_id, task = %dispatched.task_name, "Receipt accepted");
    Ok(Json(json!({
        "message": "Receipt processing task created successfully.",
        "task_name": dispatched.task_name,
        "job_id": dispatched.job_id,
        "image_url": stored.url,
    })))
}

/// POST /process-receipt: queue callback.
///
/// 200 tells the queue to drop the task, anything else makes it retry.
/// Retryable failures return 500; a delivery that overlaps a live attempt
/// of the same job returns 409.
async fn process_receipt(
    State(state): State<Arc<AppState>>,
    _secret: RequireWorkerSecret,
    headers: HeaderMap,
    payload: Result<Json<ReceiptJob>, JsonRejection>,
) -> Response {
    let task_name = headers.get("x-cloudtasks-taskname").and_then(|v| v.to_str().ok());
    let retry_count = headers.get("x-cloudtasks-taskretrycount").and_then(|v| v.to_str().ok());

    let job = match payload {
        Ok(Json(job)) => job,
        Err(rejection) => {
            warn!(task = ?task_name, error = %rejection.body_text(), "Dropping malformed worker payload");
            return (
                StatusCode::OK,
                Json(json!({ "status": "failed", "detail": rejection.body_text() })),
            )
                .into_response();
        }
    };
    info!(job_id = %job.id, task = ?task_name, retry_count = ?retry_count, "Worker callback received");

    match state.worker.process(&job).await {
        Ok(Outcome::Processed(receipt)) => (
            StatusCode::OK,
            Json(json!({
                "status": "processed",
                "job_id": job.id,
                "vendor_name": receipt.vendor_name,
                "total": receipt.total,
            })),
        )
            .into_response(),
        Ok(Outcome::AlreadyDone) => (
            StatusCode::OK,
            Json(json!({ "status": "duplicate", "job_id": job.id })),
        )
            .into_response(),
        Ok(Outcome::InProgress) => (
            StatusCode::CONFLICT,
            Json(json!({ "status": "in_progress", "job_id": job.id })),
        )
            .into_response(),
        Err(err) if err.is_retryable() => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "retrying", "job_id": job.id, "detail": err.to_string() })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::OK,
            Json(json!({ "status": "failed", "job_id": job.id, "detail": err.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct JobsQuery {
    limit: Option<usize>,
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    _auth: RequireApiKey,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let jobs = state.jobs.recent(limit)?;
    Ok(Json(json!({ "jobs": jobs })))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    _auth: RequireApiKey,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    match state.jobs.get(id)? {
        Some(job) => Ok(Json(json!(job))),
        None => Err(ApiError::not_found(format!("Job {id} not found"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use slipscan_core::{
        CategoryTable, JobStatus, LedgerSink, Receipt, ReceiptParser, SlipError, SlipResult,
    };
    use slipscan_scheduler::InlineDispatcher;
    use slipscan_storage::LocalBlobStore;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-SLIPSCAN-BOUNDARY";
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

    #[derive(Default)]
    struct FakeParser {
        failures: Mutex<Vec<SlipError>>,
    }

    #[async_trait]
    impl ReceiptParser for FakeParser {
        fn name(&self) -> &str {
            "fake"
        }
        async fn parse(&self, _image: &[u8], _mime: &str) -> SlipResult<Receipt> {
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            Ok(Receipt::new("Chipotle", 14.75))
        }
    }

    #[derive(Default)]
    struct FakeLedger(Mutex<Vec<Receipt>>);

    #[async_trait]
    impl LedgerSink for FakeLedger {
        fn name(&self) -> &str {
            "fake"
        }
        async fn append_receipt(&self, receipt: &Receipt) -> SlipResult<()> {
            self.0.lock().unwrap().push(receipt.clone());
            Ok(())
        }
    }

    struct Fixture {
        app: Router,
        ledger: Arc<FakeLedger>,
        parser: Arc<FakeParser>,
        jobs: Arc<JobStore>,
        dir: tempfile::TempDir,
    }

    fn fixture(api_key: Option<&str>, worker_secret: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path(), "http://test"));
        let parser = Arc::new(FakeParser::default());
        let ledger = Arc::new(FakeLedger::default());
        let jobs = Arc::new(JobStore::in_memory().unwrap());
        let worker = Arc::new(ReceiptWorker::new(
            parser.clone(),
            ledger.clone(),
            blobs.clone(),
            jobs.clone(),
            Arc::new(CategoryTable::default()),
        ));
        let state = Arc::new(AppState {
            blobs,
            dispatcher: Arc::new(InlineDispatcher::new(worker.clone())),
            worker,
            jobs: jobs.clone(),
            api_key: api_key.map(str::to_string),
            worker_secret: worker_secret.map(str::to_string),
        });
        let app = build_router(state, Some(dir.path().to_path_buf()), 1024 * 1024);
        Fixture { app, ledger, parser, jobs, dir }
    }

    fn multipart_body(image: Option<(&str, &[u8])>, voice_note: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some((content_type, data)) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"lunch receipt.jpg\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(note) = voice_note {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"voice_note\"\r\n\r\n{note}\r\n")
                    .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(key: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"));
        if let Some(key) = key {
            req = req.header("x-api-key", key);
        }
        req.body(Body::from(body)).unwrap()
    }

    fn callback(secret: Option<&str>, job: &ReceiptJob) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/process-receipt")
            .header("content-type", "application/json")
            .header("x-cloudtasks-taskname", "task-1");
        if let Some(secret) = secret {
            req = req.header("x-worker-secret", secret);
        }
        req.body(Body::from(serde_json::to_vec(job).unwrap())).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    fn get(uri: &str, key: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri(uri);
        if let Some(key) = key {
            req = req.header("x-api-key", key);
        }
        req.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn root_welcomes() {
        let f = fixture(None, None);
        let (status, body) = send(&f.app, get("/", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Welcome to the Receipt Scanner API!");

        let (_, health) = send(&f.app, get("/api/health", None)).await;
        assert_eq!(health["dispatch"], "inline");
        assert_eq!(health["storage"], "local");
    }

    #[tokio::test]
    async fn upload_requires_matching_key() {
        let f = fixture(Some("k3y"), None);
        let body = || multipart_body(Some(("image/jpeg", JPEG)), None);
        let (status, err) = send(&f.app, upload(None, body())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err["detail"], "Could not validate credentials");
        let (status, _) = send(&f.app, upload(Some("wrong"), body())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let unconfigured = fixture(None, None);
        let (status, _) = send(&unconfigured.app, upload(Some("anything"), body())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(f.ledger.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_processes_receipt() {
        let f = fixture(Some("k3y"), None);
        let (status, body) = send(
            &f.app,
            upload(Some("k3y"), multipart_body(Some(("image/jpeg", JPEG)), Some("client dinner"))),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["message"], "Receipt processing task created successfully.");
        let job_id = body["job_id"].as_str().unwrap();
        assert_eq!(body["task_name"], format!("inline-{job_id}"));

        let image_url = body["image_url"].as_str().unwrap();
        assert!(image_url.starts_with("http://test/media/receipts/"));
        assert!(image_url.ends_with("_lunch_receipt.jpg"));

        let rows = f.ledger.0.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].voice_note.as_deref(), Some("client dinner"));
        assert_eq!(rows[0].primary_category.as_deref(), Some("Restaurants"));

        let key = image_url.trim_start_matches("http://test/media/");
        assert_eq!(std::fs::read(f.dir.path().join(key)).unwrap(), JPEG);
    }

    #[tokio::test]
    async fn upload_validates_file() {
        let f = fixture(Some("k3y"), None);
        let (status, _) = send(&f.app, upload(Some("k3y"), multipart_body(None, Some("note")))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&f.app, upload(Some("k3y"), multipart_body(Some(("image/jpeg", &b""[..])), None))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(
            &f.app,
            upload(Some("k3y"), multipart_body(Some(("text/plain", &b"hello"[..])), None)),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        // Generic content type is accepted when the bytes are an image.
        let (status, _) = send(
            &f.app,
            upload(Some("k3y"), multipart_body(Some(("application/octet-stream", JPEG)), None)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn oversized_upload_is_413() {
        let f = fixture(Some("k3y"), None);
        let mut big = JPEG.to_vec();
        big.resize(2 * 1024 * 1024, 0);
        let (status, body) = send(&f.app, upload(Some("k3y"), multipart_body(Some(("image/jpeg", &big[..])), None))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["detail"], "Uploaded file exceeds the size limit");
        assert!(f.ledger.0.lock().unwrap().is_empty());
        assert!(f.jobs.recent(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn inline_failure_is_500_with_detail() {
        let f = fixture(Some("k3y"), None);
        f.parser.failures.lock().unwrap().push(SlipError::Parse("garbled".into()));
        let (status, body) = send(
            &f.app,
            upload(Some("k3y"), multipart_body(Some(("image/jpeg", JPEG)), None)),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().starts_with("An unexpected error occurred:"));
    }

    fn stored_job(f: &Fixture) -> ReceiptJob {
        std::fs::create_dir_all(f.dir.path().join("receipts/2024")).unwrap();
        std::fs::write(f.dir.path().join("receipts/2024/r.jpg"), JPEG).unwrap();
        ReceiptJob::new("http://test/media/receipts/2024/r.jpg").with_blob("receipts/2024/r.jpg", "image/jpeg")
    }

    #[tokio::test]
    async fn callback_success_then_duplicate() {
        let f = fixture(None, Some("shh"));
        let job = stored_job(&f);

        let (status, body) = send(&f.app, callback(Some("shh"), &job)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processed");

        let (status, body) = send(&f.app, callback(Some("shh"), &job)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "duplicate");
        assert_eq!(f.ledger.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn callback_during_live_attempt_asks_for_redelivery() {
        let f = fixture(None, None);
        let job = stored_job(&f);
        f.jobs.record_queued(&job).unwrap();
        f.jobs.mark_running(job.id).unwrap();

        let (status, body) = send(&f.app, callback(None, &job)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "in_progress");
        assert!(f.ledger.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn callback_requires_secret_when_configured() {
        let f = fixture(None, Some("shh"));
        let job = stored_job(&f);
        let (status, _) = send(&f.app, callback(None, &job)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&f.app, callback(Some("nope"), &job)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn callback_status_tracks_retryability() {
        let f = fixture(None, None);
        let job = stored_job(&f);
        f.parser
            .failures
            .lock()
            .unwrap()
            .push(SlipError::upstream("gemini", 503, "busy"));
        let (status, body) = send(&f.app, callback(None, &job)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "retrying");

        // A job whose image is gone can never succeed.
        let missing = ReceiptJob::new("http://test/media/x.jpg").with_blob("receipts/none.jpg", "image/jpeg");
        let (status, body) = send(&f.app, callback(None, &missing)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "failed");
        assert_eq!(f.jobs.get(missing.id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn legacy_payload_is_accepted() {
        let f = fixture(None, None);
        let req = Request::builder()
            .method("POST")
            .uri("/process-receipt")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"image_url": "http://127.0.0.1:9/none.jpg", "voice_note": null}"#))
            .unwrap();
        let (status, body) = send(&f.app, req).await;
        // Connection refused is a transport error, so the queue should retry.
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "retrying");

        let req = Request::builder()
            .method("POST")
            .uri("/process-receipt")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&f.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "failed");
    }

    #[tokio::test]
    async fn jobs_endpoints() {
        let f = fixture(Some("k3y"), None);
        let job = stored_job(&f);
        send(&f.app, callback(None, &job)).await;

        let (status, _) = send(&f.app, get("/api/jobs", None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&f.app, get("/api/jobs?limit=10", Some("k3y"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"].as_array().unwrap().len(), 1);

        let (status, body) = send(&f.app, get(&format!("/api/jobs/{}", job.id), Some("k3y"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["attempts"], 1);

        let (status, _) = send(&f.app, get(&format!("/api/jobs/{}", Uuid::new_v4()), Some("k3y"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn media_is_served() {
        let f = fixture(None, None);
        stored_job(&f);
        let resp = f
            .app
            .clone()
            .oneshot(get("/media/receipts/2024/r.jpg", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "image/jpeg");
    }
}
