//! Google Cloud Tasks dispatcher: each job becomes an HTTP task that calls
//! back into `POST /process-receipt`.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use slipscan_core::{Dispatched, JobDispatcher, ReceiptJob, SlipError, SlipResult, TokenSource};
use slipscan_logging::{log_event, PipelineEvent};
use tracing::{info, warn};

use crate::job_store::JobStore;

const CLOUD_TASKS_ENDPOINT: &str = "https://cloudtasks.googleapis.com";

/// Header carrying the shared secret on worker callbacks.
pub const WORKER_SECRET_HEADER: &str = "X-Worker-Secret";

#[derive(Debug, Clone)]
pub struct QueuePath {
    pub project: String,
    pub location: String,
    pub queue: String,
}

impl QueuePath {
    pub fn resource(&self) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.project, self.location, self.queue
        )
    }
}

#[derive(Deserialize)]
struct CreatedTask {
    name: String,
}

pub struct CloudTasksDispatcher {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    queue: QueuePath,
    worker_url: String,
    worker_secret: Option<String>,
    endpoint: String,
    store: Arc<JobStore>,
}

impl CloudTasksDispatcher {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        queue: QueuePath,
        worker_url: impl Into<String>,
        worker_secret: Option<String>,
        store: Arc<JobStore>,
    ) -> Self {
        Self {
            client,
            tokens,
            queue,
            worker_url: worker_url.into(),
            worker_secret,
            endpoint: CLOUD_TASKS_ENDPOINT.to_string(),
            store,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// The `CreateTask` request body for `job`.
    pub fn task_body(&self, job: &ReceiptJob) -> SlipResult<serde_json::Value> {
        let payload = serde_json::to_vec(job)
            .map_err(|e| SlipError::Dispatch(format!("cannot encode job: {e}")))?;
        let mut headers = serde_json::Map::new();
        headers.insert("Content-Type".into(), "application/json".into());
        if let Some(secret) = &self.worker_secret {
            headers.insert(WORKER_SECRET_HEADER.into(), secret.clone().into());
        }
        Ok(serde_json::json!({
            "task": {
                "httpRequest": {
                    "httpMethod": "POST",
                    "url": self.worker_url,
                    "headers": headers,
                    "body": STANDARD.encode(payload),
                }
            }
        }))
    }

    /// POST the task and return the name Cloud Tasks assigned to it.
    async fn create_task(&self, job: &ReceiptJob) -> SlipResult<String> {
        let body = self.task_body(job)?;
        let token = self.tokens.access_token().await?;

        let url = format!("{}/v2/{}/tasks", self.endpoint, self.queue.resource());
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SlipError::transport("cloud_tasks", e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SlipError::upstream("cloud_tasks", status.as_u16(), text));
        }
        let created: CreatedTask = resp
            .json()
            .await
            .map_err(|e| SlipError::Dispatch(format!("unexpected Cloud Tasks response: {e}")))?;
        Ok(created.name)
    }
}

#[async_trait]
impl JobDispatcher for CloudTasksDispatcher {
    fn name(&self) -> &str {
        "cloud_tasks"
    }

    async fn dispatch(&self, job: ReceiptJob) -> SlipResult<Dispatched> {
        self.store.record_queued(&job)?;
        let task_name = match self.create_task(&job).await {
            Ok(name) => name,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Cloud Task creation failed");
                self.store.mark_failed(job.id, &err.to_string())?;
                return Err(err);
            }
        };

        self.store.set_task_name(job.id, &task_name)?;
        info!(job_id = %job.id, task = %task_name, "Created Cloud Task");
        log_event(
            job.id,
            PipelineEvent::Dispatched {
                dispatcher: self.name().to_string(),
                task_name: task_name.clone(),
            },
        );
        Ok(Dispatched {
            job_id: job.id,
            task_name,
        })
    }
}
