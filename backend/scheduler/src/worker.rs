//! The receipt pipeline for one job: load image, parse, enrich, append.

use std::sync::Arc;

use bytes::Bytes;
use slipscan_core::{
    BlobStore, CategoryTable, LedgerSink, Receipt, ReceiptJob, ReceiptParser, SlipError,
    SlipResult,
};
use slipscan_logging::{log_event, PipelineEvent};
use slipscan_storage::{is_image, sniff_image_mime};
use tracing::{info, instrument, warn};

use crate::job_store::{Claim, JobStore};

/// What happened to a delivered job.
#[derive(Debug)]
pub enum Outcome {
    Processed(Receipt),
    /// The job had already succeeded; nothing was written.
    AlreadyDone,
    /// Another delivery of the same job is mid-attempt; nothing was written.
    InProgress,
}

pub struct ReceiptWorker {
    parser: Arc<dyn ReceiptParser>,
    ledger: Arc<dyn LedgerSink>,
    blobs: Arc<dyn BlobStore>,
    store: Arc<JobStore>,
    categories: Arc<CategoryTable>,
    http: reqwest::Client,
}

impl ReceiptWorker {
    pub fn new(
        parser: Arc<dyn ReceiptParser>,
        ledger: Arc<dyn LedgerSink>,
        blobs: Arc<dyn BlobStore>,
        store: Arc<JobStore>,
        categories: Arc<CategoryTable>,
    ) -> Self {
        Self {
            parser,
            ledger,
            blobs,
            store,
            categories,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Run the pipeline once for `job`.
    ///
    /// On failure the job is marked `retrying` (retryable errors) or `failed`
    /// and the error is returned; whoever delivered the job decides whether
    /// to try again.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn process(&self, job: &ReceiptJob) -> SlipResult<Outcome> {
        self.store.record_queued(job)?;
        let attempt = match self.store.mark_running(job.id)? {
            Claim::Claimed(attempt) => attempt,
            Claim::AlreadySucceeded => {
                info!("Job already succeeded, skipping duplicate delivery");
                log_event(job.id, PipelineEvent::Duplicate);
                return Ok(Outcome::AlreadyDone);
            }
            Claim::InProgress => {
                info!("Job is being processed by another delivery");
                return Ok(Outcome::InProgress);
            }
        };
        info!(attempt, image_url = %job.image_url, "Processing receipt job");

        match self.run(job).await {
            Ok(receipt) => {
                self.store.mark_succeeded(job.id)?;
                info!(vendor = %receipt.vendor_name, total = receipt.total, "Receipt job succeeded");
                Ok(Outcome::Processed(receipt))
            }
            Err((stage, err)) => {
                let message = err.to_string();
                let retryable = err.is_retryable();
                warn!(stage, retryable, error = %message, "Receipt job failed");
                log_event(
                    job.id,
                    PipelineEvent::Failed {
                        stage: stage.to_string(),
                        error: message.clone(),
                        retryable,
                    },
                );
                if retryable {
                    self.store.mark_retrying(job.id, &message)?;
                } else {
                    self.store.mark_failed(job.id, &message)?;
                }
                Err(err)
            }
        }
    }

    async fn run(&self, job: &ReceiptJob) -> Result<Receipt, (&'static str, SlipError)> {
        let (image, mime) = self.load_image(job).await.map_err(|e| ("load", e))?;

        let mut receipt = self.parser.parse(&image, &mime).await.map_err(|e| ("parse", e))?;
        log_event(
            job.id,
            PipelineEvent::Parsed {
                parser: self.parser.name().to_string(),
                vendor: receipt.vendor_name.clone(),
                total: receipt.total,
            },
        );

        receipt.attach_source(&job.image_url, job.voice_note.as_deref());
        receipt.batch_id = Some(job.id.to_string());
        receipt.enrich(&self.categories);

        self.ledger
            .append_receipt(&receipt)
            .await
            .map_err(|e| ("append", e))?;
        log_event(
            job.id,
            PipelineEvent::Appended {
                ledger: self.ledger.name().to_string(),
            },
        );
        Ok(receipt)
    }

    async fn load_image(&self, job: &ReceiptJob) -> SlipResult<(Bytes, String)> {
        let (bytes, header_mime) = match &job.blob_key {
            Some(key) => (self.blobs.get(key).await?, None),
            None => self.download(&job.image_url).await?,
        };
        let mime = job
            .content_type
            .clone()
            .or(header_mime)
            .filter(|m| is_image(m))
            .or_else(|| sniff_image_mime(&bytes).map(str::to_string))
            .unwrap_or_else(|| "image/jpeg".to_string());
        Ok((bytes, mime))
    }

    async fn download(&self, url: &str) -> SlipResult<(Bytes, Option<String>)> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SlipError::transport("image", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SlipError::upstream("image", status.as_u16(), format!("GET {url}")));
        }
        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = resp.bytes().await.map_err(|e| SlipError::transport("image", e))?;
        Ok((bytes, mime))
    }
}
